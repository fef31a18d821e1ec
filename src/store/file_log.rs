//! `DurableLog` backed by a single JSON file keyed by user id.
//!
//! Layout:
//! ```json
//! {
//!   "123456": [
//!     { "timestamp": "2024-03-09 14:05", "input": "...", "response": "..." }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::sync::Mutex;

use super::json_file::JsonFile;
use super::traits::{CompletionRecord, DurableLog, tail};
use crate::error::StorageError;

type LogDocument = BTreeMap<String, Vec<CompletionRecord>>;

/// File-backed durable log. Writes are serialised within the process.
pub struct JsonFileLog {
    file: JsonFile,
    write_lock: Mutex<()>,
}

impl JsonFileLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl DurableLog for JsonFileLog {
    async fn append(
        &self,
        user_id: &str,
        input_text: &str,
        response_text: &str,
        at: DateTime<Local>,
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut doc: LogDocument = self.file.load().await?;
        doc.entry(user_id.to_string())
            .or_default()
            .push(CompletionRecord::new(input_text, response_text, at));
        self.file.save(&doc).await?;
        tracing::debug!(user_id, path = %self.file.path().display(), "Record appended");
        Ok(())
    }

    async fn read_recent(
        &self,
        user_id: &str,
        n: usize,
    ) -> Result<Vec<CompletionRecord>, StorageError> {
        let mut doc: LogDocument = self.file.load().await?;
        let records = doc.remove(user_id).unwrap_or_default();
        Ok(tail(records, n))
    }

    async fn delete(&self, user_id: &str) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut doc: LogDocument = self.file.load().await?;
        if doc.remove(user_id).is_none() {
            return Ok(false);
        }
        self.file.save(&doc).await?;
        tracing::info!(user_id, "User log deleted");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_in(dir: &tempfile::TempDir) -> JsonFileLog {
        JsonFileLog::new(dir.path().join("analysis_memory.json"))
    }

    #[tokio::test]
    async fn append_then_read_recent_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        for i in 0..5 {
            log.append("1", &format!("in{i}"), &format!("out{i}"), Local::now())
                .await
                .unwrap();
        }
        let recent = log.read_recent("1", 3).await.unwrap();
        let inputs: Vec<_> = recent.iter().map(|r| r.input_text.as_str()).collect();
        assert_eq!(inputs, ["in2", "in3", "in4"]);
        assert_eq!(log.read_all("1").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.append("1", "a", "b", Local::now()).await.unwrap();
        log.append("2", "c", "d", Local::now()).await.unwrap();
        assert_eq!(log.read_all("1").await.unwrap()[0].input_text, "a");
        assert_eq!(log.read_all("2").await.unwrap()[0].input_text, "c");
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.append("1", "a", "b", Local::now()).await.unwrap();
        assert!(log.delete("1").await.unwrap());
        assert!(!log.delete("1").await.unwrap());
        assert!(log.read_all("1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn on_disk_layout_is_keyed_by_user() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.append("777", "вход", "выход", Local::now()).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("analysis_memory.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        let entry = &doc["777"][0];
        assert_eq!(entry["input"], "вход");
        assert_eq!(entry["response"], "выход");
        assert!(entry["timestamp"].is_string());
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let log = std::sync::Arc::new(log_in(&dir));
        let mut handles = Vec::new();
        for i in 0..10 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append("1", &format!("in{i}"), "out", Local::now())
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(log.read_all("1").await.unwrap().len(), 10);
    }
}
