//! In-memory `DurableLog`, used by tests and when no log file is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::sync::RwLock;

use super::traits::{CompletionRecord, DurableLog, tail};
use crate::error::StorageError;

#[derive(Default)]
pub struct InMemoryLog {
    records: RwLock<HashMap<String, Vec<CompletionRecord>>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all users.
    pub async fn len(&self) -> usize {
        self.records.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DurableLog for InMemoryLog {
    async fn append(
        &self,
        user_id: &str,
        input_text: &str,
        response_text: &str,
        at: DateTime<Local>,
    ) -> Result<(), StorageError> {
        self.records
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .push(CompletionRecord::new(input_text, response_text, at));
        Ok(())
    }

    async fn read_recent(
        &self,
        user_id: &str,
        n: usize,
    ) -> Result<Vec<CompletionRecord>, StorageError> {
        let records = self
            .records
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        Ok(tail(records, n))
    }

    async fn delete(&self, user_id: &str) -> Result<bool, StorageError> {
        Ok(self.records.write().await.remove(user_id).is_some())
    }
}
