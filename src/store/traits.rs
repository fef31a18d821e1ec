//! `DurableLog` trait: the per-user record store behind analyses and summaries.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Timestamp format used in persisted records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Records read back into analysis prompts.
pub const ANALYSIS_CONTEXT_RECORDS: usize = 3;

/// Records read back into summaries.
pub const SUMMARY_RECORDS: usize = 5;

/// One completed exchange as persisted on disk.
///
/// The user id is the key of the enclosing map, so it isn't stored inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub timestamp: String,
    #[serde(rename = "input")]
    pub input_text: String,
    #[serde(rename = "response")]
    pub response_text: String,
}

impl CompletionRecord {
    pub fn new(
        input_text: impl Into<String>,
        response_text: impl Into<String>,
        at: DateTime<Local>,
    ) -> Self {
        Self {
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            input_text: input_text.into(),
            response_text: response_text.into(),
        }
    }
}

/// Append-only per-user log of completions.
#[async_trait]
pub trait DurableLog: Send + Sync {
    /// Append a record for `user_id`.
    async fn append(
        &self,
        user_id: &str,
        input_text: &str,
        response_text: &str,
        at: DateTime<Local>,
    ) -> Result<(), StorageError>;

    /// Up to `n` most recent records for `user_id`, oldest first.
    async fn read_recent(
        &self,
        user_id: &str,
        n: usize,
    ) -> Result<Vec<CompletionRecord>, StorageError>;

    /// Every record for `user_id`, oldest first.
    async fn read_all(&self, user_id: &str) -> Result<Vec<CompletionRecord>, StorageError> {
        self.read_recent(user_id, usize::MAX).await
    }

    /// Drop every record for `user_id`. Returns whether any existed.
    async fn delete(&self, user_id: &str) -> Result<bool, StorageError>;
}

/// Keep the last `n` items of `records`.
pub(crate) fn tail(mut records: Vec<CompletionRecord>, n: usize) -> Vec<CompletionRecord> {
    let skip = records.len().saturating_sub(n);
    records.drain(..skip);
    records
}
