//! Per-user session entry: position within a flow plus what was collected.

use serde::{Deserialize, Serialize};

use super::flow::FlowKind;
use crate::llm::ChatMessage;

/// In-memory record of one user's progress through a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub user_id: String,
    pub flow_kind: FlowKind,
    /// Index of the stage whose answer is awaited.
    pub step: usize,
    /// Answers by field name, in the order they were given.
    pub collected_fields: Vec<(String, String)>,
    /// Conversation accumulated during an intake.
    pub transcript: Vec<ChatMessage>,
}

impl SessionEntry {
    pub fn new(user_id: impl Into<String>, flow_kind: FlowKind) -> Self {
        Self {
            user_id: user_id.into(),
            flow_kind,
            step: 0,
            collected_fields: Vec::new(),
            transcript: Vec::new(),
        }
    }

    /// Store an answer. Returns `false` (and keeps the old value) if the
    /// field was already set.
    pub fn record_field(&mut self, field: &str, text: &str) -> bool {
        if self.field(field).is_some() {
            tracing::warn!(user_id = %self.user_id, field, "Field already recorded, keeping first answer");
            return false;
        }
        self.collected_fields
            .push((field.to_string(), text.to_string()));
        true
    }

    pub fn field(&self, field: &str) -> Option<&str> {
        self.collected_fields
            .iter()
            .find(|(k, _)| k == field)
            .map(|(_, v)| v.as_str())
    }

    /// Move to the next stage and return it.
    pub fn advance_step(&mut self) -> usize {
        self.step += 1;
        self.step
    }

    /// Transcript as plain text, one `role: content` block per message.
    pub fn render_transcript(&self) -> String {
        self.transcript
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
