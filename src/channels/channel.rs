//! The `Channel` trait and the message types that flow through it.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Stream of inbound messages produced by a started channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// A message received from a user.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Channel that delivered the message (`"telegram"`, `"cli"`, ...).
    pub channel: String,
    /// Stable identifier of the sender.
    pub user_id: String,
    /// Display name, when the channel knows one.
    pub user_name: Option<String>,
    /// Message text. Voice notes arrive here already transcribed.
    pub content: String,
    /// Whether `content` came from a voice transcription.
    pub from_voice: bool,
    /// Channel-specific routing data (e.g. Telegram `chat_id`).
    pub metadata: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(channel: &str, user_id: &str, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            user_id: user_id.to_string(),
            user_name: None,
            content: content.to_string(),
            from_voice: false,
            metadata: serde_json::Value::Null,
            received_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_user_name(mut self, name: &str) -> Self {
        self.user_name = Some(name.to_string());
        self
    }

    pub fn from_voice(mut self) -> Self {
        self.from_voice = true;
        self
    }
}

/// A reply keyboard shown under the input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyKeyboard {
    pub rows: Vec<Vec<String>>,
    pub resize: bool,
    pub one_time: bool,
}

/// A reply to send back.
#[derive(Debug, Clone)]
pub struct OutgoingResponse {
    pub content: String,
    /// Passed through to the transport untouched.
    pub keyboard: Option<ReplyKeyboard>,
}

impl OutgoingResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: ReplyKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Transient status shown while a reply is being prepared.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    /// Work in progress (shown as "typing" where supported).
    Thinking(String),
    /// An informational line.
    Status(String),
}

/// A bidirectional message transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Name used to route replies back to this channel.
    fn name(&self) -> &str;

    /// Begin receiving messages.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Send a reply to the author of `msg`.
    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError>;

    /// Show a status update for the conversation identified by `metadata`.
    async fn send_status(
        &self,
        _status: StatusUpdate,
        _metadata: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Verify the channel can reach its backend.
    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
