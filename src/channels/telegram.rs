//! Telegram channel: long-polls the Bot API for updates.
//!
//! `TelegramApi` wraps the handful of Bot API methods the bot needs and is
//! shared with the webhook transport. Voice notes are downloaded and run
//! through the configured `Transcriber` before they reach the bot.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::channels::{
    Channel, IncomingMessage, MessageStream, OutgoingResponse, ReplyKeyboard, StatusUpdate,
};
use crate::error::ChannelError;
use crate::llm::Transcriber;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Upper bound on resolving and fetching one file.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct GetFileResponse {
    ok: bool,
    result: Option<GetFileResult>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetFileResult {
    file_path: String,
}

/// Thin client for the Telegram Bot API.
pub struct TelegramApi {
    bot_token: String,
    base_url: String,
    client: reqwest::Client,
    download_timeout: Duration,
}

impl TelegramApi {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            base_url: TELEGRAM_API_BASE.to_string(),
            client: reqwest::Client::new(),
            download_timeout: DOWNLOAD_TIMEOUT,
        }
    }

    /// Point the client at a different API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base_url, self.bot_token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{file_path}", self.base_url, self.bot_token)
    }

    async fn call(&self, method: &str, body: &Value) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: {e}")))?;

        let status = resp.status();
        let data: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: invalid response: {e}")))?;

        if !status.is_success() || data.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(ChannelError::Http(format!(
                "{method} failed ({status}): {description}"
            )));
        }
        Ok(data.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Value>, ChannelError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"]
        });
        let result = self.call("getUpdates", &body).await?;
        Ok(result.as_array().cloned().unwrap_or_default())
    }

    /// Send a text message, splitting it at Telegram's length limit.
    /// The keyboard, if any, is attached to the last chunk.
    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<&ReplyKeyboard>,
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last { keyboard } else { None };
            self.send_message_chunk(chat_id, chunk, markup).await?;
        }
        Ok(())
    }

    /// Send a single message chunk, Markdown-first with plain-text fallback.
    async fn send_message_chunk(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<&ReplyKeyboard>,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = keyboard_markup(kb);
        }

        let markdown_err = match self.call("sendMessage", &body).await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };
        tracing::warn!(
            error = %markdown_err,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        if let Some(obj) = body.as_object_mut() {
            obj.remove("parse_mode");
        }
        self.call("sendMessage", &body)
            .await
            .map(|_| ())
            .map_err(|plain_err| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage failed (markdown: {markdown_err}, plain: {plain_err})"),
            })
    }

    /// Show the "typing" indicator.
    pub async fn send_typing(&self, chat_id: &str) -> Result<(), ChannelError> {
        self.call(
            "sendChatAction",
            &serde_json::json!({ "chat_id": chat_id, "action": "typing" }),
        )
        .await
        .map(|_| ())
    }

    pub async fn get_me(&self) -> Result<Value, ChannelError> {
        self.call("getMe", &serde_json::json!({})).await
    }

    pub async fn set_webhook(&self, url: &str) -> Result<(), ChannelError> {
        self.call("setWebhook", &serde_json::json!({ "url": url }))
            .await
            .map(|_| ())
    }

    pub async fn delete_webhook(&self) -> Result<(), ChannelError> {
        self.call("deleteWebhook", &serde_json::json!({}))
            .await
            .map(|_| ())
    }

    /// Resolve a `file_id` and download the file's bytes.
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        tokio::time::timeout(self.download_timeout, self.fetch_file(file_id))
            .await
            .map_err(|_| ChannelError::DownloadFailed {
                file_id: file_id.to_string(),
                reason: format!("timed out after {}s", self.download_timeout.as_secs_f32()),
            })?
    }

    async fn fetch_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        let download_failed = |reason: String| ChannelError::DownloadFailed {
            file_id: file_id.to_string(),
            reason,
        };

        let resp = self
            .client
            .post(self.api_url("getFile"))
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await
            .map_err(|e| download_failed(e.to_string()))?;
        let parsed: GetFileResponse = resp
            .json()
            .await
            .map_err(|e| download_failed(format!("getFile decode failed: {e}")))?;
        if !parsed.ok {
            return Err(download_failed(
                parsed
                    .description
                    .unwrap_or_else(|| "unknown getFile error".to_string()),
            ));
        }
        let file_path = parsed
            .result
            .ok_or_else(|| download_failed("getFile missing result".into()))?
            .file_path;

        let resp = self
            .client
            .get(self.file_url(&file_path))
            .send()
            .await
            .map_err(|e| download_failed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(download_failed(format!("download returned {}", resp.status())));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| download_failed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Render a keyboard as Telegram `ReplyKeyboardMarkup`.
fn keyboard_markup(keyboard: &ReplyKeyboard) -> Value {
    let rows: Vec<Vec<Value>> = keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|label| serde_json::json!({ "text": label }))
                .collect()
        })
        .collect();
    serde_json::json!({
        "keyboard": rows,
        "resize_keyboard": keyboard.resize,
        "one_time_keyboard": keyboard.one_time,
    })
}

// ── Update parsing ──────────────────────────────────────────────────

/// A Telegram update the bot cares about.
#[derive(Debug, Clone)]
pub enum ParsedUpdate {
    Text(IncomingMessage),
    /// A voice note or audio file that still needs transcribing.
    Voice {
        message: IncomingMessage,
        file_id: String,
        file_name: String,
    },
}

/// Extract an inbound message from a raw update.
///
/// Returns `None` for updates without a message, without text or audio, or
/// from users outside the allow-list.
pub fn parse_update(update: &Value, allowed_users: &[String]) -> Option<ParsedUpdate> {
    let message = update.get("message")?;
    let from = message.get("from");

    let username = from
        .and_then(|f| f.get("username"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let user_id = from
        .and_then(|f| f.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string());

    let mut identities = vec![username];
    if let Some(ref id) = user_id {
        identities.push(id.as_str());
    }
    if !check_user_allowed(allowed_users, identities) {
        tracing::warn!(
            "Telegram: ignoring message from unauthorized user: username={username}, user_id={}",
            user_id.as_deref().unwrap_or("unknown")
        );
        return None;
    }

    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_default();
    let first_name = from
        .and_then(|f| f.get("first_name"))
        .and_then(Value::as_str)
        .unwrap_or(username);

    let build = |text: &str| {
        IncomingMessage::new("telegram", user_id.as_deref().unwrap_or(username), text)
            .with_metadata(serde_json::json!({
                "chat_id": chat_id,
                "username": username,
            }))
            .with_user_name(first_name)
    };

    if let Some(text) = message.get("text").and_then(Value::as_str) {
        return Some(ParsedUpdate::Text(build(text)));
    }

    let (audio, default_name) = if let Some(voice) = message.get("voice") {
        (voice, "voice.ogg")
    } else if let Some(audio) = message.get("audio") {
        (audio, "audio.mp3")
    } else {
        return None;
    };
    let file_id = audio.get("file_id").and_then(Value::as_str)?;
    let file_name = audio
        .get("file_name")
        .and_then(Value::as_str)
        .unwrap_or(default_name);

    Some(ParsedUpdate::Voice {
        message: build("").from_voice(),
        file_id: file_id.to_string(),
        file_name: file_name.to_string(),
    })
}

/// Turn a parsed update into a text message, transcribing voice notes.
///
/// A voice note that can't be transcribed comes through with empty content
/// so the bot can tell the user.
pub async fn resolve_update(
    api: &TelegramApi,
    transcriber: Option<&dyn Transcriber>,
    parsed: ParsedUpdate,
) -> IncomingMessage {
    let (mut message, file_id, file_name) = match parsed {
        ParsedUpdate::Text(message) => return message,
        ParsedUpdate::Voice {
            message,
            file_id,
            file_name,
        } => (message, file_id, file_name),
    };

    let Some(transcriber) = transcriber else {
        tracing::debug!(user_id = %message.user_id, "Voice note received but transcription is off");
        return message;
    };

    let audio = match api.download_file(&file_id).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(user_id = %message.user_id, error = %e, "Voice download failed");
            return message;
        }
    };

    match transcriber.transcribe(audio, &file_name).await {
        Ok(text) => {
            tracing::info!(user_id = %message.user_id, chars = text.chars().count(), "Voice note transcribed");
            message.content = text;
        }
        Err(e) => {
            tracing::warn!(user_id = %message.user_id, error = %e, "Voice transcription failed");
        }
    }
    message
}

/// Hand a parsed update to the bot.
///
/// Text goes straight through. Voice notes are transcribed on their own
/// task so a slow download or transcription never holds up other updates.
/// Returns `false` once the receiving side is gone.
pub(crate) fn forward_update(
    api: &Arc<TelegramApi>,
    transcriber: Option<&Arc<dyn Transcriber>>,
    parsed: ParsedUpdate,
    tx: &mpsc::UnboundedSender<IncomingMessage>,
) -> bool {
    match parsed {
        ParsedUpdate::Text(message) => tx.send(message).is_ok(),
        voice @ ParsedUpdate::Voice { .. } => {
            if tx.is_closed() {
                return false;
            }
            let api = Arc::clone(api);
            let transcriber = transcriber.cloned();
            let tx = tx.clone();
            tokio::spawn(async move {
                let incoming = resolve_update(&api, transcriber.as_deref(), voice).await;
                if tx.send(incoming).is_err() {
                    tracing::debug!("Transcribed voice note dropped: receiver closed");
                }
            });
            true
        }
    }
}

// ── Polling channel ─────────────────────────────────────────────────

/// Telegram channel: connects to the Bot API via long-polling.
pub struct TelegramChannel {
    api: Arc<TelegramApi>,
    allowed_users: Vec<String>,
    transcriber: Option<Arc<dyn Transcriber>>,
}

impl TelegramChannel {
    pub fn new(api: Arc<TelegramApi>, allowed_users: Vec<String>) -> Self {
        Self {
            api,
            allowed_users,
            transcriber: None,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Check if a username or numeric id is in the allowed list.
    pub fn is_user_allowed(&self, identity: &str) -> bool {
        check_user_allowed(&self.allowed_users, [identity])
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        // getUpdates is refused while a webhook is registered.
        if let Err(e) = self.api.delete_webhook().await {
            tracing::warn!("Telegram deleteWebhook before polling failed: {e}");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let api = Arc::clone(&self.api);
        let allowed_users = self.allowed_users.clone();
        let transcriber = self.transcriber.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let updates = match api.get_updates(offset, 30).await {
                    Ok(updates) => updates,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                for update in updates {
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(parsed) = parse_update(&update, &allowed_users) else {
                        continue;
                    };
                    if !forward_update(&api, transcriber.as_ref(), parsed, &tx) {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let chat_id = chat_id_of(&msg.metadata)?;
        self.api
            .send_message(chat_id, &response.content, response.keyboard.as_ref())
            .await
    }

    async fn send_status(
        &self,
        status: StatusUpdate,
        metadata: &Value,
    ) -> Result<(), ChannelError> {
        send_status_via(&self.api, status, metadata).await
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.api
            .get_me()
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// The `chat_id` a Telegram reply goes to.
pub(crate) fn chat_id_of(metadata: &Value) -> Result<&str, ChannelError> {
    metadata
        .get("chat_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ChannelError::SendFailed {
            name: "telegram".into(),
            reason: "No chat_id in message metadata".into(),
        })
}

pub(crate) async fn send_status_via(
    api: &TelegramApi,
    status: StatusUpdate,
    metadata: &Value,
) -> Result<(), ChannelError> {
    let Ok(chat_id) = chat_id_of(metadata) else {
        return Ok(());
    };
    match status {
        StatusUpdate::Thinking(_) => {
            let _ = api.send_typing(chat_id).await;
        }
        StatusUpdate::Status(ref msg) if !msg.is_empty() => {
            let _ = api.send_message(chat_id, msg, None).await;
        }
        StatusUpdate::Status(_) => {}
    }
    Ok(())
}

/// Check if any identity matches the allowed users list.
pub(crate) fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Split a message into chunks of at most `max_chars` characters.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let limit = match remaining.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => byte_idx,
            None => {
                chunks.push(remaining.to_string());
                break;
            }
        };

        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
