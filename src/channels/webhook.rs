//! Telegram webhook channel: receives updates over HTTP instead of polling.
//!
//! `start()` registers the public URL with Telegram (dropping any previous
//! registration first) and serves `POST {path}` on the configured port.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use futures::stream;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

use crate::channels::telegram::{
    TelegramApi, chat_id_of, forward_update, parse_update, send_status_via,
};
use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate};
use crate::error::ChannelError;
use crate::llm::Transcriber;

/// Where Telegram should deliver updates.
#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// Public base URL, e.g. `https://vova.example.com`.
    pub public_url: String,
    /// Route the updates are posted to.
    pub path: String,
    pub port: u16,
}

impl WebhookSettings {
    /// Full URL handed to `setWebhook`.
    pub fn webhook_url(&self) -> String {
        format!("{}{}", self.public_url.trim_end_matches('/'), self.path)
    }
}

struct WebhookInner {
    api: Arc<TelegramApi>,
    allowed_users: Vec<String>,
    transcriber: Option<Arc<dyn Transcriber>>,
    incoming_tx: mpsc::UnboundedSender<IncomingMessage>,
}

#[derive(Clone)]
struct WebhookState {
    inner: Arc<WebhookInner>,
}

pub struct WebhookChannel {
    inner: Arc<WebhookInner>,
    settings: WebhookSettings,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<IncomingMessage>>>,
}

impl WebhookChannel {
    pub fn new(
        api: Arc<TelegramApi>,
        allowed_users: Vec<String>,
        transcriber: Option<Arc<dyn Transcriber>>,
        settings: WebhookSettings,
    ) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(WebhookInner {
                api,
                allowed_users,
                transcriber,
                incoming_tx,
            }),
            settings,
            incoming_rx: Mutex::new(Some(incoming_rx)),
        }
    }

    /// Router with the update endpoint.
    pub fn router(&self) -> Router {
        let state = WebhookState {
            inner: Arc::clone(&self.inner),
        };
        Router::new()
            .route(&self.settings.path, post(receive_update))
            .with_state(state)
    }

    async fn register(&self) -> Result<(), ChannelError> {
        let url = self.settings.webhook_url();
        if let Err(e) = self.inner.api.delete_webhook().await {
            tracing::warn!("Telegram deleteWebhook failed: {e}");
        }
        self.inner
            .api
            .set_webhook(&url)
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "webhook".into(),
                reason: format!("setWebhook {url}: {e}"),
            })?;
        tracing::info!(url = %url, "Telegram webhook registered");
        Ok(())
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let rx = self
            .incoming_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ChannelError::StartupFailed {
                name: "webhook".to_string(),
                reason: "start() already called".to_string(),
            })?;

        let addr = format!("0.0.0.0:{}", self.settings.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "webhook".into(),
                reason: format!("bind {addr}: {e}"),
            })?;

        self.register().await?;

        let app = self.router();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Webhook server stopped: {e}");
            }
        });
        tracing::info!(
            port = self.settings.port,
            path = %self.settings.path,
            "Webhook server started"
        );

        let stream = stream::unfold(rx, |mut rx| async move {
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
        self.inner
            .api
            .send_message(chat_id, &response.content, response.keyboard.as_ref())
            .await
    }

    async fn send_status(
        &self,
        status: StatusUpdate,
        metadata: &Value,
    ) -> Result<(), ChannelError> {
        send_status_via(&self.inner.api, status, metadata).await
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.inner.api.get_me().await.map(|_| ())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Webhook channel shutting down");
        Ok(())
    }
}

/// Telegram retries anything other than 2xx, so every well-formed update is
/// acknowledged even when it is ignored. Voice notes are acknowledged before
/// they are transcribed.
async fn receive_update(State(state): State<WebhookState>, Json(update): Json<Value>) -> StatusCode {
    let inner = &state.inner;
    let Some(parsed) = parse_update(&update, &inner.allowed_users) else {
        return StatusCode::OK;
    };
    if !forward_update(&inner.api, inner.transcriber.as_ref(), parsed, &inner.incoming_tx) {
        tracing::warn!("Webhook update dropped: bot loop is not running");
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use futures::StreamExt;
    use tower::ServiceExt;

    fn channel(allowed: &[&str]) -> WebhookChannel {
        WebhookChannel::new(
            Arc::new(TelegramApi::new("123:ABC".into())),
            allowed.iter().map(|s| s.to_string()).collect(),
            None,
            WebhookSettings {
                public_url: "https://vova.example.com/".into(),
                path: "/webhook".into(),
                port: 0,
            },
        )
    }

    fn post_update(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn text_update(text: &str) -> Value {
        serde_json::json!({
            "update_id": 1,
            "message": {
                "from": { "id": 42, "username": "masha" },
                "chat": { "id": 42 },
                "text": text
            }
        })
    }

    #[test]
    fn webhook_url_joins_base_and_path() {
        assert_eq!(
            channel(&["*"]).settings.webhook_url(),
            "https://vova.example.com/webhook"
        );
    }

    #[tokio::test]
    async fn posted_update_reaches_stream() {
        let ch = channel(&["*"]);
        let rx = ch.incoming_rx.lock().await.take().unwrap();
        let mut stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        })
        .boxed();

        let resp = ch.router().oneshot(post_update(text_update("привет"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let msg = stream.next().await.unwrap();
        assert_eq!(msg.user_id, "42");
        assert_eq!(msg.content, "привет");
        assert_eq!(chat_id_of(&msg.metadata).unwrap(), "42");
    }

    #[tokio::test]
    async fn voice_update_is_acknowledged_then_delivered() {
        let ch = channel(&["*"]);
        let mut rx = ch.incoming_rx.lock().await.take().unwrap();

        let voice = serde_json::json!({
            "update_id": 2,
            "message": {
                "from": { "id": 42 },
                "chat": { "id": 42 },
                "voice": { "file_id": "v1", "duration": 3 }
            }
        });
        let resp = ch.router().oneshot(post_update(voice)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let msg = rx.recv().await.unwrap();
        assert!(msg.from_voice);
        assert!(msg.content.is_empty());
    }

    #[tokio::test]
    async fn unauthorized_update_is_acknowledged_but_dropped() {
        let ch = channel(&["someone_else"]);
        let mut rx = ch.incoming_rx.lock().await.take().unwrap();

        let resp = ch.router().oneshot(post_update(text_update("hi"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn other_paths_are_not_routed() {
        let ch = channel(&["*"]);
        let req = Request::builder()
            .method("POST")
            .uri("/elsewhere")
            .header("content-type", "application/json")
            .body(Body::from(text_update("hi").to_string()))
            .unwrap();
        let resp = ch.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
