//! Integration tests for the OpenAI-compatible client against a local fake API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use vova_bot::error::LlmError;
use vova_bot::llm::{
    ChatMessage, CompletionRequest, FALLBACK_LINES, LlmProvider, OpenAiProvider, Transcriber,
    fallback_reply,
};

#[derive(Clone, Default)]
struct Seen {
    chat_bodies: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<String>>>,
    content_types: Arc<Mutex<Vec<String>>>,
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn chat(State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    seen.auth.lock().unwrap().push(header(&headers, "authorization"));
    seen.chat_bodies.lock().unwrap().push(body);
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": "Держись." } }],
        "usage": { "prompt_tokens": 12, "completion_tokens": 3 }
    }))
}

async fn transcribe(State(seen): State<Seen>, headers: HeaderMap) -> Json<Value> {
    seen.content_types
        .lock()
        .unwrap()
        .push(header(&headers, "content-type"));
    Json(json!({ "text": "  привет, Вова  " }))
}

async fn slow_chat() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!({ "choices": [] }))
}

async fn limited() -> (StatusCode, Json<Value>) {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": { "message": "slow down" } })),
    )
}

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{port}")
}

fn provider(base: &str, timeout: Duration) -> OpenAiProvider {
    OpenAiProvider::new(base, SecretString::from("sk-test"), "gpt-4", timeout)
        .with_temperature(0.8)
        .with_max_tokens(Some(500))
}

#[tokio::test]
async fn chat_completion_round_trip() {
    let seen = Seen::default();
    let base = spawn(
        Router::new()
            .route("/v1/chat/completions", post(chat))
            .with_state(seen.clone()),
    )
    .await;
    let llm = provider(&base, Duration::from_secs(5));

    let response = llm
        .complete(
            CompletionRequest::new(vec![
                ChatMessage::system("Ты — Вова."),
                ChatMessage::user("мне грустно"),
            ])
            .with_temperature(0.7),
        )
        .await
        .unwrap();

    assert_eq!(response.content, "Держись.");
    assert_eq!(response.input_tokens, 12);
    assert_eq!(response.output_tokens, 3);

    assert_eq!(seen.auth.lock().unwrap()[0], "Bearer sk-test");
    let body = seen.chat_bodies.lock().unwrap()[0].clone();
    assert_eq!(body["model"], "gpt-4");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "мне грустно");
    // Request override beats the provider default.
    assert!((body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    assert_eq!(body["max_tokens"], 500);
}

#[tokio::test]
async fn transcription_sends_multipart_and_trims() {
    let seen = Seen::default();
    let base = spawn(
        Router::new()
            .route("/v1/audio/transcriptions", post(transcribe))
            .with_state(seen.clone()),
    )
    .await;
    let llm = provider(&base, Duration::from_secs(5));

    let text = llm
        .transcribe(b"OggS".to_vec(), "voice.ogg")
        .await
        .unwrap();
    assert_eq!(text, "привет, Вова");
    assert!(seen.content_types.lock().unwrap()[0].starts_with("multipart/form-data"));
}

#[tokio::test]
async fn slow_provider_times_out() {
    let base = spawn(Router::new().route("/v1/chat/completions", post(slow_chat))).await;
    let llm = provider(&base, Duration::from_millis(100));

    let err = llm
        .complete(CompletionRequest::new(vec![ChatMessage::user("эй")]))
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::Timeout { .. }));
    assert_eq!(fallback_reply(&err), FALLBACK_LINES[1]);
}

#[tokio::test]
async fn rate_limit_maps_to_its_own_fallback() {
    let base = spawn(Router::new().route("/v1/chat/completions", post(limited))).await;
    let llm = provider(&base, Duration::from_secs(5));

    let err = llm
        .complete(CompletionRequest::new(vec![ChatMessage::user("эй")]))
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::RateLimited { .. }));
    assert_eq!(fallback_reply(&err), FALLBACK_LINES[2]);
}

#[tokio::test]
async fn malformed_body_is_an_invalid_response() {
    async fn garbage() -> &'static str {
        "<html>gateway says hi</html>"
    }
    let base = spawn(Router::new().route("/v1/chat/completions", post(garbage))).await;
    let llm = provider(&base, Duration::from_secs(5));

    let err = llm
        .complete(CompletionRequest::new(vec![ChatMessage::user("эй")]))
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::InvalidResponse { .. }));
    assert_eq!(fallback_reply(&err), FALLBACK_LINES[0]);
}
