//! OpenAI-compatible chat completions and audio transcription over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Transcriber,
};

const PROVIDER: &str = "openai";

/// Model used for voice transcription.
pub const TRANSCRIPTION_MODEL: &str = "whisper-1";

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionReply {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct TranscriptionReply {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Client for an OpenAI-compatible API.
pub struct OpenAiProvider {
    client: Client,
    api_url: String,
    api_key: SecretString,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(
        api_url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature: None,
            max_tokens: None,
            timeout,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.api_url)
    }

    async fn send_chat(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = ChatCompletionBody {
            model,
            messages: &request.messages,
            temperature: request.temperature.or(self.temperature),
            max_tokens: request.max_tokens.or(self.max_tokens),
        };

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text, model));
        }

        let reply: ChatCompletionReply =
            response.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: "no content in first choice".into(),
            })?;

        let (input_tokens, output_tokens) = reply
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        tracing::debug!(model, input_tokens, output_tokens, "Chat completion finished");

        Ok(CompletionResponse {
            content,
            input_tokens,
            output_tokens,
        })
    }

    async fn send_transcription(&self, audio: Vec<u8>, file_name: &str) -> Result<String, LlmError> {
        let part = Part::bytes(audio).file_name(file_name.to_string());
        let form = Form::new()
            .text("model", TRANSCRIPTION_MODEL)
            .part("file", part);

        let response = self
            .client
            .post(self.endpoint("audio/transcriptions"))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text, TRANSCRIPTION_MODEL));
        }

        let reply: TranscriptionReply =
            response.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;
        Ok(reply.text.trim().to_string())
    }

    fn timed_out(&self) -> LlmError {
        LlmError::Timeout {
            provider: PROVIDER.into(),
            timeout: self.timeout,
        }
    }
}

/// Map a non-success HTTP status to a provider error.
fn status_error(status: StatusCode, body: &str, model: &str) -> LlmError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(400).collect());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed {
            provider: PROVIDER.into(),
        },
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            provider: PROVIDER.into(),
        },
        StatusCode::NOT_FOUND => LlmError::ModelNotAvailable {
            provider: PROVIDER.into(),
            model: model.to_string(),
        },
        _ => LlmError::RequestFailed {
            provider: PROVIDER.into(),
            reason: format!("API error ({}): {}", status.as_u16(), message),
        },
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        tokio::time::timeout(self.timeout, self.send_chat(&request))
            .await
            .map_err(|_| self.timed_out())?
    }
}

#[async_trait]
impl Transcriber for OpenAiProvider {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, LlmError> {
        tokio::time::timeout(self.timeout, self.send_transcription(audio, file_name))
            .await
            .map_err(|_| self.timed_out())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(
            "https://api.openai.com/",
            SecretString::from("sk-test"),
            "gpt-4",
            Duration::from_secs(5),
        )
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        assert_eq!(
            provider().endpoint("chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn body_omits_unset_options() {
        let messages = vec![ChatMessage::user("привет")];
        let body = ChatCompletionBody {
            model: "gpt-4",
            messages: &messages,
            temperature: None,
            max_tokens: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("temperature").is_none());
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn status_errors_are_classified() {
        let body = r#"{"error": {"message": "bad key"}}"#;
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, body, "gpt-4"),
            LlmError::AuthFailed { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, body, "gpt-4"),
            LlmError::RateLimited { .. }
        ));
        match status_error(StatusCode::INTERNAL_SERVER_ERROR, body, "gpt-4") {
            LlmError::RequestFailed { reason, .. } => assert!(reason.contains("bad key")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_request_failure() {
        let provider = OpenAiProvider::new(
            "http://127.0.0.1:9",
            SecretString::from("sk-test"),
            "gpt-4",
            Duration::from_secs(5),
        );
        let result = provider
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await;
        assert!(matches!(
            result,
            Err(LlmError::RequestFailed { .. }) | Err(LlmError::Timeout { .. })
        ));
    }
}
