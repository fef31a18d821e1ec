//! LLM integration for the bot.
//!
//! A single OpenAI-compatible backend serves both chat completions and
//! voice transcription. Callers talk to it through the `LlmProvider` and
//! `Transcriber` traits so tests can swap in stubs.

pub mod fallback;
pub mod openai;
pub mod provider;

pub use fallback::{FALLBACK_LINES, fallback_reply};
pub use openai::OpenAiProvider;
pub use provider::*;

use std::sync::Arc;
use std::time::Duration;

/// Configuration for creating the completion provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

/// Create the provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Arc<OpenAiProvider> {
    tracing::info!(
        "Using OpenAI-compatible API at {} (model: {}, timeout: {:?})",
        config.api_url,
        config.model,
        config.timeout
    );
    Arc::new(
        OpenAiProvider::new(
            config.api_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
            config.timeout,
        )
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens),
    )
}

/// Run a completion, substituting a fallback line on failure.
///
/// `purpose` only labels the log line.
pub async fn complete_or_fallback(
    llm: &dyn LlmProvider,
    request: CompletionRequest,
    purpose: &str,
) -> String {
    match llm.complete(request).await {
        Ok(response) => response.content,
        Err(e) => {
            tracing::warn!(purpose, error = %e, "Completion failed, using fallback reply");
            fallback_reply(&e).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::LlmError;

    struct Failing;

    #[async_trait]
    impl LlmProvider for Failing {
        fn model_name(&self) -> &str {
            "failing"
        }
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Err(LlmError::RateLimited {
                provider: "stub".into(),
            })
        }
    }

    #[test]
    fn create_provider_keeps_model() {
        let config = LlmConfig {
            api_url: "https://api.openai.com".into(),
            api_key: secrecy::SecretString::from("sk-test"),
            model: "gpt-4".into(),
            temperature: 0.8,
            max_tokens: None,
            timeout: Duration::from_secs(30),
        };
        let provider = create_provider(&config);
        assert_eq!(provider.model_name(), "gpt-4");
    }

    #[tokio::test]
    async fn failure_becomes_fallback_line() {
        let reply = complete_or_fallback(
            &Failing,
            CompletionRequest::new(vec![ChatMessage::user("hi")]),
            "test",
        )
        .await;
        assert!(fallback::is_fallback(&reply));
    }
}
