//! Slash commands and keyboard buttons.

use std::collections::HashMap;

use chrono::Local;

use crate::bot::Bot;
use crate::bot::persona;
use crate::bot::submission::{Button, Command};
use crate::error::Error;
use crate::llm::{ChatMessage, CompletionRequest, complete_or_fallback, fallback_reply};
use crate::store::traits::{ANALYSIS_CONTEXT_RECORDS, SUMMARY_RECORDS};
use crate::store::{CompletionRecord, NameOutcome};

/// Tags shown by `/tags`, before short words are dropped.
const TOP_WORDS: usize = 10;

/// Words this short never become tags.
const MIN_TAG_CHARS: usize = 5;

impl Bot {
    pub(super) async fn handle_command(&self, user_id: &str, command: Command) -> Result<String, Error> {
        tracing::debug!(user_id, ?command, "Command");
        match command {
            Command::Start => {
                let name = self.deps.profiles.name_of(user_id).await;
                Ok(persona::greeting(name.as_deref()))
            }
            Command::Help => Ok(persona::HELP_TEXT.to_string()),
            Command::About => Ok(persona::ABOUT_TEXT.to_string()),
            Command::Analyze(text) if text.trim().is_empty() => {
                Ok(persona::ANALYZE_INVITE.to_string())
            }
            Command::Analyze(text) => Ok(self.analyze(user_id, &text).await),
            Command::Talk => Ok(self.start_talk(user_id).await),
            Command::Intake => Ok(self.start_intake(user_id).await),
            Command::Summary => self.summary(user_id).await,
            Command::Tags => self.tags(user_id).await,
            Command::Reset => self.reset(user_id).await,
            Command::Profile => {
                self.deps.profiles.begin_naming(user_id).await?;
                Ok(persona::PROFILE_ASK.to_string())
            }
            Command::Unknown(name) => {
                tracing::debug!(user_id, command = %name, "Unknown command");
                Ok(format!("{}\n\n{}", persona::UNKNOWN_COMMAND, persona::HELP_TEXT))
            }
        }
    }

    pub(super) async fn handle_button(&self, user_id: &str, button: Button) -> Result<String, Error> {
        match button {
            Button::Analyze => Ok(persona::ANALYZE_INVITE.to_string()),
            Button::Talk => Ok(self.start_talk(user_id).await),
            Button::Summary => self.summary(user_id).await,
            Button::Reset => self.reset(user_id).await,
        }
    }

    /// Starting one flow abandons the other.
    async fn start_talk(&self, user_id: &str) -> String {
        self.intake.reset(user_id).await;
        self.talk.start(user_id).await.text()
    }

    async fn start_intake(&self, user_id: &str) -> String {
        self.talk.reset(user_id).await;
        self.intake.start(user_id).await.text()
    }

    /// One-shot analysis with the last few records as context.
    /// Only successful analyses are recorded.
    pub(super) async fn analyze(&self, user_id: &str, text: &str) -> String {
        let history = match self
            .deps
            .log
            .read_recent(user_id, ANALYSIS_CONTEXT_RECORDS)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Could not read history, analysing without it");
                Vec::new()
            }
        };

        let request = CompletionRequest::new(build_context_prompt(&history, text))
            .with_temperature(persona::ANALYSIS_TEMPERATURE);

        let response = match self.deps.llm.complete(request).await {
            Ok(response) => response.content,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Analysis failed, using fallback reply");
                return fallback_reply(&e).to_string();
            }
        };

        if let Err(e) = self
            .deps
            .log
            .append(user_id, text, &response, Local::now())
            .await
        {
            tracing::warn!(user_id, error = %e, "Failed to record analysis");
        }
        response
    }

    async fn summary(&self, user_id: &str) -> Result<String, Error> {
        let records = self.deps.log.read_recent(user_id, SUMMARY_RECORDS).await?;
        if records.is_empty() {
            return Ok(persona::SUMMARY_EMPTY.to_string());
        }

        let request = CompletionRequest::new(vec![ChatMessage::user(persona::summary_prompt(
            &records,
        ))])
        .with_temperature(persona::SUMMARY_TEMPERATURE);

        Ok(complete_or_fallback(self.deps.llm.as_ref(), request, "summary").await)
    }

    async fn tags(&self, user_id: &str) -> Result<String, Error> {
        let records = self.deps.log.read_all(user_id).await?;
        let tags = extract_tags(&records);
        if tags.is_empty() {
            return Ok(persona::TAGS_EMPTY.to_string());
        }
        let rendered: Vec<String> = tags.iter().map(|t| format!("#{t}")).collect();
        Ok(format!("{}\n{}", persona::TAGS_HEADER, rendered.join(" ")))
    }

    /// Drop both flows and the user's history.
    async fn reset(&self, user_id: &str) -> Result<String, Error> {
        let had_talk = self.talk.reset(user_id).await;
        let had_intake = self.intake.reset(user_id).await;
        let had_records = self.deps.log.delete(user_id).await?;

        tracing::info!(user_id, had_talk, had_intake, had_records, "User reset");

        Ok(if had_talk || had_intake || had_records {
            persona::RESET_DONE.to_string()
        } else {
            persona::RESET_NOTHING.to_string()
        })
    }

    pub(super) async fn submit_name(&self, user_id: &str, text: &str) -> Result<String, Error> {
        let first = match self.deps.profiles.submit_name(user_id, text).await? {
            NameOutcome::Accepted(name) => persona::profile_accepted(&name),
            NameOutcome::Rejected => persona::PROFILE_REJECTED.to_string(),
        };
        Ok(format!("{first}\n\n{}", persona::PROFILE_SAVED))
    }
}

/// Persona prompt, prior exchanges as user/assistant pairs, then `text`.
pub fn build_context_prompt(history: &[CompletionRecord], text: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::system(persona::SYSTEM_PROMPT));
    for record in history {
        messages.push(ChatMessage::user(&record.input_text));
        messages.push(ChatMessage::assistant(&record.response_text));
    }
    messages.push(ChatMessage::user(text));
    messages
}

/// Most frequent words across every input, most frequent first.
///
/// The top words are picked before short ones are dropped, so fewer than
/// `TOP_WORDS` tags may come back. Ties keep first-seen order.
pub fn extract_tags(records: &[CompletionRecord]) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    let words = records.iter().flat_map(|r| {
        r.input_text
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .collect::<Vec<_>>()
    });

    for word in words.filter(|w| !w.is_empty()) {
        match index.get(&word) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(word.clone(), counts.len());
                counts.push((word, 1));
            }
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(TOP_WORDS)
        .filter(|(word, _)| word.chars().count() >= MIN_TAG_CHARS)
        .map(|(word, _)| word)
        .collect()
}
