//! Main bot loop: message dispatch and the per-message reply path.
//!
//! Commands are handled in `commands`; this module owns the `Bot` struct,
//! the run loop, and the order in which flows claim plain text.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinSet;

use crate::bot::keyboard::main_keyboard;
use crate::bot::persona;
use crate::bot::submission::{Submission, SubmissionParser};
use crate::channels::{ChannelManager, IncomingMessage, OutgoingResponse, StatusUpdate};
use crate::error::{Error, SessionError};
use crate::llm::{FALLBACK_LINES, LlmProvider};
use crate::session::{SessionTracker, StepReply};
use crate::store::{DurableLog, ProfileStore};

/// How long in-flight replies get to finish once the bot is stopping.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared components the bot works with.
pub struct BotDeps {
    pub llm: Arc<dyn LlmProvider>,
    pub log: Arc<dyn DurableLog>,
    pub profiles: Arc<ProfileStore>,
}

pub struct Bot {
    pub(super) deps: BotDeps,
    /// Scripted questionnaire.
    pub(super) talk: SessionTracker,
    /// Staged intake ending in an analysis.
    pub(super) intake: SessionTracker,
}

impl Bot {
    pub fn new(deps: BotDeps) -> Self {
        let talk = SessionTracker::new(persona::talk_flow());
        let intake = SessionTracker::new(persona::intake_flow())
            .with_llm(Arc::clone(&deps.llm))
            .with_log(Arc::clone(&deps.log));
        Self { deps, talk, intake }
    }

    pub fn talk(&self) -> &SessionTracker {
        &self.talk
    }

    pub fn intake(&self) -> &SessionTracker {
        &self.intake
    }

    // ── Main loop ───────────────────────────────────────────────────

    /// Receive messages from every channel until Ctrl+C or until all
    /// streams end. Each message is handled on its own task.
    pub async fn run(self: Arc<Self>, channels: Arc<ChannelManager>) -> Result<(), Error> {
        let mut message_stream = channels.start_all().await?;
        let mut handlers = JoinSet::new();

        tracing::info!("Vova ready and listening");

        loop {
            let message = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    break;
                }
                msg = message_stream.next() => {
                    match msg {
                        Some(m) => m,
                        None => {
                            tracing::info!("All channel streams ended, shutting down...");
                            break;
                        }
                    }
                }
            };

            let bot = Arc::clone(&self);
            let channels = Arc::clone(&channels);
            handlers.spawn(async move { bot.serve(&channels, message).await });

            while let Some(finished) = handlers.try_join_next() {
                if let Err(e) = finished {
                    tracing::error!("Message handler panicked: {e}");
                }
            }
        }

        tracing::info!(in_flight = handlers.len(), "Bot shutting down...");
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(finished) = handlers.join_next().await {
                if let Err(e) = finished {
                    tracing::error!("Message handler panicked: {e}");
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(aborted = handlers.len(), "Replies still pending, aborting them");
            handlers.shutdown().await;
        }
        channels.shutdown_all().await;
        Ok(())
    }

    async fn serve(&self, channels: &ChannelManager, message: IncomingMessage) {
        let _ = channels
            .send_status(
                &message.channel,
                StatusUpdate::Thinking("Вова думает...".into()),
                &message.metadata,
            )
            .await;

        let response = self.reply_to(&message).await;
        if let Err(e) = channels.respond(&message, response).await {
            tracing::error!(
                channel = %message.channel,
                user_id = %message.user_id,
                error = %e,
                "Failed to send reply"
            );
        }
    }

    /// The reply for `message`. Never fails: errors become a fallback line.
    pub async fn reply_to(&self, message: &IncomingMessage) -> OutgoingResponse {
        let text = match self.handle_message(message).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(user_id = %message.user_id, error = %e, "Error handling message");
                FALLBACK_LINES[0].to_string()
            }
        };
        OutgoingResponse::text(text).with_keyboard(main_keyboard())
    }

    // ── Message dispatch ────────────────────────────────────────────

    /// Route a message: commands first, then whichever flow owns the user,
    /// then keyboard buttons, and finally free text, which opens an intake.
    pub async fn handle_message(&self, message: &IncomingMessage) -> Result<String, Error> {
        let user_id = message.user_id.as_str();
        let text = message.content.trim();

        tracing::debug!(
            user_id,
            channel = %message.channel,
            chars = text.chars().count(),
            voice = message.from_voice,
            "Received message"
        );

        if text.is_empty() {
            return Ok(if message.from_voice {
                persona::VOICE_UNHEARD.to_string()
            } else {
                persona::ANALYZE_INVITE.to_string()
            });
        }

        let submission = match SubmissionParser::parse(text) {
            Submission::Command(command) => return self.handle_command(user_id, command).await,
            other => other,
        };

        if let Some(reply) = advance_if_active(&self.intake, user_id, text).await {
            return Ok(reply.text());
        }
        if let Some(reply) = advance_if_active(&self.talk, user_id, text).await {
            return Ok(reply.text());
        }
        if self.deps.profiles.is_awaiting_name(user_id).await {
            return self.submit_name(user_id, text).await;
        }

        match submission {
            Submission::Button(button) => self.handle_button(user_id, button).await,
            Submission::Text(text) => Ok(self.open_intake_with(user_id, &text).await),
            Submission::Command(command) => self.handle_command(user_id, command).await,
        }
    }

    /// Start an intake and take `text` as its first answer. If an intake
    /// appeared for this user in the meantime, `text` continues it instead.
    async fn open_intake_with(&self, user_id: &str, text: &str) -> String {
        self.intake.start_or_advance(user_id, text).await.text()
    }
}

/// Advance `tracker` if the user has an entry there.
async fn advance_if_active(tracker: &SessionTracker, user_id: &str, text: &str) -> Option<StepReply> {
    match tracker.advance(user_id, text).await {
        Ok(reply) => {
            if reply.is_finished() {
                tracing::info!(flow = tracker.name(), user_id, "Flow completed");
            }
            Some(reply)
        }
        Err(SessionError::NotFound { .. }) => None,
    }
}
