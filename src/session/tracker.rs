//! SessionTracker: drives one linear flow per user, one message at a time.
//!
//! Each user owns a slot (`Arc<Mutex<Option<SessionEntry>>>`) in a shared
//! map. The map lock is only held for lookups and inserts; the slot lock is
//! held for a whole `advance`, including provider calls, so two messages from
//! the same user never interleave while other users proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Local;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::flow::{Finish, FlowKind, LinearFlow, render};
use super::state::SessionEntry;
use crate::error::SessionError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, fallback_reply};
use crate::store::DurableLog;

type Slot = Arc<Mutex<Option<SessionEntry>>>;

/// Reply produced by `start` or `advance`.
#[derive(Debug, Clone)]
pub struct StepReply {
    /// Messages to send back, in order.
    pub messages: Vec<String>,
    /// The entry as it was when the flow finished; `None` while it continues.
    pub finished: Option<SessionEntry>,
}

impl StepReply {
    fn next(message: String) -> Self {
        Self {
            messages: vec![message],
            finished: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// All messages joined by blank lines.
    pub fn text(&self) -> String {
        self.messages.join("\n\n")
    }
}

/// Tracks every user's position in one flow.
pub struct SessionTracker {
    flow: Arc<LinearFlow>,
    slots: Mutex<HashMap<String, Slot>>,
    llm: Option<Arc<dyn LlmProvider>>,
    log: Option<Arc<dyn DurableLog>>,
}

impl SessionTracker {
    pub fn new(flow: LinearFlow) -> Self {
        Self {
            flow: Arc::new(flow),
            slots: Mutex::new(HashMap::new()),
            llm: None,
            log: None,
        }
    }

    /// Provider used for follow-up questions and the final analysis.
    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Log that receives the transcript of every completed intake.
    pub fn with_log(mut self, log: Arc<dyn DurableLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn flow(&self) -> &LinearFlow {
        &self.flow
    }

    pub fn name(&self) -> &str {
        &self.flow.name
    }

    /// Start the flow for `user_id`, replacing any entry it already has.
    pub async fn start(&self, user_id: &str) -> StepReply {
        let (_slot, mut guard) = self.lock_or_create(user_id).await;

        if guard.is_some() {
            tracing::debug!(flow = %self.flow.name, user_id, "Replacing existing session");
        }
        *guard = Some(SessionEntry::new(user_id, self.flow.kind()));

        tracing::info!(flow = %self.flow.name, user_id, "Session started");

        let mut messages = Vec::new();
        if let Some(opening) = &self.flow.opening {
            messages.push(opening.clone());
        }
        if let Some(first) = self.flow.stages.first() {
            messages.push(first.question.clone());
        }
        StepReply {
            messages,
            finished: None,
        }
    }

    /// Feed the next message from `user_id` into its flow.
    pub async fn advance(&self, user_id: &str, text: &str) -> Result<StepReply, SessionError> {
        let Some((slot, mut guard)) = self.lock_existing(user_id).await else {
            return Err(self.not_found(user_id));
        };
        let Some(entry) = guard.as_mut() else {
            self.remove_slot(user_id, &slot).await;
            return Err(self.not_found(user_id));
        };

        let reply = self.step(entry, text).await;
        Ok(self.settle(user_id, &slot, guard, reply).await)
    }

    /// Advance the user's entry, starting one first if there is none.
    ///
    /// The start and the first step happen under one slot lock, so two
    /// messages racing in for the same user start the flow only once. A
    /// freshly started flow leads its reply with the opening.
    pub async fn start_or_advance(&self, user_id: &str, text: &str) -> StepReply {
        let (slot, mut guard) = self.lock_or_create(user_id).await;

        let mut messages = Vec::new();
        if guard.is_none() {
            tracing::info!(flow = %self.flow.name, user_id, "Session started");
            messages.extend(self.flow.opening.iter().cloned());
        }
        let entry = guard.get_or_insert_with(|| SessionEntry::new(user_id, self.flow.kind()));

        let mut reply = self.step(entry, text).await;
        messages.append(&mut reply.messages);
        reply.messages = messages;
        self.settle(user_id, &slot, guard, reply).await
    }

    /// Whether `user_id` is currently inside this flow.
    pub async fn is_active(&self, user_id: &str) -> bool {
        self.slots.lock().await.contains_key(user_id)
    }

    /// Drop the entry for `user_id`. Returns whether there was one.
    pub async fn reset(&self, user_id: &str) -> bool {
        let Some((slot, mut guard)) = self.lock_existing(user_id).await else {
            return false;
        };
        let existed = guard.take().is_some();
        self.remove_slot(user_id, &slot).await;
        if existed {
            tracing::info!(flow = %self.flow.name, user_id, "Session reset");
        }
        existed
    }

    /// Copy of the current entry, if any.
    pub async fn snapshot(&self, user_id: &str) -> Option<SessionEntry> {
        let (_slot, guard) = self.lock_existing(user_id).await?;
        guard.clone()
    }

    /// Number of users with an entry.
    pub async fn active_count(&self) -> usize {
        self.slots.lock().await.len()
    }

    // ── Flow steps ──────────────────────────────────────────────────

    async fn step(&self, entry: &mut SessionEntry, text: &str) -> StepReply {
        match self.flow.kind() {
            FlowKind::FixedScript => self.advance_script(entry),
            FlowKind::StagedIntake => self.advance_intake(entry, text).await,
        }
    }

    /// Clear a finished entry and persist its transcript once the slot is
    /// released.
    async fn settle(
        &self,
        user_id: &str,
        slot: &Slot,
        mut guard: OwnedMutexGuard<Option<SessionEntry>>,
        reply: StepReply,
    ) -> StepReply {
        if reply.finished.is_some() {
            *guard = None;
            self.remove_slot(user_id, slot).await;
            tracing::info!(flow = %self.flow.name, user_id, "Session completed");
        }
        drop(guard);

        if let Some(entry) = &reply.finished {
            self.persist_transcript(entry, &reply).await;
        }
        reply
    }

    fn advance_script(&self, entry: &mut SessionEntry) -> StepReply {
        let step = entry.advance_step();

        match self.flow.stages.get(step) {
            Some(stage) => StepReply::next(stage.question.clone()),
            None => {
                let closing = match &self.flow.finish {
                    Finish::Closing(text) => text.clone(),
                    Finish::Analysis { .. } => String::new(),
                };
                StepReply {
                    messages: vec![closing],
                    finished: Some(entry.clone()),
                }
            }
        }
    }

    async fn advance_intake(&self, entry: &mut SessionEntry, text: &str) -> StepReply {
        if let Some(stage) = self.flow.stages.get(entry.step) {
            entry.record_field(&stage.field, text);
        }
        entry.transcript.push(ChatMessage::user(text));
        let step = entry.advance_step();

        if step < self.flow.len() {
            let question = self.stage_question(entry, step).await;
            entry.transcript.push(ChatMessage::assistant(&question));
            return StepReply::next(question);
        }

        let analysis = self.final_analysis(entry).await;
        entry.transcript.push(ChatMessage::assistant(&analysis));
        StepReply {
            messages: vec![analysis],
            finished: Some(entry.clone()),
        }
    }

    /// Question for `step`: generated from the stage template when possible.
    async fn stage_question(&self, entry: &SessionEntry, step: usize) -> String {
        let stage = &self.flow.stages[step];
        let (Some(llm), Some(template)) = (&self.llm, &stage.follow_up) else {
            return stage.question.clone();
        };

        let mut messages = Vec::new();
        if let Some(system) = &self.flow.question_system_prompt {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(render(template, &entry.collected_fields)));

        match llm.complete(CompletionRequest::new(messages)).await {
            Ok(response) => response.content,
            Err(e) => {
                tracing::warn!(
                    flow = %self.flow.name,
                    user_id = %entry.user_id,
                    stage = %stage.field,
                    error = %e,
                    "Follow-up question failed, using scripted one"
                );
                stage.question.clone()
            }
        }
    }

    /// Analysis of everything collected, or a fallback line.
    async fn final_analysis(&self, entry: &SessionEntry) -> String {
        let Finish::Analysis {
            system_prompt,
            template,
            temperature,
        } = &self.flow.finish
        else {
            return String::new();
        };
        let Some(llm) = &self.llm else {
            tracing::warn!(flow = %self.flow.name, "No completion provider configured for analysis");
            return crate::llm::FALLBACK_LINES[0].to_string();
        };

        let mut request = CompletionRequest::new(vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(render(template, &entry.collected_fields)),
        ]);
        if let Some(t) = temperature {
            request = request.with_temperature(*t);
        }

        match llm.complete(request).await {
            Ok(response) => response.content,
            Err(e) => {
                tracing::warn!(
                    flow = %self.flow.name,
                    user_id = %entry.user_id,
                    error = %e,
                    "Final analysis failed, using fallback reply"
                );
                fallback_reply(&e).to_string()
            }
        }
    }

    async fn persist_transcript(&self, entry: &SessionEntry, reply: &StepReply) {
        if entry.flow_kind != FlowKind::StagedIntake {
            return;
        }
        let Some(log) = &self.log else {
            return;
        };
        let input = self
            .flow
            .stages
            .first()
            .and_then(|stage| entry.field(&stage.field))
            .unwrap_or_default();
        let response = entry.render_transcript();

        if let Err(e) = log
            .append(&entry.user_id, input, &response, Local::now())
            .await
        {
            tracing::warn!(
                flow = %self.flow.name,
                user_id = %entry.user_id,
                error = %e,
                "Failed to persist transcript"
            );
        } else {
            tracing::debug!(
                user_id = %entry.user_id,
                messages = reply.messages.len(),
                "Transcript persisted"
            );
        }
    }

    // ── Slot bookkeeping ────────────────────────────────────────────

    /// Lock the user's slot, creating an empty one if needed.
    async fn lock_or_create(&self, user_id: &str) -> (Slot, OwnedMutexGuard<Option<SessionEntry>>) {
        loop {
            let slot = {
                let mut slots = self.slots.lock().await;
                Arc::clone(
                    slots
                        .entry(user_id.to_string())
                        .or_insert_with(|| Arc::new(Mutex::new(None))),
                )
            };
            let guard = Arc::clone(&slot).lock_owned().await;
            if self.is_current(user_id, &slot).await {
                return (slot, guard);
            }
        }
    }

    /// Lock the user's slot if there is one.
    async fn lock_existing(
        &self,
        user_id: &str,
    ) -> Option<(Slot, OwnedMutexGuard<Option<SessionEntry>>)> {
        loop {
            let slot = self.slots.lock().await.get(user_id).cloned()?;
            let guard = Arc::clone(&slot).lock_owned().await;
            if self.is_current(user_id, &slot).await {
                return Some((slot, guard));
            }
        }
    }

    /// The slot may have been swapped out of the map while we waited on it.
    async fn is_current(&self, user_id: &str, slot: &Slot) -> bool {
        self.slots
            .lock()
            .await
            .get(user_id)
            .is_some_and(|s| Arc::ptr_eq(s, slot))
    }

    async fn remove_slot(&self, user_id: &str, slot: &Slot) {
        let mut slots = self.slots.lock().await;
        if slots.get(user_id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            slots.remove(user_id);
        }
    }

    fn not_found(&self, user_id: &str) -> SessionError {
        SessionError::NotFound {
            flow: self.flow.name.clone(),
            user_id: user_id.to_string(),
        }
    }
}
