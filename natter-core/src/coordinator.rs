// ABOUTME: Drives each channel through debounce, generation and paced dispatch
// ABOUTME: Glues the chat surface, memory recall, generation backend and sanitizer together

use crate::config::Config;
use crate::memory::{summarize_concepts, MemoryStore};
use crate::metrics;
use crate::persona::Persona;
use crate::prompt::stop_markers;
use crate::sanitizer::{sanitize_all, SanitizeOptions};
use crate::scheduler::{BackoffPolicy, TimerState, TurnScheduler};
use crate::traits::{
    render_transcript, ChatMessage, ChatSurface, GenerationBackend, GenerationRequest,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Where a channel currently is in its reply cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Debouncing,
    TypingWait,
    Generating,
    Dispatching,
}

/// Tunables for the coordinator, usually derived from [`Config`]
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub history_limit: usize,
    pub debounce: Duration,
    pub backoff: BackoffPolicy,
    pub pacing_min: Duration,
    pub pacing_max: Duration,
    pub dm_prompt: String,
    pub integrate_concepts: bool,
    pub max_summary_retries: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for CoordinatorConfig {
    fn from(config: &Config) -> Self {
        Self {
            history_limit: config.persona.history_limit,
            debounce: config.turn.debounce(),
            backoff: config.turn.backoff_policy(),
            pacing_min: Duration::from_millis(config.turn.pacing_min_ms),
            pacing_max: Duration::from_millis(config.turn.pacing_max_ms),
            dm_prompt: config.turn.dm_prompt.clone(),
            integrate_concepts: config.memory.integrate_concepts,
            max_summary_retries: config.memory.max_summary_retries,
        }
    }
}

struct Inner {
    surface: Arc<dyn ChatSurface>,
    backend: Arc<dyn GenerationBackend>,
    persona: Persona,
    memory: tokio::sync::Mutex<MemoryStore>,
    scheduler: TurnScheduler<dyn ChatSurface>,
    config: CoordinatorConfig,
    last_dispatch: Mutex<HashMap<String, DateTime<Utc>>>,
    /// Channels past their timer: turn id and phase
    active: Mutex<HashMap<String, (u64, TurnPhase)>>,
    next_turn: AtomicU64,
}

/// Orchestrates reply turns for one persona across every channel.
///
/// Cheap to clone; clones share the same timers, memory and dispatch log.
#[derive(Clone)]
pub struct TurnCoordinator {
    inner: Arc<Inner>,
}

/// Marks a channel's active phase and resets it to Idle when the turn ends
struct PhaseGuard {
    inner: Arc<Inner>,
    channel_id: String,
    turn: u64,
}

impl PhaseGuard {
    fn enter(inner: &Arc<Inner>, channel_id: &str) -> Self {
        let turn = inner.next_turn.fetch_add(1, Ordering::Relaxed);
        let guard = Self {
            inner: Arc::clone(inner),
            channel_id: channel_id.to_string(),
            turn,
        };
        guard.set(TurnPhase::Generating);
        guard
    }

    fn set(&self, phase: TurnPhase) {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(self.channel_id.clone(), (self.turn, phase));
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        let mut active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        // A newer turn on the same channel owns the entry now
        if matches!(active.get(&self.channel_id), Some((turn, _)) if *turn == self.turn) {
            active.remove(&self.channel_id);
        }
    }
}

impl TurnCoordinator {
    pub fn new(
        surface: Arc<dyn ChatSurface>,
        backend: Arc<dyn GenerationBackend>,
        persona: Persona,
        memory: MemoryStore,
        config: CoordinatorConfig,
    ) -> Self {
        let scheduler = TurnScheduler::new(Arc::clone(&surface), config.backoff);
        Self {
            inner: Arc::new(Inner {
                surface,
                backend,
                persona,
                memory: tokio::sync::Mutex::new(memory),
                scheduler,
                config,
                last_dispatch: Mutex::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
                next_turn: AtomicU64::new(1),
            }),
        }
    }

    pub fn persona(&self) -> &Persona {
        &self.inner.persona
    }

    pub fn surface(&self) -> &Arc<dyn ChatSurface> {
        &self.inner.surface
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Current phase of a channel's reply cycle
    pub fn phase(&self, channel_id: &str) -> TurnPhase {
        let active = self
            .inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel_id)
            .map(|(_, phase)| *phase);
        if let Some(phase) = active {
            return phase;
        }
        match self.inner.scheduler.pending(channel_id) {
            Some(TimerState::Debouncing) => TurnPhase::Debouncing,
            Some(TimerState::TypingWait) => TurnPhase::TypingWait,
            None => TurnPhase::Idle,
        }
    }

    /// When the persona last sent a message in a channel
    pub fn last_dispatch(&self, channel_id: &str) -> Option<DateTime<Utc>> {
        self.inner
            .last_dispatch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel_id)
            .copied()
    }

    /// Seed or overwrite the last dispatch time of a channel
    pub fn record_dispatch(&self, channel_id: &str, at: DateTime<Utc>) {
        self.inner
            .last_dispatch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel_id.to_string(), at);
    }

    /// React to an inbound message.
    ///
    /// Messages authored by the persona itself are ignored outright. Anything
    /// else (re)arms the channel's debounce timer; returns whether a turn was
    /// scheduled.
    pub fn handle_message(&self, message: ChatMessage) -> bool {
        if message.author == self.inner.persona.name {
            metrics::record_turn_skipped("self_message");
            tracing::trace!(channel_id = %message.channel_id, "Ignoring own message");
            return false;
        }

        let channel_id = message.channel_id.clone();
        tracing::debug!(
            channel_id = %channel_id,
            author = %message.author,
            "Message received, debouncing"
        );

        let coordinator = self.clone();
        self.inner
            .scheduler
            .schedule(&channel_id, self.inner.config.debounce, move || async move {
                coordinator.run_turn(message).await;
            });
        true
    }

    /// Generate and dispatch replies for the channel of `trigger`.
    ///
    /// Never fails: every error is logged and the channel goes back to Idle.
    pub async fn run_turn(&self, trigger: ChatMessage) {
        let inner = &self.inner;
        let channel_id = trigger.channel_id.clone();
        let guard = PhaseGuard::enter(inner, &channel_id);
        metrics::record_turn_started();

        if let Err(e) = inner.surface.set_typing(&channel_id).await {
            tracing::debug!(channel_id = %channel_id, error = %e, "Failed to set typing indicator");
        }

        let mut history = match inner
            .surface
            .history(&channel_id, inner.config.history_limit)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(channel_id = %channel_id, error = %e, "Failed to fetch history, skipping turn");
                metrics::record_turn_skipped("history_unavailable");
                return;
            }
        };
        include_trigger(&mut history, &trigger, inner.config.history_limit);

        let participants: Vec<String> = match inner.surface.participant_names(&channel_id).await {
            Ok(names) => names.into_iter().collect(),
            Err(e) => {
                tracing::warn!(channel_id = %channel_id, error = %e, "Failed to fetch participants");
                Vec::new()
            }
        };

        // The summary request runs outside the memory lock so other channels keep moving
        let concepts = if inner.config.integrate_concepts {
            summarize_concepts(
                &history,
                inner.backend.as_ref(),
                inner.config.max_summary_retries,
            )
            .await
        } else {
            None
        };

        let memory_prompt = {
            let mut memory = inner.memory.lock().await;
            if let Some(concepts) = concepts {
                memory.merge_concepts(concepts).await;
            }
            let mut prompt = memory.recall(&render_transcript(&history));
            if trigger.is_direct {
                prompt.push_str(&inner.config.dm_prompt);
            }
            prompt.push_str(". ");
            prompt
        };

        let request = GenerationRequest {
            persona: &inner.persona,
            memory_prompt: &memory_prompt,
            history: &history,
            participants: &participants,
            is_reply: trigger.is_reply(),
        };
        let raws = match inner.backend.generate_replies(request).await {
            Ok(raws) => raws,
            Err(e) => {
                tracing::warn!(
                    channel_id = %channel_id,
                    backend = inner.backend.name(),
                    error = %e,
                    "Generation failed, skipping turn"
                );
                metrics::record_backend_error(inner.backend.name(), e.kind());
                return;
            }
        };

        let options = SanitizeOptions::new(inner.persona.name.clone())
            .usernames(participants.clone())
            .stop_markers(stop_markers(&participants))
            .split_lines(inner.backend.splits_lines());
        let replies = sanitize_all(&raws, &options);
        if replies.is_empty() {
            tracing::info!(channel_id = %channel_id, "Nothing left after sanitizing, skipping turn");
            metrics::record_turn_skipped("empty_after_sanitize");
            return;
        }

        guard.set(TurnPhase::Dispatching);
        self.dispatch(&channel_id, &replies).await;
        tracing::info!(channel_id = %channel_id, replies = replies.len(), "Turn complete");
    }

    /// Send replies one at a time with a human-like pause after each
    async fn dispatch(&self, channel_id: &str, replies: &[String]) {
        let config = &self.inner.config;
        for reply in replies {
            match self.inner.surface.send(channel_id, reply).await {
                Ok(()) => {
                    self.record_dispatch(channel_id, Utc::now());
                    metrics::record_reply_sent();
                }
                Err(e) => {
                    tracing::warn!(channel_id = %channel_id, error = %e, "Failed to send reply");
                }
            }

            let pause = {
                let mut rng = rand::thread_rng();
                let min = config.pacing_min.as_millis() as u64;
                let max = (config.pacing_max.as_millis() as u64).max(min);
                Duration::from_millis(rng.gen_range(min..=max))
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// Consume the surface's event stream until it ends
    pub async fn run(&self) -> Result<()> {
        let mut events = self.inner.surface.event_stream().await?;
        tracing::info!(persona = %self.inner.persona.name, "Listening for messages");

        while let Some(message) = events.next().await {
            self.handle_message(message);
        }

        tracing::info!("Event stream ended");
        Ok(())
    }

    /// Wait until every scheduled turn has fired and finished
    pub async fn wait_idle(&self) {
        self.inner.scheduler.wait_idle().await;
    }

    /// Persist memory, typically on shutdown
    pub async fn save_memory(&self) -> Result<()> {
        self.inner.memory.lock().await.save().await
    }
}

/// Make sure the message that triggered the turn is part of the context.
///
/// Synthesized messages never reach the surface's history, so they are
/// appended here, dropping the oldest message to stay within `limit`.
fn include_trigger(history: &mut Vec<ChatMessage>, trigger: &ChatMessage, limit: usize) {
    let present = history
        .iter()
        .any(|m| m.author == trigger.author && m.content == trigger.content);
    if present {
        return;
    }
    history.push(trigger.clone());
    if history.len() > limit.max(1) {
        let excess = history.len() - limit.max(1);
        history.drain(..excess);
    }
}
