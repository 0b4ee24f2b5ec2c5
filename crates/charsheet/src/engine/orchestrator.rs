//! The update orchestrator.
//!
//! [`SheetEngine`] runs one update cycle per host event:
//!
//! ```text
//! Idle → Evaluating ─┬─ Skip ─────────────────────────────────────→ Idle
//!                    └─ Assembling → Dispatching ─┬─ Success → Persisting → Idle
//!                                                 ├─ Failure ───────────→ Idle
//!                                                 └─ StaleDiscard ──────→ Idle
//! ```
//!
//! Only `Dispatching` holds the in-flight guard. Every failure inside a cycle
//! ends as an [`UpdateOutcome::Skipped`]; nothing propagates to the host.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{
    Backend, BackendKind, BackendRegistry, BackendRequest, Capabilities, Generation, ResponseCap,
    WindowStrategy,
};
use crate::context::assembler::PromptAssembler;
use crate::context::budget::TextMeasure;
use crate::context::checkpoint::{find_checkpoint, find_checkpoint_with_content, latest_summary};
use crate::context::template::{strip_reasoning, substitute};
use crate::context::tuning::{self, TuningParams, TuningReport};
use crate::engine::config::{InjectionConfig, InjectionPosition, SheetSettings};
use crate::engine::events::{EngineEvent, EventHandler, NoopHandler, NoticeLevel};
use crate::engine::host::{HistoryStore, HostEvent, HostSignals, InputBlock};
use crate::engine::lock::ChainedSummarizer;
use crate::engine::outcome::{SkipReason, UpdateOutcome};
use crate::engine::state::EngineState;
use crate::engine::trigger::should_trigger;
use crate::history::History;

/// Rendered summary ready for the host to place in its prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub text: String,
    pub placement: InjectionConfig,
}

#[derive(Clone, Copy)]
enum Tunable {
    Interval,
    ForceWords,
}

/// A request ready to dispatch and where its result goes.
struct Planned {
    generation: Generation,
    /// Computed boundary; `None` falls back to the default target.
    target: Option<usize>,
}

/// Incremental summary engine for one host.
pub struct SheetEngine {
    settings: RwLock<SheetSettings>,
    settings_path: Option<PathBuf>,
    store: Arc<dyn HistoryStore>,
    signals: Arc<dyn HostSignals>,
    backends: BackendRegistry,
    pub(crate) sibling: Option<Arc<dyn ChainedSummarizer>>,
    events: Arc<dyn EventHandler>,
    state: EngineState,
}

impl SheetEngine {
    pub fn new(
        settings: SheetSettings,
        store: impl HistoryStore + 'static,
        signals: impl HostSignals + 'static,
    ) -> Self {
        Self::from_shared(settings, Arc::new(store), Arc::new(signals))
    }

    pub fn from_shared(
        settings: SheetSettings,
        store: Arc<dyn HistoryStore>,
        signals: Arc<dyn HostSignals>,
    ) -> Self {
        let engine = Self {
            settings: RwLock::new(settings),
            settings_path: None,
            store,
            signals,
            backends: BackendRegistry::new(),
            sibling: None,
            events: Arc::new(NoopHandler),
            state: EngineState::new(),
        };
        engine.reload_live_summary();
        engine
    }

    /// Register a backend under its kind.
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.register(backend);
        self
    }

    /// Sibling summarizer coordinated by lock mode.
    pub fn with_sibling(mut self, sibling: Arc<dyn ChainedSummarizer>) -> Self {
        if self.settings().lock_mode {
            sibling.set_suspended(true);
        }
        self.sibling = Some(sibling);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = handler;
        self
    }

    /// Save settings to `path` whenever a command changes them.
    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = Some(path.into());
        self
    }

    // ── Settings ───────────────────────────────────────────────────

    /// Snapshot of the current settings.
    pub fn settings(&self) -> SheetSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Change settings and save them if a settings path is configured.
    pub fn update_settings(&self, f: impl FnOnce(&mut SheetSettings)) {
        self.modify_settings(f);
        if let Some(path) = &self.settings_path
            && let Err(e) = self.settings().save(path)
        {
            warn!("Failed to save settings: {e}");
        }
    }

    /// Change settings in memory only.
    pub(crate) fn modify_settings(&self, f: impl FnOnce(&mut SheetSettings)) {
        let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
        f(&mut settings);
    }

    // ── Summary access ─────────────────────────────────────────────

    /// The summary currently in effect.
    pub fn current_summary(&self) -> String {
        self.state.live_summary()
    }

    /// The live summary rendered through the injection template, or an
    /// empty string when there is no summary.
    pub fn injection_text(&self) -> String {
        let summary = self.current_summary();
        let summary = summary.trim();
        if summary.is_empty() {
            return String::new();
        }
        let template = self.settings().template;
        if template.is_empty() {
            format!("Character Sheet: {summary}")
        } else {
            substitute(&template, &[("sheet", summary)])
        }
    }

    /// The injection text with its placement, or `None` when there is no
    /// summary or placement is [`InjectionPosition::None`].
    pub fn injection(&self) -> Option<Injection> {
        let placement = self.settings().injection;
        if placement.position == InjectionPosition::None {
            return None;
        }
        let text = self.injection_text();
        if text.is_empty() {
            return None;
        }
        debug!(
            "Injecting sheet: position {:?}, depth {}, role {:?}",
            placement.position, placement.depth, placement.role
        );
        Some(Injection { text, placement })
    }

    /// Replace the live summary and persist it on the default target.
    /// Returns `false`, leaving the live summary untouched, when the history
    /// has no message to hold it.
    pub fn edit(&self, summary: &str) -> bool {
        let index = self.store.snapshot().default_target_index();
        self.persist(summary, index)
    }

    /// Delete the checkpoint holding the live summary and fall back to the
    /// next older one. Returns the summary now in effect.
    pub fn restore_previous(&self) -> String {
        let live = self.current_summary();
        let history = self.store.snapshot();
        if let Some(index) = find_checkpoint_with_content(&history, &live) {
            debug!("Removing checkpoint at index {index}");
            self.store.write_summary(index, None);
            self.store.save_debounced();
        }
        self.reload_live_summary()
    }

    fn reload_live_summary(&self) -> String {
        let summary = latest_summary(&self.store.snapshot());
        self.state.set_live_summary(summary.clone());
        self.emit(&EngineEvent::SummaryReloaded(&summary));
        summary
    }

    // ── Host events ────────────────────────────────────────────────

    /// React to one host event. Returns the cycle outcome for events that
    /// evaluate an update.
    pub async fn handle_event(&self, event: HostEvent) -> Option<UpdateOutcome> {
        match event {
            HostEvent::ChatChanged => {
                self.on_chat_changed();
                None
            }
            HostEvent::MessageRendered
            | HostEvent::MessageDeleted
            | HostEvent::MessageEdited
            | HostEvent::MessageSwiped => Some(self.on_chat_event().await),
        }
    }

    /// Reload the live summary for the newly active conversation.
    pub fn on_chat_changed(&self) {
        self.state.clear_fingerprint();
        self.reload_live_summary();
    }

    /// Automatic cycle: gated by `enabled`, streaming, in-flight, `frozen`,
    /// and the fingerprint, then chained to the sibling in lock mode.
    pub async fn on_chat_event(&self) -> UpdateOutcome {
        let settings = self.settings();
        if !settings.enabled {
            return self.skip(SkipReason::Disabled);
        }
        if self.signals.is_streaming() {
            return self.skip(SkipReason::Streaming);
        }
        if self.state.is_in_flight() {
            return self.skip(SkipReason::InFlight);
        }
        if settings.frozen {
            return self.skip(SkipReason::Frozen);
        }

        let history = self.store.snapshot();
        let previous = self.state.fingerprint();
        if history.is_empty() || previous == Some(history.fingerprint()) {
            return self.skip(SkipReason::NoChanges);
        }
        if let Some(previous) = previous {
            self.reconcile(&history, previous.length, previous.hash);
        }

        let outcome = self.run_update(false).await;
        if settings.lock_mode {
            if outcome.is_updated() {
                self.chain_sibling().await;
            } else {
                debug!("Lock mode: update did not succeed, sibling not triggered");
            }
        }

        self.state.record_fingerprint(self.store.snapshot().fingerprint());
        outcome
    }

    /// Handle deletions and edits detected against the last fingerprint.
    fn reconcile(&self, history: &History, last_length: usize, last_hash: u64) {
        if history.len() < last_length {
            debug!(
                "Messages deleted ({last_length} -> {}), reloading summary",
                history.len()
            );
            self.reload_live_summary();
        }

        let edited = history.len() == last_length && history.fingerprint().hash != last_hash;
        if edited && history.last().is_some_and(|m| m.summary().is_some()) {
            debug!("Newest message edited, removing its stale checkpoint");
            self.store.write_summary(history.len() - 1, None);
            self.store.save_debounced();
        }
    }

    /// Spawn a task that handles every event from `rx`, each in its own task.
    pub fn spawn_event_loop(self: Arc<Self>, mut rx: mpsc::Receiver<HostEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let engine = Arc::clone(&self);
                tokio::spawn(async move {
                    engine.handle_event(event).await;
                });
            }
            debug!("Host event stream closed");
        })
    }

    // ── Forced updates ─────────────────────────────────────────────

    /// Run one cycle now, bypassing thresholds and `frozen` (but not the
    /// in-flight guard). Returns the new summary or an empty string.
    pub async fn force_update(&self, quiet: bool) -> String {
        if !quiet {
            self.notice(NoticeLevel::Info, "Updating summary...");
        }
        match self.run_update(true).await {
            UpdateOutcome::Updated { summary, .. } => summary,
            UpdateOutcome::Skipped(SkipReason::NoWindow) => {
                self.notice(NoticeLevel::Info, "Nothing to summarize");
                String::new()
            }
            UpdateOutcome::Skipped(reason) => {
                self.notice(
                    NoticeLevel::Warning,
                    &format!("Failed to update summary: {reason}"),
                );
                String::new()
            }
        }
    }

    // ── One cycle ──────────────────────────────────────────────────

    /// Evaluate, assemble, dispatch, and persist with the configured backend.
    pub async fn run_update(&self, force: bool) -> UpdateOutcome {
        let settings = self.settings();
        let kind = settings.backend_kind();
        self.emit(&EngineEvent::CycleStarted { kind, forced: force });

        let Some(backend) = self.backends.get(kind).filter(|b| b.is_available()) else {
            debug!("No available backend for {kind}");
            return self.skip(SkipReason::Unavailable);
        };

        let fired =
            match should_trigger(self.store.as_ref(), self.signals.as_ref(), &settings, force).await
            {
                Ok(fired) => fired,
                Err(reason) => return self.skip(reason),
            };
        info!("Updating summary via {kind} backend");

        let conversation = self.store.conversation();
        let caps = backend.capabilities();
        let planned = match self
            .plan(backend.as_ref(), &caps, &settings, fired.prompt, fired.history)
            .await
        {
            Ok(planned) => planned,
            Err(reason) => return self.skip(reason),
        };

        let result = {
            let Some(_guard) = self.state.try_acquire() else {
                return self.skip(SkipReason::InFlight);
            };
            let _input = InputBlock::new(self.signals.as_ref(), caps.blocks_input);
            backend.generate(planned.generation).await
        };

        let text = match result {
            Ok(text) => text,
            Err(e) => {
                warn!("Summary update failed: {e}");
                let reason = if kind == BackendKind::Delegated {
                    SkipReason::DelegateRejected(e)
                } else {
                    SkipReason::BackendFailure(e)
                };
                return self.skip(reason);
            }
        };
        let text = if caps.strips_reasoning {
            strip_reasoning(&text)
        } else {
            text.trim().to_string()
        };
        if text.is_empty() {
            warn!("Empty summary received");
            return self.skip(SkipReason::EmptyResult);
        }

        if !conversation.same_conversation(&self.store.conversation()) {
            debug!("Conversation changed, summary update discarded");
            return self.skip(SkipReason::StaleContext);
        }

        let index = planned
            .target
            .unwrap_or_else(|| self.store.snapshot().default_target_index());
        if !self.persist(&text, index) {
            return self.skip(SkipReason::StaleContext);
        }
        UpdateOutcome::Updated {
            summary: text,
            index,
        }
    }

    /// Build the request for the backend's window strategy.
    async fn plan(
        &self,
        backend: &dyn Backend,
        caps: &Capabilities,
        settings: &SheetSettings,
        prompt: String,
        history: History,
    ) -> Result<Planned, SkipReason> {
        let max_tokens = match caps.response_cap {
            ResponseCap::Always => Some(settings.response_reserve() as u32),
            ResponseCap::WhenConfigured => settings.response_cap(),
        };
        let budget = backend.budget(settings);

        let (request, target) = match caps.window {
            WindowStrategy::Backend => (BackendRequest::Quiet { prompt, history }, None),
            WindowStrategy::Bounded => {
                let assembly = PromptAssembler::new(backend.measurer(), budget.effective_max_tokens())
                    .with_max_messages(settings.max_messages_per_request)
                    .assemble(&history, &prompt)
                    .await;
                self.emit(&EngineEvent::PayloadAssembled {
                    included: assembly.included,
                    last_included_index: assembly.last_included_index,
                    usage: &budget.usage(assembly.measured),
                });
                let Some(index) = assembly.last_included_index else {
                    return Err(SkipReason::NoWindow);
                };
                let request = if caps.split_roles {
                    BackendRequest::Chat {
                        system: assembly.system_prompt,
                        user: assembly.user_content,
                    }
                } else {
                    BackendRequest::Raw {
                        payload: assembly.payload,
                    }
                };
                (request, Some(index))
            }
            WindowStrategy::Accumulate => {
                let text =
                    accumulate_block(&history, backend.measurer(), budget.effective_max_tokens())
                        .await?;
                (BackendRequest::Delegated { text }, None)
            }
        };

        Ok(Planned {
            generation: Generation {
                request,
                max_tokens,
                skip_wi_an: settings.skip_wi_an,
            },
            target,
        })
    }

    /// Write `summary` as the checkpoint on message `index` and make it live.
    fn persist(&self, summary: &str, index: usize) -> bool {
        if !self.store.write_summary(index, Some(summary)) {
            debug!("No message at index {index}, summary not persisted");
            return false;
        }
        self.state.set_live_summary(summary);
        self.store.save_debounced();
        self.emit(&EngineEvent::SummaryUpdated { summary, index });
        true
    }

    // ── Auto-tuning ────────────────────────────────────────────────

    async fn tune(&self, setting: Tunable) -> Option<TuningReport> {
        let settings = self.settings();
        let backend = self.backends.get(settings.backend_kind())?;
        let params = TuningParams {
            budget: backend.budget(&settings).effective_max_tokens(),
            prompt: &settings.prompt,
            prompt_words: settings.prompt_words,
            max_messages: settings.max_messages_per_request,
        };
        let history = self.store.snapshot();
        match setting {
            Tunable::Interval => {
                tuning::recommend_interval(&history, backend.measurer(), params).await
            }
            Tunable::ForceWords => {
                tuning::recommend_force_words(&history, backend.measurer(), params).await
            }
        }
    }

    /// Recommend and apply `message_interval`.
    pub async fn auto_tune_interval(&self) -> Option<TuningReport> {
        let report = self.tune(Tunable::Interval).await?;
        info!("Auto-tuned message interval: {}", report.value);
        self.update_settings(|s| s.message_interval = report.value);
        Some(report)
    }

    /// Recommend and apply `force_word_threshold`.
    pub async fn auto_tune_force_words(&self) -> Option<TuningReport> {
        let report = self.tune(Tunable::ForceWords).await?;
        info!("Auto-tuned force word threshold: {}", report.value);
        self.update_settings(|s| s.force_word_threshold = report.value);
        Some(report)
    }

    // ── Helpers ────────────────────────────────────────────────────

    pub(crate) fn emit(&self, event: &EngineEvent<'_>) {
        self.events.on_event(event);
    }

    pub(crate) fn notice(&self, level: NoticeLevel, message: &str) {
        self.emit(&EngineEvent::Notice { level, message });
    }

    fn skip(&self, reason: SkipReason) -> UpdateOutcome {
        self.emit(&EngineEvent::Skipped(&reason));
        UpdateOutcome::Skipped(reason)
    }
}

/// Accumulate entries after the checkpoint until the block (with the
/// previous summary) reaches `budget`. The entry that reaches it is kept.
async fn accumulate_block(
    history: &History,
    measure: &dyn TextMeasure,
    budget: usize,
) -> Result<String, SkipReason> {
    let checkpoint = find_checkpoint(history);
    let start = checkpoint.as_ref().map_or(0, |c| c.index + 1);
    let mut parts: Vec<String> = checkpoint.map(|c| c.content).into_iter().collect();

    for message in history
        .snapshot_excluding_last()
        .iter()
        .skip(start)
        .filter(|m| m.is_summarizable())
    {
        parts.push(message.entry());
        let text = parts.join("\n\n");
        if measure.measure(&text, 0).await >= budget {
            return Ok(text);
        }
    }
    debug!("Accumulated block below budget {budget}, waiting for more content");
    Err(SkipReason::BelowBudget)
}
