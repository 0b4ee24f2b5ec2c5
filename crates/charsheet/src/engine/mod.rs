//! Update engine: trigger policy, orchestration, lock mode, and commands.
//!
//! - [`orchestrator::SheetEngine`]: runs update cycles. Start here.
//! - [`trigger`]: decides whether a cycle should fire (thresholds plus a
//!   bounded quiescence wait).
//! - [`config::SheetSettings`]: trigger policy and generation settings.
//! - [`lock`]: [`ChainedSummarizer`] seam and lock-mode coordination with a
//!   sibling summarizer.
//! - [`command`]: the `update | sync | freeze | ...` action surface.
//! - [`events`]: [`EventHandler`] trait and [`EngineEvent`] enum.
//! - [`host`]: history store and host signal seams, plus [`MemoryHost`].
//! - [`outcome`]: [`UpdateOutcome`] and [`SkipReason`].
//! - [`state`]: per-engine in-flight guard, fingerprint, and live summary.

pub mod command;
pub mod config;
pub mod events;
pub mod host;
pub mod lock;
pub mod orchestrator;
pub mod outcome;
pub mod state;
pub mod trigger;

// Re-export commonly used items at the module level.
pub use command::Action;
pub use config::{
    InjectionConfig, InjectionPosition, InjectionRole, PromptBuilder, QuiescenceConfig,
    SheetSettings, SummarySource,
};
pub use events::{
    CompositeEventHandler, EngineEvent, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    NoticeLevel,
};
pub use host::{HistoryStore, HostEvent, HostSignals, IdleSignals, MemoryHost};
pub use lock::ChainedSummarizer;
pub use orchestrator::{Injection, SheetEngine};
pub use outcome::{SkipReason, UpdateOutcome};
pub use state::EngineState;

/// Scripted collaborators shared by the engine tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use futures::future::BoxFuture;

    use crate::backend::{
        Backend, BackendKind, Capabilities, Generation, ResponseCap, WindowStrategy,
    };
    use crate::engine::config::{QuiescenceConfig, SheetSettings};
    use crate::engine::host::MemoryHost;
    use crate::engine::lock::ChainedSummarizer;
    use crate::history::{ConversationId, Message};

    type Hook = Box<dyn Fn() + Send + Sync>;

    /// Backend that replays scripted results and records every call.
    pub struct ScriptedBackend {
        kind: BackendKind,
        window: WindowStrategy,
        blocks_input: bool,
        split_roles: bool,
        responses: Mutex<VecDeque<Result<String, String>>>,
        pub calls: Mutex<Vec<Generation>>,
        pub active: AtomicUsize,
        pub max_active: AtomicUsize,
        delay: Duration,
        on_call: Option<Hook>,
    }

    impl ScriptedBackend {
        pub fn new(kind: BackendKind) -> Self {
            let window = match kind {
                BackendKind::Templated => WindowStrategy::Backend,
                BackendKind::Delegated => WindowStrategy::Accumulate,
                _ => WindowStrategy::Bounded,
            };
            Self {
                kind,
                window,
                blocks_input: kind == BackendKind::RawBlocking,
                split_roles: kind == BackendKind::Local,
                responses: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                delay: Duration::ZERO,
                on_call: None,
            }
        }

        pub fn respond(self, result: Result<&str, &str>) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push_back(result.map(str::to_string).map_err(str::to_string));
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Run `hook` while the call is outstanding.
        pub fn on_call(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
            self.on_call = Some(Box::new(hook));
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Backend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                window: self.window,
                blocks_input: self.blocks_input,
                split_roles: self.split_roles,
                response_cap: ResponseCap::Always,
                strips_reasoning: true,
            }
        }

        fn generate(&self, generation: Generation) -> BoxFuture<'_, Result<String, String>> {
            Box::pin(async move {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_active.fetch_max(now, Ordering::SeqCst);
                self.calls.lock().unwrap().push(generation);
                if let Some(hook) = &self.on_call {
                    hook();
                }
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.active.fetch_sub(1, Ordering::SeqCst);
                self.responses
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Ok("scripted summary".to_string()))
            })
        }
    }

    /// Sibling that records calls and can be told to fail.
    #[derive(Default)]
    pub struct RecordingSibling {
        pub calls: AtomicUsize,
        pub suspended: std::sync::atomic::AtomicBool,
        pub fail: bool,
        /// Suspension flag observed at each call.
        pub seen_suspended: Mutex<Vec<bool>>,
    }

    impl RecordingSibling {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ChainedSummarizer for RecordingSibling {
        fn force_update(&self, _quiet: bool) -> BoxFuture<'_, Result<String, String>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.seen_suspended.lock().unwrap().push(self.is_suspended());
                if self.fail {
                    Err("sibling exploded".to_string())
                } else {
                    Ok("memory".to_string())
                }
            })
        }

        fn is_suspended(&self) -> bool {
            self.suspended.load(Ordering::SeqCst)
        }

        fn set_suspended(&self, suspended: bool) {
            self.suspended.store(suspended, Ordering::SeqCst);
        }
    }

    /// Settings with millisecond quiescence bounds.
    pub fn fast_settings() -> SheetSettings {
        SheetSettings {
            quiescence: QuiescenceConfig {
                group_poll_ms: 1,
                group_max_attempts: 2,
                send_poll_ms: 1,
                send_max_attempts: 2,
            },
            ..Default::default()
        }
    }

    pub fn conversation(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message::new(if i % 2 == 0 { "Alice" } else { "Bob" }, format!("line {i}")))
            .collect()
    }

    pub fn host(n: usize) -> MemoryHost {
        MemoryHost::new(ConversationId::chat("chat-1").with_character("alice"), conversation(n))
    }

    pub fn shared(backend: ScriptedBackend) -> Arc<ScriptedBackend> {
        Arc::new(backend)
    }
}
