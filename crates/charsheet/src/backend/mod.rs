//! Generation backends.
//!
//! Every backend implements [`Backend`] and declares its [`Capabilities`].
//! The orchestrator reads those capabilities to decide how to window the
//! history and which [`BackendRequest`] shape to build; it never branches on
//! the concrete backend type.
//!
//! | Kind | Type | Window | Request |
//! |------|------|--------|---------|
//! | [`BackendKind::Templated`] | [`QuietBackend`] | backend-managed | prompt + transcript |
//! | [`BackendKind::RawBlocking`] | [`RawBackend::blocking`] | bounded | flattened payload, input blocked |
//! | [`BackendKind::RawNonBlocking`] | [`RawBackend::non_blocking`] | bounded | flattened payload |
//! | [`BackendKind::Local`] | [`LocalBackend`] | bounded | system/user pair |
//! | [`BackendKind::Delegated`] | [`DelegatedBackend`] | accumulate to budget | whole block |

pub mod delegated;
pub mod local;
pub mod quiet;
pub mod raw;

pub use delegated::DelegatedBackend;
pub use local::{LocalBackend, LocalModel};
pub use quiet::QuietBackend;
pub use raw::RawBackend;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::budget::{ContextBudget, DEFAULT_ESTIMATE, TextMeasure};
use crate::engine::config::SheetSettings;
use crate::history::History;

/// The five backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Templated,
    RawBlocking,
    RawNonBlocking,
    Local,
    Delegated,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Templated => "templated",
            BackendKind::RawBlocking => "raw-blocking",
            BackendKind::RawNonBlocking => "raw-non-blocking",
            BackendKind::Local => "local",
            BackendKind::Delegated => "delegated",
        };
        f.write_str(name)
    }
}

/// How much history a backend receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStrategy {
    /// The backend truncates its own context; send only the prompt.
    Backend,
    /// Greedy window after the checkpoint, stopping before the budget.
    Bounded,
    /// Accumulate until the budget is reached, then send the whole block.
    Accumulate,
}

/// When to send a response-length cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCap {
    /// Always send the response reserve.
    Always,
    /// Only when an override response length is configured.
    WhenConfigured,
}

/// Capability flags a backend declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub window: WindowStrategy,
    /// Suspend user input while the call is outstanding.
    pub blocks_input: bool,
    /// Send a system/user pair instead of one flattened payload.
    pub split_roles: bool,
    pub response_cap: ResponseCap,
    /// Strip `<think>` blocks from the result.
    pub strips_reasoning: bool,
}

/// Request shapes, one per window strategy and role layout.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendRequest {
    /// Rendered prompt; the backend adds as much of `history` as it can hold.
    Quiet { prompt: String, history: History },
    /// Flattened payload sent as a single message.
    Raw { payload: String },
    /// System/user message pair.
    Chat { system: String, user: String },
    /// Whole block for a remote summarization service.
    Delegated { text: String },
}

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub request: BackendRequest,
    pub max_tokens: Option<u32>,
    /// Skip world-info and author's-note injection (quiet backend hint).
    pub skip_wi_an: bool,
}

/// A summarization backend.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> Capabilities;

    /// Whether the backend can serve requests right now.
    fn is_available(&self) -> bool {
        true
    }

    /// Context window in measurement units.
    fn context_size(&self, settings: &SheetSettings) -> usize {
        settings.max_context_tokens
    }

    /// Generation budget for this cycle: context minus the response reserve.
    fn budget(&self, settings: &SheetSettings) -> ContextBudget {
        ContextBudget::new(self.context_size(settings)).with_output_reserve(settings.response_reserve())
    }

    /// Measurer matching the backend's tokenizer.
    fn measurer(&self) -> &dyn TextMeasure {
        &DEFAULT_ESTIMATE
    }

    fn generate(&self, generation: Generation) -> BoxFuture<'_, Result<String, String>>;
}

/// Backends by kind.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` under its own kind, replacing any previous one.
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn Backend>> {
        self.backends.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(BackendKind);

    impl Backend for Fixed {
        fn kind(&self) -> BackendKind {
            self.0
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                window: WindowStrategy::Bounded,
                blocks_input: false,
                split_roles: false,
                response_cap: ResponseCap::Always,
                strips_reasoning: false,
            }
        }

        fn generate(&self, _generation: Generation) -> BoxFuture<'_, Result<String, String>> {
            Box::pin(async { Ok("ok".to_string()) })
        }
    }

    #[test]
    fn default_budget_reserves_response() {
        let settings = SheetSettings {
            max_context_tokens: 4_096,
            response_length: 512,
            ..Default::default()
        };
        let backend = Fixed(BackendKind::RawBlocking);
        assert_eq!(backend.budget(&settings).effective_max_tokens(), 3_584);

        let overridden = SheetSettings {
            override_response_length: 96,
            ..settings
        };
        assert_eq!(backend.budget(&overridden).effective_max_tokens(), 4_000);
    }

    #[test]
    fn registry_replaces_by_kind() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(Fixed(BackendKind::Local)));
        registry.register(Arc::new(Fixed(BackendKind::Local)));
        registry.register(Arc::new(Fixed(BackendKind::Templated)));
        assert_eq!(registry.kinds().len(), 2);
        assert!(registry.get(BackendKind::Local).is_some());
        assert!(registry.get(BackendKind::Delegated).is_none());
    }

    #[test]
    fn kind_display() {
        assert_eq!(BackendKind::RawNonBlocking.to_string(), "raw-non-blocking");
    }
}
