//! Convenience re-exports for common `charsheet` types.
//!
//! ```ignore
//! use charsheet::prelude::*;
//! ```
//!
//! Covers wiring an engine to a host and a backend. Assembler internals,
//! tuning intermediates, and backend request shapes live in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::history::{ConversationId, History, Message};
pub use crate::{ChatMessage, OpenRouterClient};

// ── Engine ──────────────────────────────────────────────────────────
pub use crate::engine::{
    Action, ChainedSummarizer, CompositeEventHandler, EngineEvent, EventHandler, FnEventHandler,
    HistoryStore, HostEvent, HostSignals, IdleSignals, LoggingHandler, MemoryHost, NoopHandler,
    NoticeLevel, SheetEngine, SheetSettings, SkipReason, UpdateOutcome,
};

// ── Backends ────────────────────────────────────────────────────────
pub use crate::backend::{
    Backend, BackendKind, DelegatedBackend, LocalBackend, LocalModel, QuietBackend, RawBackend,
};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{CharEstimate, ContextBudget, TextMeasure};

// ── Storage ─────────────────────────────────────────────────────────
pub use crate::store::FileHistory;
