//! Engine events and handlers.
//!
//! The engine reports what each cycle did through [`EngineEvent`]s. Callers
//! implement [`EventHandler`] to log them, render notices, or collect them
//! in tests.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or headless runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use tracing::{debug, info, warn};

use crate::backend::BackendKind;
use crate::context::ContextUsage;
use crate::engine::outcome::SkipReason;

/// Severity of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Events emitted by [`SheetEngine`](super::SheetEngine).
#[derive(Debug)]
pub enum EngineEvent<'a> {
    /// A cycle is about to evaluate its trigger.
    CycleStarted { kind: BackendKind, forced: bool },
    /// The payload for a windowed backend was assembled.
    PayloadAssembled {
        included: usize,
        last_included_index: Option<usize>,
        usage: &'a ContextUsage,
    },
    /// A cycle ended without a new summary.
    Skipped(&'a SkipReason),
    /// A new checkpoint was written.
    SummaryUpdated { summary: &'a str, index: usize },
    /// The live summary was reloaded from history without persisting.
    SummaryReloaded(&'a str),
    /// The sibling summarizer was invoked.
    SiblingTriggered { succeeded: bool },
    /// One-line message for the user.
    Notice {
        level: NoticeLevel,
        message: &'a str,
    },
}

/// Handler for engine events.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &EngineEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// Logs events through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &EngineEvent<'_>) {
        match event {
            EngineEvent::CycleStarted { kind, forced } => {
                debug!("[sheet] Cycle started ({kind}, forced={forced})");
            }
            EngineEvent::PayloadAssembled {
                included,
                last_included_index,
                usage,
            } => {
                debug!(
                    "[sheet] {included} messages up to {last_included_index:?}, {}",
                    usage.to_log_string()
                );
            }
            EngineEvent::Skipped(reason) if reason.is_failure() => {
                warn!("[sheet] Update skipped: {reason}");
            }
            EngineEvent::Skipped(reason) => {
                debug!("[sheet] Update skipped: {reason}");
            }
            EngineEvent::SummaryUpdated { summary, index } => {
                info!(
                    "[sheet] Summary saved to message {index} ({} chars)",
                    summary.len()
                );
            }
            EngineEvent::SummaryReloaded(summary) => {
                debug!("[sheet] Live summary reloaded ({} chars)", summary.len());
            }
            EngineEvent::SiblingTriggered { succeeded } => {
                info!("[sheet] Sibling update {}", if *succeeded { "completed" } else { "failed" });
            }
            EngineEvent::Notice { level, message } => match level {
                NoticeLevel::Warning | NoticeLevel::Error => warn!("[sheet] {message}"),
                NoticeLevel::Info | NoticeLevel::Success => info!("[sheet] {message}"),
            },
        }
    }
}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&EngineEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&EngineEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&EngineEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &EngineEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler in registration order.
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &EngineEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn fn_handler_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let handler = FnEventHandler::new(move |event| {
            if let EngineEvent::Notice { message, .. } = event {
                s.lock().unwrap().push(message.to_string());
            }
        });
        handler.on_event(&EngineEvent::Notice {
            level: NoticeLevel::Info,
            message: "hello",
        });
        handler.on_event(&EngineEvent::SiblingTriggered { succeeded: true });
        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn composite_dispatches_to_all() {
        let count = Arc::new(AtomicUsize::new(0));
        let (a, b) = (count.clone(), count.clone());
        let composite = CompositeEventHandler::new()
            .with(LoggingHandler)
            .with(FnEventHandler::new(move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            }))
            .with(FnEventHandler::new(move |_| {
                b.fetch_add(1, Ordering::SeqCst);
            }));
        composite.on_event(&EngineEvent::Skipped(&SkipReason::Policy));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn noop_handler_accepts_everything() {
        NoopHandler.on_event(&EngineEvent::SummaryReloaded("x"));
    }
}
