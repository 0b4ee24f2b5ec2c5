//! Lock mode: coordination with a sibling summarizer.
//!
//! While lock mode is on, the sibling's own scheduling is suspended and this
//! engine drives it: every successful automatic update is followed by a
//! forced sibling update. A failed automatic update never triggers the
//! sibling. A manual sync always runs both.

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::engine::events::{EngineEvent, NoticeLevel};
use crate::engine::orchestrator::SheetEngine;
use crate::engine::outcome::UpdateOutcome;

/// A second summarizer that can be forced and suspended.
pub trait ChainedSummarizer: Send + Sync {
    /// Run one forced update. `quiet` suppresses user-facing notices.
    fn force_update(&self, quiet: bool) -> BoxFuture<'_, Result<String, String>>;

    /// Whether the sibling's own automatic scheduling is suspended.
    fn is_suspended(&self) -> bool;

    fn set_suspended(&self, suspended: bool);
}

/// Restores lock mode and the sibling's suspension flag when dropped.
struct SyncRestore<'a> {
    engine: &'a SheetEngine,
    lock_mode: bool,
    suspended: Option<bool>,
}

impl Drop for SyncRestore<'_> {
    fn drop(&mut self) {
        let lock_mode = self.lock_mode;
        self.engine.modify_settings(|s| s.lock_mode = lock_mode);
        if let (Some(sibling), Some(suspended)) = (&self.engine.sibling, self.suspended) {
            sibling.set_suspended(suspended);
        }
        debug!("Sync finished, lock mode restored to {lock_mode}");
    }
}

impl SheetEngine {
    /// Whether lock mode is on.
    pub fn is_locked(&self) -> bool {
        self.settings().lock_mode
    }

    /// Turn lock mode on or off and suspend or resume the sibling to match.
    pub fn set_lock_mode(&self, locked: bool) {
        self.update_settings(|s| s.lock_mode = locked);
        if let Some(sibling) = &self.sibling {
            sibling.set_suspended(locked);
        }
        info!("Lock mode {}", if locked { "enabled" } else { "disabled" });
    }

    /// Force one update of this engine and then, whatever its outcome, one
    /// of the sibling.
    ///
    /// Lock mode and the sibling's suspension are both cleared for the
    /// duration so an automatic cycle running alongside cannot chain the
    /// sibling a second time. Both flags are put back afterwards whatever
    /// happens.
    pub async fn sync(&self) -> UpdateOutcome {
        let _restore = SyncRestore {
            engine: self,
            lock_mode: self.is_locked(),
            suspended: self.sibling.as_ref().map(|s| s.is_suspended()),
        };
        self.modify_settings(|s| s.lock_mode = false);
        if let Some(sibling) = &self.sibling {
            sibling.set_suspended(false);
        }

        let outcome = self.run_update(true).await;
        if let UpdateOutcome::Skipped(reason) = &outcome {
            self.notice(
                NoticeLevel::Warning,
                &format!("Failed to update summary: {reason}"),
            );
        }
        self.chain_sibling().await;
        outcome
    }

    /// Force the sibling once. Failures are reported, never propagated.
    pub(crate) async fn chain_sibling(&self) -> bool {
        let Some(sibling) = &self.sibling else {
            return false;
        };
        debug!("Lock mode: triggering sibling update");
        let succeeded = match sibling.force_update(true).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Sibling update failed: {e}");
                self.notice(NoticeLevel::Warning, &format!("Sibling update failed: {e}"));
                false
            }
        };
        self.emit(&EngineEvent::SiblingTriggered { succeeded });
        succeeded
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::BackendKind;
    use crate::engine::config::{PromptBuilder, SheetSettings};
    use crate::engine::host::MemoryHost;
    use crate::engine::testing::*;

    fn engine(
        host: &MemoryHost,
        backend: ScriptedBackend,
        sibling: Arc<RecordingSibling>,
        lock_mode: bool,
    ) -> SheetEngine {
        let settings = SheetSettings {
            prompt_builder: PromptBuilder::RawNonBlocking,
            lock_mode,
            ..fast_settings()
        };
        SheetEngine::new(settings, host.clone(), host.clone())
            .with_backend(shared(backend))
            .with_sibling(sibling)
    }

    #[tokio::test]
    async fn lock_mode_chains_after_success() {
        let host = host(12);
        let sibling = Arc::new(RecordingSibling::default());
        let engine = engine(
            &host,
            ScriptedBackend::new(BackendKind::RawNonBlocking),
            sibling.clone(),
            true,
        );
        assert!(sibling.is_suspended());

        assert!(engine.on_chat_event().await.is_updated());
        assert_eq!(sibling.call_count(), 1);
    }

    #[tokio::test]
    async fn lock_mode_does_not_chain_after_failure() {
        let host = host(12);
        let sibling = Arc::new(RecordingSibling::default());
        let engine = engine(
            &host,
            ScriptedBackend::new(BackendKind::RawNonBlocking).respond(Err("HTTP 503")),
            sibling.clone(),
            true,
        );
        assert!(!engine.on_chat_event().await.is_updated());
        assert_eq!(sibling.call_count(), 0);
    }

    #[tokio::test]
    async fn unlocked_engine_never_chains() {
        let host = host(12);
        let sibling = Arc::new(RecordingSibling::default());
        let engine = engine(
            &host,
            ScriptedBackend::new(BackendKind::RawNonBlocking),
            sibling.clone(),
            false,
        );
        assert!(engine.on_chat_event().await.is_updated());
        assert_eq!(sibling.call_count(), 0);
    }

    #[tokio::test]
    async fn set_lock_mode_suspends_sibling() {
        let host = host(3);
        let sibling = Arc::new(RecordingSibling::default());
        let engine = engine(
            &host,
            ScriptedBackend::new(BackendKind::RawNonBlocking),
            sibling.clone(),
            false,
        );
        engine.set_lock_mode(true);
        assert!(engine.is_locked());
        assert!(sibling.is_suspended());
        engine.set_lock_mode(false);
        assert!(!engine.is_locked());
        assert!(!sibling.is_suspended());
    }

    #[tokio::test]
    async fn sync_clears_flags_while_running() {
        let host = host(12);
        let sibling = Arc::new(RecordingSibling::default());
        let engine = engine(
            &host,
            ScriptedBackend::new(BackendKind::RawNonBlocking),
            sibling.clone(),
            true,
        );
        assert!(sibling.is_suspended());

        assert!(engine.sync().await.is_updated());
        assert_eq!(sibling.call_count(), 1);
        assert_eq!(*sibling.seen_suspended.lock().unwrap(), vec![false]);
        assert!(engine.is_locked());
        assert!(sibling.is_suspended());
    }

    #[tokio::test]
    async fn sync_keeps_unlocked_flags() {
        let host = host(12);
        let sibling = Arc::new(RecordingSibling::default());
        let engine = engine(
            &host,
            ScriptedBackend::new(BackendKind::RawNonBlocking),
            sibling.clone(),
            false,
        );

        assert!(engine.sync().await.is_updated());
        assert_eq!(sibling.call_count(), 1);
        assert!(!engine.is_locked());
        assert!(!sibling.is_suspended());
    }

    #[tokio::test]
    async fn sync_restores_flags_when_sibling_fails() {
        let host = host(12);
        let sibling = Arc::new(RecordingSibling::failing());
        let engine = engine(
            &host,
            ScriptedBackend::new(BackendKind::RawNonBlocking),
            sibling.clone(),
            true,
        );

        assert!(engine.sync().await.is_updated());
        assert_eq!(sibling.call_count(), 1);
        assert!(engine.is_locked());
        assert!(sibling.is_suspended());
    }

    #[tokio::test]
    async fn sync_runs_sibling_when_update_fails() {
        let host = host(12);
        let sibling = Arc::new(RecordingSibling::default());
        let engine = engine(
            &host,
            ScriptedBackend::new(BackendKind::RawNonBlocking).respond(Err("down")),
            sibling.clone(),
            true,
        );

        assert!(!engine.sync().await.is_updated());
        assert_eq!(sibling.call_count(), 1);
        assert_eq!(*sibling.seen_suspended.lock().unwrap(), vec![false]);
        assert!(engine.is_locked());
        assert!(sibling.is_suspended());
    }
}
