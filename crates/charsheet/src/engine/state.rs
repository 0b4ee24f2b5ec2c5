//! Per-engine mutable state.
//!
//! Each [`SheetEngine`](super::SheetEngine) owns one [`EngineState`], so
//! independent engines (one per conversation, say) never share an in-flight
//! flag or fingerprint.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::history::Fingerprint;

#[derive(Debug, Default)]
pub struct EngineState {
    in_flight: AtomicBool,
    fingerprint: Mutex<Option<Fingerprint>>,
    live_summary: Mutex<String>,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a backend call is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claim the in-flight slot. Returns `None` if it is already held.
    pub fn try_acquire(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard { flag: &self.in_flight })
    }

    /// Fingerprint recorded at the end of the last evaluation.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        *self.fingerprint.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_fingerprint(&self, fingerprint: Fingerprint) {
        *self.fingerprint.lock().unwrap_or_else(|e| e.into_inner()) = Some(fingerprint);
    }

    /// Forget the fingerprint so the next evaluation runs in full.
    pub fn clear_fingerprint(&self) {
        *self.fingerprint.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// The summary currently in effect.
    pub fn live_summary(&self) -> String {
        self.live_summary
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_live_summary(&self, summary: impl Into<String>) {
        *self.live_summary.lock().unwrap_or_else(|e| e.into_inner()) = summary.into();
    }
}

/// Holds the in-flight slot; released on drop, whatever the cycle's outcome.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
