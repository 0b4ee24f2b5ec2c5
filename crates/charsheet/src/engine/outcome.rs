//! Result of one update cycle.
//!
//! Nothing in the live path is an error from the host's point of view: every
//! way a cycle can end without a new summary is a [`SkipReason`]. Callers
//! that surface results to a user (force and sync commands) render the
//! reason as a one-line notice.

use std::fmt;

/// Why a cycle ended without persisting a summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Automatic updates are switched off.
    Disabled,
    /// Automatic updates are frozen.
    Frozen,
    /// Another cycle's backend call is outstanding.
    InFlight,
    /// The host is still streaming a response.
    Streaming,
    /// Nothing changed since the last evaluation.
    NoChanges,
    /// Interval, word threshold, or minimum history length not met, or the
    /// rendered prompt was empty.
    Policy,
    /// Generation did not settle within the quiescence bounds.
    QuiescenceTimeout,
    /// The backend returned nothing.
    EmptyResult,
    /// The backend call failed.
    BackendFailure(String),
    /// The delegated summarization service rejected the request.
    DelegateRejected(String),
    /// The active conversation changed during the call.
    StaleContext,
    /// Not even one message fits the budget after the checkpoint.
    NoWindow,
    /// No backend is registered or the selected one is unavailable.
    Unavailable,
    /// The delegated backend has not accumulated a full budget yet.
    BelowBudget,
}

impl SkipReason {
    /// Whether the skip is worth a warning in logs.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SkipReason::EmptyResult
                | SkipReason::BackendFailure(_)
                | SkipReason::DelegateRejected(_)
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Disabled => write!(f, "summary updates are disabled"),
            SkipReason::Frozen => write!(f, "summary updates are frozen"),
            SkipReason::InFlight => write!(f, "an update is already running"),
            SkipReason::Streaming => write!(f, "a response is still streaming"),
            SkipReason::NoChanges => write!(f, "no new messages"),
            SkipReason::Policy => write!(f, "update thresholds not met"),
            SkipReason::QuiescenceTimeout => write!(f, "generation did not settle in time"),
            SkipReason::EmptyResult => write!(f, "empty summary received"),
            SkipReason::BackendFailure(e) => write!(f, "backend failed: {e}"),
            SkipReason::DelegateRejected(e) => write!(f, "summarization service rejected: {e}"),
            SkipReason::StaleContext => write!(f, "conversation changed during update"),
            SkipReason::NoWindow => write!(
                f,
                "no messages found to update from; remove the latest summary to try again"
            ),
            SkipReason::Unavailable => write!(f, "no summarization backend available"),
            SkipReason::BelowBudget => write!(f, "not enough new content for the service yet"),
        }
    }
}

/// Outcome of one update cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new summary was written as the checkpoint on message `index`.
    Updated { summary: String, index: usize },
    Skipped(SkipReason),
}

impl UpdateOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, UpdateOutcome::Updated { .. })
    }

    /// The new summary, if one was persisted.
    pub fn summary(&self) -> Option<&str> {
        match self {
            UpdateOutcome::Updated { summary, .. } => Some(summary),
            UpdateOutcome::Skipped(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            UpdateOutcome::Skipped(reason) => Some(reason),
            UpdateOutcome::Updated { .. } => None,
        }
    }
}

impl From<SkipReason> for UpdateOutcome {
    fn from(reason: SkipReason) -> Self {
        UpdateOutcome::Skipped(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_classified() {
        assert!(SkipReason::EmptyResult.is_failure());
        assert!(SkipReason::BackendFailure("boom".into()).is_failure());
        assert!(!SkipReason::StaleContext.is_failure());
        assert!(!SkipReason::Policy.is_failure());
    }

    #[test]
    fn outcome_accessors() {
        let updated = UpdateOutcome::Updated {
            summary: "sheet".into(),
            index: 3,
        };
        assert!(updated.is_updated());
        assert_eq!(updated.summary(), Some("sheet"));
        assert!(updated.skip_reason().is_none());

        let skipped: UpdateOutcome = SkipReason::NoWindow.into();
        assert!(!skipped.is_updated());
        assert_eq!(skipped.summary(), None);
        assert_eq!(skipped.skip_reason(), Some(&SkipReason::NoWindow));
    }

    #[test]
    fn display_is_one_line() {
        let msg = SkipReason::BackendFailure("HTTP 500".into()).to_string();
        assert_eq!(msg, "backend failed: HTTP 500");
        assert!(!SkipReason::NoWindow.to_string().contains('\n'));
    }
}
