//! Command surface: `update | sync | freeze | unfreeze | lock | unlock | get |
//! edit | status | tune`.
//!
//! Every command returns a one-line string for the caller to show.

use std::fmt;
use std::str::FromStr;

use crate::engine::orchestrator::SheetEngine;
use crate::engine::outcome::UpdateOutcome;

/// One user-issued command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Force an update (a sync while lock mode is on).
    Update,
    /// Force this engine and the sibling.
    Sync,
    Freeze,
    Unfreeze,
    Lock,
    Unlock,
    /// Print the live summary.
    Get,
    /// Replace the live summary.
    Edit(String),
    /// Restore the previous checkpoint.
    Restore,
    Status,
    /// Auto-tune the message interval and force-word threshold.
    Tune,
}

impl FromStr for Action {
    type Err = String;

    /// Parse `action [text]`. An empty string is `status`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, rest) = s.split_once(char::is_whitespace).unwrap_or((s, ""));
        let action = match name.to_ascii_lowercase().as_str() {
            "update" => Action::Update,
            "sync" => Action::Sync,
            "freeze" => Action::Freeze,
            "unfreeze" => Action::Unfreeze,
            "lock" => Action::Lock,
            "unlock" => Action::Unlock,
            "get" => Action::Get,
            "edit" => Action::Edit(rest.trim().to_string()),
            "restore" => Action::Restore,
            "" | "status" => Action::Status,
            "tune" => Action::Tune,
            other => return Err(format!("unknown action: {other}")),
        };
        Ok(action)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Update => "update",
            Action::Sync => "sync",
            Action::Freeze => "freeze",
            Action::Unfreeze => "unfreeze",
            Action::Lock => "lock",
            Action::Unlock => "unlock",
            Action::Get => "get",
            Action::Edit(_) => "edit",
            Action::Restore => "restore",
            Action::Status => "status",
            Action::Tune => "tune",
        };
        f.write_str(name)
    }
}

impl SheetEngine {
    /// Run `action` and return the line to show the user.
    pub async fn execute(&self, action: Action, quiet: bool) -> String {
        match action {
            Action::Update if self.is_locked() => summary_line(self.sync().await),
            Action::Update => self.force_update(quiet).await,
            Action::Sync => summary_line(self.sync().await),
            Action::Freeze => {
                self.update_settings(|s| s.frozen = true);
                "Character sheet updates frozen".to_string()
            }
            Action::Unfreeze => {
                self.update_settings(|s| s.frozen = false);
                "Character sheet updates unfrozen".to_string()
            }
            Action::Lock => {
                self.set_lock_mode(true);
                "Lock mode enabled. Sibling summarizer is suspended.".to_string()
            }
            Action::Unlock => {
                self.set_lock_mode(false);
                "Lock mode disabled. Sibling summarizer can update independently.".to_string()
            }
            Action::Get => self.current_summary(),
            Action::Edit(text) if text.trim().is_empty() => {
                "Nothing to write: edit needs the new summary text".to_string()
            }
            Action::Edit(text) => {
                if self.edit(text.trim()) {
                    "Character sheet updated".to_string()
                } else {
                    "No message to store the character sheet on".to_string()
                }
            }
            Action::Restore => self.restore_previous(),
            Action::Status => self.status(),
            Action::Tune => {
                let interval = self.auto_tune_interval().await;
                let words = self.auto_tune_force_words().await;
                match (interval, words) {
                    (Some(i), Some(w)) => format!(
                        "Message interval set to {}, force word threshold set to {}",
                        i.value, w.value
                    ),
                    _ => "Not enough history to tune".to_string(),
                }
            }
        }
    }

    /// `Character sheet is active (lock mode)` and similar.
    pub fn status(&self) -> String {
        let settings = self.settings();
        let state = if settings.frozen { "frozen" } else { "active" };
        let lock = if settings.lock_mode { " (lock mode)" } else { "" };
        format!("Character sheet is {state}{lock}. Use `update` to force an update")
    }
}

fn summary_line(outcome: UpdateOutcome) -> String {
    match outcome {
        UpdateOutcome::Updated { summary, .. } => summary,
        UpdateOutcome::Skipped(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::BackendKind;
    use crate::engine::config::{PromptBuilder, SheetSettings};
    use crate::engine::lock::ChainedSummarizer;
    use crate::engine::testing::*;

    fn setup(n: usize) -> (SheetEngine, Arc<RecordingSibling>) {
        let host = host(n);
        let sibling = Arc::new(RecordingSibling::default());
        let settings = SheetSettings {
            prompt_builder: PromptBuilder::RawNonBlocking,
            ..fast_settings()
        };
        let engine = SheetEngine::new(settings, host.clone(), host)
            .with_backend(shared(
                ScriptedBackend::new(BackendKind::RawNonBlocking).respond(Ok("Sheet")),
            ))
            .with_sibling(sibling.clone());
        (engine, sibling)
    }

    #[test]
    fn parses_actions() {
        assert_eq!("update".parse::<Action>().unwrap(), Action::Update);
        assert_eq!(" SYNC ".parse::<Action>().unwrap(), Action::Sync);
        assert_eq!("".parse::<Action>().unwrap(), Action::Status);
        assert_eq!(
            "edit  Alice is brave. ".parse::<Action>().unwrap(),
            Action::Edit("Alice is brave.".into())
        );
        assert!("explode".parse::<Action>().is_err());
        assert_eq!(Action::Edit("x".into()).to_string(), "edit");
    }

    #[tokio::test]
    async fn update_forces_without_sibling_when_unlocked() {
        let (engine, sibling) = setup(12);
        assert_eq!(engine.execute(Action::Update, true).await, "Sheet");
        assert_eq!(sibling.call_count(), 0);
    }

    #[tokio::test]
    async fn update_syncs_when_locked() {
        let (engine, sibling) = setup(12);
        engine.execute(Action::Lock, true).await;
        assert_eq!(engine.execute(Action::Update, true).await, "Sheet");
        assert_eq!(sibling.call_count(), 1);
        assert!(engine.is_locked());
        assert!(sibling.is_suspended());
    }

    #[tokio::test]
    async fn freeze_and_status() {
        let (engine, _) = setup(3);
        assert_eq!(
            engine.execute(Action::Status, true).await,
            "Character sheet is active. Use `update` to force an update"
        );
        engine.execute(Action::Freeze, true).await;
        engine.execute(Action::Lock, true).await;
        assert_eq!(
            engine.execute(Action::Status, true).await,
            "Character sheet is frozen (lock mode). Use `update` to force an update"
        );
        engine.execute(Action::Unfreeze, true).await;
        assert!(!engine.settings().frozen);
    }

    #[tokio::test]
    async fn edit_get_and_restore() {
        let (engine, _) = setup(4);
        assert_eq!(engine.execute(Action::Get, true).await, "");
        assert_eq!(
            engine.execute(Action::Edit("Alice is brave.".into()), true).await,
            "Character sheet updated"
        );
        assert_eq!(engine.execute(Action::Get, true).await, "Alice is brave.");
        assert_eq!(engine.execute(Action::Restore, true).await, "");
        assert!(
            engine
                .execute(Action::Edit("  ".into()), true)
                .await
                .starts_with("Nothing to write")
        );
    }

    #[tokio::test]
    async fn tune_reports_values() {
        let (engine, _) = setup(30);
        let line = engine.execute(Action::Tune, true).await;
        assert!(line.starts_with("Message interval set to"), "{line}");

        let (empty, _) = setup(0);
        assert_eq!(empty.execute(Action::Tune, true).await, "Not enough history to tune");
    }
}
