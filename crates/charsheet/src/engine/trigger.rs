//! Trigger policy: whether an update should run now.
//!
//! [`evaluate`] is the pure part (thresholds over a snapshot);
//! [`should_trigger`] adds the bounded quiescence wait and takes the
//! snapshot only after the host has settled.

use std::time::Duration;

use tracing::debug;

use crate::context::template::substitute;
use crate::engine::config::{QuiescenceConfig, SheetSettings};
use crate::engine::host::{HistoryStore, HostSignals};
use crate::engine::outcome::SkipReason;
use crate::history::{History, count_words};

/// New content since the current checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub messages: usize,
    pub words: usize,
}

/// A trigger that fired: the rendered prompt and the snapshot it applies to.
#[derive(Debug, Clone)]
pub struct Fired {
    pub prompt: String,
    pub history: History,
}

/// Count non-system messages and their words from the newest message back
/// to (not including) the nearest checkpointed message.
///
/// Unlike the checkpoint locator this includes the newest message: it is new
/// content even if it is still being generated.
pub fn count_since_checkpoint(history: &History) -> WindowCounts {
    let mut counts = WindowCounts::default();
    for msg in history.messages().iter().rev() {
        if msg.summary().is_some() {
            break;
        }
        if msg.is_system {
            continue;
        }
        counts.messages += 1;
        counts.words += count_words(&msg.text);
    }
    counts
}

/// Render the summarization prompt (`{{words}}` placeholder).
pub fn render_prompt(settings: &SheetSettings) -> String {
    substitute(
        &settings.prompt,
        &[("words", &settings.prompt_words.to_string())],
    )
}

/// Threshold checks over an already-settled snapshot.
pub fn evaluate(history: &History, settings: &SheetSettings, force: bool) -> Result<String, SkipReason> {
    if history.is_empty() {
        debug!("Trigger check: history is empty");
        return Err(SkipReason::Policy);
    }

    let min_length = settings.min_history_length();
    if history.len() < min_length && !force {
        debug!(
            "Trigger check: history length {} below minimum {min_length}",
            history.len()
        );
        return Err(SkipReason::Policy);
    }

    let counts = count_since_checkpoint(history);
    let interval_met = counts.messages >= settings.message_interval;
    let words_met =
        settings.force_word_threshold > 0 && counts.words >= settings.force_word_threshold;
    debug!(
        "Since checkpoint: {} messages, {} words (interval={}, force_words={})",
        counts.messages, counts.words, settings.message_interval, settings.force_word_threshold
    );

    if !(interval_met || words_met || force) {
        debug!("Trigger check: thresholds not met");
        return Err(SkipReason::Policy);
    }

    let prompt = render_prompt(settings);
    if prompt.trim().is_empty() {
        debug!("Trigger check: rendered prompt is empty");
        return Err(SkipReason::Policy);
    }
    Ok(prompt)
}

/// Poll `condition` every `interval` until it holds, checking at most
/// `max_attempts + 1` times. Returns whether it held.
pub async fn wait_until(condition: impl Fn() -> bool, interval: Duration, max_attempts: u32) -> bool {
    if condition() {
        return true;
    }
    for _ in 0..max_attempts {
        tokio::time::sleep(interval).await;
        if condition() {
            return true;
        }
    }
    false
}

/// Wait for group generation (group chats only), then for a pending send,
/// to clear.
pub async fn wait_for_quiescence(
    signals: &dyn HostSignals,
    config: &QuiescenceConfig,
) -> Result<(), SkipReason> {
    if signals.is_group_chat() {
        debug!("Waiting for group generation to finish");
        let settled = wait_until(
            || !signals.is_group_generating(),
            config.group_poll(),
            config.group_max_attempts,
        )
        .await;
        if !settled {
            debug!("Group generation did not settle, skipping update");
            return Err(SkipReason::QuiescenceTimeout);
        }
    }

    let settled = wait_until(
        || !signals.is_send_pending(),
        config.send_poll(),
        config.send_max_attempts,
    )
    .await;
    if !settled {
        debug!("Send did not complete, skipping update");
        return Err(SkipReason::QuiescenceTimeout);
    }
    Ok(())
}

/// Decide whether to run an update now.
///
/// The history snapshot is taken after the quiescence wait, so it includes
/// whatever the host finished generating meanwhile.
pub async fn should_trigger(
    store: &dyn HistoryStore,
    signals: &dyn HostSignals,
    settings: &SheetSettings,
    force: bool,
) -> Result<Fired, SkipReason> {
    if settings.message_interval == 0 && !force {
        debug!("Trigger check: message interval is 0 and not forced");
        return Err(SkipReason::Policy);
    }

    wait_for_quiescence(signals, &settings.quiescence).await?;

    let history = store.snapshot();
    let prompt = evaluate(&history, settings, force)?;
    Ok(Fired { prompt, history })
}
