//! Checkpoint locator.
//!
//! The current checkpoint is the summary annotation on the most recent
//! message that carries one, scanning backward and **skipping the newest
//! message**, which is presumed still in progress.

use crate::history::History;

/// The summary currently in effect and where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Summary text stored on the message.
    pub content: String,
    /// Index of the carrying message in the original history ordering.
    pub index: usize,
}

/// Find the current checkpoint in `history`.
///
/// Returns `None` when the history has fewer than two messages or no message
/// other than the newest carries a summary.
pub fn find_checkpoint(history: &History) -> Option<Checkpoint> {
    history
        .snapshot_excluding_last()
        .iter()
        .enumerate()
        .rev()
        .find_map(|(index, msg)| {
            msg.summary().map(|content| Checkpoint {
                content: content.to_string(),
                index,
            })
        })
}

/// Index of the current checkpoint, if any.
pub fn index_of_most_recent_checkpoint(history: &History) -> Option<usize> {
    find_checkpoint(history).map(|c| c.index)
}

/// Content of the current checkpoint, or an empty string.
pub fn latest_summary(history: &History) -> String {
    find_checkpoint(history).map(|c| c.content).unwrap_or_default()
}

/// Index of the newest checkpoint (skipping the newest message) whose
/// content equals `content`. Used by restore to find what to delete.
pub fn find_checkpoint_with_content(history: &History, content: &str) -> Option<usize> {
    history
        .snapshot_excluding_last()
        .iter()
        .enumerate()
        .rev()
        .find(|(_, msg)| msg.summary() == Some(content))
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Message;

    fn history(n: usize, checkpoints: &[(usize, &str)]) -> History {
        let mut messages: Vec<Message> = (0..n)
            .map(|i| Message::new("user", format!("message {i}")))
            .collect();
        for (idx, summary) in checkpoints {
            messages[*idx].set_summary(Some(summary));
        }
        History::new(messages)
    }

    #[test]
    fn empty_and_single_histories_have_no_checkpoint() {
        assert!(find_checkpoint(&History::default()).is_none());
        assert!(find_checkpoint(&history(1, &[(0, "s")])).is_none());
    }

    #[test]
    fn newest_message_is_skipped() {
        let h = history(4, &[(3, "on newest")]);
        assert!(find_checkpoint(&h).is_none());
    }

    #[test]
    fn most_recent_checkpoint_wins() {
        let h = history(6, &[(1, "old"), (4, "new")]);
        let cp = find_checkpoint(&h).unwrap();
        assert_eq!(cp.index, 4);
        assert_eq!(cp.content, "new");
    }

    #[test]
    fn falls_back_past_newest_checkpoint() {
        let h = history(6, &[(2, "older"), (5, "on newest")]);
        let cp = find_checkpoint(&h).unwrap();
        assert_eq!(cp.index, 2);
        assert_eq!(cp.content, "older");
    }

    #[test]
    fn never_returns_last_index_and_content_matches_annotation() {
        for n in 0..8 {
            let checkpoints: Vec<(usize, &str)> = (0..n).map(|i| (i, "s")).collect();
            let h = history(n, &checkpoints);
            if let Some(cp) = find_checkpoint(&h) {
                assert_ne!(cp.index, n - 1);
                assert_eq!(h.get(cp.index).and_then(|m| m.summary()), Some(cp.content.as_str()));
            }
        }
    }

    #[test]
    fn latest_summary_defaults_to_empty() {
        assert_eq!(latest_summary(&history(3, &[])), "");
        assert_eq!(latest_summary(&history(3, &[(0, "first")])), "first");
        assert_eq!(index_of_most_recent_checkpoint(&history(3, &[(1, "x")])), Some(1));
    }

    #[test]
    fn content_lookup_prefers_newest_match() {
        let h = history(6, &[(1, "same"), (3, "same"), (5, "same")]);
        assert_eq!(find_checkpoint_with_content(&h, "same"), Some(3));
        assert_eq!(find_checkpoint_with_content(&h, "other"), None);
    }
}
