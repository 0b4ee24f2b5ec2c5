//! Conversation messages, immutable history snapshots, and conversation identity.
//!
//! The history itself is owned by the host. The engine only ever sees a
//! [`History`] snapshot taken once per update cycle, and only writes back
//! through [`HistoryStore`](crate::engine::host::HistoryStore) annotation
//! updates on a single message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Annotation key under which a checkpoint summary is stored.
pub const SUMMARY_KEY: &str = "summary";

/// One turn of the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Message {
    /// Speaker name, rendered as `speaker: text` in summarization input.
    pub speaker: String,
    /// Message text. May be empty (e.g. a generation placeholder).
    #[serde(default)]
    pub text: String,
    /// System messages are never fed to the summarizer.
    #[serde(default)]
    pub is_system: bool,
    /// Open-ended annotation bag owned by the history store.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub annotations: Map<String, Value>,
}

impl Message {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn system(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            is_system: true,
            ..Self::new(speaker, text)
        }
    }

    /// Attach a checkpoint summary (builder form, mostly for fixtures).
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.set_summary(Some(&summary.into()));
        self
    }

    /// The checkpoint summary on this message, if any.
    ///
    /// Empty strings do not count as checkpoints.
    pub fn summary(&self) -> Option<&str> {
        self.annotations
            .get(SUMMARY_KEY)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Set or clear the checkpoint summary.
    pub fn set_summary(&mut self, summary: Option<&str>) {
        match summary {
            Some(s) => {
                self.annotations
                    .insert(SUMMARY_KEY.to_string(), Value::String(s.to_string()));
            }
            None => {
                self.annotations.remove(SUMMARY_KEY);
            }
        }
    }

    /// Whether this message is eligible as summarization input.
    pub fn is_summarizable(&self) -> bool {
        !self.is_system && !self.text.is_empty()
    }

    /// Render as a summarization input entry.
    pub fn entry(&self) -> String {
        format!("{}: {}", self.speaker, self.text)
    }
}

/// Immutable snapshot of a conversation history, taken once per cycle.
///
/// Index arithmetic on the live history is fragile when the host mutates it
/// mid-cycle, so every named operation here works on the frozen copy.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Every message except the newest, which is presumed still in progress.
    pub fn snapshot_excluding_last(&self) -> &[Message] {
        let end = self.messages.len().saturating_sub(1);
        &self.messages[..end]
    }

    /// Conventional persistence target when no boundary was computed: the
    /// message just before the one currently being generated, clamped to 0.
    pub fn default_target_index(&self) -> usize {
        self.messages.len().saturating_sub(2)
    }

    /// Cheap "anything new?" fingerprint of the newest message.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            length: self.messages.len(),
            hash: text_hash(self.last().map_or("", |m| m.text.as_str())),
        }
    }

    /// Non-system, non-empty messages (the "visible" corpus).
    pub fn visible_texts(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|m| m.is_summarizable())
            .map(|m| m.text.as_str())
            .collect()
    }
}

impl From<Vec<Message>> for History {
    fn from(messages: Vec<Message>) -> Self {
        Self::new(messages)
    }
}

/// Length and text hash of the newest message at the end of a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    pub length: usize,
    pub hash: u64,
}

/// Stable-within-process hash of a message text.
pub fn text_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Count words: maximal runs of alphanumeric characters or underscores.
pub fn count_words(text: &str) -> usize {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .count()
}

/// Identity of the active conversation, captured before an asynchronous
/// backend call and compared again before persisting its result.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationId {
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
}

impl ConversationId {
    /// A one-on-one chat with no group or character attached.
    pub fn chat(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            ..Default::default()
        }
    }

    pub fn with_character(mut self, character_id: impl Into<String>) -> Self {
        self.character_id = Some(character_id.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Whether `other` refers to the same conversation.
    ///
    /// In group chats the active character rotates, so only group and chat
    /// are compared; in solo chats the character must match as well.
    pub fn same_conversation(&self, other: &ConversationId) -> bool {
        self.group_id == other.group_id
            && self.chat_id == other.chat_id
            && (self.group_id.is_some() || self.character_id == other.character_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_annotation_roundtrip() {
        let mut msg = Message::new("Alice", "hello");
        assert!(msg.summary().is_none());
        msg.set_summary(Some("Alice greets."));
        assert_eq!(msg.summary(), Some("Alice greets."));
        msg.set_summary(None);
        assert!(msg.summary().is_none());
        assert!(msg.annotations.is_empty());
    }

    #[test]
    fn empty_summary_is_not_a_checkpoint() {
        let msg = Message::new("Alice", "hello").with_summary("");
        assert!(msg.summary().is_none());
    }

    #[test]
    fn non_string_summary_is_ignored() {
        let mut msg = Message::new("Alice", "hello");
        msg.annotations.insert(SUMMARY_KEY.into(), Value::Bool(true));
        assert!(msg.summary().is_none());
    }

    #[test]
    fn system_and_empty_messages_are_not_summarizable() {
        assert!(Message::new("Bob", "hi").is_summarizable());
        assert!(!Message::new("Bob", "").is_summarizable());
        assert!(!Message::system("narrator", "scene change").is_summarizable());
    }

    #[test]
    fn entry_format() {
        assert_eq!(Message::new("Bob", "hi there").entry(), "Bob: hi there");
    }

    #[test]
    fn snapshot_excluding_last_drops_newest() {
        let history = History::new(vec![Message::new("a", "1"), Message::new("b", "2")]);
        let rest = history.snapshot_excluding_last();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].text, "1");
        assert!(History::default().snapshot_excluding_last().is_empty());
    }

    #[test]
    fn default_target_is_clamped() {
        assert_eq!(History::default().default_target_index(), 0);
        assert_eq!(History::new(vec![Message::new("a", "1")]).default_target_index(), 0);
        let three = History::new(vec![Message::new("a", "1"); 3]);
        assert_eq!(three.default_target_index(), 1);
    }

    #[test]
    fn fingerprint_tracks_last_text() {
        let a = History::new(vec![Message::new("a", "one")]);
        let b = History::new(vec![Message::new("a", "two")]);
        assert_eq!(a.fingerprint().length, b.fingerprint().length);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
    }

    #[test]
    fn word_counting() {
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("Hello, world!"), 2);
        assert_eq!(count_words("  spaced   out\nlines "), 3);
        assert_eq!(count_words("snake_case counts once"), 3);
    }

    #[test]
    fn solo_conversation_identity_includes_character() {
        let a = ConversationId::chat("c1").with_character("alice");
        let b = ConversationId::chat("c1").with_character("bob");
        assert!(a.same_conversation(&a.clone()));
        assert!(!a.same_conversation(&b));
        assert!(!a.same_conversation(&ConversationId::chat("c2").with_character("alice")));
    }

    #[test]
    fn group_conversation_identity_ignores_character() {
        let a = ConversationId::chat("c1").with_group("g").with_character("alice");
        let b = ConversationId::chat("c1").with_group("g").with_character("bob");
        assert!(a.same_conversation(&b));
        let other_group = ConversationId::chat("c1").with_group("h");
        assert!(!a.same_conversation(&other_group));
    }
}
