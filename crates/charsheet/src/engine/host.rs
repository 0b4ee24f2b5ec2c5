//! Host collaborator seams.
//!
//! The host owns the conversation history, knows which conversation is
//! active, and knows whether it is currently generating. The engine reaches
//! all of that through two small traits so it can run against a real chat
//! front end, a JSON file ([`FileHistory`](crate::store::FileHistory)), or
//! the in-memory [`MemoryHost`] used in tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::history::{ConversationId, History, Message};

/// The externally owned conversation history.
pub trait HistoryStore: Send + Sync {
    /// Immutable copy of the history as it is right now.
    fn snapshot(&self) -> History;

    /// Identity of the active conversation.
    fn conversation(&self) -> ConversationId;

    /// Set or clear the checkpoint summary on message `index`.
    /// Returns `false` when `index` is out of range.
    fn write_summary(&self, index: usize, summary: Option<&str>) -> bool;

    /// Schedule a save. Fire-and-forget; repeated calls may coalesce.
    fn save_debounced(&self);
}

/// Generation-state flags of the host. Every flag defaults to idle.
pub trait HostSignals: Send + Sync {
    fn is_group_chat(&self) -> bool {
        false
    }

    fn is_group_generating(&self) -> bool {
        false
    }

    fn is_send_pending(&self) -> bool {
        false
    }

    /// Whether a streamed response is still arriving.
    fn is_streaming(&self) -> bool {
        false
    }

    /// Suspend or resume user input.
    fn set_input_blocked(&self, blocked: bool) {
        let _ = blocked;
    }
}

/// Host notifications the engine subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// A message finished rendering (appended or regenerated).
    MessageRendered,
    MessageDeleted,
    MessageEdited,
    /// An alternative response was selected.
    MessageSwiped,
    /// The user switched conversation.
    ChatChanged,
}

/// Host with no generation activity.
pub struct IdleSignals;

impl HostSignals for IdleSignals {}

// ── In-memory host ─────────────────────────────────────────────────

#[derive(Default)]
struct MemoryInner {
    messages: Mutex<Vec<Message>>,
    conversation: Mutex<ConversationId>,
    group_chat: AtomicBool,
    group_generating: AtomicBool,
    send_pending: AtomicBool,
    streaming: AtomicBool,
    input_blocked: AtomicBool,
    input_block_count: AtomicUsize,
    save_count: AtomicUsize,
}

/// In-memory history and signals. Cloning shares the same state, so a test
/// can hand one clone to the engine and drive the host through another.
#[derive(Clone, Default)]
pub struct MemoryHost {
    inner: Arc<MemoryInner>,
}

impl MemoryHost {
    pub fn new(conversation: ConversationId, messages: Vec<Message>) -> Self {
        let host = Self::default();
        host.switch_conversation(conversation, messages);
        host
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock_messages().clone()
    }

    pub fn push(&self, message: Message) {
        self.lock_messages().push(message);
    }

    /// Replace the text of message `index` (edit or regenerate).
    pub fn set_text(&self, index: usize, text: impl Into<String>) -> bool {
        match self.lock_messages().get_mut(index) {
            Some(msg) => {
                msg.text = text.into();
                true
            }
            None => false,
        }
    }

    /// Keep only the first `len` messages.
    pub fn truncate(&self, len: usize) {
        self.lock_messages().truncate(len);
    }

    /// Replace the active conversation and its history.
    pub fn switch_conversation(&self, conversation: ConversationId, messages: Vec<Message>) {
        self.inner.group_chat.store(conversation.group_id.is_some(), Ordering::Release);
        *self
            .inner
            .conversation
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = conversation;
        *self.lock_messages() = messages;
    }

    pub fn set_group_generating(&self, value: bool) {
        self.inner.group_generating.store(value, Ordering::Release);
    }

    pub fn set_send_pending(&self, value: bool) {
        self.inner.send_pending.store(value, Ordering::Release);
    }

    pub fn set_streaming(&self, value: bool) {
        self.inner.streaming.store(value, Ordering::Release);
    }

    pub fn input_blocked(&self) -> bool {
        self.inner.input_blocked.load(Ordering::Acquire)
    }

    /// How many times input was blocked.
    pub fn input_block_count(&self) -> usize {
        self.inner.input_block_count.load(Ordering::Acquire)
    }

    /// How many saves were requested.
    pub fn save_count(&self) -> usize {
        self.inner.save_count.load(Ordering::Acquire)
    }

    fn lock_messages(&self) -> std::sync::MutexGuard<'_, Vec<Message>> {
        self.inner.messages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl HistoryStore for MemoryHost {
    fn snapshot(&self) -> History {
        History::new(self.messages())
    }

    fn conversation(&self) -> ConversationId {
        self.inner
            .conversation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn write_summary(&self, index: usize, summary: Option<&str>) -> bool {
        match self.lock_messages().get_mut(index) {
            Some(msg) => {
                msg.set_summary(summary);
                true
            }
            None => false,
        }
    }

    fn save_debounced(&self) {
        self.inner.save_count.fetch_add(1, Ordering::AcqRel);
    }
}

impl HostSignals for MemoryHost {
    fn is_group_chat(&self) -> bool {
        self.inner.group_chat.load(Ordering::Acquire)
    }

    fn is_group_generating(&self) -> bool {
        self.inner.group_generating.load(Ordering::Acquire)
    }

    fn is_send_pending(&self) -> bool {
        self.inner.send_pending.load(Ordering::Acquire)
    }

    fn is_streaming(&self) -> bool {
        self.inner.streaming.load(Ordering::Acquire)
    }

    fn set_input_blocked(&self, blocked: bool) {
        if blocked {
            self.inner.input_block_count.fetch_add(1, Ordering::AcqRel);
        }
        self.inner.input_blocked.store(blocked, Ordering::Release);
    }
}

/// Blocks user input for its lifetime when the backend asks for it.
pub(crate) struct InputBlock<'a> {
    signals: Option<&'a dyn HostSignals>,
}

impl<'a> InputBlock<'a> {
    pub(crate) fn new(signals: &'a dyn HostSignals, block: bool) -> Self {
        if block {
            signals.set_input_blocked(true);
        }
        Self {
            signals: block.then_some(signals),
        }
    }
}

impl Drop for InputBlock<'_> {
    fn drop(&mut self) {
        if let Some(signals) = self.signals {
            signals.set_input_blocked(false);
        }
    }
}
