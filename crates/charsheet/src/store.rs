//! JSON-file history store.
//!
//! [`FileHistory`] keeps the conversation in a [`MemoryHost`] and writes it
//! back to a JSON file. Saves requested through
//! [`HistoryStore::save_debounced`] are coalesced: each request bumps a
//! generation counter and schedules a write after the debounce delay, and
//! only the task holding the latest generation writes.
//!
//! File layout:
//! ```json
//! {
//!   "conversation": { "chat_id": "chat-1", "character_id": "alice" },
//!   "messages": [
//!     { "speaker": "Alice", "text": "Hello" },
//!     { "speaker": "Bob", "text": "Hi", "annotations": { "summary": "..." } }
//!   ],
//!   "saved_at": "2026-01-01T12:00:00+00:00"
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::host::{HistoryStore, HostSignals, MemoryHost};
use crate::history::{ConversationId, History, Message};

/// Default delay before a requested save is written.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// On-disk form of a conversation.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HistoryFile {
    #[serde(default)]
    pub conversation: ConversationId,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// RFC 3339 timestamp of the last write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<String>,
}

/// History backed by a JSON file.
pub struct FileHistory {
    path: PathBuf,
    host: MemoryHost,
    generation: Arc<AtomicU64>,
    debounce: Duration,
}

impl FileHistory {
    /// Load `path`. A missing file starts an empty conversation named after
    /// the file stem.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let file = if path.exists() {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| format!("failed to read history {}: {e}", path.display()))?;
            serde_json::from_str::<HistoryFile>(&json)
                .map_err(|e| format!("failed to parse history {}: {e}", path.display()))?
        } else {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            HistoryFile {
                conversation: ConversationId::chat(stem),
                ..Default::default()
            }
        };
        debug!(
            "Loaded {} messages from {}",
            file.messages.len(),
            path.display()
        );

        Ok(Self {
            host: MemoryHost::new(file.conversation, file.messages),
            path,
            generation: Arc::new(AtomicU64::new(0)),
            debounce: DEFAULT_DEBOUNCE,
        })
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The in-memory conversation, for appending messages.
    pub fn host(&self) -> &MemoryHost {
        &self.host
    }

    /// Write now, cancelling any pending debounced save.
    pub fn flush(&self) -> Result<(), String> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        write_file(&self.path, &self.host)
    }
}

/// Atomic write: serialize to a temp file, then rename into place.
fn write_file(path: &Path, host: &MemoryHost) -> Result<(), String> {
    let file = HistoryFile {
        conversation: host.conversation(),
        messages: host.messages(),
        saved_at: Some(Utc::now().to_rfc3339()),
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| format!("failed to serialize history: {e}"))?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("failed to create history dir: {e}"))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json).map_err(|e| format!("failed to write temp history: {e}"))?;
    std::fs::rename(&tmp_path, path).map_err(|e| format!("failed to rename history: {e}"))?;
    debug!("Saved history to {}", path.display());
    Ok(())
}

impl HistoryStore for FileHistory {
    fn snapshot(&self) -> History {
        self.host.snapshot()
    }

    fn conversation(&self) -> ConversationId {
        self.host.conversation()
    }

    fn write_summary(&self, index: usize, summary: Option<&str>) -> bool {
        self.host.write_summary(index, summary)
    }

    fn save_debounced(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        // Outside a runtime there is nothing to coalesce with.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            if let Err(e) = write_file(&self.path, &self.host) {
                warn!("Failed to save history: {e}");
            }
            return;
        };

        let path = self.path.clone();
        let host = self.host.clone();
        let latest = Arc::clone(&self.generation);
        let debounce = self.debounce;
        runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            if latest.load(Ordering::Acquire) != generation {
                return;
            }
            if let Err(e) = write_file(&path, &host) {
                warn!("Failed to save history: {e}");
            }
        });
    }
}

impl HostSignals for FileHistory {}
