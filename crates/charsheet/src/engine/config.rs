//! Engine settings: trigger policy, generation options, and persistence.
//!
//! Settings are plain serde data with defaults for every field, so a partial
//! JSON file is valid. Files are checked against the generated JSON Schema
//! before deserialization to give field-level error messages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default summarization prompt. `{{words}}` is the target summary length.
pub const DEFAULT_PROMPT: &str = "Based on the chat history, update the character sheet. \
Keep it under {{words}} words. Respond only with the updated character sheet content \
in markdown format.";

/// Default injection template. `{{sheet}}` is the live summary.
pub const DEFAULT_TEMPLATE: &str = "[Character Sheet: {{sheet}}]";

/// Where summaries are generated.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    /// The main chat model, through the prompt builder selected in settings.
    #[default]
    Main,
    /// A remote summarization service.
    Extras,
    /// An in-process model.
    Local,
}

/// How requests to the main model are built.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptBuilder {
    /// Quiet prompt; the backend manages its own context.
    #[default]
    Default,
    /// Windowed raw prompt; user input is suspended during the call.
    RawBlocking,
    /// Windowed raw prompt; user input stays enabled.
    RawNonBlocking,
}

/// Where the host places the injected summary in the outgoing prompt.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InjectionPosition {
    /// Not injected.
    None,
    /// After the story string.
    #[default]
    InPrompt,
    /// Inside the chat, `depth` messages from the end.
    InChat,
    /// Before the story string.
    BeforePrompt,
}

/// Speaker the injected summary is attributed to.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InjectionRole {
    #[default]
    System,
    User,
    Assistant,
}

/// Placement of the injected summary. The engine only carries these; the
/// host applies them.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct InjectionConfig {
    pub position: InjectionPosition,
    /// Messages from the end of the chat, for [`InjectionPosition::InChat`].
    pub depth: u32,
    pub role: InjectionRole,
    /// Let world-info scanning see the injected text.
    pub scan: bool,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            position: InjectionPosition::InPrompt,
            depth: 2,
            role: InjectionRole::System,
            scan: false,
        }
    }
}

/// Bounded polling before a cycle starts.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct QuiescenceConfig {
    /// Poll interval while a group generation is running.
    pub group_poll_ms: u64,
    /// Maximum polls for group generation to settle.
    pub group_max_attempts: u32,
    /// Poll interval while a send is pending.
    pub send_poll_ms: u64,
    /// Maximum polls for a pending send to clear.
    pub send_max_attempts: u32,
}

impl Default for QuiescenceConfig {
    fn default() -> Self {
        Self {
            group_poll_ms: 10,
            group_max_attempts: 100,
            send_poll_ms: 100,
            send_max_attempts: 300,
        }
    }
}

impl QuiescenceConfig {
    pub fn group_poll(&self) -> Duration {
        Duration::from_millis(self.group_poll_ms)
    }

    pub fn send_poll(&self) -> Duration {
        Duration::from_millis(self.send_poll_ms)
    }
}

/// Everything the engine reads from the policy store.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SheetSettings {
    /// Master switch for automatic updates.
    pub enabled: bool,
    /// Block automatic updates. Explicit force commands still run.
    pub frozen: bool,
    pub source: SummarySource,
    pub prompt_builder: PromptBuilder,
    /// Summarization prompt template.
    pub prompt: String,
    /// Injection template for the live summary.
    pub template: String,
    pub injection: InjectionConfig,
    /// Target summary length in words (`{{words}}`).
    pub prompt_words: usize,
    /// New messages since the checkpoint before an automatic update. 0 disables.
    pub message_interval: usize,
    /// New words since the checkpoint that force an update. 0 disables.
    pub force_word_threshold: usize,
    /// Minimum history length before automatic updates; defaults to
    /// `message_interval`.
    pub min_history_length: Option<usize>,
    /// Response length for summarization calls. 0 uses `response_length`.
    pub override_response_length: usize,
    /// Host's normal response length.
    pub response_length: usize,
    /// Cap on messages per request. 0 means uncapped.
    pub max_messages_per_request: usize,
    /// Context window of the main model.
    pub max_context_tokens: usize,
    /// Chain the sibling summarizer after every successful update.
    pub lock_mode: bool,
    /// Ask the quiet backend to skip world-info and author's-note injection.
    pub skip_wi_an: bool,
    pub quiescence: QuiescenceConfig,
}

impl Default for SheetSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            frozen: false,
            source: SummarySource::default(),
            prompt_builder: PromptBuilder::default(),
            prompt: DEFAULT_PROMPT.to_string(),
            template: DEFAULT_TEMPLATE.to_string(),
            injection: InjectionConfig::default(),
            prompt_words: 300,
            message_interval: 10,
            force_word_threshold: 0,
            min_history_length: None,
            override_response_length: 0,
            response_length: 400,
            max_messages_per_request: 0,
            max_context_tokens: 8_192,
            lock_mode: false,
            skip_wi_an: false,
            quiescence: QuiescenceConfig::default(),
        }
    }
}

impl SheetSettings {
    /// History length below which automatic updates are skipped.
    pub fn min_history_length(&self) -> usize {
        self.min_history_length.unwrap_or(self.message_interval)
    }

    /// Tokens reserved for the summary response.
    pub fn response_reserve(&self) -> usize {
        if self.override_response_length > 0 {
            self.override_response_length
        } else {
            self.response_length
        }
    }

    /// Response cap to send, if any.
    pub fn response_cap(&self) -> Option<u32> {
        (self.override_response_length > 0).then_some(self.override_response_length as u32)
    }

    /// Backend kind selected by `source` and `prompt_builder`.
    pub fn backend_kind(&self) -> crate::backend::BackendKind {
        use crate::backend::BackendKind;
        match (self.source, self.prompt_builder) {
            (SummarySource::Extras, _) => BackendKind::Delegated,
            (SummarySource::Local, _) => BackendKind::Local,
            (SummarySource::Main, PromptBuilder::Default) => BackendKind::Templated,
            (SummarySource::Main, PromptBuilder::RawBlocking) => BackendKind::RawBlocking,
            (SummarySource::Main, PromptBuilder::RawNonBlocking) => BackendKind::RawNonBlocking,
        }
    }

    /// JSON Schema for the settings file.
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(SheetSettings);
        serde_json::to_value(schema)
            .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
    }

    /// Validate and deserialize settings from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, String> {
        let schema = Self::json_schema();
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| format!("invalid settings schema: {e}"))?;

        let errors: Vec<String> = validator
            .iter_errors(&value)
            .map(|e| format!("  - {}: {e}", e.instance_path()))
            .collect();
        if !errors.is_empty() {
            return Err(format!("settings validation failed:\n{}", errors.join("\n")));
        }

        serde_json::from_value(value).map_err(|e| format!("failed to parse settings: {e}"))
    }

    /// Load settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read settings {}: {e}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&json)
            .map_err(|e| format!("failed to parse settings {}: {e}", path.display()))?;
        Self::from_value(value)
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("failed to create settings dir: {e}"))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize settings: {e}"))?;
        std::fs::write(&tmp_path, json)
            .map_err(|e| format!("failed to write temp settings: {e}"))?;
        std::fs::rename(&tmp_path, path).map_err(|e| format!("failed to rename settings: {e}"))?;
        Ok(())
    }
}
