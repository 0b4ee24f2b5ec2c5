//! Incremental, context-bounded running summaries ("character sheets") for
//! unbounded conversations.
//!
//! `charsheet` keeps a natural-language summary of an ongoing conversation
//! current without ever re-reading the whole history. The summary lives as a
//! **checkpoint** annotation on one message of the externally owned history;
//! every update reads the newest checkpoint, feeds only the messages after it
//! (as many as fit the generation budget) to a backend, and writes the new
//! summary back as the next checkpoint.
//!
//! The core abstraction is the [`SheetEngine`](engine::SheetEngine): it
//! decides *when* to re-summarize (trigger policy), *how much* new content to
//! send (budget-aware windowing), dispatches to one of several interchangeable
//! [`Backend`](backend::Backend)s, and guarantees at most one update in flight.
//!
//! # Getting started
//!
//! ```ignore
//! use charsheet::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let key = std::env::var("OPENROUTER_KEY").map_err(|e| e.to_string())?;
//!     let client = Arc::new(OpenRouterClient::new(key)?);
//!     let host = MemoryHost::new(ConversationId::chat("demo"), vec![]);
//!
//!     let engine = SheetEngine::new(SheetSettings::default(), host.clone(), host.clone())
//!         .with_backend(Arc::new(RawBackend::blocking(client, "anthropic/claude-sonnet-4")))
//!         .with_event_handler(Arc::new(LoggingHandler));
//!
//!     let summary = engine.force_update(false).await;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Checkpoints and windowing:** [`context::checkpoint`] locates the
//!   current checkpoint, [`context::assembler`] builds the bounded payload,
//!   [`context::budget`] derives budgets and measures text.
//! - **Deciding when to update:** [`engine::trigger`].
//! - **Running an update:** [`engine::SheetEngine`] and its
//!   [`UpdateOutcome`](engine::UpdateOutcome).
//! - **Coordinating a sibling summarizer:** [`engine::lock`].
//! - **Generation backends:** [`backend`].
//! - **Recommending thresholds:** [`context::tuning`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`history`] | Message model, immutable history snapshots, conversation identity |
//! | [`context`] | Checkpoint locator, prompt assembler, budgets, templates, auto-tuning |
//! | [`engine`] | Trigger evaluator, update orchestrator, lock mode, command surface, events |
//! | [`backend`] | Backend trait and the five backend kinds |
//! | [`api`] | Retry with backoff for remote calls |
//! | [`store`] | JSON-file history store with debounced saves |

pub mod api;
pub mod backend;
pub mod context;
pub mod engine;
pub mod history;
pub mod prelude;
pub mod store;

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::api::retry::{RetryConfig, is_transient_error};

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for summarization calls.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body. Only the fields summarization needs;
/// unused optional fields are omitted from serialization.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Role of a message sent to a chat backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A role-tagged message sent to a chat backend.
///
/// Not to be confused with [`history::Message`], which is one turn of the
/// conversation being summarized.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Clean return type from [`OpenRouterClient::chat()`].
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
///
/// Shared by the templated and raw backends. Pointed at another
/// OpenAI-compatible endpoint with [`with_endpoint`](Self::with_endpoint), it
/// also drives a locally served model.
pub struct OpenRouterClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    referer: String,
    title: String,
    retry: RetryConfig,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        Self::with_headers(api_key, "https://github.com/charsheet", "charsheet")
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("charsheet/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            endpoint: OPENROUTER_URL.to_string(),
            api_key: api_key.into(),
            referer: referer.into(),
            title: title.into(),
            retry: RetryConfig::default(),
        })
    }

    /// Send requests to `endpoint` instead of OpenRouter.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Retry transient failures according to `retry`.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Send a chat completion request once.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, String> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={:?}",
            body.model,
            body.messages.len(),
            body.max_tokens,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("chat API HTTP {status}: {text}"));
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| format!("failed to parse response: {e}"))?;

        if let Some(err) = parsed.error {
            return Err(format!("chat API error: {}", err.message));
        }

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        let choice = parsed.choices.and_then(|c| c.into_iter().next());
        Ok(match choice {
            Some(c) => ChatCompletion {
                content: c.message.content,
                usage: parsed.usage,
                finish_reason: c.finish_reason,
            },
            None => ChatCompletion {
                content: None,
                usage: parsed.usage,
                finish_reason: None,
            },
        })
    }

    /// Send a request and return its text, retrying transient failures.
    ///
    /// A missing `content` field is returned as an empty string; the caller
    /// decides whether an empty summary is worth keeping.
    pub async fn complete(&self, body: &ChatRequest) -> Result<String, String> {
        let mut attempt = 0;
        loop {
            match self.chat(body).await {
                Ok(completion) => return Ok(completion.content.unwrap_or_default()),
                Err(e) if attempt < self.retry.max_retries && is_transient_error(&e) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        "Transient backend error (attempt {}/{}), retrying in {:.1}s: {e}",
                        attempt + 1,
                        self.retry.max_retries,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
