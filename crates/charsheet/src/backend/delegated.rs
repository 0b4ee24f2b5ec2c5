//! Remote summarization service backend.
//!
//! The service summarizes whatever block of text it is given, so there is no
//! fine-grained window: the engine accumulates messages until the block
//! reaches the budget and sends it in one call. Availability depends on the
//! service advertising its `summarize` module.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{Backend, BackendKind, BackendRequest, Capabilities, Generation, ResponseCap, WindowStrategy};

/// Module name the service must advertise.
pub const SUMMARIZE_MODULE: &str = "summarize";

#[derive(Serialize)]
struct SummarizeRequest<'a> {
    text: &'a str,
    params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct SummarizeResponse {
    summary: Option<String>,
}

#[derive(Deserialize)]
struct ModulesResponse {
    #[serde(default)]
    modules: Vec<String>,
}

pub struct DelegatedBackend {
    client: reqwest::Client,
    base_url: String,
    available: AtomicBool,
}

impl DelegatedBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("charsheet/0.1")
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            available: AtomicBool::new(false),
        })
    }

    /// Mark availability from a known module list instead of asking.
    pub fn with_modules(self, modules: &[&str]) -> Self {
        self.available
            .store(modules.contains(&SUMMARIZE_MODULE), Ordering::Release);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Ask the service which modules it runs. Returns whether summarization
    /// is available.
    pub async fn connect(&self) -> Result<bool, String> {
        let resp = self
            .client
            .get(self.url("/api/modules"))
            .header("Bypass-Tunnel-Reminder", "bypass")
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("modules request HTTP {}", resp.status()));
        }
        let parsed: ModulesResponse = resp
            .json()
            .await
            .map_err(|e| format!("failed to parse modules: {e}"))?;
        let available = parsed.modules.iter().any(|m| m == SUMMARIZE_MODULE);
        info!(
            "Summarization service at {}: modules={:?}",
            self.base_url, parsed.modules
        );
        self.available.store(available, Ordering::Release);
        Ok(available)
    }

    async fn summarize(&self, text: &str) -> Result<String, String> {
        if !self.is_available() {
            return Err("summarize module is not enabled on the service".to_string());
        }
        debug!("Delegating {} chars to {}", text.len(), self.base_url);
        let resp = self
            .client
            .post(self.url("/api/summarize"))
            .header("Bypass-Tunnel-Reminder", "bypass")
            .json(&SummarizeRequest {
                text,
                params: serde_json::Map::new(),
            })
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("summarize API call failed: HTTP {status}"));
        }
        let parsed: SummarizeResponse = resp
            .json()
            .await
            .map_err(|e| format!("failed to parse summary: {e}"))?;
        Ok(parsed.summary.unwrap_or_default())
    }
}

impl Backend for DelegatedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Delegated
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            window: WindowStrategy::Accumulate,
            blocks_input: false,
            split_roles: false,
            response_cap: ResponseCap::WhenConfigured,
            strips_reasoning: false,
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn generate(&self, generation: Generation) -> BoxFuture<'_, Result<String, String>> {
        Box::pin(async move {
            match generation.request {
                BackendRequest::Delegated { text } => self.summarize(&text).await,
                other => Err(format!("unsupported request for the summarization service: {other:?}")),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_until_module_advertised() {
        let backend = DelegatedBackend::new("http://localhost:5100/").unwrap();
        assert!(!backend.is_available());
        let backend = backend.with_modules(&["caption", SUMMARIZE_MODULE]);
        assert!(backend.is_available());
        let backend = backend.with_modules(&["caption"]);
        assert!(!backend.is_available());
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let backend = DelegatedBackend::new("http://localhost:5100/").unwrap();
        assert_eq!(backend.url("/api/summarize"), "http://localhost:5100/api/summarize");
    }

    #[test]
    fn request_body_shape() {
        let body = serde_json::to_value(SummarizeRequest {
            text: "block",
            params: serde_json::Map::new(),
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"text": "block", "params": {}}));
    }

    #[tokio::test]
    async fn unavailable_service_rejects_without_network() {
        let backend = DelegatedBackend::new("http://127.0.0.1:9").unwrap();
        let err = backend
            .generate(Generation {
                request: BackendRequest::Delegated { text: "x".into() },
                max_tokens: None,
                skip_wi_an: false,
            })
            .await
            .unwrap_err();
        assert!(err.contains("not enabled"));
    }
}
