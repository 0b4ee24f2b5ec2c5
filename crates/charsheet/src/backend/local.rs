//! In-process model backend.
//!
//! The model supplies its own tokenizer and context size, so measurement is
//! exact. Requests are a system/user pair, and a response cap is only sent
//! when an override response length is configured.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::backend::raw::request_messages;
use crate::backend::{Backend, BackendKind, Capabilities, Generation, ResponseCap, WindowStrategy};
use crate::context::budget::{CharEstimate, ContextBudget, TextMeasure};
use crate::engine::config::SheetSettings;
use crate::{ChatMessage, ChatRequest, OpenRouterClient};

/// Share of the context window used when no response length is configured.
pub const DEFAULT_CONTEXT_SHARE: f64 = 0.75;

/// A model the engine can run locally.
pub trait LocalModel: Send + Sync {
    /// Whether the model can run in this environment.
    fn is_supported(&self) -> bool {
        true
    }

    /// Context window in tokens.
    fn context_size(&self) -> usize;

    fn count_tokens<'a>(&'a self, text: &'a str) -> BoxFuture<'a, usize>;

    fn generate_chat<'a>(
        &'a self,
        messages: Vec<ChatMessage>,
        max_tokens: Option<u32>,
    ) -> BoxFuture<'a, Result<String, String>>;
}

pub struct LocalBackend<M: LocalModel> {
    model: M,
}

impl<M: LocalModel> LocalBackend<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: LocalModel> TextMeasure for LocalBackend<M> {
    fn measure<'a>(&'a self, text: &'a str, padding: usize) -> BoxFuture<'a, usize> {
        Box::pin(async move { self.model.count_tokens(text).await + padding })
    }
}

impl<M: LocalModel> Backend for LocalBackend<M> {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            window: WindowStrategy::Bounded,
            blocks_input: false,
            split_roles: true,
            response_cap: ResponseCap::WhenConfigured,
            strips_reasoning: true,
        }
    }

    fn is_available(&self) -> bool {
        self.model.is_supported()
    }

    fn context_size(&self, _settings: &SheetSettings) -> usize {
        self.model.context_size()
    }

    /// `context - override` when an override is set, otherwise three
    /// quarters of the context window.
    fn budget(&self, settings: &SheetSettings) -> ContextBudget {
        let context = self.model.context_size();
        if settings.override_response_length > 0 {
            ContextBudget::new(context).with_output_reserve(settings.override_response_length)
        } else {
            ContextBudget::new((context as f64 * DEFAULT_CONTEXT_SHARE).round() as usize)
        }
    }

    fn measurer(&self) -> &dyn TextMeasure {
        self
    }

    fn generate(&self, generation: Generation) -> BoxFuture<'_, Result<String, String>> {
        Box::pin(async move {
            let messages = request_messages(generation.request)?;
            self.model.generate_chat(messages, generation.max_tokens).await
        })
    }
}

/// A model served by a local OpenAI-compatible server (llama.cpp, vLLM, ...).
///
/// Token counts are estimated from characters since such servers rarely
/// expose their tokenizer.
pub struct ServerModel {
    client: Arc<OpenRouterClient>,
    model: String,
    context_size: usize,
    estimate: CharEstimate,
}

impl ServerModel {
    pub fn new(client: Arc<OpenRouterClient>, model: impl Into<String>, context_size: usize) -> Self {
        Self {
            client,
            model: model.into(),
            context_size,
            estimate: CharEstimate::default(),
        }
    }
}

impl LocalModel for ServerModel {
    fn context_size(&self) -> usize {
        self.context_size
    }

    fn count_tokens<'a>(&'a self, text: &'a str) -> BoxFuture<'a, usize> {
        let n = self.estimate.estimate(text);
        Box::pin(async move { n })
    }

    fn generate_chat<'a>(
        &'a self,
        messages: Vec<ChatMessage>,
        max_tokens: Option<u32>,
    ) -> BoxFuture<'a, Result<String, String>> {
        Box::pin(async move {
            let body = ChatRequest {
                model: self.model.clone(),
                messages,
                max_tokens,
                temperature: None,
            };
            self.client.complete(&body).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendRequest;
    use crate::history::count_words;
    use std::sync::Mutex;

    /// One token per word; echoes the user message.
    struct EchoModel {
        context: usize,
        seen: Mutex<Vec<(Vec<ChatMessage>, Option<u32>)>>,
    }

    impl EchoModel {
        fn new(context: usize) -> Self {
            Self {
                context,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl LocalModel for EchoModel {
        fn context_size(&self) -> usize {
            self.context
        }

        fn count_tokens<'a>(&'a self, text: &'a str) -> BoxFuture<'a, usize> {
            let n = count_words(text);
            Box::pin(async move { n })
        }

        fn generate_chat<'a>(
            &'a self,
            messages: Vec<ChatMessage>,
            max_tokens: Option<u32>,
        ) -> BoxFuture<'a, Result<String, String>> {
            let reply = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.seen.lock().unwrap().push((messages, max_tokens));
            Box::pin(async move { Ok(reply) })
        }
    }

    #[test]
    fn budget_uses_three_quarters_without_override() {
        let backend = LocalBackend::new(EchoModel::new(4_096));
        let settings = SheetSettings::default();
        assert_eq!(backend.budget(&settings).effective_max_tokens(), 3_072);
    }

    #[test]
    fn budget_subtracts_override() {
        let backend = LocalBackend::new(EchoModel::new(4_096));
        let settings = SheetSettings {
            override_response_length: 500,
            ..Default::default()
        };
        assert_eq!(backend.budget(&settings).effective_max_tokens(), 3_596);
    }

    #[tokio::test]
    async fn measures_with_model_tokenizer() {
        let backend = LocalBackend::new(EchoModel::new(100));
        assert_eq!(backend.measurer().measure("three small words", 64).await, 67);
    }

    #[tokio::test]
    async fn sends_system_user_pair() {
        let backend = LocalBackend::new(EchoModel::new(100));
        let out = backend
            .generate(Generation {
                request: BackendRequest::Chat {
                    system: "rules".into(),
                    user: "dialogue".into(),
                },
                max_tokens: None,
                skip_wi_an: false,
            })
            .await
            .unwrap();
        assert_eq!(out, "dialogue");
        let seen = backend.model().seen.lock().unwrap();
        assert_eq!(seen[0].0.len(), 2);
        assert_eq!(seen[0].1, None);
    }
}
