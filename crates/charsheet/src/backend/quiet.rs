//! Templated ("quiet") backend.
//!
//! Sends the rendered prompt as the final instruction after as much of the
//! recent transcript as fits this backend's own context window. No
//! checkpoint-relative windowing happens here.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, trace};

use crate::backend::{Backend, BackendKind, BackendRequest, Capabilities, Generation, ResponseCap, WindowStrategy};
use crate::context::budget::{CharEstimate, DEFAULT_CONTEXT_WINDOW};
use crate::history::History;
use crate::{ChatMessage, ChatRequest, OpenRouterClient};

pub struct QuietBackend {
    client: Arc<OpenRouterClient>,
    model: String,
    context_tokens: usize,
    notes: Option<String>,
    estimate: CharEstimate,
}

impl QuietBackend {
    pub fn new(client: Arc<OpenRouterClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            context_tokens: DEFAULT_CONTEXT_WINDOW,
            notes: None,
            estimate: CharEstimate::default(),
        }
    }

    /// Context window the transcript is truncated to.
    pub fn with_context_tokens(mut self, tokens: usize) -> Self {
        self.context_tokens = tokens;
        self
    }

    /// Background notes (world info, author's note) sent ahead of the
    /// transcript unless a request asks to skip them.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Build the message list, dropping the oldest transcript entries until
    /// the estimate fits `context_tokens - max_tokens`.
    fn build_messages(
        &self,
        prompt: &str,
        history: &History,
        max_tokens: Option<u32>,
        skip_notes: bool,
    ) -> Vec<ChatMessage> {
        let notes = self.notes.as_deref().filter(|_| !skip_notes);
        let budget = self
            .context_tokens
            .saturating_sub(max_tokens.unwrap_or(0) as usize);

        let entries: Vec<String> = history
            .messages()
            .iter()
            .filter(|m| m.is_summarizable())
            .map(|m| m.entry())
            .collect();

        let fixed = self.estimate.estimate(prompt) + notes.map_or(0, |n| self.estimate.estimate(n));
        let mut total = fixed + entries.iter().map(|e| self.estimate.estimate(e)).sum::<usize>();
        let mut start = 0;
        while total > budget && start < entries.len() {
            total -= self.estimate.estimate(&entries[start]);
            start += 1;
        }
        if start > 0 {
            debug!(
                "Quiet transcript truncated: dropped {start} of {} entries",
                entries.len()
            );
        }
        trace!("Quiet request estimate: {total}/{budget}");

        let mut messages = Vec::with_capacity(3);
        if let Some(notes) = notes {
            messages.push(ChatMessage::system(notes));
        }
        let transcript = entries[start..].join("\n\n");
        if !transcript.is_empty() {
            messages.push(ChatMessage::user(transcript));
        }
        messages.push(ChatMessage::user(prompt));
        messages
    }
}

impl Backend for QuietBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Templated
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            window: WindowStrategy::Backend,
            blocks_input: false,
            split_roles: false,
            response_cap: ResponseCap::Always,
            strips_reasoning: false,
        }
    }

    fn generate(&self, generation: Generation) -> BoxFuture<'_, Result<String, String>> {
        Box::pin(async move {
            let BackendRequest::Quiet { prompt, history } = generation.request else {
                return Err("quiet backend only accepts quiet requests".to_string());
            };
            let body = ChatRequest {
                model: self.model.clone(),
                messages: self.build_messages(
                    &prompt,
                    &history,
                    generation.max_tokens,
                    generation.skip_wi_an,
                ),
                max_tokens: generation.max_tokens,
                temperature: None,
            };
            self.client.complete(&body).await
        })
    }
}
