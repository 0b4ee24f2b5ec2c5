//! Raw-prompt backends over the chat completions API.
//!
//! Both variants receive the assembler's bounded payload. The blocking one
//! asks the host to suspend user input for the duration of the call.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::backend::{Backend, BackendKind, BackendRequest, Capabilities, Generation, ResponseCap, WindowStrategy};
use crate::{ChatMessage, ChatRequest, OpenRouterClient};

pub struct RawBackend {
    client: Arc<OpenRouterClient>,
    model: String,
    blocking: bool,
}

impl RawBackend {
    /// Raw backend that suspends user input while generating.
    pub fn blocking(client: Arc<OpenRouterClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            blocking: true,
        }
    }

    /// Raw backend that leaves user input enabled.
    pub fn non_blocking(client: Arc<OpenRouterClient>, model: impl Into<String>) -> Self {
        Self {
            blocking: false,
            ..Self::blocking(client, model)
        }
    }
}

pub(crate) fn request_messages(request: BackendRequest) -> Result<Vec<ChatMessage>, String> {
    match request {
        BackendRequest::Raw { payload } => Ok(vec![ChatMessage::user(payload)]),
        BackendRequest::Chat { system, user } => {
            Ok(vec![ChatMessage::system(system), ChatMessage::user(user)])
        }
        other => Err(format!("unsupported request for a chat backend: {other:?}")),
    }
}

impl Backend for RawBackend {
    fn kind(&self) -> BackendKind {
        if self.blocking {
            BackendKind::RawBlocking
        } else {
            BackendKind::RawNonBlocking
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            window: WindowStrategy::Bounded,
            blocks_input: self.blocking,
            split_roles: false,
            response_cap: ResponseCap::Always,
            strips_reasoning: true,
        }
    }

    fn generate(&self, generation: Generation) -> BoxFuture<'_, Result<String, String>> {
        Box::pin(async move {
            let body = ChatRequest {
                model: self.model.clone(),
                messages: request_messages(generation.request)?,
                max_tokens: generation.max_tokens,
                temperature: None,
            };
            self.client.complete(&body).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;

    fn client() -> Arc<OpenRouterClient> {
        Arc::new(OpenRouterClient::new("test").unwrap())
    }

    #[test]
    fn variants_differ_only_in_blocking() {
        let blocking = RawBackend::blocking(client(), "m");
        let non_blocking = RawBackend::non_blocking(client(), "m");
        assert_eq!(blocking.kind(), BackendKind::RawBlocking);
        assert_eq!(non_blocking.kind(), BackendKind::RawNonBlocking);
        assert!(blocking.capabilities().blocks_input);
        assert!(!non_blocking.capabilities().blocks_input);
        assert_eq!(
            blocking.capabilities().window,
            non_blocking.capabilities().window
        );
    }

    #[test]
    fn raw_payload_is_one_user_message() {
        let messages = request_messages(BackendRequest::Raw {
            payload: "payload".into(),
        })
        .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
    }

    #[test]
    fn delegated_request_is_rejected() {
        let err = request_messages(BackendRequest::Delegated { text: "x".into() }).unwrap_err();
        assert!(err.contains("unsupported"));
    }
}
