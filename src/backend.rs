//! Model backend collaborator: the narrow seam the session controller
//! talks through, plus the Ollama-compatible HTTP implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DuckyError, Result};

/// Default local Ollama endpoint.
pub const DEFAULT_LOCAL_HOST: &str = "http://localhost:11434";

/// Whether a prompt should yield an actionable command or analysis prose
/// only. Analysis replies never go through command extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    Command,
    Analysis,
}

/// One message of conversation context, in chat-API wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Accepts conversation context plus a mode flag; returns free-form text.
/// Transport failures surface as typed errors and never crash the caller.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], mode: PromptMode) -> Result<String>;
    async fn list_models(&self) -> Result<Vec<String>>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: String,
    messages: &'a [ChatMessage],
    stream: bool,
    think: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TaggedModel>,
}

#[derive(Deserialize)]
struct TaggedModel {
    name: String,
}

/// Ollama-compatible chat backend. The model is behind a lock so the
/// interactive `/model` switch works without rebuilding the session.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: RwLock<String>,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: RwLock::new(model.into()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> String {
        self.model.read().clone()
    }

    pub fn set_model(&self, model: impl Into<String>) {
        *self.model.write() = model.into();
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    async fn complete(&self, messages: &[ChatMessage], mode: PromptMode) -> Result<String> {
        let model = self.model();
        tracing::debug!(
            target = "ducky::backend",
            %model,
            ?mode,
            context_len = messages.len(),
            "sending chat request"
        );

        let request = ChatRequest {
            model,
            messages,
            stream: false,
            think: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(DuckyError::backend(status.as_u16(), message));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| DuckyError::InvalidResponse(e.to_string()))?;

        match parsed.message {
            Some(message) => Ok(message.content),
            None => Err(DuckyError::InvalidResponse(
                "no message in chat response".to_string(),
            )),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(DuckyError::backend(status.as_u16(), message));
        }

        let parsed: TagsResponse = response
            .json()
            .await
            .map_err(|e| DuckyError::InvalidResponse(e.to_string()))?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned backend used by session and poll tests.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{ChatMessage, ModelBackend, PromptMode};
    use crate::error::{DuckyError, Result};

    pub(crate) struct CannedBackend {
        replies: Mutex<Vec<String>>,
        pub(crate) calls: AtomicUsize,
        fail: bool,
    }

    impl CannedBackend {
        pub(crate) fn replying(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                replies: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelBackend for CannedBackend {
        async fn complete(&self, _messages: &[ChatMessage], _mode: PromptMode) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DuckyError::backend(503, "backend down"));
            }
            let mut replies = self.replies.lock();
            Ok(replies.pop().unwrap_or_else(|| "ok".to_string()))
        }

        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(vec!["canned".to_string()])
        }
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::{ChatMessage, ModelBackend, OllamaBackend, PromptMode};
    use crate::error::DuckyError;

    #[tokio::test]
    async fn complete_returns_message_content() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/chat")
                .json_body_partial(r#"{"model": "qwen3", "stream": false}"#);
            then.status(200).json_body(json!({
                "message": {"role": "assistant", "content": "<command>ls</command>"}
            }));
        });

        let backend = OllamaBackend::new(server.base_url(), "qwen3");
        let reply = backend
            .complete(
                &[ChatMessage::new("user", "list files")],
                PromptMode::Command,
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(reply, "<command>ls</command>");
    }

    #[tokio::test]
    async fn non_success_status_is_a_typed_backend_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(500).body("model exploded");
        });

        let backend = OllamaBackend::new(server.base_url(), "qwen3");
        let err = backend
            .complete(&[ChatMessage::new("user", "hi")], PromptMode::Analysis)
            .await
            .unwrap_err();

        match err {
            DuckyError::Backend { status, message } => {
                assert_eq!(status, 500);
                assert!(message.contains("model exploded"));
            }
            other => panic!("expected Backend error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_message_is_invalid_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(200).json_body(json!({"done": true}));
        });

        let backend = OllamaBackend::new(server.base_url(), "qwen3");
        let err = backend
            .complete(&[ChatMessage::new("user", "hi")], PromptMode::Command)
            .await
            .unwrap_err();
        assert!(matches!(err, DuckyError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn list_models_extracts_names() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200).json_body(json!({
                "models": [{"name": "qwen3"}, {"name": "llama3.2"}]
            }));
        });

        let backend = OllamaBackend::new(server.base_url(), "qwen3");
        let models = backend.list_models().await.unwrap();
        assert_eq!(models, vec!["qwen3", "llama3.2"]);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let backend = OllamaBackend::new("http://localhost:11434/", "qwen3");
        assert_eq!(backend.base_url(), "http://localhost:11434");
    }

    #[test]
    fn model_switch_is_visible() {
        let backend = OllamaBackend::new("http://localhost:11434", "qwen3");
        backend.set_model("llama3.2");
        assert_eq!(backend.model(), "llama3.2");
    }
}
