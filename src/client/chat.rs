//! Provider-neutral chat request/response types and the adapter seam.
//!
//! Every provider gets one `ChatAdapter` that maps the neutral request into
//! its own HTTP shape and maps its response back. Callers never see the
//! provider-specific shapes.

use crate::client::ParsingMode;
use crate::client::transport::WireRequest;
use crate::models::ProviderError;
use serde::{Deserialize, Serialize};

/// Message in a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// One chat-style request.
///
/// The payload uses the OpenAI chat-completions shape (`messages`,
/// `temperature`, `max_tokens`, ...); adapters translate it as needed.
/// Any `model` field is replaced by the handle's model.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub payload: serde_json::Value,
}

impl ChatRequest {
    pub fn new(payload: serde_json::Value) -> Self {
        Self { payload }
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            payload: serde_json::json!({ "messages": messages }),
        }
    }

    /// The payload as an object, or an `InvalidRequest` error.
    pub(crate) fn object(&self) -> Result<&serde_json::Map<String, serde_json::Value>, ProviderError> {
        self.payload
            .as_object()
            .ok_or_else(|| ProviderError::InvalidRequest {
                status: 0,
                message: "request payload must be a JSON object".to_string(),
            })
    }

    /// The `messages` array, or an `InvalidRequest` error.
    pub(crate) fn messages(&self) -> Result<&Vec<serde_json::Value>, ProviderError> {
        self.object()?
            .get("messages")
            .and_then(|m| m.as_array())
            .ok_or_else(|| ProviderError::InvalidRequest {
                status: 0,
                message: "request payload has no 'messages' array".to_string(),
            })
    }
}

/// Normalized response from any provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    /// Generated text (None when the model only produced tool calls)
    pub content: Option<String>,
    /// Model reported by the provider
    pub model: String,
    /// Input tokens
    pub input_tokens: u32,
    /// Output tokens
    pub output_tokens: u32,
    /// Full provider response body
    pub raw: serde_json::Value,
}

/// Context an adapter needs to build a request.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub base_url: &'a str,
    pub api_key: &'a str,
    pub model: &'a str,
    pub mode: ParsingMode,
}

/// Mapping between the neutral chat shape and one provider's API.
pub trait ChatAdapter: Send + Sync + std::fmt::Debug {
    /// Build the HTTP call for a request.
    fn build_request(&self, ctx: RequestContext<'_>, request: &ChatRequest) -> Result<WireRequest, ProviderError>;

    /// Parse a 2xx response body.
    fn parse_response(&self, model: &str, body: serde_json::Value) -> Result<ChatResponse, ProviderError>;
}

/// Text of a message's `content`, whether a string or a list of text blocks.
pub(crate) fn message_text(message: &serde_json::Value) -> String {
    match message.get("content") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

pub(crate) fn message_role(message: &serde_json::Value) -> &str {
    message.get("role").and_then(|r| r.as_str()).unwrap_or("user")
}

pub(crate) fn token_count(value: Option<&serde_json::Value>) -> u32 {
    value
        .and_then(|v| v.as_u64())
        .map(|n| n.min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_messages() {
        let request = ChatRequest::from_messages(vec![
            Message::system("be brief"),
            Message::user("hi"),
        ]);
        let messages = request.messages().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(message_role(&messages[0]), "system");
        assert_eq!(message_text(&messages[1]), "hi");
    }

    #[test]
    fn test_payload_shape_errors() {
        let err = ChatRequest::new(json!([1, 2])).messages().unwrap_err();
        assert!(!err.is_retryable());
        let err = ChatRequest::new(json!({"prompt": "x"})).messages().unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest { .. }));
    }

    #[test]
    fn test_message_text_blocks() {
        let m = json!({"role": "user", "content": [{"type": "text", "text": "a"}, {"type": "image"}, {"type": "text", "text": "b"}]});
        assert_eq!(message_text(&m), "a\nb");
    }
}
