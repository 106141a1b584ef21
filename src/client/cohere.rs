//! Cohere Chat (v1) adapter.
//!
//! Cohere takes the latest user turn as `message`, earlier turns as
//! `chat_history` (roles USER / CHATBOT) and system text as `preamble`.
//! A payload that already carries a `message` field is sent as-is.

use crate::client::chat::{
    ChatAdapter, ChatRequest, ChatResponse, RequestContext, message_role, message_text, token_count,
};
use crate::client::transport::WireRequest;
use crate::models::ProviderError;
use serde_json::{Value, json};

#[derive(Debug, Default, Clone, Copy)]
pub struct CohereAdapter;

impl CohereAdapter {
    fn translate(request: &ChatRequest) -> Result<serde_json::Map<String, Value>, ProviderError> {
        let mut body = request.object()?.clone();
        if body.contains_key("message") {
            return Ok(body);
        }

        let messages = request.messages()?;
        let last_user = messages
            .iter()
            .rposition(|m| message_role(m) == "user")
            .ok_or_else(|| ProviderError::InvalidRequest {
                status: 0,
                message: "cohere requests need at least one user message".to_string(),
            })?;

        let mut preamble = Vec::new();
        let mut history = Vec::new();
        for (i, message) in messages.iter().enumerate() {
            if i == last_user {
                continue;
            }
            match message_role(message) {
                "system" => preamble.push(message_text(message)),
                "assistant" => history.push(json!({"role": "CHATBOT", "message": message_text(message)})),
                _ => history.push(json!({"role": "USER", "message": message_text(message)})),
            }
        }

        body.remove("messages");
        body.remove("stream");
        body.insert("message".to_string(), Value::String(message_text(&messages[last_user])));
        if !history.is_empty() {
            body.insert("chat_history".to_string(), Value::Array(history));
        }
        if !preamble.is_empty() {
            body.insert("preamble".to_string(), Value::String(preamble.join("\n\n")));
        }
        if let Some(top_p) = body.remove("top_p") {
            body.insert("p".to_string(), top_p);
        }
        Ok(body)
    }
}

impl ChatAdapter for CohereAdapter {
    fn build_request(&self, ctx: RequestContext<'_>, request: &ChatRequest) -> Result<WireRequest, ProviderError> {
        let mut body = Self::translate(request)?;
        body.insert("model".to_string(), Value::String(ctx.model.to_string()));

        Ok(WireRequest {
            url: format!("{}/chat", ctx.base_url.trim_end_matches('/')),
            headers: vec![("authorization", format!("Bearer {}", ctx.api_key))],
            body: Value::Object(body),
        })
    }

    fn parse_response(&self, model: &str, body: Value) -> Result<ChatResponse, ProviderError> {
        let content = body
            .get("text")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Decode("no text in response".to_string()))?;

        Ok(ChatResponse {
            content: Some(content),
            model: model.to_string(),
            input_tokens: token_count(body.pointer("/meta/billed_units/input_tokens")),
            output_tokens: token_count(body.pointer("/meta/billed_units/output_tokens")),
            raw: body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ParsingMode;

    fn ctx() -> RequestContext<'static> {
        RequestContext {
            base_url: "https://api.cohere.ai/v1",
            api_key: "co-test",
            model: "command-r",
            mode: ParsingMode::CohereTools,
        }
    }

    #[test]
    fn test_translate_conversation() {
        let request = ChatRequest::new(json!({
            "messages": [
                {"role": "system", "content": "Be kind."},
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello!"},
                {"role": "user", "content": "Tell me a fact."}
            ],
            "temperature": 0.5,
            "top_p": 0.9
        }));

        let wire = CohereAdapter.build_request(ctx(), &request).unwrap();
        assert_eq!(wire.url, "https://api.cohere.ai/v1/chat");
        assert_eq!(wire.body["model"], "command-r");
        assert_eq!(wire.body["message"], "Tell me a fact.");
        assert_eq!(wire.body["preamble"], "Be kind.");
        assert_eq!(
            wire.body["chat_history"],
            json!([
                {"role": "USER", "message": "Hi"},
                {"role": "CHATBOT", "message": "Hello!"}
            ])
        );
        assert_eq!(wire.body["p"], 0.9);
        assert!(wire.body.get("messages").is_none());
    }

    #[test]
    fn test_native_payload_passthrough() {
        let request = ChatRequest::new(json!({"message": "hi", "connectors": []}));
        let wire = CohereAdapter.build_request(ctx(), &request).unwrap();
        assert_eq!(wire.body["message"], "hi");
        assert_eq!(wire.body["connectors"], json!([]));
    }

    #[test]
    fn test_requires_user_message() {
        let request = ChatRequest::new(json!({"messages": [{"role": "system", "content": "x"}]}));
        let err = CohereAdapter.build_request(ctx(), &request).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_parse_response() {
        let body = json!({
            "text": "Octopuses have three hearts.",
            "meta": {"billed_units": {"input_tokens": 20, "output_tokens": 6}}
        });
        let response = CohereAdapter.parse_response("command-r", body).unwrap();
        assert_eq!(response.content.as_deref(), Some("Octopuses have three hearts."));
        assert_eq!(response.input_tokens, 20);
        assert_eq!(response.output_tokens, 6);
    }
}
