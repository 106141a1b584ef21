//! Anthropic Messages API adapter.
//!
//! Differences from the OpenAI shape:
//! - system messages move to a top-level `system` field
//! - `max_tokens` is required
//! - the reply is a list of content blocks

use crate::client::chat::{
    ChatAdapter, ChatRequest, ChatResponse, RequestContext, message_role, message_text, token_count,
};
use crate::client::transport::WireRequest;
use crate::models::ProviderError;
use serde_json::Value;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Keys of the OpenAI shape the Messages API rejects.
const DROPPED_KEYS: [&str; 5] = ["stream", "response_format", "n", "frequency_penalty", "presence_penalty"];

#[derive(Debug, Default, Clone, Copy)]
pub struct AnthropicAdapter;

impl ChatAdapter for AnthropicAdapter {
    fn build_request(&self, ctx: RequestContext<'_>, request: &ChatRequest) -> Result<WireRequest, ProviderError> {
        let messages = request.messages()?;
        let mut body = request.object()?.clone();

        let mut system_parts: Vec<String> = body
            .get("system")
            .and_then(|s| s.as_str())
            .map(|s| vec![s.to_string()])
            .unwrap_or_default();
        let mut turns = Vec::with_capacity(messages.len());
        for message in messages {
            if message_role(message) == "system" {
                system_parts.push(message_text(message));
            } else {
                turns.push(message.clone());
            }
        }

        for key in DROPPED_KEYS {
            body.remove(key);
        }
        if let Some(stop) = body.remove("stop") {
            let stop = match stop {
                Value::String(s) => Value::Array(vec![Value::String(s)]),
                other => other,
            };
            body.insert("stop_sequences".to_string(), stop);
        }

        body.insert("model".to_string(), Value::String(ctx.model.to_string()));
        body.insert("messages".to_string(), Value::Array(turns));
        if system_parts.is_empty() {
            body.remove("system");
        } else {
            body.insert("system".to_string(), Value::String(system_parts.join("\n\n")));
        }
        body.entry("max_tokens")
            .or_insert_with(|| Value::from(DEFAULT_MAX_TOKENS));

        Ok(WireRequest {
            url: format!("{}/messages", ctx.base_url.trim_end_matches('/')),
            headers: vec![
                ("x-api-key", ctx.api_key.to_string()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            body: Value::Object(body),
        })
    }

    fn parse_response(&self, model: &str, body: Value) -> Result<ChatResponse, ProviderError> {
        let blocks = body
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| ProviderError::Decode("no content blocks in response".to_string()))?;

        let texts: Vec<&str> = blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect();
        let content = (!texts.is_empty()).then(|| texts.concat());

        Ok(ChatResponse {
            content,
            model: body
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or(model)
                .to_string(),
            input_tokens: token_count(body.pointer("/usage/input_tokens")),
            output_tokens: token_count(body.pointer("/usage/output_tokens")),
            raw: body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ParsingMode;
    use serde_json::json;

    fn ctx() -> RequestContext<'static> {
        RequestContext {
            base_url: "https://api.anthropic.com/v1",
            api_key: "ak-test",
            model: "claude-3-haiku",
            mode: ParsingMode::AnthropicTools,
        }
    }

    #[test]
    fn test_system_hoisted_and_defaults_applied() {
        let request = ChatRequest::new(json!({
            "messages": [
                {"role": "system", "content": "You are terse."},
                {"role": "user", "content": "hi"}
            ],
            "temperature": 0.2,
            "stop": "END",
            "response_format": {"type": "json_object"}
        }));

        let wire = AnthropicAdapter.build_request(ctx(), &request).unwrap();
        assert_eq!(wire.url, "https://api.anthropic.com/v1/messages");
        assert!(wire.headers.contains(&("x-api-key", "ak-test".to_string())));
        assert!(wire.headers.contains(&("anthropic-version", ANTHROPIC_VERSION.to_string())));
        assert_eq!(wire.body["system"], "You are terse.");
        assert_eq!(wire.body["messages"], json!([{"role": "user", "content": "hi"}]));
        assert_eq!(wire.body["max_tokens"], 4096);
        assert_eq!(wire.body["stop_sequences"], json!(["END"]));
        assert!(wire.body.get("response_format").is_none());
    }

    #[test]
    fn test_explicit_max_tokens_kept() {
        let request = ChatRequest::new(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 64
        }));
        let wire = AnthropicAdapter.build_request(ctx(), &request).unwrap();
        assert_eq!(wire.body["max_tokens"], 64);
        assert!(wire.body.get("system").is_none());
    }

    #[test]
    fn test_parse_response() {
        let body = json!({
            "model": "claude-3-haiku-20240307",
            "content": [
                {"type": "text", "text": "Hello"},
                {"type": "tool_use", "id": "t1", "name": "f", "input": {}},
                {"type": "text", "text": " world"}
            ],
            "usage": {"input_tokens": 9, "output_tokens": 2}
        });
        let response = AnthropicAdapter.parse_response("claude-3-haiku", body).unwrap();
        assert_eq!(response.content.as_deref(), Some("Hello world"));
        assert_eq!(response.input_tokens, 9);
        assert_eq!(response.output_tokens, 2);
    }

    #[test]
    fn test_missing_content() {
        let err = AnthropicAdapter.parse_response("m", json!({"id": "x"})).unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }
}
