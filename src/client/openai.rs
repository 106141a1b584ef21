//! OpenAI chat-completions adapter.
//!
//! Serves every provider that speaks the OpenAI wire format: OpenAI itself,
//! Groq, Mistral and Anyscale.

use crate::client::chat::{ChatAdapter, ChatRequest, ChatResponse, RequestContext, token_count};
use crate::client::transport::WireRequest;
use crate::models::ProviderError;
use serde_json::Value;

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiAdapter;

impl ChatAdapter for OpenAiAdapter {
    fn build_request(&self, ctx: RequestContext<'_>, request: &ChatRequest) -> Result<WireRequest, ProviderError> {
        request.messages()?;
        let mut body = request.object()?.clone();

        body.insert("model".to_string(), Value::String(ctx.model.to_string()));
        body.remove("stream");
        if ctx.mode.wants_json_object() && !body.contains_key("response_format") {
            body.insert(
                "response_format".to_string(),
                serde_json::json!({ "type": "json_object" }),
            );
        }

        Ok(WireRequest {
            url: format!("{}/chat/completions", ctx.base_url.trim_end_matches('/')),
            headers: vec![("authorization", format!("Bearer {}", ctx.api_key))],
            body: Value::Object(body),
        })
    }

    fn parse_response(&self, model: &str, body: Value) -> Result<ChatResponse, ProviderError> {
        let choice = body
            .pointer("/choices/0/message")
            .ok_or_else(|| ProviderError::Decode("no choices in response".to_string()))?;

        let content = choice
            .get("content")
            .and_then(|c| c.as_str())
            .map(str::to_string);

        Ok(ChatResponse {
            content,
            model: body
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or(model)
                .to_string(),
            input_tokens: token_count(body.pointer("/usage/prompt_tokens")),
            output_tokens: token_count(body.pointer("/usage/completion_tokens")),
            raw: body,
        })
    }
}
