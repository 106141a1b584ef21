//! HTTP transport for provider calls.
//!
//! A handle is built either for async callers (`reqwest::Client`) or for
//! blocking callers (`reqwest::blocking::Client`). Both paths share the
//! same request description and the same status classification.

use crate::models::ProviderError;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use std::time::Duration;
use tracing::debug;

/// Provider-agnostic description of one HTTP call.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: serde_json::Value,
}

/// Raw response of a successful (2xx) call.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Sync or async HTTP client, fixed at handle construction.
#[derive(Debug, Clone)]
pub enum Transport {
    Async(reqwest::Client),
    Blocking(reqwest::blocking::Client),
}

impl Transport {
    /// Build the transport for the requested calling style.
    pub fn new(async_mode: bool, timeout: Duration) -> Result<Self, ProviderError> {
        if async_mode {
            reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map(Transport::Async)
                .map_err(|e| ProviderError::Transport(e.to_string()))
        } else {
            reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .map(Transport::Blocking)
                .map_err(|e| ProviderError::Transport(e.to_string()))
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Transport::Async(_))
    }

    /// Send from an async context.
    ///
    /// A blocking transport is driven on tokio's blocking pool.
    pub async fn send(&self, request: WireRequest, timeout: Duration) -> Result<WireResponse, ProviderError> {
        match self {
            Transport::Async(client) => send_async(client, request, timeout).await,
            Transport::Blocking(client) => {
                let client = client.clone();
                tokio::task::spawn_blocking(move || send_blocking(&client, request, timeout))
                    .await
                    .map_err(|e| ProviderError::Transport(format!("blocking call aborted: {e}")))?
            }
        }
    }

    /// Send from a synchronous context.
    pub fn send_blocking(&self, request: WireRequest, timeout: Duration) -> Result<WireResponse, ProviderError> {
        match self {
            Transport::Blocking(client) => send_blocking(client, request, timeout),
            Transport::Async(_) => Err(ProviderError::WrongTransport("blocking")),
        }
    }
}

fn build_headers(request: &WireRequest) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (key, value) in &request.headers {
        if let (Ok(name), Ok(val)) = (HeaderName::try_from(*key), HeaderValue::from_str(value)) {
            headers.insert(name, val);
        }
    }
    headers
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn classify_send_error(e: &reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Transport(e.to_string())
    }
}

/// Turn a status + body into a response or a classified error.
fn finish(
    status: u16,
    retry_after: Option<Duration>,
    text: String,
) -> Result<WireResponse, ProviderError> {
    if !(200..300).contains(&status) {
        let message = extract_error_message(&text);
        debug!(status = status, message = %message, "Provider returned error status");
        return Err(ProviderError::from_status(status, message, retry_after));
    }

    let body = serde_json::from_str(&text)
        .map_err(|e| ProviderError::Decode(format!("invalid JSON body: {e}")))?;
    Ok(WireResponse { status, body })
}

/// Pull a human-readable message out of an error body.
///
/// Handles `{"error": {"message": ..}}`, `{"error": ".."}` and
/// `{"message": ..}`; falls back to the raw text.
fn extract_error_message(text: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        let message = value
            .pointer("/error/message")
            .or_else(|| value.get("error").filter(|e| e.is_string()))
            .or_else(|| value.get("message"))
            .and_then(|m| m.as_str());
        if let Some(m) = message {
            return m.to_string();
        }
    }
    text.to_string()
}

async fn send_async(
    client: &reqwest::Client,
    request: WireRequest,
    timeout: Duration,
) -> Result<WireResponse, ProviderError> {
    let headers = build_headers(&request);
    let response = client
        .post(&request.url)
        .headers(headers)
        .json(&request.body)
        .send()
        .await
        .map_err(|e| classify_send_error(&e, timeout))?;

    let status = response.status().as_u16();
    let retry_after = parse_retry_after(response.headers());
    let text = response
        .text()
        .await
        .map_err(|e| classify_send_error(&e, timeout))?;

    finish(status, retry_after, text)
}

fn send_blocking(
    client: &reqwest::blocking::Client,
    request: WireRequest,
    timeout: Duration,
) -> Result<WireResponse, ProviderError> {
    let headers = build_headers(&request);
    let response = client
        .post(&request.url)
        .headers(headers)
        .json(&request.body)
        .send()
        .map_err(|e| classify_send_error(&e, timeout))?;

    let status = response.status().as_u16();
    let retry_after = parse_retry_after(response.headers());
    let text = response
        .text()
        .map_err(|e| classify_send_error(&e, timeout))?;

    finish(status, retry_after, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_error_message() {
        assert_eq!(
            extract_error_message(r#"{"error": {"message": "bad key", "type": "auth"}}"#),
            "bad key"
        );
        assert_eq!(extract_error_message(r#"{"error": "overloaded"}"#), "overloaded");
        assert_eq!(extract_error_message(r#"{"message": "too many"}"#), "too many");
        assert_eq!(extract_error_message("upstream timeout"), "upstream timeout");
    }

    #[test]
    fn test_finish_classifies() {
        let err = finish(429, Some(Duration::from_secs(3)), "{}".into()).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));

        let err = finish(200, None, "not json".into()).unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));

        let ok = finish(200, None, r#"{"id": "x"}"#.into()).unwrap();
        assert_eq!(ok.body["id"], "x");
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(1500)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }
}
