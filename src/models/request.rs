//! Request, outcome and run statistics types.
//!
//! A `RequestRecord` is one unit of work read from the pending ledger; an
//! `OutcomeRecord` is its single terminal result written to the output ledger.

use crate::client::Provider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One pending request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    /// 0-based index of the record among non-blank input lines
    pub index: usize,

    /// Target provider
    pub provider: Provider,

    /// Target model name
    pub model: String,

    /// Provider payload (messages, temperature, max_tokens, ...)
    pub payload: serde_json::Value,

    /// Caller metadata, passed through to the outcome
    pub metadata: serde_json::Value,

    /// Tokens charged against the rate limiter per attempt
    pub estimated_tokens: u32,

    /// Attempts started so far
    pub attempts: u32,

    /// Attempt ceiling
    pub max_attempts: u32,
}

impl RequestRecord {
    /// Whether another attempt may start.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Terminal result of one request. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Index of the originating request
    pub index: usize,

    /// Whether the request succeeded
    pub success: bool,

    /// Provider response body (on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,

    /// Error description (on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Attempts used
    pub attempts: u32,

    pub provider: Provider,

    pub model: String,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,

    /// Dispatch run that produced this outcome
    pub run_id: String,

    pub completed_at: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn succeeded(record: &RequestRecord, response: serde_json::Value, run_id: &str) -> Self {
        Self {
            index: record.index,
            success: true,
            response: Some(response),
            error: None,
            attempts: record.attempts,
            provider: record.provider,
            model: record.model.clone(),
            metadata: record.metadata.clone(),
            run_id: run_id.to_string(),
            completed_at: Utc::now(),
        }
    }

    pub fn failed(record: &RequestRecord, error: impl Into<String>, run_id: &str) -> Self {
        Self {
            index: record.index,
            success: false,
            response: None,
            error: Some(error.into()),
            attempts: record.attempts,
            provider: record.provider,
            model: record.model.clone(),
            metadata: record.metadata.clone(),
            run_id: run_id.to_string(),
            completed_at: Utc::now(),
        }
    }
}

/// Estimate the tokens a chat payload will consume.
///
/// Roughly four characters per prompt token plus the requested completion
/// budget. Returns `fallback` when the payload has neither text nor a
/// `max_tokens` field.
pub fn estimate_tokens(payload: &serde_json::Value, fallback: u32) -> u32 {
    let mut chars = 0usize;
    if let Some(messages) = payload.get("messages").and_then(|m| m.as_array()) {
        for message in messages {
            match message.get("content") {
                Some(serde_json::Value::String(s)) => chars += s.chars().count(),
                Some(serde_json::Value::Array(blocks)) => {
                    chars += blocks
                        .iter()
                        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                        .map(|t| t.chars().count())
                        .sum::<usize>();
                }
                _ => {}
            }
        }
    }

    let completion = payload
        .get("max_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    if chars == 0 && completion == 0 {
        return fallback;
    }

    let prompt = chars.div_ceil(4) as u64;
    (prompt + completion).min(u32::MAX as u64) as u32
}

/// Statistics for a dispatch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Well-formed records read from the pending ledger
    pub total_records: usize,

    /// Records with a success outcome
    pub succeeded: usize,

    /// Records with a terminal failure outcome
    pub failed: usize,

    /// Lines that could not be parsed
    pub malformed: Vec<MalformedLine>,

    /// Records skipped because the output already had them (resume)
    pub skipped: usize,

    /// Records left without an outcome because the run was cancelled
    pub interrupted: usize,

    /// Attempts across all records
    pub total_attempts: u64,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Outcomes per hour
    pub throughput_per_hour: f64,
}

/// A pending-ledger line that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedLine {
    /// 1-based line number
    pub line: usize,
    pub message: String,
}

impl RunStats {
    /// Outcomes written during this run.
    pub fn outcomes(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.outcomes() as f64 / self.runtime_secs * 3600.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> RequestRecord {
        RequestRecord {
            index: 4,
            provider: Provider::OpenAi,
            model: "gpt-3.5-turbo".to_string(),
            payload: json!({"messages": []}),
            metadata: json!({"prompt_id": 4}),
            estimated_tokens: 10,
            attempts: 2,
            max_attempts: 3,
        }
    }

    #[test]
    fn test_estimate_tokens() {
        let payload = json!({
            "messages": [
                {"role": "system", "content": "12345678"},
                {"role": "user", "content": [{"type": "text", "text": "abcd"}]}
            ],
            "max_tokens": 100
        });
        assert_eq!(estimate_tokens(&payload, 7), 103);
        assert_eq!(estimate_tokens(&json!({"temperature": 0.2}), 7), 7);
        assert_eq!(estimate_tokens(&json!({"max_tokens": 50}), 7), 50);
    }

    #[test]
    fn test_estimate_counts_characters_not_bytes() {
        // 8 characters, 24 bytes in UTF-8
        let payload = json!({"messages": [{"role": "user", "content": "日本語のテキスト"}]});
        assert_eq!(estimate_tokens(&payload, 7), 2);

        let blocks = json!({"messages": [{"role": "user", "content": [{"type": "text", "text": "ééééé"}]}]});
        assert_eq!(estimate_tokens(&blocks, 7), 2);
    }

    #[test]
    fn test_outcome_serialization_omits_empty_fields() {
        let outcome = OutcomeRecord::failed(&record(), "boom", "run-1");
        let line = serde_json::to_string(&outcome).unwrap();
        assert!(line.contains(r#""success":false"#));
        assert!(line.contains(r#""error":"boom""#));
        assert!(line.contains(r#""provider":"openai""#));
        assert!(!line.contains("response"));

        let back: OutcomeRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn test_outcome_carries_attempts_and_metadata() {
        let outcome = OutcomeRecord::succeeded(&record(), json!({"ok": true}), "run-1");
        assert!(outcome.success);
        assert_eq!(outcome.index, 4);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.metadata, json!({"prompt_id": 4}));
    }

    #[test]
    fn test_run_stats_finalize() {
        let mut stats = RunStats {
            succeeded: 9,
            failed: 1,
            runtime_secs: 36.0,
            ..Default::default()
        };
        stats.finalize();
        assert_eq!(stats.outcomes(), 10);
        assert!((stats.throughput_per_hour - 1000.0).abs() < f64::EPSILON);
    }
}
