//! Error types for any-llm.
//!
//! Two layers:
//! - `AnyLlmError`: what the library surfaces to callers. Configuration-time
//!   failures (unknown provider, missing credential) are raised immediately.
//! - `ProviderError`: what a single chat call can fail with. The dispatcher
//!   never raises these; it turns them into outcome records.

use crate::client::Provider;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for any-llm.
#[derive(Debug, Error)]
pub enum AnyLlmError {
    // ═══════════════════════════════════════════════════════════════════
    // CONFIGURATION: no useful work can proceed for the provider
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Unknown provider: '{0}' is not registered")]
    UnknownProvider(String),

    #[error("Unsupported provider: '{0}' is registered but has no chat client")]
    UnsupportedProvider(Provider),

    #[error("Missing credential for provider '{provider}': set the {env_var} env var")]
    MissingCredential { provider: Provider, env_var: String },

    // ═══════════════════════════════════════════════════════════════════
    // PER-RECORD: isolated to one line or one request
    // ═══════════════════════════════════════════════════════════════════

    #[error("Malformed record on line {line}: {message}")]
    MalformedRecord { line: usize, message: String },

    #[error("Provider call failed: {0}")]
    Provider(#[from] ProviderError),

    // ═══════════════════════════════════════════════════════════════════
    // INFRASTRUCTURE
    // ═══════════════════════════════════════════════════════════════════

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single chat call against a provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited by provider (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Authentication failed (status {status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("Invalid request (status {status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("Could not decode provider response: {0}")]
    Decode(String),

    #[error("Client handle does not support {0} calls")]
    WrongTransport(&'static str),

    #[error("No client available: {0}")]
    Unavailable(String),
}

impl AnyLlmError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

impl ProviderError {
    /// Check if this error is worth another attempt.
    ///
    /// Timeouts, transport failures, 5xx and provider-side rate limiting are
    /// transient. Authentication, malformed requests and client-resolution
    /// failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Transport(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    /// Get the provider's retry hint, if it sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            408 => Self::Timeout(retry_after.unwrap_or_default()),
            401 | 403 => Self::Authentication { status, message },
            500..=599 => Self::Server { status, message },
            _ => Self::InvalidRequest { status, message },
        }
    }
}

/// Result type alias for any-llm.
pub type Result<T> = std::result::Result<T, AnyLlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let e = ProviderError::from_status(429, String::new(), Some(Duration::from_secs(2)));
        assert!(e.is_retryable());
        assert_eq!(e.retry_after(), Some(Duration::from_secs(2)));

        assert!(ProviderError::from_status(503, "down".into(), None).is_retryable());
        assert!(ProviderError::from_status(408, String::new(), None).is_retryable());
        assert!(!ProviderError::from_status(401, "bad key".into(), None).is_retryable());
        assert!(!ProviderError::from_status(403, String::new(), None).is_retryable());
        assert!(!ProviderError::from_status(400, "bad body".into(), None).is_retryable());
        assert!(!ProviderError::from_status(404, String::new(), None).is_retryable());
    }

    #[test]
    fn test_non_transport_errors_are_final() {
        assert!(!ProviderError::Decode("no choices".into()).is_retryable());
        assert!(!ProviderError::WrongTransport("blocking").is_retryable());
        assert!(!ProviderError::Unavailable("missing key".into()).is_retryable());
        assert!(ProviderError::Transport("connection reset".into()).is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
    }
}
