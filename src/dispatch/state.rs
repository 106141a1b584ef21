//! Per-record dispatch state machine.
//!
//! ```text
//! Pending -> InFlight -> Succeeded | Retrying{delay} | Failed
//! Retrying -> InFlight
//! ```
//!
//! Attempt accounting lives in `RequestRecord::begin_attempt`; the choice of
//! the next state lives in `transition`. Nothing else moves a record.

use crate::models::{AnyLlmError, ProviderError, RequestRecord, Result, RetryConfig};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Pending,
    InFlight,
    Succeeded,
    Retrying { delay: Duration },
    Failed,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Succeeded | DispatchState::Failed)
    }
}

/// Exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the given (1-based) attempt failed: `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl RequestRecord {
    /// Enter `InFlight`, counting the attempt.
    ///
    /// Refuses once the attempt ceiling is reached.
    pub fn begin_attempt(&mut self) -> Result<DispatchState> {
        if !self.has_attempts_left() {
            return Err(AnyLlmError::Internal(format!(
                "record {} already used {} of {} attempts",
                self.index, self.attempts, self.max_attempts
            )));
        }
        self.attempts += 1;
        Ok(DispatchState::InFlight)
    }
}

/// Next state of an in-flight record given its call result.
///
/// A provider retry hint longer than the backoff wins.
pub fn transition<T>(
    record: &RequestRecord,
    result: &std::result::Result<T, ProviderError>,
    policy: &RetryPolicy,
) -> DispatchState {
    match result {
        Ok(_) => DispatchState::Succeeded,
        Err(e) if e.is_retryable() && record.has_attempts_left() => {
            let delay = policy
                .backoff(record.attempts)
                .max(e.retry_after().unwrap_or_default());
            DispatchState::Retrying { delay }
        }
        Err(_) => DispatchState::Failed,
    }
}
