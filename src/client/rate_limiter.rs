//! Per-provider rate limiter with two independent budgets.
//!
//! Providers cap both call frequency and token throughput, and a burst of
//! small requests can drain the token budget long before the request
//! budget. Each provider therefore gets a `RateBudget` holding a request
//! window and a token window; a grant consumes from both or from neither.
//!
//! Waiters queue on a fair (FIFO) async mutex, so grants for one provider
//! are issued in the order `acquire` was called. A provider-side 429 can
//! additionally block the budget via `penalize`.

use crate::client::Provider;
use crate::models::{Config, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

/// Capacity of both budgets for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetLimits {
    pub requests: u32,
    pub request_interval: Duration,
    pub tokens: u32,
    pub token_interval: Duration,
}

impl BudgetLimits {
    /// Per-minute budgets.
    pub fn per_minute(requests: u32, tokens: u32) -> Self {
        Self {
            requests,
            request_interval: Duration::from_secs(60),
            tokens,
            token_interval: Duration::from_secs(60),
        }
    }
}

/// One fixed window of a budget.
#[derive(Debug, Clone)]
struct Window {
    capacity: u64,
    interval: Duration,
    consumed: u64,
    started_at: Instant,
}

impl Window {
    fn new(capacity: u32, interval: Duration, now: Instant) -> Self {
        Self {
            capacity: capacity as u64,
            interval,
            consumed: 0,
            started_at: now,
        }
    }

    fn resets_at(&self) -> Instant {
        self.started_at + self.interval
    }

    fn roll(&mut self, now: Instant) {
        if now >= self.resets_at() {
            self.consumed = 0;
            self.started_at = now;
        }
    }

    /// An amount larger than the whole capacity fits an empty window;
    /// otherwise it could never be granted.
    fn fits(&self, amount: u64) -> bool {
        self.consumed + amount <= self.capacity || self.consumed == 0
    }
}

/// Consumption counters for one provider.
#[derive(Debug, Clone)]
pub struct RateBudget {
    requests: Window,
    tokens: Window,
    blocked_until: Option<Instant>,
}

impl RateBudget {
    pub fn new(limits: BudgetLimits, now: Instant) -> Self {
        Self {
            requests: Window::new(limits.requests, limits.request_interval, now),
            tokens: Window::new(limits.tokens, limits.token_interval, now),
            blocked_until: None,
        }
    }

    /// Try to take one request and `tokens` tokens.
    ///
    /// On refusal returns the instant worth retrying at: the earliest reset
    /// among the exhausted windows, or the end of a provider penalty.
    pub fn try_consume(&mut self, tokens: u32, now: Instant) -> std::result::Result<(), Instant> {
        if let Some(until) = self.blocked_until {
            if now < until {
                return Err(until);
            }
            self.blocked_until = None;
        }

        self.requests.roll(now);
        self.tokens.roll(now);

        let tokens = tokens as u64;
        let requests_ok = self.requests.fits(1);
        let tokens_ok = self.tokens.fits(tokens);

        if requests_ok && tokens_ok {
            self.requests.consumed += 1;
            self.tokens.consumed += tokens;
            return Ok(());
        }

        let wake = match (requests_ok, tokens_ok) {
            (false, false) => self.requests.resets_at().min(self.tokens.resets_at()),
            (false, true) => self.requests.resets_at(),
            _ => self.tokens.resets_at(),
        };
        Err(wake)
    }

    /// Block all grants until `until`.
    pub fn block_until(&mut self, until: Instant) {
        self.blocked_until = Some(self.blocked_until.map_or(until, |cur| cur.max(until)));
    }

    pub fn requests_consumed(&self) -> u64 {
        self.requests.consumed
    }

    pub fn tokens_consumed(&self) -> u64 {
        self.tokens.consumed
    }
}

/// Permission to dispatch one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    pub provider: Provider,
    pub tokens: u32,
    /// Time spent waiting for the grant
    pub waited: Duration,
}

/// Budget state plus the FIFO queue of its waiters.
#[derive(Debug)]
struct BudgetSlot {
    queue: tokio::sync::Mutex<()>,
    state: Mutex<RateBudget>,
}

impl BudgetSlot {
    fn state(&self) -> MutexGuard<'_, RateBudget> {
        // A poisoned budget only means a panic elsewhere; the counters are still valid.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Rate limiter shared by every dispatch unit.
#[derive(Debug)]
pub struct RateLimiter {
    limits: HashMap<Provider, BudgetLimits>,
    fallback: BudgetLimits,
    budgets: DashMap<Provider, Arc<BudgetSlot>>,
    total_grants: AtomicU64,
    total_waits: AtomicU64,
    total_wait_ms: AtomicU64,
    total_penalties: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter with explicit per-provider limits.
    ///
    /// Providers without an entry use `fallback`.
    pub fn new(limits: HashMap<Provider, BudgetLimits>, fallback: BudgetLimits) -> Self {
        Self {
            limits,
            fallback,
            budgets: DashMap::new(),
            total_grants: AtomicU64::new(0),
            total_waits: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
            total_penalties: AtomicU64::new(0),
        }
    }

    /// Per-minute limits of every registered provider, after config overrides.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut limits = HashMap::new();
        for profile in crate::client::registered() {
            let settings = config.provider_settings(profile.provider)?;
            limits.insert(
                profile.provider,
                BudgetLimits::per_minute(settings.requests_per_minute, settings.tokens_per_minute),
            );
        }
        Ok(Self::new(limits, BudgetLimits::per_minute(60, 60_000)))
    }

    pub fn limits_for(&self, provider: Provider) -> BudgetLimits {
        self.limits.get(&provider).copied().unwrap_or(self.fallback)
    }

    fn slot(&self, provider: Provider) -> Arc<BudgetSlot> {
        let entry = self.budgets.entry(provider).or_insert_with(|| {
            Arc::new(BudgetSlot {
                queue: tokio::sync::Mutex::new(()),
                state: Mutex::new(RateBudget::new(self.limits_for(provider), Instant::now())),
            })
        });
        Arc::clone(entry.value())
    }

    /// Wait for a grant of one request and `estimated_tokens` tokens.
    ///
    /// Grants for the same provider are issued in call order. Dropping the
    /// returned future gives up the place in the queue.
    pub async fn acquire(&self, provider: Provider, estimated_tokens: u32) -> Grant {
        let slot = self.slot(provider);
        let start = Instant::now();
        let _turn = slot.queue.lock().await;

        loop {
            let attempt = slot.state().try_consume(estimated_tokens, Instant::now());
            match attempt {
                Ok(()) => break,
                Err(wake_at) => {
                    debug!(
                        provider = %provider,
                        wait_ms = wake_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                        "Waiting for rate budget"
                    );
                    sleep_until(wake_at).await;
                }
            }
        }

        let waited = start.elapsed();
        self.total_grants.fetch_add(1, Ordering::Relaxed);
        if waited > Duration::ZERO {
            self.total_waits.fetch_add(1, Ordering::Relaxed);
            self.total_wait_ms
                .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
        }

        Grant {
            provider,
            tokens: estimated_tokens,
            waited,
        }
    }

    /// Block a provider's budget after it rejected a call for rate limiting.
    pub fn penalize(&self, provider: Provider, retry_after: Duration) {
        self.total_penalties.fetch_add(1, Ordering::Relaxed);
        warn!(
            provider = %provider,
            retry_after_ms = retry_after.as_millis() as u64,
            "Provider rate limited us, pausing grants"
        );
        self.slot(provider)
            .state()
            .block_until(Instant::now() + retry_after);
    }

    /// Snapshot of a provider's budget.
    pub fn budget(&self, provider: Provider) -> RateBudget {
        self.slot(provider).state().clone()
    }

    /// Get statistics.
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_grants: self.total_grants.load(Ordering::Relaxed),
            total_waits: self.total_waits.load(Ordering::Relaxed),
            total_wait_secs: self.total_wait_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            total_penalties: self.total_penalties.load(Ordering::Relaxed),
            providers_tracked: self.budgets.len(),
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_grants: u64,
    pub total_waits: u64,
    pub total_wait_secs: f64,
    pub total_penalties: u64,
    pub providers_tracked: usize,
}
