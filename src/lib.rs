//! any-llm - one client abstraction over many LLM providers, plus a
//! rate-limited batch dispatcher.
//!
//! ## Architecture
//!
//! - **Provider registry**: static table of providers, their default parsing
//!   mode, credential env var, base URL and rate limits
//! - **Client factory**: turns a provider id into a memoized, immutable
//!   `ClientHandle` that speaks that provider's wire format
//! - **Rate limiter**: per-provider request and token budgets, FIFO grants
//! - **Ledgers**: pending requests in, one outcome per request out (JSONL)
//! - **Batch dispatcher**: bounded concurrency, bounded retries with
//!   exponential backoff, cancellation, resume
//!
//! ## Example
//!
//! ```ignore
//! let stats = any_llm::dispatch_file(
//!     &Config::default(),
//!     Path::new("pending.jsonl"),
//!     Path::new("outcomes.jsonl"),
//!     "openai",
//!     "gpt-4o-mini",
//!     3,
//! )
//! .await?;
//! ```

pub mod client;
pub mod dispatch;
pub mod ledger;
pub mod models;

// Re-exports for convenience
pub use client::{
    ChatClient, ChatRequest, ChatResponse, ClientFactory, ClientHandle, ClientSource, CredentialSource,
    EnvCredentials, Message, ParsingMode, Provider, ProviderProfile, RateLimiter, StaticCredentials,
    profile_for,
};
pub use dispatch::{BatchDispatcher, DispatchSettings, RetryPolicy, dispatch_file};
pub use ledger::{OutcomeLedger, PendingLedger, RecordDefaults, load_pending};
pub use models::{AnyLlmError, Config, OutcomeRecord, ProviderError, RequestRecord, Result, RunStats};
