//! Provider clients.
//!
//! - `registry`: static provider table
//! - `factory`: builds memoized `ClientHandle`s from the registry and config
//! - `openai` / `anthropic` / `cohere`: wire adapters per API shape
//! - `rate_limiter`: per-provider request and token budgets

mod anthropic;
mod chat;
mod cohere;
mod credentials;
mod factory;
mod handle;
mod openai;
mod rate_limiter;
mod registry;
mod transport;

pub use anthropic::AnthropicAdapter;
pub use chat::{ChatAdapter, ChatRequest, ChatResponse, Message, RequestContext};
pub use cohere::CohereAdapter;
pub use credentials::{CredentialSource, EnvCredentials, StaticCredentials};
pub use factory::{ClientFactory, ClientSource};
pub use handle::{ChatClient, ClientHandle};
pub use openai::OpenAiAdapter;
pub use rate_limiter::*;
pub use registry::*;
pub use transport::{Transport, WireRequest, WireResponse};
