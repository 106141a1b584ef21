//! Core data models for any-llm.
//!
//! - `config`: TOML configuration and per-provider overrides
//! - `error`: library and per-call error taxonomy
//! - `request`: pending requests, outcomes and run statistics

mod config;
mod error;
mod request;

pub use config::*;
pub use error::*;
pub use request::*;
