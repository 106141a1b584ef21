//! Provider-bound client handle.
//!
//! A `ClientHandle` carries everything needed to issue one chat call: the
//! provider's adapter, base URL, credential, parsing mode and transport.
//! It holds no per-call state and is never mutated after construction, so
//! one `Arc<ClientHandle>` is shared by every concurrent dispatch unit.

use crate::client::chat::{ChatAdapter, ChatRequest, ChatResponse, RequestContext};
use crate::client::transport::Transport;
use crate::client::{ParsingMode, Provider};
use crate::models::ProviderError;
use async_trait::async_trait;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// The uniform call surface every provider client exposes.
#[async_trait]
pub trait ChatClient: Send + Sync {
    fn provider(&self) -> Provider;

    fn model(&self) -> &str;

    fn parsing_mode(&self) -> ParsingMode;

    /// Submit one chat-style request and receive one structured response.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Immutable, provider-bound chat client.
pub struct ClientHandle {
    provider: Provider,
    model: String,
    mode: ParsingMode,
    base_url: String,
    api_key: String,
    timeout: Duration,
    adapter: Box<dyn ChatAdapter>,
    transport: Transport,
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("mode", &self.mode)
            .field("base_url", &self.base_url)
            .field("async", &self.transport.is_async())
            .finish_non_exhaustive()
    }
}

impl ClientHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        provider: Provider,
        model: String,
        mode: ParsingMode,
        base_url: String,
        api_key: String,
        timeout: Duration,
        adapter: Box<dyn ChatAdapter>,
        transport: Transport,
    ) -> Self {
        Self {
            provider,
            model,
            mode,
            base_url,
            api_key,
            timeout,
            adapter,
            transport,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether this handle was built for async callers.
    pub fn is_async(&self) -> bool {
        self.transport.is_async()
    }

    fn context(&self) -> RequestContext<'_> {
        RequestContext {
            base_url: &self.base_url,
            api_key: &self.api_key,
            model: &self.model,
            mode: self.mode,
        }
    }

    /// Blocking variant of `complete`, for handles built with `async_mode = false`.
    pub fn complete_blocking(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();
        let wire = self.adapter.build_request(self.context(), request)?;
        let response = self.transport.send_blocking(wire, self.timeout)?;
        let parsed = self.adapter.parse_response(&self.model, response.body)?;
        debug!(
            provider = %self.provider,
            model = %parsed.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Chat call complete"
        );
        Ok(parsed)
    }
}

#[async_trait]
impl ChatClient for ClientHandle {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn parsing_mode(&self) -> ParsingMode {
        self.mode
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();
        let wire = self.adapter.build_request(self.context(), request)?;
        let response = self.transport.send(wire, self.timeout).await?;
        let parsed = self.adapter.parse_response(&self.model, response.body)?;
        debug!(
            provider = %self.provider,
            model = %parsed.model,
            status = response.status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Chat call complete"
        );
        Ok(parsed)
    }
}
