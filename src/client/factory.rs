//! Provider client factory.
//!
//! Resolves a provider identifier into a ready-to-use `ClientHandle`:
//! credential from the provider's env var, parsing mode from the override or
//! the registry default, the wire adapter for the provider's API shape, and
//! a sync or async transport. No network traffic happens at build time.

use crate::client::anthropic::AnthropicAdapter;
use crate::client::chat::ChatAdapter;
use crate::client::cohere::CohereAdapter;
use crate::client::credentials::{CredentialSource, EnvCredentials};
use crate::client::handle::{ChatClient, ClientHandle};
use crate::client::openai::OpenAiAdapter;
use crate::client::transport::Transport;
use crate::client::{ParsingMode, Provider, profile_for};
use crate::models::{AnyLlmError, Config, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Memoization key: handles are stateless, so identical keys share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    provider: Provider,
    model: String,
    async_mode: bool,
    mode: ParsingMode,
}

/// Where the dispatcher gets its clients from.
pub trait ClientSource: Send + Sync {
    /// Resolve an async client for `provider` / `model`.
    fn client_for(
        &self,
        provider: Provider,
        model: &str,
        mode: Option<ParsingMode>,
    ) -> Result<Arc<dyn ChatClient>>;
}

/// Builds and caches provider clients.
///
/// # Example
///
/// ```ignore
/// use any_llm::{ClientFactory, Config, Provider};
///
/// let factory = ClientFactory::from_env(Config::default());
/// let client = factory.build_client(Provider::OpenAi, "gpt-4o-mini", true, None)?;
/// let response = client.complete(&request).await?;
/// ```
pub struct ClientFactory {
    config: Config,
    credentials: Arc<dyn CredentialSource>,
    timeout: Duration,
    cache: DashMap<ClientKey, Arc<ClientHandle>>,
}

impl ClientFactory {
    pub fn new(config: Config, credentials: Arc<dyn CredentialSource>) -> Self {
        let timeout = config.dispatch.request_timeout();
        Self {
            config,
            credentials,
            timeout,
            cache: DashMap::new(),
        }
    }

    /// Factory that reads credentials from the process environment.
    pub fn from_env(config: Config) -> Self {
        Self::new(config, Arc::new(EnvCredentials))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of memoized handles.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Build (or reuse) a client for `provider` / `model_name`.
    ///
    /// # Errors
    ///
    /// - `UnknownProvider` if the provider has no registry row
    /// - `MissingCredential` if its API key env var is unset or empty
    /// - `UnsupportedProvider` if no chat adapter exists for it
    pub fn build_client(
        &self,
        provider: Provider,
        model_name: &str,
        async_mode: bool,
        parsing_mode: Option<ParsingMode>,
    ) -> Result<Arc<ClientHandle>> {
        let profile = profile_for(provider)?;
        let settings = self.config.provider_settings(provider)?;
        let mode = parsing_mode.unwrap_or(profile.default_mode);

        let key = ClientKey {
            provider,
            model: model_name.to_string(),
            async_mode,
            mode,
        };
        if let Some(handle) = self.cache.get(&key) {
            return Ok(Arc::clone(handle.value()));
        }

        let api_key = self
            .credentials
            .lookup(&settings.api_key_env)
            .ok_or_else(|| AnyLlmError::MissingCredential {
                provider,
                env_var: settings.api_key_env.clone(),
            })?;

        if !profile.chat_capable {
            return Err(AnyLlmError::UnsupportedProvider(provider));
        }
        let adapter = adapter_for(provider)?;
        let transport = Transport::new(async_mode, self.timeout)?;

        debug!(
            provider = %provider,
            model = model_name,
            mode = %mode,
            async_mode = async_mode,
            base_url = %settings.base_url,
            "Built client"
        );

        let handle = Arc::new(ClientHandle::new(
            provider,
            model_name.to_string(),
            mode,
            settings.base_url,
            api_key,
            self.timeout,
            adapter,
            transport,
        ));

        Ok(Arc::clone(self.cache.entry(key).or_insert(handle).value()))
    }
}

impl ClientSource for ClientFactory {
    fn client_for(
        &self,
        provider: Provider,
        model: &str,
        mode: Option<ParsingMode>,
    ) -> Result<Arc<dyn ChatClient>> {
        let handle: Arc<dyn ChatClient> = self.build_client(provider, model, true, mode)?;
        Ok(handle)
    }
}

/// Pick the wire adapter implementing a provider's API shape.
fn adapter_for(provider: Provider) -> Result<Box<dyn ChatAdapter>> {
    match provider {
        Provider::OpenAi | Provider::Groq | Provider::Mistral | Provider::Anyscale => {
            Ok(Box::new(OpenAiAdapter))
        }
        Provider::Anthropic => Ok(Box::new(AnthropicAdapter)),
        Provider::Cohere => Ok(Box::new(CohereAdapter)),
        other => Err(AnyLlmError::UnsupportedProvider(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::credentials::StaticCredentials;
    use crate::client::registered;

    const CHAT_PROVIDERS: [Provider; 6] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Cohere,
        Provider::Groq,
        Provider::Mistral,
        Provider::Anyscale,
    ];

    fn all_credentials() -> StaticCredentials {
        registered().fold(StaticCredentials::new(), |creds, profile| {
            creds.with(profile.api_key_env, "test-key")
        })
    }

    fn factory(creds: StaticCredentials) -> ClientFactory {
        ClientFactory::new(Config::default(), Arc::new(creds))
    }

    #[test]
    fn test_every_chat_provider_builds_with_default_mode() {
        let factory = factory(all_credentials());
        for provider in CHAT_PROVIDERS {
            for async_mode in [true, false] {
                let handle = factory
                    .build_client(provider, "some-model", async_mode, None)
                    .unwrap();
                assert_eq!(handle.provider(), provider);
                assert_eq!(handle.model(), "some-model");
                assert_eq!(handle.is_async(), async_mode);
                assert_eq!(
                    handle.parsing_mode(),
                    profile_for(provider).unwrap().default_mode
                );
                assert_eq!(handle.base_url(), profile_for(provider).unwrap().base_url);
            }
        }
    }

    #[test]
    fn test_missing_credential() {
        let factory = factory(StaticCredentials::new().with("OPENAI_API_KEY", "k"));
        let err = factory
            .build_client(Provider::Anthropic, "claude-3-haiku", true, None)
            .unwrap_err();
        assert!(matches!(
            err,
            AnyLlmError::MissingCredential { provider: Provider::Anthropic, ref env_var }
                if env_var == "ANTHROPIC_API_KEY"
        ));
        assert_eq!(factory.cached(), 0);

        // Other providers stay usable.
        factory
            .build_client(Provider::OpenAi, "gpt-4o", true, None)
            .unwrap();
    }

    #[test]
    fn test_unknown_and_unsupported_are_distinct() {
        let factory = factory(all_credentials());

        let err = factory
            .build_client(Provider::Gemini, "gemini-pro", true, None)
            .unwrap_err();
        assert!(matches!(err, AnyLlmError::UnknownProvider(_)));

        let err = factory
            .build_client(Provider::Voyage, "voyage-2", true, None)
            .unwrap_err();
        assert!(matches!(err, AnyLlmError::UnsupportedProvider(Provider::Voyage)));
    }

    #[test]
    fn test_mode_override() {
        let factory = factory(all_credentials());
        let handle = factory
            .build_client(Provider::OpenAi, "gpt-4o", true, Some(ParsingMode::MdJson))
            .unwrap();
        assert_eq!(handle.parsing_mode(), ParsingMode::MdJson);
    }

    #[test]
    fn test_handles_are_memoized_per_key() {
        let factory = factory(all_credentials());
        let a = factory.build_client(Provider::Groq, "llama3", true, None).unwrap();
        let b = factory.build_client(Provider::Groq, "llama3", true, None).unwrap();
        let c = factory.build_client(Provider::Groq, "llama3", false, None).unwrap();
        let d = factory
            .build_client(Provider::Groq, "llama3", true, Some(ParsingMode::Json))
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(!Arc::ptr_eq(&a, &d));
        assert_eq!(factory.cached(), 3);
    }

    #[test]
    fn test_config_overrides_env_var_and_url() {
        let config: Config = toml::from_str(
            r#"
            [providers.mistral]
            api_key_env = "MY_MISTRAL_KEY"
            base_url = "http://localhost:8080/v1"
            "#,
        )
        .unwrap();
        let creds = StaticCredentials::new().with("MY_MISTRAL_KEY", "k");
        let factory = ClientFactory::new(config, Arc::new(creds));

        let handle = factory
            .build_client(Provider::Mistral, "mistral-small", true, None)
            .unwrap();
        assert_eq!(handle.base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_client_source_returns_async_handle() {
        let factory = factory(all_credentials());
        let client = factory.client_for(Provider::Cohere, "command-r", None).unwrap();
        assert_eq!(client.provider(), Provider::Cohere);
        assert_eq!(client.parsing_mode(), ParsingMode::CohereTools);
        assert!(factory.build_client(Provider::Cohere, "command-r", true, None).unwrap().is_async());
        assert_eq!(factory.cached(), 1);
    }
}
