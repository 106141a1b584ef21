//! Static provider registry.
//!
//! One immutable row per supported backend: default parsing mode, the
//! environment variable holding its credential, its base URL and the
//! rate limits assumed when config does not override them.

use crate::models::{AnyLlmError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remote LLM vendor.
///
/// Not every identifier has a registry row: Gemini, Together and Ollama are
/// recognised names without a profile yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Cohere,
    Groq,
    Mistral,
    Anyscale,
    Voyage,
    Gemini,
    Together,
    Ollama,
}

impl Provider {
    pub const ALL: [Provider; 10] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Cohere,
        Provider::Groq,
        Provider::Mistral,
        Provider::Anyscale,
        Provider::Voyage,
        Provider::Gemini,
        Provider::Together,
        Provider::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Cohere => "cohere",
            Provider::Groq => "groq",
            Provider::Mistral => "mistral",
            Provider::Anyscale => "anyscale",
            Provider::Voyage => "voyage",
            Provider::Gemini => "gemini",
            Provider::Together => "together",
            Provider::Ollama => "ollama",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AnyLlmError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == needle)
            .ok_or_else(|| AnyLlmError::UnknownProvider(s.to_string()))
    }
}

/// Strategy used to coerce a raw provider response into a structured result.
///
/// Decoding itself is done by an external structured-output layer; the
/// client only carries the mode and shapes the request accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsingMode {
    Tools,
    AnthropicTools,
    CohereTools,
    MistralTools,
    JsonSchema,
    Json,
    MdJson,
}

impl ParsingMode {
    /// Whether the provider should be asked for a bare JSON object.
    pub fn wants_json_object(&self) -> bool {
        matches!(self, ParsingMode::Json | ParsingMode::JsonSchema)
    }
}

impl fmt::Display for ParsingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParsingMode::Tools => "tools",
            ParsingMode::AnthropicTools => "anthropic_tools",
            ParsingMode::CohereTools => "cohere_tools",
            ParsingMode::MistralTools => "mistral_tools",
            ParsingMode::JsonSchema => "json_schema",
            ParsingMode::Json => "json",
            ParsingMode::MdJson => "md_json",
        };
        f.write_str(s)
    }
}

impl FromStr for ParsingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tools" => Ok(ParsingMode::Tools),
            "anthropic_tools" => Ok(ParsingMode::AnthropicTools),
            "cohere_tools" => Ok(ParsingMode::CohereTools),
            "mistral_tools" => Ok(ParsingMode::MistralTools),
            "json_schema" => Ok(ParsingMode::JsonSchema),
            "json" => Ok(ParsingMode::Json),
            "md_json" => Ok(ParsingMode::MdJson),
            other => Err(format!("unknown parsing mode '{other}'")),
        }
    }
}

/// Static configuration for one registered provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider: Provider,
    /// Parsing mode used when the caller gives no override
    pub default_mode: ParsingMode,
    /// Environment variable holding the API key
    pub api_key_env: &'static str,
    /// Base endpoint URL (paths are adapter-specific)
    pub base_url: &'static str,
    /// Whether a chat client can be built for this provider
    pub chat_capable: bool,
    /// Default request budget per minute
    pub requests_per_minute: u32,
    /// Default token budget per minute
    pub tokens_per_minute: u32,
}

static PROFILES: [ProviderProfile; 7] = [
    ProviderProfile {
        provider: Provider::OpenAi,
        default_mode: ParsingMode::Tools,
        api_key_env: "OPENAI_API_KEY",
        base_url: "https://api.openai.com/v1",
        chat_capable: true,
        requests_per_minute: 1_500,
        tokens_per_minute: 125_000,
    },
    ProviderProfile {
        provider: Provider::Anthropic,
        default_mode: ParsingMode::AnthropicTools,
        api_key_env: "ANTHROPIC_API_KEY",
        base_url: "https://api.anthropic.com/v1",
        chat_capable: true,
        requests_per_minute: 1_000,
        tokens_per_minute: 80_000,
    },
    ProviderProfile {
        provider: Provider::Cohere,
        default_mode: ParsingMode::CohereTools,
        api_key_env: "COHERE_API_KEY",
        base_url: "https://api.cohere.ai/v1",
        chat_capable: true,
        requests_per_minute: 500,
        tokens_per_minute: 100_000,
    },
    ProviderProfile {
        provider: Provider::Groq,
        default_mode: ParsingMode::Tools,
        api_key_env: "GROQ_API_KEY",
        base_url: "https://api.groq.com/openai/v1",
        chat_capable: true,
        requests_per_minute: 30,
        tokens_per_minute: 6_000,
    },
    ProviderProfile {
        provider: Provider::Mistral,
        default_mode: ParsingMode::MistralTools,
        api_key_env: "MISTRAL_API_KEY",
        base_url: "https://api.mistral.ai/v1",
        chat_capable: true,
        requests_per_minute: 300,
        tokens_per_minute: 500_000,
    },
    ProviderProfile {
        provider: Provider::Anyscale,
        default_mode: ParsingMode::JsonSchema,
        api_key_env: "ANYSCALE_API_KEY",
        base_url: "https://api.endpoints.anyscale.com/v1",
        chat_capable: true,
        requests_per_minute: 100,
        tokens_per_minute: 100_000,
    },
    ProviderProfile {
        provider: Provider::Voyage,
        default_mode: ParsingMode::Json,
        api_key_env: "VOYAGE_API_KEY",
        base_url: "https://api.voyageai.com/v1",
        chat_capable: false,
        requests_per_minute: 300,
        tokens_per_minute: 1_000_000,
    },
];

/// Look up the static profile for a provider.
///
/// Fails with `UnknownProvider` when the identifier has no registry row.
pub fn profile_for(provider: Provider) -> Result<&'static ProviderProfile> {
    PROFILES
        .iter()
        .find(|p| p.provider == provider)
        .ok_or_else(|| AnyLlmError::UnknownProvider(provider.to_string()))
}

/// All registered profiles, in table order.
pub fn registered() -> impl Iterator<Item = &'static ProviderProfile> {
    PROFILES.iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_modes() {
        let expect = [
            (Provider::OpenAi, ParsingMode::Tools),
            (Provider::Anthropic, ParsingMode::AnthropicTools),
            (Provider::Cohere, ParsingMode::CohereTools),
            (Provider::Groq, ParsingMode::Tools),
            (Provider::Mistral, ParsingMode::MistralTools),
            (Provider::Anyscale, ParsingMode::JsonSchema),
        ];
        for (provider, mode) in expect {
            assert_eq!(profile_for(provider).unwrap().default_mode, mode);
        }
    }

    #[test]
    fn test_unregistered_provider() {
        for provider in [Provider::Gemini, Provider::Together, Provider::Ollama] {
            let err = profile_for(provider).unwrap_err();
            assert!(matches!(err, AnyLlmError::UnknownProvider(ref name) if name == provider.as_str()));
        }
    }

    #[test]
    fn test_parse_provider() {
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!(" Anthropic ".parse::<Provider>().unwrap(), Provider::Anthropic);
        assert!(matches!(
            "llamacpp".parse::<Provider>(),
            Err(AnyLlmError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_provider_serde_matches_display() {
        for provider in Provider::ALL {
            let json = serde_json::to_string(&provider).unwrap();
            assert_eq!(json, format!("\"{provider}\""));
        }
    }

    #[test]
    fn test_credential_vars_unique() {
        let mut vars: Vec<_> = registered().map(|p| p.api_key_env).collect();
        vars.sort();
        vars.dedup();
        assert_eq!(vars.len(), registered().count());
    }
}
