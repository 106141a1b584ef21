//! Configuration models for any-llm.
//!
//! Every tunable of a dispatch run lives here: concurrency, attempt ceiling,
//! backoff constants and per-provider overrides of the static registry.
//! All fields default, so an empty file (or no file) is a valid config.

use crate::client::{Provider, ProviderProfile, profile_for};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for any-llm.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Dispatcher settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Retry backoff settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-provider overrides, keyed by provider id ("openai", "anthropic", ...)
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of records in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per record before it is recorded as failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,

    /// Token estimate used when a record carries neither an estimate nor
    /// enough content to derive one
    #[serde(default = "default_token_estimate")]
    pub default_token_estimate: u32,

    /// Draw a progress bar on stderr
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

fn default_concurrency() -> usize {
    16
}

fn default_max_attempts() -> u32 {
    3
}

fn default_timeout() -> u64 {
    120
}

fn default_token_estimate() -> u32 {
    1_000
}

fn default_true() -> bool {
    true
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_timeout(),
            default_token_estimate: default_token_estimate(),
            show_progress: default_true(),
        }
    }
}

impl DispatchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Exponential backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the second attempt, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single backoff, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Override of one provider's registry row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL (supports ${ENV_VAR} expansion)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable name for the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Request budget per minute
    #[serde(default)]
    pub requests_per_minute: Option<u32>,

    /// Token budget per minute
    #[serde(default)]
    pub tokens_per_minute: Option<u32>,
}

/// Effective settings for one provider after applying overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key_env: String,
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
}

impl ProviderSettings {
    /// Settings straight from the registry, no overrides.
    pub fn from_profile(profile: &ProviderProfile) -> Self {
        Self {
            base_url: profile.base_url.to_string(),
            api_key_env: profile.api_key_env.to_string(),
            requests_per_minute: profile.requests_per_minute,
            tokens_per_minute: profile.tokens_per_minute,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    /// Check value ranges and provider section names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "dispatch.concurrency must be at least 1".to_string(),
            ));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "dispatch.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::InvalidValue(
                "retry.max_delay_ms must not be below retry.base_delay_ms".to_string(),
            ));
        }
        for (name, section) in &self.providers {
            if name.parse::<Provider>().is_err() {
                return Err(ConfigError::UnknownProviderSection(name.clone()));
            }
            if section.requests_per_minute == Some(0) || section.tokens_per_minute == Some(0) {
                return Err(ConfigError::InvalidValue(format!(
                    "providers.{name}: rate limits must be positive"
                )));
            }
        }
        Ok(())
    }

    /// Effective settings for a registered provider.
    ///
    /// Fails with `UnknownProvider` when the provider has no registry row.
    pub fn provider_settings(&self, provider: Provider) -> crate::models::Result<ProviderSettings> {
        let profile = profile_for(provider)?;
        let mut settings = ProviderSettings::from_profile(profile);

        if let Some(section) = self.providers.get(provider.as_str()) {
            if let Some(url) = &section.base_url {
                settings.base_url = expand_env_vars(url);
            }
            if let Some(env) = &section.api_key_env {
                settings.api_key_env = env.clone();
            }
            if let Some(rpm) = section.requests_per_minute {
                settings.requests_per_minute = rpm;
            }
            if let Some(tpm) = section.tokens_per_minute {
                settings.tokens_per_minute = tpm;
            }
        }

        Ok(settings)
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return result;
    };

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidValue(String),

    #[error("Unknown provider section: [providers.{0}]")]
    UnknownProviderSection(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.dispatch.concurrency, 16);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert!(config.providers.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_provider_override() {
        let config: Config = toml::from_str(
            r#"
            [providers.groq]
            base_url = "http://localhost:9999/v1"
            requests_per_minute = 2
            "#,
        )
        .unwrap();

        let settings = config.provider_settings(Provider::Groq).unwrap();
        assert_eq!(settings.base_url, "http://localhost:9999/v1");
        assert_eq!(settings.requests_per_minute, 2);
        assert_eq!(settings.api_key_env, "GROQ_API_KEY");
        assert_eq!(settings.tokens_per_minute, 6_000);

        let untouched = config.provider_settings(Provider::OpenAi).unwrap();
        assert_eq!(untouched.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_unknown_section_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[providers.llamacpp]\nbase_url = \"http://x\"").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProviderSection(ref s) if s == "llamacpp"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config: Config = toml::from_str("[dispatch]\nmax_attempts = 0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let config: Config =
            toml::from_str("[retry]\nbase_delay_ms = 1000\nmax_delay_ms = 10").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_expand_env_vars_leaves_unset_placeholder() {
        let s = expand_env_vars("http://${ANY_LLM_SURELY_UNSET_VAR}/v1");
        assert_eq!(s, "http://${ANY_LLM_SURELY_UNSET_VAR}/v1");
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/any-llm.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
