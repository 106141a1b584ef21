//! Credential lookup.
//!
//! The factory reads one credential per provider at build time. Production
//! code reads the process environment; tests hand in a fixed map.

use std::collections::HashMap;

/// Source of provider API keys, looked up by environment-variable name.
pub trait CredentialSource: Send + Sync {
    /// Return the value of `var`, or `None` if unset or empty.
    fn lookup(&self, var: &str) -> Option<String>;
}

/// Reads credentials from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn lookup(&self, var: &str) -> Option<String> {
        std::env::var(var).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Fixed in-memory credentials.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    values: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, var: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(var.into(), value.into());
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn lookup(&self, var: &str) -> Option<String> {
        self.values
            .get(var)
            .filter(|v| !v.trim().is_empty())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credentials_ignore_blank() {
        let creds = StaticCredentials::new()
            .with("OPENAI_API_KEY", "sk-test")
            .with("GROQ_API_KEY", "   ");
        assert_eq!(creds.lookup("OPENAI_API_KEY").as_deref(), Some("sk-test"));
        assert_eq!(creds.lookup("GROQ_API_KEY"), None);
        assert_eq!(creds.lookup("MISTRAL_API_KEY"), None);
    }

    #[test]
    fn test_env_credentials_unset() {
        assert_eq!(EnvCredentials.lookup("ANY_LLM_SURELY_UNSET_CREDENTIAL"), None);
    }
}
