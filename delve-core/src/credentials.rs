//! API credentials
//!
//! Library code asks a [`CredentialProvider`] for keys; only binaries read the process environment.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    Tavily,
    GitHub,
    LanguageModel,
    Embedding,
}

impl CredentialKey {
    /// Environment variables consulted by [`EnvCredentials`], in priority order
    pub fn env_vars(&self) -> &'static [&'static str] {
        match self {
            CredentialKey::Tavily => &["TAVILY_API_KEY"],
            CredentialKey::GitHub => &["GITHUB_TOKEN", "GH_TOKEN"],
            CredentialKey::LanguageModel => &["DELVE_LLM_API_KEY", "OPENAI_API_KEY", "ANTHROPIC_API_KEY", "GROQ_API_KEY"],
            CredentialKey::Embedding => &["DELVE_EMBEDDING_API_KEY", "OPENAI_API_KEY"],
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CredentialKey::Tavily => "tavily",
            CredentialKey::GitHub => "github",
            CredentialKey::LanguageModel => "language_model",
            CredentialKey::Embedding => "embedding",
        };
        f.write_str(name)
    }
}

pub trait CredentialProvider: Send + Sync {
    fn credential(&self, key: CredentialKey) -> Option<String>;
}

/// Fixed set of credentials, mostly for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    values: HashMap<CredentialKey, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: CredentialKey, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn credential(&self, key: CredentialKey) -> Option<String> {
        self.values.get(&key).cloned()
    }
}

/// Reads credentials from environment variables on each lookup
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn credential(&self, key: CredentialKey) -> Option<String> {
        key.env_vars()
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_credentials_return_configured_keys() {
        let creds = StaticCredentials::new().with(CredentialKey::Tavily, "tvly-123");
        assert_eq!(creds.credential(CredentialKey::Tavily).as_deref(), Some("tvly-123"));
        assert!(creds.credential(CredentialKey::GitHub).is_none());
    }
}
