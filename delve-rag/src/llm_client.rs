//! LLM client integration using siumai
//!
//! Wraps a siumai client behind the [`LanguageModel`] trait so the analysis stages
//! can be driven by any supported provider, or by a stub in tests.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use siumai::prelude::*;
use tracing::{debug, info};

use delve_core::{
    CredentialKey, CredentialProvider, DelveError, DelveResult, ErrorContext, LanguageModel, LlmConfig,
};

/// Chat model backed by a siumai provider client
pub struct LlmChatModel {
    client: Box<dyn LlmClient>,
    config: LlmConfig,
}

impl LlmChatModel {
    pub async fn new(config: LlmConfig, credentials: &dyn CredentialProvider) -> DelveResult<Self> {
        let client = Self::build_client(&config, credentials).await?;

        info!(provider = %config.provider, model = %config.model, "Created LLM client");

        Ok(Self { client, config })
    }

    async fn build_client(config: &LlmConfig, credentials: &dyn CredentialProvider) -> DelveResult<Box<dyn LlmClient>> {
        let api_key = || {
            credentials
                .credential(CredentialKey::LanguageModel)
                .ok_or_else(|| missing_key(&config.provider))
        };

        match config.provider.as_str() {
            "openai" => {
                let client = LlmBuilder::new()
                    .openai()
                    .api_key(&api_key()?)
                    .model(&config.model)
                    .base_url(&config.base_url)
                    .temperature(config.temperature)
                    .max_tokens(config.max_tokens)
                    .build()
                    .await
                    .map_err(|e| build_error(config, e))?;
                Ok(Box::new(client))
            }
            "anthropic" => {
                let client = LlmBuilder::new()
                    .anthropic()
                    .api_key(&api_key()?)
                    .model(&config.model)
                    .temperature(config.temperature)
                    .max_tokens(config.max_tokens)
                    .build()
                    .await
                    .map_err(|e| build_error(config, e))?;
                Ok(Box::new(client))
            }
            "ollama" => {
                let client = LlmBuilder::new()
                    .ollama()
                    .model(&config.model)
                    .base_url(&config.base_url)
                    .temperature(config.temperature)
                    .max_tokens(config.max_tokens)
                    .build()
                    .await
                    .map_err(|e| build_error(config, e))?;
                Ok(Box::new(client))
            }
            "groq" => {
                let client = LlmBuilder::new()
                    .groq()
                    .api_key(&api_key()?)
                    .model(&config.model)
                    .temperature(config.temperature)
                    .max_tokens(config.max_tokens)
                    .build()
                    .await
                    .map_err(|e| build_error(config, e))?;
                Ok(Box::new(client))
            }
            provider => Err(DelveError::Config {
                message: format!("Unsupported LLM provider: {}", provider),
                source: None,
                context: ErrorContext::new("language_model")
                    .with_suggestion("Use openai, anthropic, ollama, groq or disabled"),
            }),
        }
    }
}

fn build_error(config: &LlmConfig, e: impl std::fmt::Display) -> DelveError {
    DelveError::llm(
        format!("Failed to build {} client: {}", config.provider, e),
        Some(&config.model),
    )
}

fn missing_key(provider: &str) -> DelveError {
    DelveError::Config {
        message: format!("No API key configured for LLM provider '{}'", provider),
        source: None,
        context: ErrorContext::new("language_model")
            .with_suggestion("Set DELVE_LLM_API_KEY")
            .with_suggestion("Or set llm.provider = \"disabled\" to use heuristic analysis only"),
    }
}

#[async_trait]
impl LanguageModel for LlmChatModel {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn invoke(&self, prompt: &str) -> DelveResult<String> {
        let start_time = Instant::now();
        debug!(model = %self.config.model, prompt_chars = prompt.len(), "Invoking language model");

        let response = self
            .client
            .chat(vec![user!(prompt)])
            .await
            .map_err(|e| DelveError::llm(format!("LLM generation failed: {}", e), Some(&self.config.model)))?;

        match response.content_text() {
            Some(content) => {
                debug!(
                    model = %self.config.model,
                    elapsed_ms = start_time.elapsed().as_millis() as u64,
                    chars = content.len(),
                    "Generated response"
                );
                Ok(content.to_string())
            }
            None => Err(DelveError::llm("No text content in LLM response", Some(&self.config.model))),
        }
    }
}

/// Model used when no provider is configured. Every call fails, so each analysis
/// pass falls back to its heuristic.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn invoke(&self, _prompt: &str) -> DelveResult<String> {
        Err(DelveError::llm("Language model is disabled", None))
    }
}

/// Build the language model named by the configuration
pub async fn create_language_model(
    config: &LlmConfig,
    credentials: &dyn CredentialProvider,
) -> DelveResult<Arc<dyn LanguageModel>> {
    if config.provider == "disabled" {
        info!("Language model disabled, analysis will use heuristics");
        return Ok(Arc::new(DisabledModel));
    }
    Ok(Arc::new(LlmChatModel::new(config.clone(), credentials).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::StaticCredentials;

    #[tokio::test]
    async fn disabled_model_always_fails() {
        let model = DisabledModel;
        assert_eq!(model.name(), "disabled");
        assert!(matches!(model.invoke("hi").await, Err(DelveError::Llm { .. })));
    }

    #[tokio::test]
    async fn disabled_provider_needs_no_credentials() {
        let config = LlmConfig {
            provider: "disabled".to_string(),
            ..LlmConfig::default()
        };
        let model = create_language_model(&config, &StaticCredentials::new()).await.unwrap();
        assert_eq!(model.name(), "disabled");
    }

    #[tokio::test]
    async fn missing_key_is_a_config_error() {
        let result = create_language_model(&LlmConfig::default(), &StaticCredentials::new()).await;
        assert!(matches!(result, Err(DelveError::Config { .. })));
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let config = LlmConfig {
            provider: "carrier-pigeon".to_string(),
            ..LlmConfig::default()
        };
        let creds = StaticCredentials::new().with(CredentialKey::LanguageModel, "k");
        assert!(create_language_model(&config, &creds).await.is_err());
    }
}
