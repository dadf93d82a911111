//! Configuration management
//!
//! Layers built-in defaults, an optional TOML file and `DELVE__*` environment variables.

use crate::error::{DelveError, DelveResult, ErrorContext};
use crate::logging::LoggingConfig;
use crate::types::Strategy;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix; nested keys use a double underscore,
/// e.g. `DELVE__RESEARCH__MAX_ATTEMPTS=3`.
pub const ENV_PREFIX: &str = "DELVE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelveConfig {
    pub research: ResearchConfig,
    pub strategies: StrategiesConfig,
    pub analysis: AnalysisConfig,
    pub processing: ProcessingConfig,
    pub search: SearchConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Attempts of the search-and-process cycle, including the first
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub retry_backoff_ms: u64,
    /// Queries shorter than this never reach the network
    pub min_query_chars: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_backoff_ms: 2000,
            min_query_chars: 2,
        }
    }
}

/// Per-strategy budgets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyBudgetConfig {
    pub search_timeout_ms: u64,
    pub processing_timeout_ms: u64,
    pub chunk_size: usize,
    pub max_documents: usize,
}

impl StrategyBudgetConfig {
    const fn new(search_timeout_ms: u64, processing_timeout_ms: u64, chunk_size: usize, max_documents: usize) -> Self {
        Self {
            search_timeout_ms,
            processing_timeout_ms,
            chunk_size,
            max_documents,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategiesConfig {
    pub quick: StrategyBudgetConfig,
    pub standard: StrategyBudgetConfig,
    pub comprehensive: StrategyBudgetConfig,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            quick: StrategyBudgetConfig::new(3000, 5000, 500, 5),
            standard: StrategyBudgetConfig::new(5000, 10000, 1000, 8),
            comprehensive: StrategyBudgetConfig::new(8000, 15000, 1500, 12),
        }
    }
}

impl StrategiesConfig {
    pub fn for_strategy(&self, strategy: Strategy) -> &StrategyBudgetConfig {
        match strategy {
            Strategy::Quick => &self.quick,
            Strategy::Standard => &self.standard,
            Strategy::Comprehensive => &self.comprehensive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub summary_timeout_ms: u64,
    pub findings_timeout_ms: u64,
    pub statistics_timeout_ms: u64,
    pub questions_timeout_ms: u64,
    pub code_timeout_ms: u64,
    /// Characters of each document or passage included in a prompt
    pub doc_char_budget: usize,
    pub max_findings: usize,
    pub max_statistics: usize,
    pub max_questions: usize,
    pub max_code_examples: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            summary_timeout_ms: 8000,
            findings_timeout_ms: 10000,
            statistics_timeout_ms: 10000,
            questions_timeout_ms: 8000,
            code_timeout_ms: 10000,
            doc_char_budget: 800,
            max_findings: 6,
            max_statistics: 8,
            max_questions: 5,
            max_code_examples: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub min_content_length: usize,
    pub max_content_length: usize,
    pub max_special_char_ratio: f64,
    /// Chunk overlap as a fraction of the chunk size
    pub overlap_ratio: f64,
    pub embedding_batch_size: usize,
    pub batch_retry_delay_ms: u64,
    /// Passages retrieved per ranked document
    pub top_k_multiplier: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            min_content_length: 100,
            max_content_length: 10000,
            max_special_char_ratio: 0.30,
            overlap_ratio: 0.15,
            embedding_batch_size: 16,
            batch_retry_delay_ms: 250,
            top_k_multiplier: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Query variants fanned out per provider, the original included
    pub max_query_variants: usize,
    pub user_agent: String,
    pub tavily: TavilyConfig,
    pub arxiv: ArxivConfig,
    pub github: GitHubConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_query_variants: 3,
            user_agent: format!("delve/{}", env!("CARGO_PKG_VERSION")),
            tavily: TavilyConfig::default(),
            arxiv: ArxivConfig::default(),
            github: GitHubConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TavilyConfig {
    pub base_url: String,
    pub max_results: usize,
    /// "basic" or "advanced"
    pub search_depth: String,
    pub request_timeout_ms: u64,
}

impl Default for TavilyConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tavily.com".to_string(),
            max_results: 5,
            search_depth: "advanced".to_string(),
            request_timeout_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArxivConfig {
    pub base_url: String,
    pub max_results: usize,
    /// Fraction of query terms a paper must mention
    pub min_term_overlap: f64,
    pub min_summary_chars: usize,
    pub request_timeout_ms: u64,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            base_url: "http://export.arxiv.org".to_string(),
            max_results: 10,
            min_term_overlap: 0.4,
            min_summary_chars: 100,
            request_timeout_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub base_url: String,
    pub max_results: usize,
    pub min_stars: u32,
    pub min_description_chars: usize,
    /// Top repositories whose README is downloaded
    pub readme_fetch_count: usize,
    pub request_timeout_ms: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            max_results: 10,
            min_stars: 10,
            min_description_chars: 20,
            readme_fetch_count: 3,
            request_timeout_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// openai, anthropic, ollama, groq or disabled
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.3,
            max_tokens: 1500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "hashing" (local), "openai" or "ollama"
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".to_string(),
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            dimensions: 256,
        }
    }
}

impl DelveConfig {
    /// `~/.delve/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".delve").join("config.toml"))
    }

    /// Load defaults, then the TOML file, then `DELVE__*` environment variables.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> DelveResult<Self> {
        let defaults = config::Config::try_from(&DelveConfig::default())
            .map_err(|e| load_error("Failed to seed default configuration", "defaults", e))?;

        let mut builder = config::Config::builder().add_source(defaults);

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(path) = Self::default_path() {
                    builder = builder.add_source(config::File::from(path).required(false));
                }
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: DelveConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| load_error("Failed to load configuration", "merge_sources", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Load a single TOML file without environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> DelveResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DelveError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: DelveConfig = toml::from_str(&content).map_err(|e| DelveError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> DelveResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| DelveError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path, content).map_err(|e| DelveError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    pub fn validate(&self) -> DelveResult<()> {
        if self.research.max_attempts == 0 {
            return Err(invalid("research.max_attempts must be at least 1", "research.max_attempts"));
        }

        for (name, budget) in [
            ("quick", &self.strategies.quick),
            ("standard", &self.strategies.standard),
            ("comprehensive", &self.strategies.comprehensive),
        ] {
            if budget.search_timeout_ms == 0 || budget.processing_timeout_ms == 0 {
                return Err(invalid(
                    &format!("strategies.{} timeouts must be greater than 0", name),
                    &format!("strategies.{}", name),
                ));
            }
            if budget.chunk_size == 0 || budget.max_documents == 0 {
                return Err(invalid(
                    &format!("strategies.{} chunk_size and max_documents must be greater than 0", name),
                    &format!("strategies.{}", name),
                ));
            }
        }

        if self.processing.min_content_length >= self.processing.max_content_length {
            return Err(invalid(
                "processing.min_content_length must be below max_content_length",
                "processing.min_content_length",
            ));
        }

        if !(0.0..0.5).contains(&self.processing.overlap_ratio) {
            return Err(invalid(
                "processing.overlap_ratio must be in [0, 0.5)",
                "processing.overlap_ratio",
            ));
        }

        if self.processing.embedding_batch_size == 0 {
            return Err(invalid(
                "processing.embedding_batch_size must be greater than 0",
                "processing.embedding_batch_size",
            ));
        }

        if self.embedding.dimensions == 0 {
            return Err(invalid("embedding.dimensions must be greater than 0", "embedding.dimensions"));
        }

        Ok(())
    }
}

fn load_error(message: &str, operation: &str, source: config::ConfigError) -> DelveError {
    DelveError::Config {
        message: format!("{}: {}", message, source),
        source: Some(Box::new(source)),
        context: ErrorContext::new("config")
            .with_operation(operation)
            .with_suggestion("Check TOML syntax and DELVE__* environment variables"),
    }
}

fn invalid(message: &str, field: &str) -> DelveError {
    DelveError::Config {
        message: message.to_string(),
        source: None,
        context: ErrorContext::new("config")
            .with_operation("validate")
            .with_metadata("field", field),
    }
}
