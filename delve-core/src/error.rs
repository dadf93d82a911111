//! Unified error handling system
//!
//! Provides structured error types with context, recovery suggestions, and proper error chaining.
//! Errors never cross the `research()` boundary: the pipeline converts them into fallbacks,
//! but every stage below it reports failures through [`DelveError`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type DelveResult<T> = Result<T, DelveError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for the Delve pipeline
#[derive(Error, Debug)]
pub enum DelveError {
    #[error("Search provider '{provider}' failed: {message}")]
    Search {
        provider: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("LLM error: {message}")]
    Llm {
        message: String,
        model: Option<String>,
        context: ErrorContext,
    },

    #[error("Embedding error: {message}")]
    Embedding {
        message: String,
        provider: Option<String>,
        context: ErrorContext,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Operation timeout: {operation} after {duration_ms}ms")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after_ms: Option<u64>,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        context: ErrorContext,
    },

    #[error("Parse error: {message}")]
    Parse {
        message: String,
        context: ErrorContext,
    },

    #[error("No sources found for '{query}'")]
    NoSources {
        query: String,
        searched: Vec<String>,
        context: ErrorContext,
    },

    #[error("Operation cancelled: {operation}")]
    Cancelled {
        operation: String,
        context: ErrorContext,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DelveError {
    /// Timeout error for a named operation
    pub fn timeout(operation: &str, duration_ms: u64) -> Self {
        DelveError::Timeout {
            operation: operation.to_string(),
            duration_ms,
            context: ErrorContext::new("async_utils")
                .with_operation(operation)
                .with_metadata("timeout_ms", &duration_ms.to_string())
                .with_suggestion("Increase the stage budget for this strategy")
                .with_suggestion("Check provider availability"),
        }
    }

    /// LLM invocation failure
    pub fn llm<S: Into<String>>(message: S, model: Option<&str>) -> Self {
        DelveError::Llm {
            message: message.into(),
            model: model.map(str::to_string),
            context: ErrorContext::new("language_model"),
        }
    }

    /// Embedding failure
    pub fn embedding<S: Into<String>>(message: S, provider: Option<&str>) -> Self {
        DelveError::Embedding {
            message: message.into(),
            provider: provider.map(str::to_string),
            context: ErrorContext::new("embedding"),
        }
    }

    /// Network failure with the underlying transport error attached
    pub fn network<E>(message: &str, component: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DelveError::Network {
            message: format!("{}: {}", message, source),
            source: Some(Box::new(source)),
            context: ErrorContext::new(component),
        }
    }

    /// Every eligible searcher came back empty
    pub fn no_sources(query: &str, searched: Vec<String>) -> Self {
        DelveError::NoSources {
            query: query.to_string(),
            context: ErrorContext::new("orchestrator")
                .with_operation("search")
                .with_metadata("providers", &searched.join(","))
                .with_suggestion("Check search provider credentials")
                .with_suggestion("Rephrase the query with more specific terms"),
            searched,
        }
    }

    /// Whether the orchestrator should retry the search stage for this error
    pub fn is_no_sources(&self) -> bool {
        matches!(self, DelveError::NoSources { .. })
    }

    /// Cancellation of an in-flight operation
    pub fn cancelled(operation: &str) -> Self {
        DelveError::Cancelled {
            operation: operation.to_string(),
            context: ErrorContext::new("pipeline").with_operation(operation),
        }
    }

    /// Internal error without a source
    pub fn internal<S: Into<String>>(message: S) -> Self {
        DelveError::Internal {
            message: message.into(),
            source: None,
            context: ErrorContext::new("pipeline"),
        }
    }

    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            DelveError::Search { context, .. } => Some(context),
            DelveError::Llm { context, .. } => Some(context),
            DelveError::Embedding { context, .. } => Some(context),
            DelveError::Network { context, .. } => Some(context),
            DelveError::Timeout { context, .. } => Some(context),
            DelveError::RateLimit { context, .. } => Some(context),
            DelveError::Config { context, .. } => Some(context),
            DelveError::Validation { context, .. } => Some(context),
            DelveError::Parse { context, .. } => Some(context),
            DelveError::NoSources { context, .. } => Some(context),
            DelveError::Cancelled { context, .. } => Some(context),
            DelveError::Internal { context, .. } => Some(context),
            DelveError::Io(_) | DelveError::Serialization(_) => None,
        }
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DelveError::Network { .. } | DelveError::Timeout { .. } | DelveError::RateLimit { .. }
        )
    }

    /// Get retry delay in milliseconds for recoverable errors
    pub fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            DelveError::Network { .. } => Some(1000),
            DelveError::Timeout { .. } => Some(2000),
            DelveError::RateLimit { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        let error_id = self.context().map(|c| c.error_id.as_str());
        match self {
            DelveError::Internal { .. } => {
                error!(error_id = ?error_id, error = %self, "Internal error occurred");
            }
            DelveError::Config { .. } | DelveError::Validation { .. } => {
                error!(error_id = ?error_id, error = %self, "Configuration or validation error");
            }
            DelveError::Network { .. }
            | DelveError::Timeout { .. }
            | DelveError::RateLimit { .. }
            | DelveError::Search { .. }
            | DelveError::Llm { .. }
            | DelveError::Embedding { .. }
            | DelveError::Parse { .. }
            | DelveError::NoSources { .. } => {
                warn!(error_id = ?error_id, error = %self, "Recoverable error, falling back");
            }
            DelveError::Cancelled { .. } => {
                tracing::debug!(error_id = ?error_id, error = %self, "Operation cancelled");
            }
            _ => {
                error!(error_id = ?error_id, error = %self, "Error occurred");
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! search_error {
    ($provider:expr, $msg:expr) => {
        $crate::DelveError::Search {
            provider: $provider.to_string(),
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new("search").with_operation("search"),
        }
    };
    ($provider:expr, $msg:expr, $source:expr) => {
        $crate::DelveError::Search {
            provider: $provider.to_string(),
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new("search").with_operation("search"),
        }
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::DelveError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'delve config --init' to create a default config"),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::DelveError::Config {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file"),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr, $field:expr, $component:expr) => {
        $crate::DelveError::Validation {
            message: $msg.to_string(),
            field: Some($field.to_string()),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check the field value and format"),
        }
    };
}
