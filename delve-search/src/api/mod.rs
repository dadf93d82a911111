//! API clients for the external search providers
//!
//! Each client wraps one search API and implements [`delve_core::SearchProvider`].

use delve_core::{DelveError, DelveResult, ErrorContext};
use std::collections::HashMap;
use std::time::Duration;

pub mod arxiv;
pub mod github;
pub mod tavily;

pub use arxiv::ArxivSearcher;
pub use github::GitHubSearcher;
pub use tavily::{TavilyError, TavilySearcher};

/// Configuration for the HTTP client of one provider
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-request timeout
    pub timeout_ms: u64,
    pub user_agent: String,
    /// Additional default headers
    pub headers: HashMap<String, String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 8000,
            user_agent: format!("delve/{}", env!("CARGO_PKG_VERSION")),
            headers: HashMap::new(),
        }
    }
}

impl HttpClientConfig {
    pub fn new(user_agent: &str, timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            user_agent: user_agent.to_string(),
            headers: HashMap::new(),
        }
    }

    /// Set additional header
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }
}

/// Helper function to create HTTP client with common configuration
pub fn create_http_client(config: &HttpClientConfig) -> DelveResult<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();

    headers.insert(
        reqwest::header::USER_AGENT,
        reqwest::header::HeaderValue::from_str(&config.user_agent).map_err(|e| DelveError::Config {
            message: format!("Invalid user agent: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })?,
    );

    for (key, value) in &config.headers {
        let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            DelveError::Config {
                message: format!("Invalid header name '{}': {}", key, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            }
        })?;

        let header_value =
            reqwest::header::HeaderValue::from_str(value).map_err(|e| DelveError::Config {
                message: format!("Invalid header value for '{}': {}", key, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            })?;

        headers.insert(header_name, header_value);
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .default_headers(headers)
        .build()
        .map_err(|e| DelveError::network("Failed to create HTTP client", "http_client", e))?;

    Ok(client)
}

/// Helper function to turn a non-success HTTP response into an error
pub async fn handle_response_error(
    response: reqwest::Response,
    provider: &str,
    operation: &str,
) -> DelveError {
    let status = response.status();
    let url = response.url().clone();
    let retry_after_ms = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(|secs| secs * 1000);

    let error_body = response.text().await.unwrap_or_default();
    let detail = if error_body.is_empty() {
        status.canonical_reason().unwrap_or("Unknown error").to_string()
    } else {
        error_body.chars().take(300).collect()
    };

    let context = ErrorContext::new(provider)
        .with_operation(operation)
        .with_metadata("status", &status.as_u16().to_string())
        .with_suggestion(match status.as_u16() {
            401 => "Check your API key",
            403 => "Check permissions or rate limits",
            404 => "Check the provider base URL",
            429 => "Slow down or raise the provider quota",
            _ => "Check network connectivity and API status",
        });

    if status.as_u16() == 429 {
        return DelveError::RateLimit {
            message: format!("{} rate limited at {}", provider, url),
            retry_after_ms,
            context,
        };
    }

    DelveError::Search {
        provider: provider.to_string(),
        message: format!("HTTP {} error for {}: {}", status.as_u16(), url, detail),
        source: None,
        context,
    }
}

/// Collapse runs of whitespace, as found in feed text and README files
pub(crate) fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to `max` characters on a char boundary
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}
