//! Tavily web search
//!
//! Fans the query out into paraphrased variants, plus one allow-listed request for
//! programming and academic queries, and merges whatever comes back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use delve_core::{
    settle_all, CredentialKey, CredentialProvider, DelveError, DelveResult, ErrorContext,
    SearchConfig, SearchProvider, SourceDocument, SourceKind, TavilyConfig,
};

use super::{create_http_client, HttpClientConfig};
use crate::planner::{allowed_domains, detect_domain, generate_query_variants, rank_and_dedupe};

/// Results shorter than this are navigation snippets, not content
const MIN_SNIPPET_CHARS: usize = 40;

/// Typed errors for the Tavily API
#[derive(Debug, thiserror::Error)]
pub enum TavilyError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized - check API key")]
    Unauthorized,

    #[error("Rate limited - too many requests")]
    RateLimited,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("HTTP error ({0}): {1}")]
    HttpError(u16, String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl TavilyError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TavilyError::Timeout
                | TavilyError::Connection(_)
                | TavilyError::RateLimited
                | TavilyError::ServerError(_, _)
        )
    }
}

impl From<TavilyError> for DelveError {
    fn from(e: TavilyError) -> Self {
        let context = ErrorContext::new("tavily").with_operation("search");
        match e {
            TavilyError::Timeout => DelveError::Timeout {
                operation: "tavily_search".to_string(),
                duration_ms: 0,
                context,
            },
            TavilyError::RateLimited => DelveError::RateLimit {
                message: TavilyError::RateLimited.to_string(),
                retry_after_ms: None,
                context,
            },
            other => delve_core::search_error!("tavily", other.to_string(), other),
        }
    }
}

/// Request body for the Tavily search endpoint
#[derive(Debug, Clone, Serialize)]
struct TavilyRequest {
    query: String,
    max_results: usize,
    search_depth: String,
    include_answer: bool,
    include_raw_content: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_domains: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
}

pub struct TavilySearcher {
    client: reqwest::Client,
    config: TavilyConfig,
    api_key: Option<String>,
    max_variants: usize,
}

impl TavilySearcher {
    pub fn new(search: &SearchConfig, credentials: &dyn CredentialProvider) -> DelveResult<Self> {
        let client = create_http_client(&HttpClientConfig::new(
            &search.user_agent,
            search.tavily.request_timeout_ms,
        ))?;

        info!(base_url = %search.tavily.base_url, "Created Tavily searcher");

        Ok(Self {
            client,
            config: search.tavily.clone(),
            api_key: credentials.credential(CredentialKey::Tavily),
            max_variants: search.max_query_variants.max(1),
        })
    }

    /// Request bodies issued for one query: every variant, then the allow-listed request
    fn build_requests(&self, query: &str) -> Vec<TavilyRequest> {
        let base = TavilyRequest {
            query: String::new(),
            max_results: self.config.max_results,
            search_depth: self.config.search_depth.clone(),
            include_answer: false,
            include_raw_content: false,
            include_domains: None,
        };

        let mut requests: Vec<TavilyRequest> = generate_query_variants(query, self.max_variants)
            .into_iter()
            .map(|variant| TavilyRequest {
                query: variant,
                ..base.clone()
            })
            .collect();

        let domains = allowed_domains(detect_domain(query));
        if !domains.is_empty() {
            requests.push(TavilyRequest {
                query: query.trim().to_string(),
                include_domains: Some(domains.iter().map(|d| d.to_string()).collect()),
                ..base
            });
        }

        requests
    }

    async fn execute(&self, api_key: &str, request: &TavilyRequest) -> Result<TavilyResponse, TavilyError> {
        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));

        debug!(query = %request.query, allow_listed = request.include_domains.is_some(), "Tavily request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TavilyError::Timeout
                } else if e.is_connect() {
                    TavilyError::Connection(e.to_string())
                } else {
                    TavilyError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status.is_success() {
            return response
                .json::<TavilyResponse>()
                .await
                .map_err(|e| TavilyError::ParseError(e.to_string()));
        }

        let error_text = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 | 403 => Err(TavilyError::Unauthorized),
            429 => Err(TavilyError::RateLimited),
            400 => Err(TavilyError::BadRequest(error_text)),
            500..=599 => Err(TavilyError::ServerError(status.as_u16(), error_text)),
            code => Err(TavilyError::HttpError(code, error_text)),
        }
    }
}

fn to_document(result: TavilyResult) -> Option<SourceDocument> {
    let content = result.content.trim();
    if content.chars().count() < MIN_SNIPPET_CHARS || result.url.trim().is_empty() {
        return None;
    }
    let title = if result.title.trim().is_empty() {
        result.url.clone()
    } else {
        result.title.trim().to_string()
    };
    Some(SourceDocument::new(SourceKind::Web, title, result.url.trim(), content).with_score(result.score))
}

#[async_trait]
impl SearchProvider for TavilySearcher {
    fn name(&self) -> &str {
        "tavily"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Web
    }

    async fn search(&self, query: &str) -> Vec<SourceDocument> {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!(provider = "tavily", "No Tavily API key configured, skipping web search");
            return Vec::new();
        };

        let requests = self.build_requests(query);
        let outcomes = settle_all(requests.iter().map(|request| self.execute(api_key, request))).await;

        let mut documents = Vec::new();
        let mut failures = 0;
        for (request, outcome) in requests.iter().zip(outcomes) {
            match outcome {
                Ok(response) => documents.extend(response.results.into_iter().filter_map(to_document)),
                Err(e) => {
                    failures += 1;
                    warn!(
                        provider = "tavily",
                        query = %request.query,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Tavily request failed"
                    );
                }
            }
        }

        let ranked = rank_and_dedupe(query, documents, self.config.max_results * 2);
        info!(
            provider = "tavily",
            requests = requests.len(),
            failures,
            documents = ranked.len(),
            "Web search completed"
        );
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::StaticCredentials;

    fn searcher() -> TavilySearcher {
        let creds = StaticCredentials::new().with(CredentialKey::Tavily, "tvly-test");
        TavilySearcher::new(&SearchConfig::default(), &creds).unwrap()
    }

    #[test]
    fn programming_queries_add_allow_listed_request() {
        let requests = searcher().build_requests("React hooks tutorial");
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[0].query, "React hooks tutorial");
        assert!(requests[..3].iter().all(|r| r.include_domains.is_none()));
        let allow_listed = requests[3].include_domains.as_ref().unwrap();
        assert!(allow_listed.iter().any(|d| d == "stackoverflow.com"));
    }

    #[test]
    fn general_queries_only_use_variants() {
        let requests = searcher().build_requests("best pizza in Naples");
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.include_domains.is_none()));
    }

    #[test]
    fn short_snippets_are_dropped() {
        let result = TavilyResult {
            title: "Home".to_string(),
            url: "https://example.com".to_string(),
            content: "Click here".to_string(),
            score: 0.9,
        };
        assert!(to_document(result).is_none());
    }

    #[test]
    fn retryable_errors() {
        assert!(TavilyError::RateLimited.is_retryable());
        assert!(TavilyError::ServerError(503, String::new()).is_retryable());
        assert!(!TavilyError::Unauthorized.is_retryable());
    }
}
