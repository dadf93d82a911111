//! Core data type definitions
//!
//! Wire-facing types serialize with camelCase field names; these names are a stable contract
//! for streaming consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DelveError, DelveResult, ErrorContext};

/// Raw research question, trimmed and validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
}

impl Query {
    /// Trim and validate a query. Empty or shorter than `min_chars` is a validation error.
    pub fn parse(raw: &str, min_chars: usize) -> DelveResult<Self> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(DelveError::Validation {
                message: "Query is empty".to_string(),
                field: Some("query".to_string()),
                context: ErrorContext::new("query").with_suggestion("Ask a specific question"),
            });
        }
        if text.chars().count() < min_chars {
            return Err(DelveError::Validation {
                message: format!("Query must be at least {} characters", min_chars),
                field: Some("query".to_string()),
                context: ErrorContext::new("query")
                    .with_suggestion("Add more detail to the question"),
            });
        }
        Ok(Self {
            text: text.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Research strategy, governing timeouts and fan-out for a query's complexity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Quick,
    Standard,
    Comprehensive,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Quick => "quick",
            Strategy::Standard => "standard",
            Strategy::Comprehensive => "comprehensive",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = DelveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(Strategy::Quick),
            "standard" => Ok(Strategy::Standard),
            "comprehensive" => Ok(Strategy::Comprehensive),
            other => Err(DelveError::Validation {
                message: format!("Unknown strategy '{}'", other),
                field: Some("strategy".to_string()),
                context: ErrorContext::new("strategy")
                    .with_suggestion("Use one of: quick, standard, comprehensive"),
            }),
        }
    }
}

/// Broad subject area of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryDomain {
    Programming,
    Academic,
    General,
}

/// Kind of provider a document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Web,
    Academic,
    Code,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Web => write!(f, "web"),
            SourceKind::Academic => write!(f, "academic"),
            SourceKind::Code => write!(f, "code"),
        }
    }
}

/// A normalized source document produced by a searcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    pub content: String,
    pub source_url: String,
    pub title: String,
    pub domain: String,
    pub relevance_score: f64,
    pub content_length: usize,
    pub kind: SourceKind,
}

impl SourceDocument {
    pub fn new(
        kind: SourceKind,
        title: impl Into<String>,
        source_url: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let source_url = source_url.into();
        let content = content.into();
        Self {
            domain: domain_of(&source_url),
            content_length: content.chars().count(),
            title: title.into(),
            relevance_score: 0.0,
            source_url,
            content,
            kind,
        }
    }

    /// Re-scored copy; content is never touched
    pub fn with_score(mut self, score: f64) -> Self {
        self.relevance_score = score;
        self
    }
}

/// Host of a URL without the `www.` prefix, lowercased
pub fn domain_of(source_url: &str) -> String {
    url::Url::parse(source_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| {
            source_url
                .split("//")
                .nth(1)
                .unwrap_or(source_url)
                .split('/')
                .next()
                .unwrap_or_default()
                .to_string()
        })
        .to_ascii_lowercase()
        .trim_start_matches("www.")
        .to_string()
}

/// Relevance tier of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relevance {
    High,
    Medium,
    Low,
}

impl Relevance {
    /// Case-insensitive parse, defaulting to `Medium`
    pub fn parse_lenient(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        if lowered.starts_with("high") {
            Relevance::High
        } else if lowered.starts_with("low") {
            Relevance::Low
        } else {
            Relevance::Medium
        }
    }
}

/// A single extracted fact or claim with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub title: String,
    pub content: String,
    pub source: String,
    pub relevance: Relevance,
    pub category: String,
}

/// A numeric data point extracted from the sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistic {
    pub metric: String,
    pub value: String,
    pub context: String,
    pub source: String,
}

impl Statistic {
    /// Maximum accepted length of a value
    pub const MAX_VALUE_LEN: usize = 100;

    /// A value must contain a digit, stay short, and not read like prose
    pub fn is_valid_value(value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() || value.chars().count() >= Self::MAX_VALUE_LEN {
            return false;
        }
        if !value.chars().any(|c| c.is_ascii_digit()) {
            return false;
        }
        value.split_whitespace().count() <= 12
    }
}

/// Where a code example came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeOrigin {
    /// Extracted verbatim from a source document
    Direct,
    /// Generated by the language model
    Generated,
    /// Templated skeleton
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExample {
    pub title: String,
    pub language: String,
    pub code: String,
    pub description: String,
    pub source: String,
    pub origin: CodeOrigin,
}

/// Pipeline stage reported to status consumers, in emission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchStage {
    Searching,
    Downloading,
    Processing,
    Analyzing,
    Complete,
}

impl ResearchStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResearchStage::Complete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
}

/// Ephemeral progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchStatus {
    pub stage: ResearchStage,
    pub message: String,
    pub progress: Progress,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchMetadata {
    pub sources_count: usize,
    pub confidence: f64,
    pub quality_score: f64,
    pub research_depth: Strategy,
    pub last_updated: DateTime<Utc>,
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Terminal artifact of one research call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResult {
    pub summary: String,
    pub findings: Vec<Finding>,
    pub statistics: Vec<Statistic>,
    pub code_examples: Vec<CodeExample>,
    pub suggested_questions: Vec<String>,
    pub metadata: ResearchMetadata,
}

impl ResearchResult {
    pub fn is_degraded(&self) -> bool {
        self.metadata.error
    }
}

/// Caller-supplied options for a research call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchOptions {
    #[serde(default)]
    pub strategy: Option<Strategy>,
}

impl ResearchOptions {
    pub fn with_strategy(strategy: Strategy) -> Self {
        Self {
            strategy: Some(strategy),
        }
    }
}

/// One line of the newline-delimited streaming protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamFrame {
    Status(ResearchStatus),
    Research(Box<ResearchResult>),
    Error(String),
}

impl StreamFrame {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamFrame::Status(_))
    }

    /// One JSON object followed by a newline
    pub fn to_ndjson_line(&self) -> DelveResult<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parse_trims_and_validates() {
        let query = Query::parse("  rust async  ", 2).unwrap();
        assert_eq!(query.as_str(), "rust async");
        assert_eq!(query.word_count(), 2);
        assert!(Query::parse("   ", 2).is_err());
        assert!(Query::parse("a", 2).is_err());
    }

    #[test]
    fn document_domain_is_derived_from_url() {
        let doc = SourceDocument::new(
            SourceKind::Web,
            "Docs",
            "https://WWW.Example.com/path",
            "content",
        );
        assert_eq!(doc.domain, "example.com");
        assert_eq!(doc.content_length, 7);
        let rescored = doc.clone().with_score(0.9);
        assert_eq!(rescored.content, doc.content);
        assert_eq!(rescored.relevance_score, 0.9);
    }

    #[test]
    fn statistic_values_need_digits() {
        assert!(Statistic::is_valid_value("42%"));
        assert!(Statistic::is_valid_value("$1.2 billion"));
        assert!(!Statistic::is_valid_value("significant growth"));
        assert!(!Statistic::is_valid_value(&"9".repeat(120)));
    }

    #[test]
    fn stream_frames_use_single_key_objects() {
        let frame = StreamFrame::Error("boom".to_string());
        assert_eq!(serde_json::to_string(&frame).unwrap(), r#"{"error":"boom"}"#);

        let status = StreamFrame::Status(ResearchStatus {
            stage: ResearchStage::Searching,
            message: "Searching".to_string(),
            progress: Progress {
                current: 1,
                total: 10,
            },
        });
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"]["stage"], "searching");
        assert_eq!(json["status"]["progress"]["current"], 1);
    }

    #[test]
    fn metadata_omits_error_flag_when_false() {
        let metadata = ResearchMetadata {
            sources_count: 3,
            confidence: 0.7,
            quality_score: 0.6,
            research_depth: Strategy::Quick,
            last_updated: Utc::now(),
            attempts: 1,
            elapsed_ms: 10,
            error: false,
            error_message: None,
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["sourcesCount"], 3);
        assert_eq!(json["researchDepth"], "quick");
    }
}
