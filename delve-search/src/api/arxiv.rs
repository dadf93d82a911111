//! arXiv academic search
//!
//! Queries the arXiv Atom API with category filters derived from topic keywords
//! and keeps only papers that cover enough of the query.

use async_trait::async_trait;
use quick_xml::events::Event;
use tracing::{debug, info, warn};

use delve_core::{
    ArxivConfig, DelveError, DelveResult, ErrorContext, SearchConfig, SearchProvider,
    SourceDocument, SourceKind,
};

use super::{create_http_client, handle_response_error, squash_whitespace, HttpClientConfig};
use crate::planner::{query_terms, rank_and_dedupe, term_overlap};

/// Query terms included in the `search_query` expression
const MAX_QUERY_TERMS: usize = 4;

/// Topic keywords and the arXiv category they select
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("cs.LG", &["learning", "neural", "training", "reinforcement", "gradient", "deep"]),
    ("cs.AI", &["ai", "agent", "agents", "reasoning", "planning", "intelligence"]),
    ("cs.CL", &["language", "nlp", "llm", "llms", "transformer", "translation", "text"]),
    ("cs.CV", &["vision", "image", "images", "video", "detection", "segmentation"]),
    ("cs.CR", &["cryptography", "security", "privacy", "encryption"]),
    ("cs.RO", &["robot", "robots", "robotics"]),
    ("q-bio", &["protein", "genome", "gene", "genes", "cell", "biology", "dna"]),
    ("quant-ph", &["quantum", "qubit", "qubits", "entanglement"]),
    ("astro-ph", &["galaxy", "galaxies", "astrophysics", "cosmology", "stellar"]),
    ("stat.ML", &["bayesian", "inference", "statistical"]),
];

/// One `<entry>` of the Atom feed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArxivEntry {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub authors: Vec<String>,
    pub published: String,
    pub link: Option<String>,
}

impl ArxivEntry {
    fn url(&self) -> &str {
        self.link.as_deref().unwrap_or(&self.id)
    }
}

/// arXiv categories matching the topic keywords of a query
pub fn categories_for(query: &str) -> Vec<&'static str> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .collect();
    CATEGORY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| tokens.iter().any(|t| t == k)))
        .map(|(category, _)| *category)
        .collect()
}

/// `search_query` expression: query terms joined with AND, then an OR of matching categories
pub fn enhance_query(query: &str) -> String {
    let terms = query_terms(query);
    let mut expression = if terms.is_empty() {
        format!("all:\"{}\"", query.trim())
    } else {
        terms
            .iter()
            .take(MAX_QUERY_TERMS)
            .map(|term| format!("all:{}", term))
            .collect::<Vec<_>>()
            .join(" AND ")
    };

    let categories = categories_for(query);
    if !categories.is_empty() {
        let filter = categories
            .iter()
            .map(|category| format!("cat:{}", category))
            .collect::<Vec<_>>()
            .join(" OR ");
        expression = format!("({}) AND ({})", expression, filter);
    }
    expression
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
}

/// Parse the entries of an arXiv Atom feed
pub fn parse_atom_feed(xml: &str) -> DelveResult<Vec<ArxivEntry>> {
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<ArxivEntry> = None;
    let mut field = Field::None;
    let mut in_author = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"entry" => current = Some(ArxivEntry::default()),
                b"author" => in_author = true,
                b"id" if current.is_some() => field = Field::Id,
                b"title" if current.is_some() => field = Field::Title,
                b"summary" if current.is_some() => field = Field::Summary,
                b"published" if current.is_some() => field = Field::Published,
                b"name" if current.is_some() && in_author => field = Field::AuthorName,
                _ => field = Field::None,
            },
            Ok(Event::Empty(e)) => {
                if let (Some(entry), b"link") = (current.as_mut(), e.local_name().as_ref()) {
                    let mut href = None;
                    let mut alternate = false;
                    for attr in e.attributes().flatten() {
                        let value = attr.unescape_value().unwrap_or_default().into_owned();
                        match attr.key.local_name().as_ref() {
                            b"href" => href = Some(value),
                            b"rel" => alternate = value == "alternate",
                            _ => {}
                        }
                    }
                    if alternate && entry.link.is_none() {
                        entry.link = href;
                    }
                }
            }
            Ok(Event::Text(te)) => {
                if let Some(entry) = current.as_mut() {
                    let text = te.unescape().unwrap_or_default();
                    match field {
                        Field::Id => entry.id.push_str(&text),
                        Field::Title => entry.title.push_str(&text),
                        Field::Summary => entry.summary.push_str(&text),
                        Field::Published => entry.published.push_str(&text),
                        Field::AuthorName => entry.authors.push(text.trim().to_string()),
                        Field::None => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"entry" => {
                        if let Some(mut entry) = current.take() {
                            entry.title = squash_whitespace(&entry.title);
                            entry.summary = squash_whitespace(&entry.summary);
                            entries.push(entry);
                        }
                    }
                    b"author" => in_author = false,
                    _ => {}
                }
                field = Field::None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DelveError::Parse {
                    message: format!("Invalid Atom feed: {}", e),
                    context: ErrorContext::new("arxiv").with_operation("parse_atom_feed"),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

pub struct ArxivSearcher {
    client: reqwest::Client,
    config: ArxivConfig,
}

impl ArxivSearcher {
    pub fn new(search: &SearchConfig) -> DelveResult<Self> {
        let client = create_http_client(&HttpClientConfig::new(
            &search.user_agent,
            search.arxiv.request_timeout_ms,
        ))?;

        info!(base_url = %search.arxiv.base_url, "Created arXiv searcher");

        Ok(Self {
            client,
            config: search.arxiv.clone(),
        })
    }

    async fn fetch(&self, search_query: &str) -> DelveResult<Vec<ArxivEntry>> {
        let url = format!("{}/api/query", self.config.base_url.trim_end_matches('/'));
        let max_results = self.config.max_results.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("search_query", search_query),
                ("start", "0"),
                ("max_results", max_results.as_str()),
                ("sortBy", "relevance"),
                ("sortOrder", "descending"),
            ])
            .send()
            .await
            .map_err(|e| DelveError::network("Failed to reach arXiv", "arxiv", e))?;

        if !response.status().is_success() {
            return Err(handle_response_error(response, "arxiv", "arxiv_query").await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| DelveError::network("Failed to read arXiv response", "arxiv", e))?;

        parse_atom_feed(&body)
    }

    /// Keep papers with a real abstract that cover enough of the query
    fn accept(&self, terms: &[String], entry: &ArxivEntry) -> Option<f64> {
        if entry.summary.chars().count() < self.config.min_summary_chars {
            return None;
        }
        let overlap = term_overlap(terms, &format!("{} {}", entry.title, entry.summary));
        (overlap >= self.config.min_term_overlap).then_some(overlap)
    }
}

fn to_document(entry: &ArxivEntry, score: f64) -> SourceDocument {
    let mut content = String::new();
    if !entry.authors.is_empty() {
        content.push_str(&format!("Authors: {}\n", entry.authors.join(", ")));
    }
    if !entry.published.is_empty() {
        content.push_str(&format!("Published: {}\n", entry.published.trim()));
    }
    content.push('\n');
    content.push_str(&entry.summary);

    SourceDocument::new(SourceKind::Academic, entry.title.clone(), entry.url(), content).with_score(score)
}

#[async_trait]
impl SearchProvider for ArxivSearcher {
    fn name(&self) -> &str {
        "arxiv"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Academic
    }

    async fn search(&self, query: &str) -> Vec<SourceDocument> {
        let search_query = enhance_query(query);
        debug!(provider = "arxiv", search_query = %search_query, "arXiv request");

        let entries = match self.fetch(&search_query).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(provider = "arxiv", error = %e, "arXiv search failed");
                return Vec::new();
            }
        };

        let terms = query_terms(query);
        let total = entries.len();
        let documents: Vec<SourceDocument> = entries
            .iter()
            .filter_map(|entry| self.accept(&terms, entry).map(|score| to_document(entry, score)))
            .collect();

        let ranked = rank_and_dedupe(query, documents, self.config.max_results);
        info!(
            provider = "arxiv",
            fetched = total,
            accepted = ranked.len(),
            "Academic search completed"
        );
        ranked
    }
}
