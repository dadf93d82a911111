//! GitHub repository search
//!
//! Searches repositories with language and star qualifiers, keeps well-described
//! popular ones and downloads the README of the top hits as document content.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use delve_core::{
    settle_all, CredentialKey, CredentialProvider, DelveError, DelveResult, GitHubConfig,
    SearchConfig, SearchProvider, SourceDocument, SourceKind,
};

use super::{create_http_client, handle_response_error, truncate_chars, HttpClientConfig};
use crate::planner::{guess_language, query_terms, rank_and_dedupe, term_overlap};

const API_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";

/// README text kept per repository
const MAX_README_CHARS: usize = 6000;

/// Words that describe what the user wants rather than what the code does
const GENERIC_TERMS: &[&str] = &[
    "tutorial", "example", "examples", "guide", "learn", "beginner", "beginners", "implement",
    "implementation", "code", "write", "best", "practices",
];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Repository>,
}

#[derive(Debug, Clone, Deserialize)]
struct Repository {
    full_name: String,
    html_url: String,
    description: Option<String>,
    #[serde(default)]
    stargazers_count: u32,
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
}

/// GitHub's qualifier spelling for a guessed language
fn qualifier_language(language: &str) -> &str {
    match language {
        "cpp" => "c++",
        "csharp" => "c#",
        other => other,
    }
}

/// Search terms plus `language:` and `stars:>=` qualifiers
pub fn enhance_query(query: &str, min_stars: u32) -> String {
    let language = guess_language(query);
    let terms: Vec<String> = query_terms(query)
        .into_iter()
        .filter(|term| !GENERIC_TERMS.contains(&term.as_str()))
        .filter(|term| !matches!(language, Some(lang) if term == lang || term == qualifier_language(lang)))
        .take(5)
        .collect();

    let mut parts = if terms.is_empty() {
        vec![query.trim().to_string()]
    } else {
        terms
    };
    if let Some(language) = language {
        parts.push(format!("language:{}", qualifier_language(language)));
    }
    parts.push(format!("stars:>={}", min_stars));
    parts.join(" ")
}

pub struct GitHubSearcher {
    client: reqwest::Client,
    config: GitHubConfig,
    token: Option<String>,
}

impl GitHubSearcher {
    pub fn new(search: &SearchConfig, credentials: &dyn CredentialProvider) -> DelveResult<Self> {
        let client = create_http_client(
            &HttpClientConfig::new(&search.user_agent, search.github.request_timeout_ms)
                .with_header("X-GitHub-Api-Version", "2022-11-28"),
        )?;

        info!(base_url = %search.github.base_url, "Created GitHub searcher");

        Ok(Self {
            client,
            config: search.github.clone(),
            token: credentials.credential(CredentialKey::GitHub),
        })
    }

    fn get(&self, endpoint: &str, accept: &str) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        let request = self.client.get(url).header(reqwest::header::ACCEPT, accept);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn search_repositories(&self, q: &str) -> DelveResult<Vec<Repository>> {
        let per_page = self.config.max_results.to_string();
        let response = self
            .get("search/repositories", API_MEDIA_TYPE)
            .query(&[("q", q), ("sort", "stars"), ("order", "desc"), ("per_page", per_page.as_str())])
            .send()
            .await
            .map_err(|e| DelveError::network("Failed to reach GitHub", "github", e))?;

        if !response.status().is_success() {
            return Err(handle_response_error(response, "github", "search_repositories").await);
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| DelveError::network("Failed to decode GitHub search response", "github", e))?;
        Ok(body.items)
    }

    async fn fetch_readme(&self, full_name: &str) -> DelveResult<String> {
        let response = self
            .get(&format!("repos/{}/readme", full_name), RAW_MEDIA_TYPE)
            .send()
            .await
            .map_err(|e| DelveError::network("Failed to fetch README", "github", e))?;

        if !response.status().is_success() {
            return Err(handle_response_error(response, "github", "fetch_readme").await);
        }

        response
            .text()
            .await
            .map_err(|e| DelveError::network("Failed to read README", "github", e))
    }

    fn is_notable(&self, repo: &Repository) -> bool {
        let description_len = repo
            .description
            .as_deref()
            .map(|d| d.trim().chars().count())
            .unwrap_or(0);
        repo.stargazers_count >= self.config.min_stars
            && description_len >= self.config.min_description_chars
    }
}

/// Provider score: popularity (log scale) blended with query coverage
fn repository_score(terms: &[String], repo: &Repository) -> f64 {
    let popularity = ((repo.stargazers_count as f64 + 1.0).ln() / 100_000f64.ln()).min(1.0);
    let text = format!(
        "{} {} {}",
        repo.full_name,
        repo.description.as_deref().unwrap_or_default(),
        repo.topics.join(" ")
    );
    0.5 * popularity + 0.5 * term_overlap(terms, &text)
}

fn to_document(repo: &Repository, readme: Option<String>, score: f64) -> SourceDocument {
    let mut content = format!(
        "{}\n\nStars: {}",
        repo.description.as_deref().unwrap_or_default().trim(),
        repo.stargazers_count
    );
    if let Some(language) = &repo.language {
        content.push_str(&format!("\nLanguage: {}", language));
    }
    if !repo.topics.is_empty() {
        content.push_str(&format!("\nTopics: {}", repo.topics.join(", ")));
    }
    if let Some(readme) = readme {
        content.push_str("\n\n");
        content.push_str(&truncate_chars(readme.trim(), MAX_README_CHARS));
    }

    SourceDocument::new(SourceKind::Code, repo.full_name.clone(), repo.html_url.clone(), content)
        .with_score(score)
}

#[async_trait]
impl SearchProvider for GitHubSearcher {
    fn name(&self) -> &str {
        "github"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Code
    }

    async fn search(&self, query: &str) -> Vec<SourceDocument> {
        let q = enhance_query(query, self.config.min_stars);
        debug!(provider = "github", q = %q, "GitHub request");

        let repositories = match self.search_repositories(&q).await {
            Ok(repositories) => repositories,
            Err(e) => {
                warn!(provider = "github", error = %e, "GitHub search failed");
                return Vec::new();
            }
        };

        let total = repositories.len();
        let notable: Vec<Repository> = repositories
            .into_iter()
            .filter(|repo| self.is_notable(repo))
            .collect();

        let readme_count = self.config.readme_fetch_count.min(notable.len());
        let readmes = settle_all(
            notable[..readme_count]
                .iter()
                .map(|repo| self.fetch_readme(&repo.full_name)),
        )
        .await;

        let terms = query_terms(query);
        let mut documents = Vec::with_capacity(notable.len());
        for (index, repo) in notable.iter().enumerate() {
            let readme = match readmes.get(index) {
                Some(Ok(text)) => Some(text.clone()),
                Some(Err(e)) => {
                    debug!(provider = "github", repo = %repo.full_name, error = %e, "README unavailable");
                    None
                }
                None => None,
            };
            documents.push(to_document(repo, readme, repository_score(&terms, repo)));
        }

        let ranked = rank_and_dedupe(query, documents, self.config.max_results);
        info!(
            provider = "github",
            fetched = total,
            accepted = ranked.len(),
            readmes = readme_count,
            "Code search completed"
        );
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enhanced_query_adds_qualifiers() {
        assert_eq!(
            enhance_query("quicksort in python", 10),
            "quicksort language:python stars:>=10"
        );
        assert_eq!(
            enhance_query("React hooks tutorial", 50),
            "react hooks language:javascript stars:>=50"
        );
        assert_eq!(enhance_query("c++ template tutorial", 10), "template language:c++ stars:>=10");
    }

    #[test]
    fn unpopular_or_undescribed_repositories_are_dropped() {
        let searcher = GitHubSearcher::new(&SearchConfig::default(), &delve_core::StaticCredentials::new()).unwrap();
        let repo = |stars: u32, description: Option<&str>| Repository {
            full_name: "owner/repo".to_string(),
            html_url: "https://github.com/owner/repo".to_string(),
            description: description.map(str::to_string),
            stargazers_count: stars,
            language: None,
            topics: Vec::new(),
        };
        assert!(searcher.is_notable(&repo(500, Some("A well documented sorting algorithms collection"))));
        assert!(!searcher.is_notable(&repo(2, Some("A well documented sorting algorithms collection"))));
        assert!(!searcher.is_notable(&repo(500, Some("wip"))));
        assert!(!searcher.is_notable(&repo(500, None)));
    }
}
