//! Searchers against mocked provider APIs

use delve_core::{CredentialKey, SearchConfig, SearchProvider, SourceKind, StaticCredentials};
use delve_search::{normalize_url, ArxivSearcher, GitHubSearcher, TavilySearcher};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> SearchConfig {
    let mut config = SearchConfig::default();
    config.tavily.base_url = server.uri();
    config.arxiv.base_url = server.uri();
    config.github.base_url = server.uri();
    config.tavily.request_timeout_ms = 2000;
    config.arxiv.request_timeout_ms = 2000;
    config.github.request_timeout_ms = 2000;
    config
}

fn tavily_credentials() -> StaticCredentials {
    StaticCredentials::new().with(CredentialKey::Tavily, "tvly-test")
}

#[tokio::test]
async fn tavily_merges_variants_and_dedupes_urls() {
    let server = MockServer::start().await;
    let body = "Quicksort picks a pivot and partitions the list around it, recursing on both halves.";

    Mock::given(method("POST"))
        .and(path("/search"))
        .and(header("authorization", "Bearer tvly-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"title": "Quicksort in Python", "url": "https://Example.com/quicksort/", "content": body, "score": 0.8},
                {"title": "Quicksort in Python", "url": "https://example.com/quicksort", "content": body, "score": 0.6},
                {"title": "Home", "url": "https://example.com/", "content": "Click here", "score": 0.9}
            ]
        })))
        .expect(4)
        .mount(&server)
        .await;

    let searcher = TavilySearcher::new(&config_for(&server), &tavily_credentials()).unwrap();
    let documents = searcher.search("quicksort in python").await;

    assert_eq!(documents.len(), 1);
    assert_eq!(normalize_url(&documents[0].source_url), "example.com/quicksort");
    assert_eq!(documents[0].kind, SourceKind::Web);
    assert_eq!(documents[0].domain, "example.com");
}

#[tokio::test]
async fn tavily_without_key_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(0)
        .mount(&server)
        .await;

    let searcher = TavilySearcher::new(&config_for(&server), &StaticCredentials::new()).unwrap();
    assert!(searcher.search("rust async runtimes").await.is_empty());
}

#[tokio::test]
async fn tavily_server_errors_yield_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let searcher = TavilySearcher::new(&config_for(&server), &tavily_credentials()).unwrap();
    assert!(searcher.search("history of the printing press").await.is_empty());
}

#[tokio::test]
async fn arxiv_filters_by_overlap_and_summary_length() {
    let server = MockServer::start().await;
    let long_summary = "Surface codes protect logical qubits; we study quantum error correction \
        thresholds under circuit-level noise and show improved decoding performance \
        across a range of physical error rates.";
    let feed = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2101.00001v1</id>
    <published>2021-01-01T00:00:00Z</published>
    <title>Quantum Error Correction Thresholds</title>
    <summary>{}</summary>
    <author><name>Ada Lovelace</name></author>
    <link href="http://arxiv.org/abs/2101.00001v1" rel="alternate" type="text/html"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2101.00002v1</id>
    <title>Quantum Error Correction Note</title>
    <summary>Short note.</summary>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2101.00003v1</id>
    <title>Galaxy Rotation Curves</title>
    <summary>{}</summary>
  </entry>
</feed>"#,
        long_summary,
        "Dark matter halos explain the flat rotation curves observed in spiral galaxies across many surveys and simulations of structure formation."
    );

    Mock::given(method("GET"))
        .and(path("/api/query"))
        .and(query_param("max_results", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed))
        .expect(1)
        .mount(&server)
        .await;

    let searcher = ArxivSearcher::new(&config_for(&server)).unwrap();
    let documents = searcher.search("quantum error correction").await;

    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].title, "Quantum Error Correction Thresholds");
    assert_eq!(documents[0].kind, SourceKind::Academic);
    assert!(documents[0].content.contains("Ada Lovelace"));
}

#[tokio::test]
async fn github_keeps_notable_repositories_and_fetches_readmes() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", "quicksort language:python stars:>=10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {
                    "full_name": "algos/python-sorting",
                    "html_url": "https://github.com/algos/python-sorting",
                    "description": "Sorting algorithms including quicksort implemented in Python",
                    "stargazers_count": 1200,
                    "language": "Python",
                    "topics": ["sorting", "quicksort"]
                },
                {
                    "full_name": "someone/tiny",
                    "html_url": "https://github.com/someone/tiny",
                    "description": "Quicksort experiment with barely any stars at all",
                    "stargazers_count": 1,
                    "language": "Python"
                },
                {
                    "full_name": "someone/undocumented",
                    "html_url": "https://github.com/someone/undocumented",
                    "description": null,
                    "stargazers_count": 800
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/algos/python-sorting/readme"))
        .and(header("accept", "application/vnd.github.raw"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "# Python Sorting\n\n```python\ndef quicksort(items):\n    return items\n```\n",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let searcher = GitHubSearcher::new(&config_for(&server), &StaticCredentials::new()).unwrap();
    let documents = searcher.search("quicksort in python").await;

    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].title, "algos/python-sorting");
    assert_eq!(documents[0].kind, SourceKind::Code);
    assert!(documents[0].content.contains("def quicksort"));
}

#[tokio::test]
async fn github_rate_limit_yields_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .respond_with(ResponseTemplate::new(403).set_body_string("API rate limit exceeded"))
        .mount(&server)
        .await;

    let searcher = GitHubSearcher::new(&config_for(&server), &StaticCredentials::new()).unwrap();
    assert!(searcher.search("rust web frameworks").await.is_empty());
}
