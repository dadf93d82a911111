//! Client for the streaming endpoint of a remote delve server

use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use delve_core::{DelveError, DelveResult, ErrorContext, ResearchResult, ResearchStatus, Strategy, StreamFrame};
use delve_research::NdjsonDecoder;

/// Upper bound for one streamed research call, the slowest strategy included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct ResearchRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    strategy: Option<Strategy>,
}

pub struct RemoteClient {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteClient {
    pub fn new(base_url: &str) -> DelveResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("delve-cli/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DelveError::network("Failed to create HTTP client", "remote", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// POST the query to `/api/research/stream` and decode frames as they arrive
    pub async fn research<F>(&self, query: &str, strategy: Option<Strategy>, mut on_status: F) -> DelveResult<ResearchResult>
    where
        F: FnMut(&ResearchStatus),
    {
        let url = format!("{}/api/research/stream", self.base_url);
        info!(url = %url, "Streaming research from remote server");

        let response = self
            .client
            .post(&url)
            .json(&ResearchRequest { query, strategy })
            .send()
            .await
            .map_err(|e| DelveError::network("Failed to reach research server", "remote", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DelveError::Network {
                message: format!("Server returned HTTP {}: {}", status.as_u16(), body.chars().take(300).collect::<String>()),
                source: None,
                context: ErrorContext::new("remote")
                    .with_operation("research_stream")
                    .with_metadata("status", &status.as_u16().to_string())
                    .with_suggestion("Check the --server URL"),
            });
        }

        let mut decoder = NdjsonDecoder::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| DelveError::network("Research stream interrupted", "remote", e))?;
            for frame in decoder.push(&chunk) {
                if let Some(result) = handle_frame(frame, &mut on_status)? {
                    return Ok(result);
                }
            }
        }

        if let Some(frame) = decoder.finish() {
            if let Some(result) = handle_frame(Ok(frame), &mut on_status)? {
                return Ok(result);
            }
        }

        Err(DelveError::Network {
            message: "Research stream ended without a result".to_string(),
            source: None,
            context: ErrorContext::new("remote").with_operation("research_stream"),
        })
    }
}

/// `Some` for the terminal result frame
fn handle_frame<F>(frame: DelveResult<StreamFrame>, on_status: &mut F) -> DelveResult<Option<ResearchResult>>
where
    F: FnMut(&ResearchStatus),
{
    match frame {
        Ok(StreamFrame::Status(status)) => {
            on_status(&status);
            Ok(None)
        }
        Ok(StreamFrame::Research(result)) => {
            debug!(sources = result.metadata.sources_count, "Received research result");
            Ok(Some(*result))
        }
        Ok(StreamFrame::Error(message)) => Err(DelveError::Internal {
            message: format!("Server reported an error: {}", message),
            source: None,
            context: ErrorContext::new("remote").with_operation("research_stream"),
        }),
        Err(e) => {
            warn!(error = %e, "Skipping malformed frame");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use delve_core::{Progress, ResearchMetadata, ResearchStage};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn status(stage: ResearchStage, current: u32) -> StreamFrame {
        StreamFrame::Status(ResearchStatus {
            stage,
            message: format!("{:?}", stage),
            progress: Progress { current, total: 100 },
        })
    }

    fn result() -> ResearchResult {
        ResearchResult {
            summary: "Ownership rules".to_string(),
            findings: Vec::new(),
            statistics: Vec::new(),
            code_examples: Vec::new(),
            suggested_questions: vec!["What is borrowing?".to_string()],
            metadata: ResearchMetadata {
                sources_count: 2,
                confidence: 0.7,
                quality_score: 0.6,
                research_depth: Strategy::Quick,
                last_updated: Utc::now(),
                attempts: 1,
                elapsed_ms: 900,
                error: false,
                error_message: None,
            },
        }
    }

    async fn serve(body: String) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/research/stream"))
            .and(body_partial_json(serde_json::json!({"query": "rust ownership"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn decodes_statuses_then_result() {
        let mut body = String::new();
        for frame in [
            status(ResearchStage::Searching, 10),
            status(ResearchStage::Complete, 100),
            StreamFrame::Research(Box::new(result())),
        ] {
            body.push_str(&frame.to_ndjson_line().unwrap());
        }
        let server = serve(body).await;

        let client = RemoteClient::new(&format!("{}/", server.uri())).unwrap();
        let mut seen = Vec::new();
        let received = client
            .research("rust ownership", None, |s| seen.push(s.progress.current))
            .await
            .unwrap();

        assert_eq!(seen, vec![10, 100]);
        assert_eq!(received.summary, "Ownership rules");
        assert_eq!(received.metadata.sources_count, 2);
    }

    #[tokio::test]
    async fn accepts_result_without_trailing_newline() {
        let line = StreamFrame::Research(Box::new(result())).to_ndjson_line().unwrap();
        let server = serve(line.trim_end().to_string()).await;

        let client = RemoteClient::new(&server.uri()).unwrap();
        let received = client.research("rust ownership", None, |_| {}).await.unwrap();
        assert_eq!(received.metadata.attempts, 1);
    }

    #[tokio::test]
    async fn error_frame_fails_the_call() {
        let body = format!(
            "{}{}",
            status(ResearchStage::Searching, 10).to_ndjson_line().unwrap(),
            StreamFrame::Error("research task failed".to_string()).to_ndjson_line().unwrap()
        );
        let server = serve(body).await;

        let client = RemoteClient::new(&server.uri()).unwrap();
        let outcome = client.research("rust ownership", None, |_| {}).await;
        assert!(matches!(outcome, Err(DelveError::Internal { .. })));
    }

    #[tokio::test]
    async fn missing_result_is_an_error() {
        let body = status(ResearchStage::Searching, 10).to_ndjson_line().unwrap();
        let server = serve(body).await;

        let client = RemoteClient::new(&server.uri()).unwrap();
        let outcome = client.research("rust ownership", None, |_| {}).await;
        assert!(matches!(outcome, Err(DelveError::Network { .. })));
    }
}
