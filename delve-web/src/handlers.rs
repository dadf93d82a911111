//! HTTP request handlers for the Delve web server

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use delve_core::{ResearchOptions, ResearchResult, Strategy, StreamFrame};

use crate::AppState;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub uptime_secs: u64,
    pub model: String,
    pub searchers: Vec<String>,
}

/// Body of both research endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResearchRequest {
    pub query: String,
    #[serde(default)]
    pub strategy: Option<Strategy>,
}

impl ResearchRequest {
    fn options(&self) -> ResearchOptions {
        ResearchOptions {
            strategy: self.strategy,
        }
    }
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        model: state.agent.model_name().to_string(),
        searchers: state.agent.searcher_names(),
    })
}

/// Run the whole pipeline and answer with the final result.
///
/// Research failures are reported inside the result (`metadata.error`), so
/// this always answers 200 once the body parses.
pub async fn research(State(state): State<AppState>, Json(request): Json<ResearchRequest>) -> Json<ResearchResult> {
    info!(query = %request.query, strategy = ?request.strategy, "Research request");
    let result = state.agent.research(&request.query, &request.options()).await;
    Json(result)
}

/// Stream status frames as NDJSON, ending with a `research` or `error` frame.
///
/// The body owns the research stream; a client disconnect drops it, which
/// aborts the research task and stops status emission.
pub async fn research_stream(State(state): State<AppState>, Json(request): Json<ResearchRequest>) -> Response {
    info!(query = %request.query, strategy = ?request.strategy, "Streaming research request");
    let options = request.options();
    let frames = state
        .agent
        .research_stream(request.query, options)
        .map(|frame| Ok::<_, Infallible>(frame_line(frame)));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

fn frame_line(frame: StreamFrame) -> String {
    match frame.to_ndjson_line() {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "Failed to serialize stream frame");
            let fallback = StreamFrame::Error(format!("Failed to serialize frame: {}", e));
            fallback
                .to_ndjson_line()
                .unwrap_or_else(|_| "{\"error\":\"serialization failed\"}\n".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_is_optional_in_requests() {
        let request: ResearchRequest = serde_json::from_str(r#"{"query":"rust ownership"}"#).unwrap();
        assert_eq!(request.strategy, None);

        let request: ResearchRequest =
            serde_json::from_str(r#"{"query":"rust ownership","strategy":"comprehensive"}"#).unwrap();
        assert_eq!(request.options().strategy, Some(Strategy::Comprehensive));
    }

    #[test]
    fn frames_are_newline_terminated() {
        let line = frame_line(StreamFrame::Error("boom".to_string()));
        assert_eq!(line, "{\"error\":\"boom\"}\n");
    }
}
