//! Route definitions for the Delve web server

use axum::{
    routing::{get, post},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/research", post(handlers::research))
        .route("/research/stream", post(handlers::research_stream))
}
