//! Delve Web Server
//!
//! Main web server implementation using Axum.

use axum::serve;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::{create_app, AppState, WebConfig, WebError, WebResult};

/// Main Delve web server
pub struct DelveServer {
    config: WebConfig,
    state: AppState,
}

impl DelveServer {
    /// Build the research agent and its state from `config`
    pub async fn new(config: WebConfig) -> WebResult<Self> {
        let state = AppState::from_config(&config).await?;
        Ok(Self { config, state })
    }

    pub fn with_state(config: WebConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Bind and serve until the process stops or ctrl-c arrives
    pub async fn start(self) -> WebResult<()> {
        let address = self.config.address();

        info!("🚀 Starting Delve Web Server");
        info!("📍 Server address: http://{}", address);

        let app = create_app(self.state.clone());
        let listener = TcpListener::bind(&address).await.map_err(WebError::Server)?;

        info!("✅ Server listening on http://{}", address);

        if let Err(e) = serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
            error!("❌ Server error: {}", e);
            return Err(WebError::Server(e));
        }

        info!("👋 Server stopped");
        Ok(())
    }

    pub fn config(&self) -> &WebConfig {
        &self.config
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
