//! Shared application state

use std::time::Instant;

use tracing::info;

use delve_core::{DelveConfig, EnvCredentials};
use delve_research::{ResearchAgent, ResearchAgentBuilder};

use crate::{WebConfig, WebResult};

/// Handlers share one agent; it is cheap to clone and safe to call concurrently
#[derive(Clone, Debug)]
pub struct AppState {
    pub agent: ResearchAgent,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(agent: ResearchAgent) -> Self {
        Self {
            agent,
            started_at: Instant::now(),
        }
    }

    /// Build the agent from the Delve configuration named by `config`
    pub async fn from_config(config: &WebConfig) -> WebResult<Self> {
        let delve_config = DelveConfig::load(config.config_path.as_deref())?;
        let agent = ResearchAgentBuilder::from_config(delve_config, &EnvCredentials)
            .await?
            .build()?;

        info!(
            model = agent.model_name(),
            searchers = ?agent.searcher_names(),
            "Research agent ready"
        );
        Ok(Self::new(agent))
    }
}
