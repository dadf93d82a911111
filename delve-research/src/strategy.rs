//! Research strategy selection
//!
//! Classifies a query by length and word count and derives the per-stage budgets
//! the orchestrator works under.

use std::time::Duration;

use tracing::debug;

use delve_core::{
    Query, QueryDomain, ResearchConfig, ResearchOptions, StrategiesConfig, Strategy,
    StrategyBudgetConfig,
};
use delve_search::{detect_domain, guess_language};

/// quick: under 30 chars and at most 5 words; comprehensive: over 100 chars or over 15 words
pub fn classify(query: &str) -> Strategy {
    let text = query.trim();
    if text.is_empty() {
        return Strategy::Quick;
    }

    let chars = text.chars().count();
    let words = text.split_whitespace().count();

    if chars > 100 || words > 15 {
        Strategy::Comprehensive
    } else if chars < 30 && words <= 5 {
        Strategy::Quick
    } else {
        Strategy::Standard
    }
}

/// Time and size limits for one strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyBudgets {
    pub search_timeout: Duration,
    pub processing_timeout: Duration,
    pub chunk_size: usize,
    pub max_documents: usize,
}

impl From<&StrategyBudgetConfig> for StrategyBudgets {
    fn from(config: &StrategyBudgetConfig) -> Self {
        Self {
            search_timeout: Duration::from_millis(config.search_timeout_ms),
            processing_timeout: Duration::from_millis(config.processing_timeout_ms),
            chunk_size: config.chunk_size,
            max_documents: config.max_documents,
        }
    }
}

/// Everything decided about a query before any I/O happens
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyPlan {
    pub strategy: Strategy,
    pub budgets: StrategyBudgets,
    pub domain: QueryDomain,
    pub is_programming: bool,
    pub language: Option<&'static str>,
    /// Hard bound on the whole research call, retries included
    pub overall_budget: Duration,
}

impl StrategyPlan {
    /// Academic sources are consulted for academic queries and for every comprehensive run
    pub fn wants_academic(&self) -> bool {
        self.domain == QueryDomain::Academic || self.strategy == Strategy::Comprehensive
    }
}

#[derive(Debug, Clone)]
pub struct StrategyOptimizer {
    strategies: StrategiesConfig,
    max_attempts: u32,
}

impl StrategyOptimizer {
    pub fn new(strategies: StrategiesConfig, research: &ResearchConfig) -> Self {
        Self {
            strategies,
            max_attempts: research.max_attempts.max(1),
        }
    }

    pub fn classify(&self, query: &str) -> Strategy {
        classify(query)
    }

    pub fn budgets_for(&self, strategy: Strategy) -> StrategyBudgets {
        StrategyBudgets::from(self.strategies.for_strategy(strategy))
    }

    /// Pick the strategy (an explicit option wins over classification) and its budgets
    pub fn plan(&self, query: &Query, options: &ResearchOptions) -> StrategyPlan {
        let strategy = options.strategy.unwrap_or_else(|| classify(query.as_str()));
        let budgets = self.budgets_for(strategy);
        let domain = detect_domain(query.as_str());
        let overall_budget = (budgets.search_timeout + budgets.processing_timeout) * self.max_attempts;

        let plan = StrategyPlan {
            strategy,
            budgets,
            domain,
            is_programming: domain == QueryDomain::Programming,
            language: guess_language(query.as_str()),
            overall_budget,
        };

        debug!(
            query = %query,
            strategy = %plan.strategy,
            domain = ?plan.domain,
            overall_ms = plan.overall_budget.as_millis() as u64,
            "Planned research"
        );
        plan
    }
}
