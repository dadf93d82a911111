//! Delve Research - the research orchestration pipeline
//!
//! Built on the searchers of delve-search and the document processing of
//! delve-rag. It includes:
//!
//! - Strategy selection and per-stage time budgets
//! - Language model extraction passes with deterministic fallbacks
//! - Code example extraction for programming queries
//! - The research agent state machine with retry and degraded results
//! - Ordered status events and the NDJSON streaming protocol
//!
//! ## Architecture
//!
//! - **Data and plumbing** (delve-core): types, errors, config, deadlines
//! - **Sources** (delve-search) and **documents** (delve-rag)
//! - **Orchestration** (this crate)
//! - **Presentation** (delve-web/cli)

pub mod agent;
pub mod analyzer;
pub mod code;
pub mod fallback;
pub mod parser;
pub mod prompts;
pub mod status;
pub mod strategy;
pub mod streaming;

pub use agent::{AgentState, ResearchAgent, ResearchAgentBuilder, ResearchStream};
pub use analyzer::ContentAnalyzer;
pub use code::{is_structurally_valid, CodeProcessor};
pub use parser::{parse_blocks, ParsedBlock};
pub use status::{StatusEmitter, PROGRESS_TOTAL};
pub use strategy::{classify, StrategyBudgets, StrategyOptimizer, StrategyPlan};
pub use streaming::NdjsonDecoder;
