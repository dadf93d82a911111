//! Delve Search - query planning and source searchers
//!
//! The planner holds the pure query heuristics; `api` wraps the Tavily, arXiv and
//! GitHub search APIs behind [`delve_core::SearchProvider`].

pub mod api;
pub mod planner;

pub use api::*;
pub use planner::*;
