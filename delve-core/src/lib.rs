//! Delve Core - data model, collaborator traits and async plumbing
//!
//! Shared by every crate of the delve research pipeline.

pub mod async_utils;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use async_utils::*;
pub use crate::config::*;
pub use credentials::*;
pub use error::*;
pub use logging::*;
pub use traits::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio;
pub use tracing;
