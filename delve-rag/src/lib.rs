//! Delve RAG - document processing, embeddings and language models
//!
//! Turns the raw documents of one research call into ranked, chunked and indexed
//! context, and provides the siumai-backed models the analysis stages call.

pub mod embeddings;
pub mod llm_client;
pub mod processor;

pub use embeddings::*;
pub use llm_client::*;
pub use processor::*;

// Re-export commonly used types from siumai
pub use siumai::prelude::LlmClient;
