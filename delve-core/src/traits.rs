//! Core trait definitions
//!
//! Collaborators of the research pipeline. Every implementation is shared as `Arc<dyn ...>`.

use crate::error::DelveResult;
use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;

/// A source searcher.
///
/// `search` never fails: provider errors are logged and turned into an empty list.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    async fn search(&self, query: &str) -> Vec<SourceDocument>;
}

/// Append-only similarity store holding the chunks of one research call
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Add one batch. Either the whole batch is stored or none of it is.
    async fn add_documents(&self, documents: &[SourceDocument]) -> DelveResult<()>;

    /// Up to `k` stored documents, most similar first
    async fn similarity_search(&self, query: &str, k: usize) -> DelveResult<Vec<SourceDocument>>;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Creates a fresh [`EmbeddingStore`] for each research call
pub trait EmbeddingStoreFactory: Send + Sync {
    fn create(&self) -> Arc<dyn EmbeddingStore>;
}

/// Text-in, text-out language model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, prompt: &str) -> DelveResult<String>;
}
