//! Embeddings and the in-memory similarity store
//!
//! Each research call gets its own [`InMemoryVectorStore`]; vectors come from an
//! [`Embedder`], either the local feature-hashing one or a provider via siumai.

use std::sync::Arc;

use async_trait::async_trait;
use siumai::prelude::*;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use delve_core::{
    CredentialKey, CredentialProvider, DelveError, DelveResult, EmbeddingConfig, EmbeddingStore,
    EmbeddingStoreFactory, SourceDocument,
};

/// Turns texts into fixed-size vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, texts: Vec<String>) -> DelveResult<Vec<Vec<f32>>>;
}

/// Deterministic local embedder: signed feature hashing of word unigrams, L2-normalized.
/// Needs no network and no key.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
        {
            let hash = fnv1a(token.as_bytes());
            let index = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: Vec<String>) -> DelveResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

/// Embeddings from a remote provider through siumai
pub struct ProviderEmbedder {
    client: Box<dyn LlmClient>,
    provider: String,
    model: String,
    dimensions: usize,
}

impl ProviderEmbedder {
    pub async fn new(config: &EmbeddingConfig, credentials: &dyn CredentialProvider) -> DelveResult<Self> {
        let client: Box<dyn LlmClient> = match config.provider.as_str() {
            "openai" => {
                let api_key = credentials
                    .credential(CredentialKey::Embedding)
                    .ok_or_else(|| missing_key(&config.provider))?;

                let client = LlmBuilder::new()
                    .openai()
                    .api_key(&api_key)
                    .model(&config.model)
                    .base_url(&config.base_url)
                    .build()
                    .await
                    .map_err(|e| {
                        DelveError::embedding(
                            format!("Failed to create OpenAI embedding client: {}", e),
                            Some("openai"),
                        )
                    })?;
                Box::new(client)
            }
            "ollama" => {
                let client = LlmBuilder::new()
                    .ollama()
                    .model(&config.model)
                    .base_url(&config.base_url)
                    .build()
                    .await
                    .map_err(|e| {
                        DelveError::embedding(
                            format!("Failed to create Ollama embedding client: {}", e),
                            Some("ollama"),
                        )
                    })?;
                Box::new(client)
            }
            provider => {
                return Err(DelveError::embedding(
                    format!("Unsupported embedding provider: {}", provider),
                    Some(provider),
                ))
            }
        };

        info!(
            provider = %config.provider,
            model = %config.model,
            endpoint = %config.base_url,
            dimensions = config.dimensions,
            "Initialized embedding client"
        );

        Ok(Self {
            client,
            provider: config.provider.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

fn missing_key(provider: &str) -> DelveError {
    DelveError::Config {
        message: format!("No API key configured for embedding provider '{}'", provider),
        source: None,
        context: delve_core::ErrorContext::new("embedding")
            .with_suggestion("Set DELVE_EMBEDDING_API_KEY or OPENAI_API_KEY")
            .with_suggestion("Or use the local 'hashing' provider"),
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: Vec<String>) -> DelveResult<Vec<Vec<f32>>> {
        let expected = texts.len();
        let Some(embedding_client) = self.client.as_embedding_capability() else {
            return Err(DelveError::embedding(
                format!("Provider {} does not support embeddings", self.provider),
                Some(&self.provider),
            ));
        };

        let response = embedding_client.embed(texts).await.map_err(|e| {
            DelveError::embedding(format!("Embedding generation failed: {}", e), Some(&self.provider))
        })?;

        if response.embeddings.len() != expected {
            return Err(DelveError::embedding(
                format!(
                    "Provider returned {} embeddings for {} texts",
                    response.embeddings.len(),
                    expected
                ),
                Some(&self.provider),
            ));
        }
        Ok(response.embeddings)
    }
}

/// Build the embedder named by the configuration
pub async fn create_embedder(
    config: &EmbeddingConfig,
    credentials: &dyn CredentialProvider,
) -> DelveResult<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dimensions))),
        _ => Ok(Arc::new(ProviderEmbedder::new(config, credentials).await?)),
    }
}

struct StoredDocument {
    document: SourceDocument,
    embedding: Vec<f32>,
}

/// Append-only vector store scoped to one research call
pub struct InMemoryVectorStore {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<StoredDocument>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryVectorStore {
    async fn add_documents(&self, documents: &[SourceDocument]) -> DelveResult<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let texts = documents.iter().map(|doc| doc.content.clone()).collect();
        let embeddings = self.embedder.embed(texts).await?;
        if embeddings.len() != documents.len() {
            return Err(DelveError::embedding(
                format!("Expected {} embeddings, got {}", documents.len(), embeddings.len()),
                Some(self.embedder.name()),
            ));
        }

        let dimension = self.embedder.dimensions();
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
            return Err(DelveError::embedding(
                format!("Embedding dimension mismatch: expected {}, got {}", dimension, bad.len()),
                Some(self.embedder.name()),
            ));
        }

        // The whole batch is validated before anything becomes visible
        let mut entries = self.entries.write().await;
        entries.extend(
            documents
                .iter()
                .cloned()
                .zip(embeddings)
                .map(|(document, embedding)| StoredDocument { document, embedding }),
        );
        debug!(added = documents.len(), total = entries.len(), "Added documents to vector store");
        Ok(())
    }

    async fn similarity_search(&self, query: &str, k: usize) -> DelveResult<Vec<SourceDocument>> {
        if k == 0 || self.entries.read().await.is_empty() {
            return Ok(Vec::new());
        }

        // Embed before locking so writers are not held up by the embedder
        let query_embedding = self
            .embedder
            .embed(vec![query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DelveError::embedding("No embedding returned for query", Some(self.embedder.name())))?;

        if query_embedding.len() != self.embedder.dimensions() {
            warn!(
                expected = self.embedder.dimensions(),
                actual = query_embedding.len(),
                "Query embedding dimension mismatch"
            );
            return Ok(Vec::new());
        }

        let entries = self.entries.read().await;
        let mut similarities: Vec<(usize, f32)> = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (index, cosine_similarity(&query_embedding, &entry.embedding)))
            .collect();
        similarities.sort_by(|a, b| b.1.total_cmp(&a.1));
        similarities.truncate(k);

        Ok(similarities
            .into_iter()
            .map(|(index, similarity)| entries[index].document.clone().with_score(f64::from(similarity)))
            .collect())
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Hands out a fresh [`InMemoryVectorStore`] per research call, sharing one embedder
#[derive(Clone)]
pub struct InMemoryStoreFactory {
    embedder: Arc<dyn Embedder>,
}

impl InMemoryStoreFactory {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

impl EmbeddingStoreFactory for InMemoryStoreFactory {
    fn create(&self) -> Arc<dyn EmbeddingStore> {
        Arc::new(InMemoryVectorStore::new(self.embedder.clone()))
    }
}

/// Calculate cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::SourceKind;

    /// Fails every call, for exercising batch atomicity
    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn name(&self) -> &str {
            "broken"
        }

        fn dimensions(&self) -> usize {
            4
        }

        async fn embed(&self, _texts: Vec<String>) -> DelveResult<Vec<Vec<f32>>> {
            Err(DelveError::embedding("provider down", Some("broken")))
        }
    }

    fn doc(url: &str, content: &str) -> SourceDocument {
        SourceDocument::new(SourceKind::Web, url, url, content)
    }

    /// Blocks on query embeddings until released
    struct GatedEmbedder {
        inner: HashingEmbedder,
        entered: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl Embedder for GatedEmbedder {
        fn name(&self) -> &str {
            "gated"
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn embed(&self, texts: Vec<String>) -> DelveResult<Vec<Vec<f32>>> {
            if texts.len() == 1 && texts[0] == "slow query" {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.embed(texts).await
        }
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);

        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 0.0).abs() < 1e-6);

        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed_text("Quicksort partitions around a pivot");
        let b = embedder.embed_text("quicksort PARTITIONS around a pivot");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(embedder.embed_text("").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn similarity_search_returns_closest_documents_first() {
        let factory = InMemoryStoreFactory::new(Arc::new(HashingEmbedder::new(256)));
        let store = factory.create();
        store
            .add_documents(&[
                doc("https://a.com/sort", "quicksort pivot partition recursion sorting"),
                doc("https://a.com/bread", "flour water yeast bread baking oven"),
            ])
            .await
            .unwrap();

        let hits = store.similarity_search("quicksort partition", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_url, "https://a.com/sort");
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn failed_batch_leaves_store_untouched() {
        let store = InMemoryVectorStore::new(Arc::new(BrokenEmbedder));
        assert!(store.add_documents(&[doc("https://a.com", "text")]).await.is_err());
        assert!(store.is_empty().await);
        assert!(store.similarity_search("text", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn factory_creates_independent_stores() {
        let factory = InMemoryStoreFactory::new(Arc::new(HashingEmbedder::new(32)));
        let first = factory.create();
        let second = factory.create();
        first.add_documents(&[doc("https://a.com", "one")]).await.unwrap();
        assert_eq!(first.len().await, 1);
        assert_eq!(second.len().await, 0);
    }

    #[tokio::test]
    async fn writers_are_not_blocked_while_a_query_embeds() {
        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(GatedEmbedder {
            inner: HashingEmbedder::new(64),
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        })));
        store.add_documents(&[doc("https://a.com/first", "slow query first")]).await.unwrap();

        let search = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.similarity_search("slow query", 5).await }
        });
        entered.notified().await;

        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            store.add_documents(&[doc("https://a.com/second", "slow query second")]),
        )
        .await
        .expect("add_documents waited on the query embedding")
        .unwrap();

        release.notify_one();
        let hits = search.await.unwrap().unwrap();
        assert_eq!(hits.len(), 2);
    }
}
