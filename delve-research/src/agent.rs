//! Research orchestration
//!
//! [`ResearchAgent`] runs one query through search, processing and analysis,
//! reporting progress through a [`StatusEmitter`]. It never fails: every
//! error, timeout or panic inside the pipeline turns into a degraded
//! [`ResearchResult`] with `metadata.error` set.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Instant;

use chrono::Utc;
use futures::{FutureExt, Stream};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use delve_core::performance::measure_async;
use delve_core::{
    retry_async_if, settle_all_with_progress, try_with_deadline, with_deadline, CredentialProvider, Deadline, DelveConfig,
    DelveError, DelveResult, EmbeddingStoreFactory, LanguageModel, Query, ResearchMetadata, ResearchOptions,
    ResearchResult, ResearchStage, ResearchStatus, RetryPolicy, SearchProvider, SourceDocument, SourceKind,
    StreamFrame,
};
use delve_rag::{
    confidence, create_embedder, create_language_model, quality_score, DisabledModel, DocumentProcessor,
    HashingEmbedder, InMemoryStoreFactory, RankedDocumentSet,
};
use delve_search::{ArxivSearcher, GitHubSearcher, TavilySearcher};

use crate::analyzer::ContentAnalyzer;
use crate::code::CodeProcessor;
use crate::fallback;
use crate::status::{checkpoints, interpolate, StatusEmitter};
use crate::strategy::{StrategyOptimizer, StrategyPlan};

/// Lifecycle of a single research call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentState {
    Idle,
    Searching,
    Processing,
    Analyzing,
    Complete,
    Degraded,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Complete | AgentState::Degraded)
    }

    /// Forward along the pipeline, `Searching` again for a retry, or `Degraded` from any live state
    pub fn can_transition_to(&self, next: AgentState) -> bool {
        use AgentState::*;
        match (self, next) {
            (Idle, Searching) => true,
            (Searching, Searching) => true,
            (Searching, Processing) => true,
            (Processing, Analyzing) => true,
            (Analyzing, Complete) => true,
            (state, Degraded) => !state.is_terminal(),
            _ => false,
        }
    }
}

/// Per-call bookkeeping; nothing here outlives the call
struct Run {
    state: Mutex<AgentState>,
    emitter: Arc<StatusEmitter>,
    attempts: AtomicU32,
}

impl Run {
    fn new(emitter: Arc<StatusEmitter>) -> Self {
        Self {
            state: Mutex::new(AgentState::Idle),
            emitter,
            attempts: AtomicU32::new(0),
        }
    }

    fn advance(&self, next: AgentState) -> DelveResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DelveError::internal("agent state lock poisoned"))?;
        if !state.can_transition_to(next) {
            return Err(DelveError::internal(format!(
                "invalid agent transition {:?} -> {:?}",
                *state, next
            )));
        }
        debug!(from = ?*state, to = ?next, "Agent state transition");
        *state = next;
        Ok(())
    }

    /// Stop work once the consumer has gone away
    fn checkpoint(&self, stage: &str) -> DelveResult<()> {
        if self.emitter.is_cancelled() {
            return Err(DelveError::cancelled(stage));
        }
        Ok(())
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

struct AgentInner {
    config: DelveConfig,
    optimizer: StrategyOptimizer,
    searchers: Vec<Arc<dyn SearchProvider>>,
    model: Arc<dyn LanguageModel>,
    store_factory: Arc<dyn EmbeddingStoreFactory>,
    processor: DocumentProcessor,
    analyzer: ContentAnalyzer,
    code: CodeProcessor,
}

impl AgentInner {
    fn new(
        config: DelveConfig,
        searchers: Vec<Arc<dyn SearchProvider>>,
        model: Arc<dyn LanguageModel>,
        store_factory: Arc<dyn EmbeddingStoreFactory>,
    ) -> Self {
        Self {
            optimizer: StrategyOptimizer::new(config.strategies.clone(), &config.research),
            processor: DocumentProcessor::new(config.processing.clone()),
            analyzer: ContentAnalyzer::new(Arc::clone(&model), config.analysis.clone()),
            code: CodeProcessor::new(Arc::clone(&model), config.analysis.clone()),
            config,
            searchers,
            model,
            store_factory,
        }
    }
}

/// Immutable research pipeline, cheap to clone and share between requests
#[derive(Clone)]
pub struct ResearchAgent {
    inner: Arc<AgentInner>,
}

impl std::fmt::Debug for ResearchAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchAgent")
            .field("model", &self.model_name())
            .field("searchers", &self.searcher_names())
            .finish()
    }
}

impl ResearchAgent {
    pub fn builder() -> ResearchAgentBuilder {
        ResearchAgentBuilder::new()
    }

    pub fn config(&self) -> &DelveConfig {
        &self.inner.config
    }

    pub fn optimizer(&self) -> &StrategyOptimizer {
        &self.inner.optimizer
    }

    pub fn model_name(&self) -> &str {
        self.inner.model.name()
    }

    pub fn searcher_names(&self) -> Vec<String> {
        self.inner.searchers.iter().map(|s| s.name().to_string()).collect()
    }

    /// Same searchers and store, different language model
    pub fn with_model(&self, model: Arc<dyn LanguageModel>) -> ResearchAgent {
        ResearchAgent {
            inner: Arc::new(AgentInner::new(
                self.inner.config.clone(),
                self.inner.searchers.clone(),
                model,
                Arc::clone(&self.inner.store_factory),
            )),
        }
    }

    pub async fn research(&self, query: &str, options: &ResearchOptions) -> ResearchResult {
        self.research_with_emitter(query, options, Arc::new(StatusEmitter::silent()))
            .await
    }

    /// Research while reporting every accepted status event to `on_status`
    pub async fn research_with_streaming<F>(&self, query: &str, options: &ResearchOptions, on_status: F) -> ResearchResult
    where
        F: Fn(ResearchStatus) + Send + Sync + 'static,
    {
        self.research_with_emitter(query, options, Arc::new(StatusEmitter::from_callback(on_status)))
            .await
    }

    /// Run the research in a background task and yield its frames: status events,
    /// then one terminal `research` (or `error`) frame. Dropping the stream stops it.
    pub fn research_stream(&self, query: impl Into<String>, options: ResearchOptions) -> ResearchStream {
        let (sender, frames) = mpsc::unbounded_channel();
        let emitter = Arc::new(StatusEmitter::from_channel(sender.clone()));
        let agent = self.clone();
        let query = query.into();

        let research = tokio::spawn(async move { agent.research_with_emitter(&query, &options, emitter).await });
        let abort = research.abort_handle();

        let forwarder = tokio::spawn(async move {
            let frame = match research.await {
                Ok(result) => StreamFrame::Research(Box::new(result)),
                Err(e) if e.is_cancelled() => return,
                Err(e) => {
                    error!(error = %e, "Research task failed");
                    StreamFrame::Error(format!("research task failed: {}", e))
                }
            };
            if sender.send(frame).is_err() {
                debug!("Stream consumer went away before the result");
            }
        });

        ResearchStream {
            frames,
            research: abort,
            forwarder,
        }
    }

    /// Full pipeline with a caller-supplied emitter. Always returns a result and
    /// always finishes with exactly one `complete` event.
    pub async fn research_with_emitter(
        &self,
        raw_query: &str,
        options: &ResearchOptions,
        emitter: Arc<StatusEmitter>,
    ) -> ResearchResult {
        let started = Instant::now();

        let query = match Query::parse(raw_query, self.inner.config.research.min_query_chars) {
            Ok(query) => query,
            Err(e) => {
                info!(error = %e, "Rejected query");
                emitter.complete("Query too short to research");
                return fallback::invalid_query_result(raw_query, &e.to_string());
            }
        };

        let plan = self.inner.optimizer.plan(&query, options);
        info!(
            query = %query,
            strategy = %plan.strategy,
            programming = plan.is_programming,
            "Starting research"
        );

        let run = Run::new(emitter);
        let outcome = with_deadline(
            plan.overall_budget,
            AssertUnwindSafe(self.run_pipeline(&query, &plan, &run)).catch_unwind(),
            "research",
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let failure = match outcome {
            Ok(Ok(Ok(mut result))) => {
                result.metadata.elapsed_ms = elapsed_ms;
                if let Err(e) = run.advance(AgentState::Complete) {
                    warn!(error = %e, "Unexpected state at completion");
                }
                run.emitter.complete(format!("Research complete: {} sources", result.metadata.sources_count));
                info!(
                    sources = result.metadata.sources_count,
                    confidence = result.metadata.confidence,
                    attempts = result.metadata.attempts,
                    elapsed_ms,
                    "Research complete"
                );
                return result;
            }
            Ok(Ok(Err(e))) => {
                e.log();
                e.to_string()
            }
            Ok(Err(panic)) => {
                let message = panic_message(&*panic);
                error!(panic = %message, "Research pipeline panicked");
                format!("Internal error: {}", message)
            }
            Err(timeout) => {
                warn!(error = %timeout, "Research exceeded its overall budget");
                timeout.to_string()
            }
        };

        if let Err(e) = run.advance(AgentState::Degraded) {
            debug!(error = %e, "Could not mark run as degraded");
        }
        run.emitter.complete("Research finished with limited results");

        fallback::degraded_result(
            query.as_str(),
            &plan,
            &self.inner.config.analysis,
            &failure,
            run.attempts().max(1),
            elapsed_ms,
        )
    }

    async fn run_pipeline(&self, query: &Query, plan: &StrategyPlan, run: &Run) -> DelveResult<ResearchResult> {
        let research = &self.inner.config.research;
        let policy = RetryPolicy::fixed(research.max_attempts as usize, research.retry_backoff_ms);

        let documents = retry_async_if(
            |attempt| {
                run.attempts.store(attempt as u32, Ordering::SeqCst);
                self.search_stage(query, plan, run, attempt)
            },
            &policy,
            "search",
            DelveError::is_no_sources,
        )
        .await?;

        let deadline = Deadline::after(plan.budgets.processing_timeout);
        let (ranked, passages) =
            measure_async("research.processing", self.process_stage(query, plan, run, documents, &deadline)).await?;
        measure_async(
            "research.analysis",
            self.analysis_stage(query, plan, run, ranked, passages, &deadline),
        )
        .await
    }

    fn eligible_searchers(&self, plan: &StrategyPlan) -> Vec<&Arc<dyn SearchProvider>> {
        self.inner
            .searchers
            .iter()
            .filter(|searcher| match searcher.kind() {
                SourceKind::Web => true,
                SourceKind::Academic => plan.wants_academic(),
                SourceKind::Code => plan.is_programming,
            })
            .collect()
    }

    async fn search_stage(
        &self,
        query: &Query,
        plan: &StrategyPlan,
        run: &Run,
        attempt: usize,
    ) -> DelveResult<Vec<SourceDocument>> {
        run.checkpoint("search")?;
        run.advance(AgentState::Searching)?;

        let searchers = self.eligible_searchers(plan);
        let total = searchers.len();
        let message = if attempt > 1 {
            format!("Searching {} sources again (attempt {})", total, attempt)
        } else {
            format!("Searching {} sources", total)
        };
        let start = run.emitter.current().max(checkpoints::SEARCH_STARTED);
        run.emitter.emit(ResearchStage::Searching, message, start);

        let budget = plan.budgets.search_timeout;
        let emitter = &run.emitter;
        let outcomes = settle_all_with_progress(
            searchers.iter().map(|searcher| async move {
                let name = searcher.name().to_string();
                let outcome = with_deadline(budget, searcher.search(query.as_str()), &name).await;
                (name, outcome)
            }),
            |_, settled| {
                emitter.emit(
                    ResearchStage::Searching,
                    format!("{} of {} searches finished", settled, total),
                    interpolate(checkpoints::SEARCH_STARTED, checkpoints::SEARCH_SETTLED, settled, total),
                );
            },
        )
        .await;
        run.checkpoint("search")?;

        let mut documents = Vec::new();
        let mut searched = Vec::with_capacity(outcomes.len());
        for (name, outcome) in outcomes {
            match outcome {
                Ok(found) => {
                    debug!(searcher = %name, documents = found.len(), "Searcher settled");
                    documents.extend(found);
                }
                Err(e) => warn!(searcher = %name, error = %e, "Searcher did not finish in time"),
            }
            searched.push(name);
        }

        if documents.is_empty() {
            return Err(DelveError::no_sources(query.as_str(), searched));
        }
        info!(documents = documents.len(), attempt, "Search stage complete");
        Ok(documents)
    }

    async fn process_stage(
        &self,
        query: &Query,
        plan: &StrategyPlan,
        run: &Run,
        documents: Vec<SourceDocument>,
        deadline: &Deadline,
    ) -> DelveResult<(RankedDocumentSet, Vec<SourceDocument>)> {
        run.checkpoint("processing")?;
        run.advance(AgentState::Processing)?;

        let processor = &self.inner.processor;
        run.emitter.emit(
            ResearchStage::Processing,
            format!("Filtering {} documents", documents.len()),
            checkpoints::FILTERED,
        );

        let filtered = processor.filter_quality(documents.clone());
        let candidates = if filtered.is_empty() {
            warn!(documents = documents.len(), "Quality filter dropped every document, keeping all");
            documents
        } else {
            filtered
        };

        let ranked = processor.rank(query.as_str(), candidates, plan.budgets.max_documents);
        let chunk_size = plan.budgets.chunk_size;
        let overlap = (chunk_size as f64 * processor.config().overlap_ratio) as usize;
        let chunks = processor.chunk(ranked.documents(), chunk_size, overlap);
        run.emitter.emit(
            ResearchStage::Processing,
            format!("Split {} documents into {} chunks", ranked.len(), chunks.len()),
            checkpoints::CHUNKED,
        );

        let store = self.inner.store_factory.create();
        let k = plan.budgets.max_documents * processor.config().top_k_multiplier.max(1);
        let retrieval = async {
            let report = processor.index(&store, &chunks).await;
            let passages = store.similarity_search(query.as_str(), k).await?;
            Ok::<_, DelveError>((report, passages))
        };

        let passages = match try_with_deadline(deadline.remaining(), retrieval, "indexing").await {
            Ok((report, passages)) if !passages.is_empty() => {
                debug!(
                    indexed = report.documents_indexed,
                    skipped_batches = report.skipped_batches,
                    passages = passages.len(),
                    "Retrieved passages"
                );
                passages
            }
            Ok(_) => {
                debug!("No passages retrieved, analyzing ranked documents");
                ranked.documents().to_vec()
            }
            Err(e) => {
                warn!(error = %e, "Indexing failed, analyzing ranked documents");
                ranked.documents().to_vec()
            }
        };
        run.checkpoint("processing")?;
        run.emitter.emit(
            ResearchStage::Processing,
            format!("Selected {} passages", passages.len()),
            checkpoints::INDEXED,
        );

        Ok((ranked, passages))
    }

    async fn analysis_stage(
        &self,
        query: &Query,
        plan: &StrategyPlan,
        run: &Run,
        ranked: RankedDocumentSet,
        passages: Vec<SourceDocument>,
        deadline: &Deadline,
    ) -> DelveResult<ResearchResult> {
        run.checkpoint("analysis")?;
        run.advance(AgentState::Analyzing)?;
        run.emitter.emit(
            ResearchStage::Analyzing,
            format!("Analyzing {} sources", ranked.len()),
            checkpoints::ANALYSIS_STARTED,
        );

        let analyzer = &self.inner.analyzer;
        let text = query.as_str();
        let passes = if plan.is_programming { 5 } else { 4 };
        let settled = AtomicUsize::new(0);
        let tick = |pass: &str| {
            let done = settled.fetch_add(1, Ordering::SeqCst) + 1;
            run.emitter.emit(
                ResearchStage::Analyzing,
                format!("Finished {}", pass),
                interpolate(checkpoints::ANALYSIS_STARTED, checkpoints::ANALYSIS_SETTLED, done, passes),
            );
        };

        let (summary, findings, statistics, suggested_questions, code_examples) = tokio::join!(
            async {
                let summary = analyzer.summarize(text, &passages, deadline).await;
                tick("summary");
                summary
            },
            async {
                let findings = analyzer.extract_findings(text, &passages, deadline).await;
                tick("findings");
                findings
            },
            async {
                let statistics = analyzer.extract_statistics(text, &passages, deadline).await;
                tick("statistics");
                statistics
            },
            async {
                let questions = analyzer.suggest_questions(text, &passages, deadline).await;
                tick("follow-up questions");
                questions
            },
            async {
                if !plan.is_programming {
                    return Vec::new();
                }
                let examples = self.inner.code.process(text, plan.language, ranked.documents(), deadline).await;
                tick("code examples");
                examples
            },
        );
        run.checkpoint("analysis")?;

        let documents = ranked.documents();
        let metadata = ResearchMetadata {
            sources_count: ranked.len(),
            confidence: confidence(documents, findings.len()),
            quality_score: quality_score(documents),
            research_depth: plan.strategy,
            last_updated: Utc::now(),
            attempts: run.attempts().max(1),
            elapsed_ms: 0,
            error: false,
            error_message: None,
        };

        Ok(ResearchResult {
            summary,
            findings,
            statistics,
            code_examples,
            suggested_questions,
            metadata,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Frames of one streamed research call
pub struct ResearchStream {
    frames: UnboundedReceiver<StreamFrame>,
    research: AbortHandle,
    forwarder: JoinHandle<()>,
}

impl Stream for ResearchStream {
    type Item = StreamFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().frames.poll_recv(cx)
    }
}

impl Drop for ResearchStream {
    fn drop(&mut self) {
        self.research.abort();
        self.forwarder.abort();
    }
}

/// Assembles a [`ResearchAgent`]
#[derive(Default)]
pub struct ResearchAgentBuilder {
    config: DelveConfig,
    searchers: Vec<Arc<dyn SearchProvider>>,
    model: Option<Arc<dyn LanguageModel>>,
    store_factory: Option<Arc<dyn EmbeddingStoreFactory>>,
}

impl ResearchAgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default searchers, language model and embedding store for a configuration.
    ///
    /// A model or embedder that cannot be created (usually a missing key) is
    /// replaced by its offline counterpart so research still works.
    pub async fn from_config(config: DelveConfig, credentials: &dyn CredentialProvider) -> DelveResult<Self> {
        let searchers: Vec<Arc<dyn SearchProvider>> = vec![
            Arc::new(TavilySearcher::new(&config.search, credentials)?),
            Arc::new(ArxivSearcher::new(&config.search)?),
            Arc::new(GitHubSearcher::new(&config.search, credentials)?),
        ];

        let model = match create_language_model(&config.llm, credentials).await {
            Ok(model) => model,
            Err(e) => {
                warn!(error = %e, "Language model unavailable, analysis will use fallbacks");
                Arc::new(DisabledModel)
            }
        };

        let embedder = match create_embedder(&config.embedding, credentials).await {
            Ok(embedder) => embedder,
            Err(e) => {
                warn!(error = %e, "Embedding provider unavailable, using local hashing embeddings");
                Arc::new(HashingEmbedder::new(config.embedding.dimensions))
            }
        };

        Ok(Self {
            config,
            searchers,
            model: Some(model),
            store_factory: Some(Arc::new(InMemoryStoreFactory::new(embedder))),
        })
    }

    pub fn config(mut self, config: DelveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn searcher(mut self, searcher: Arc<dyn SearchProvider>) -> Self {
        self.searchers.push(searcher);
        self
    }

    pub fn searchers<I>(mut self, searchers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn SearchProvider>>,
    {
        self.searchers.extend(searchers);
        self
    }

    pub fn model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn store_factory(mut self, factory: Arc<dyn EmbeddingStoreFactory>) -> Self {
        self.store_factory = Some(factory);
        self
    }

    pub fn build(self) -> DelveResult<ResearchAgent> {
        self.config.validate()?;
        if self.searchers.is_empty() {
            warn!("Research agent has no searchers, every query will degrade");
        }

        let model = self.model.unwrap_or_else(|| Arc::new(DisabledModel));
        let store_factory = self.store_factory.unwrap_or_else(|| {
            Arc::new(InMemoryStoreFactory::new(Arc::new(HashingEmbedder::new(
                self.config.embedding.dimensions,
            ))))
        });

        Ok(ResearchAgent {
            inner: Arc::new(AgentInner::new(self.config, self.searchers, model, store_factory)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_the_pipeline() {
        use AgentState::*;
        assert!(Idle.can_transition_to(Searching));
        assert!(Searching.can_transition_to(Searching));
        assert!(Searching.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Analyzing));
        assert!(Analyzing.can_transition_to(Complete));

        assert!(!Idle.can_transition_to(Processing));
        assert!(!Analyzing.can_transition_to(Searching));
        assert!(!Complete.can_transition_to(Searching));
    }

    #[test]
    fn degraded_is_reachable_from_any_live_state() {
        use AgentState::*;
        for state in [Idle, Searching, Processing, Analyzing] {
            assert!(state.can_transition_to(Degraded), "{:?}", state);
        }
        assert!(!Complete.can_transition_to(Degraded));
        assert!(!Degraded.can_transition_to(Degraded));
    }

    #[test]
    fn run_rejects_invalid_transitions() {
        let run = Run::new(Arc::new(StatusEmitter::silent()));
        assert!(run.advance(AgentState::Processing).is_err());
        assert!(run.advance(AgentState::Searching).is_ok());
        assert!(run.advance(AgentState::Processing).is_ok());
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(&*payload), "owned boom");
    }

    #[tokio::test]
    async fn builder_defaults_to_offline_components() {
        let mut config = DelveConfig::default();
        config.research.retry_backoff_ms = 10;
        let agent = ResearchAgent::builder().config(config).build().unwrap();
        assert_eq!(agent.model_name(), "disabled");
        assert!(agent.searcher_names().is_empty());

        let result = agent.research("rust ownership rules", &ResearchOptions::default()).await;
        assert!(result.is_degraded());
        assert!(!result.summary.is_empty());
        assert_eq!(result.metadata.attempts, 2);
    }
}
