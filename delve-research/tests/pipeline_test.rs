//! End-to-end tests for the research agent with stubbed collaborators

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;

use delve_core::{
    CodeOrigin, DelveConfig, DelveError, DelveResult, LanguageModel, ResearchOptions, ResearchStage, ResearchStatus,
    SearchProvider, SourceDocument, SourceKind, Statistic, Strategy, StreamFrame,
};
use delve_research::{ResearchAgent, StatusEmitter};

/// How a stub searcher behaves on each call
#[derive(Clone)]
enum Behaviour {
    Return(Vec<SourceDocument>),
    /// Nothing on the first call, documents afterwards
    EmptyThenReturn(Vec<SourceDocument>),
    Sleep(Duration),
    Panic,
}

struct StubSearcher {
    name: &'static str,
    kind: SourceKind,
    behaviour: Behaviour,
    calls: Arc<AtomicUsize>,
}

impl StubSearcher {
    fn new(name: &'static str, kind: SourceKind, behaviour: Behaviour) -> (Arc<dyn SearchProvider>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let searcher: Arc<dyn SearchProvider> = Arc::new(Self {
            name,
            kind,
            behaviour,
            calls: Arc::clone(&calls),
        });
        (searcher, calls)
    }
}

#[async_trait]
impl SearchProvider for StubSearcher {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn search(&self, _query: &str) -> Vec<SourceDocument> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Return(docs) => docs.clone(),
            Behaviour::EmptyThenReturn(docs) if call > 0 => docs.clone(),
            Behaviour::EmptyThenReturn(_) => Vec::new(),
            Behaviour::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Vec::new()
            }
            Behaviour::Panic => panic!("searcher exploded"),
        }
    }
}

/// Replies with the same text to every prompt
struct EchoModel(String);

#[async_trait]
impl LanguageModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, _prompt: &str) -> DelveResult<String> {
        Ok(self.0.clone())
    }
}

struct FailingModel;

#[async_trait]
impl LanguageModel for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn invoke(&self, _prompt: &str) -> DelveResult<String> {
        Err(DelveError::llm("service unavailable", Some("failing")))
    }
}

struct HangingModel;

#[async_trait]
impl LanguageModel for HangingModel {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn invoke(&self, _prompt: &str) -> DelveResult<String> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(String::new())
    }
}

const ECHO_REPLY: &str = "FINDING_START
TITLE: Quicksort partitions around a pivot
CONTENT: Quicksort picks a pivot element and partitions the list into smaller and larger values.
RELEVANCE: High
CATEGORY: Algorithms
SOURCE: https://docs.python.org/3/howto/sorting.html
FINDING_END

```python
def quicksort(items):
    if len(items) < 2:
        return items
    pivot, rest = items[0], items[1:]
    return quicksort([x for x in rest if x < pivot]) + [pivot] + quicksort([x for x in rest if x >= pivot])
```";

fn quicksort_docs() -> Vec<SourceDocument> {
    vec![
        SourceDocument::new(
            SourceKind::Web,
            "Sorting HOW TO",
            "https://docs.python.org/3/howto/sorting.html",
            "Python lists have a built-in sort method and a sorted function. This guide explains how quicksort \
             style partitioning compares with the Timsort algorithm that Python actually uses for its lists.",
        )
        .with_score(0.8),
        SourceDocument::new(
            SourceKind::Web,
            "Quicksort in Python explained",
            "https://realpython.com/sorting-algorithms-python/",
            "Quicksort is a divide and conquer algorithm. It selects a pivot, partitions the remaining elements \
             into two groups and sorts each group recursively. Average complexity is n log n comparisons.",
        )
        .with_score(0.7),
        SourceDocument::new(
            SourceKind::Web,
            "Implementing quicksort",
            "https://stackoverflow.com/questions/18262306/quicksort-with-python",
            "A common question is how to implement quicksort in Python with list comprehensions. Answers show \
             both the in-place Lomuto partition scheme and the simpler version that builds new lists.",
        )
        .with_score(0.6),
    ]
}

fn fast_config() -> DelveConfig {
    let mut config = DelveConfig::default();
    config.research.retry_backoff_ms = 20;
    config
}

fn agent_with(
    config: DelveConfig,
    searchers: Vec<Arc<dyn SearchProvider>>,
    model: Arc<dyn LanguageModel>,
) -> ResearchAgent {
    ResearchAgent::builder()
        .config(config)
        .searchers(searchers)
        .model(model)
        .build()
        .unwrap()
}

fn recording_callback() -> (Arc<Mutex<Vec<ResearchStatus>>>, impl Fn(ResearchStatus) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |status| sink.lock().unwrap().push(status))
}

fn assert_monotonic(statuses: &[ResearchStatus]) {
    assert!(!statuses.is_empty());
    for pair in statuses.windows(2) {
        assert!(pair[0].stage <= pair[1].stage, "{:?} after {:?}", pair[1].stage, pair[0].stage);
        assert!(pair[0].progress.current <= pair[1].progress.current);
    }
    let completes = statuses.iter().filter(|s| s.stage == ResearchStage::Complete).count();
    assert_eq!(completes, 1);
    assert_eq!(statuses.last().map(|s| s.stage), Some(ResearchStage::Complete));
}

#[tokio::test]
async fn quicksort_scenario_end_to_end() {
    let (web, _) = StubSearcher::new("web", SourceKind::Web, Behaviour::Return(quicksort_docs()));
    let agent = agent_with(fast_config(), vec![web], Arc::new(EchoModel(ECHO_REPLY.to_string())));

    let result = agent.research("quicksort in python", &ResearchOptions::default()).await;

    assert!(!result.is_degraded(), "{:?}", result.metadata.error_message);
    assert_eq!(result.findings.len(), 1);
    assert_eq!(result.findings[0].category, "Algorithms");
    assert!(!result.code_examples.is_empty());
    assert!(result
        .code_examples
        .iter()
        .any(|example| example.language == "python" && example.code.contains("def ")));
    assert!(result.code_examples.iter().all(|e| e.origin == CodeOrigin::Generated));
    assert_eq!(result.metadata.sources_count, 3);
    assert_eq!(result.metadata.research_depth, Strategy::Quick);
    assert_eq!(result.metadata.attempts, 1);
    assert!(result.metadata.confidence > 0.5);
}

#[tokio::test]
async fn result_wire_format_uses_stable_names() {
    let (web, _) = StubSearcher::new("web", SourceKind::Web, Behaviour::Return(quicksort_docs()));
    let agent = agent_with(fast_config(), vec![web], Arc::new(EchoModel(ECHO_REPLY.to_string())));
    let result = agent.research("quicksort in python", &ResearchOptions::default()).await;

    let json = serde_json::to_value(&result).unwrap();
    for key in ["summary", "findings", "statistics", "codeExamples", "suggestedQuestions", "metadata"] {
        assert!(json.get(key).is_some(), "missing {}", key);
    }
    let metadata = &json["metadata"];
    assert_eq!(metadata["sourcesCount"], 3);
    assert_eq!(metadata["researchDepth"], "quick");
    assert!(metadata.get("lastUpdated").is_some());
    assert!(metadata.get("error").is_none());
}

#[tokio::test]
async fn total_backend_failure_still_yields_content() {
    let (web, _) = StubSearcher::new("web", SourceKind::Web, Behaviour::Return(Vec::new()));
    let (code, _) = StubSearcher::new("code", SourceKind::Code, Behaviour::Return(Vec::new()));
    let agent = agent_with(fast_config(), vec![web, code], Arc::new(FailingModel));

    let result = agent.research("how does rust async work", &ResearchOptions::default()).await;

    assert!(result.metadata.error);
    assert!(!result.summary.is_empty());
    assert!(!result.findings.is_empty());
    assert!(!result.suggested_questions.is_empty());
    assert_eq!(result.metadata.attempts, 2);
    assert!(result.metadata.confidence < 0.5);
    // Programming query: a templated skeleton is still offered
    assert_eq!(result.code_examples.len(), 1);
    assert_eq!(result.code_examples[0].language, "rust");
}

#[tokio::test]
async fn research_finishes_within_its_budget() {
    let mut config = fast_config();
    config.strategies.quick.search_timeout_ms = 100;
    config.strategies.quick.processing_timeout_ms = 200;
    let bound = Duration::from_millis((100 + 200) * config.research.max_attempts as u64);

    let (slow, calls) = StubSearcher::new("slow", SourceKind::Web, Behaviour::Sleep(Duration::from_secs(10)));
    let agent = agent_with(config, vec![slow], Arc::new(HangingModel));

    let started = Instant::now();
    let result = agent.research("tide pools", &ResearchOptions::default()).await;
    let elapsed = started.elapsed();

    assert!(elapsed < bound + Duration::from_millis(250), "took {:?}", elapsed);
    assert!(result.is_degraded());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn hanging_model_is_bounded_by_processing_budget() {
    let mut config = fast_config();
    config.strategies.quick.processing_timeout_ms = 300;
    let (web, _) = StubSearcher::new("web", SourceKind::Web, Behaviour::Return(quicksort_docs()));
    let agent = agent_with(config, vec![web], Arc::new(HangingModel));

    let started = Instant::now();
    let result = agent.research("quicksort in python", &ResearchOptions::default()).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!result.is_degraded());
    assert!(!result.summary.is_empty());
    assert!(!result.findings.is_empty());
    assert_eq!(result.code_examples[0].origin, CodeOrigin::Fallback);
}

#[tokio::test]
async fn statistics_always_carry_a_number() {
    let reply = "STAT_START\nMETRIC: Average comparisons\nVALUE: 1.39 n log n\nCONTEXT: Quicksort average case\nSOURCE: https://realpython.com\nSTAT_END\n\
                 STAT_START\nMETRIC: Speed\nVALUE: very fast indeed\nCONTEXT: no number here\nSOURCE: https://example.com\nSTAT_END";
    let (web, _) = StubSearcher::new("web", SourceKind::Web, Behaviour::Return(quicksort_docs()));

    for model in [
        Arc::new(EchoModel(reply.to_string())) as Arc<dyn LanguageModel>,
        Arc::new(FailingModel) as Arc<dyn LanguageModel>,
    ] {
        let agent = agent_with(fast_config(), vec![web.clone()], model);
        let result = agent.research("quicksort in python", &ResearchOptions::default()).await;
        assert!(!result.statistics.is_empty());
        for statistic in &result.statistics {
            assert!(statistic.value.chars().any(|c| c.is_ascii_digit()), "{:?}", statistic);
            assert!(statistic.value.chars().count() < Statistic::MAX_VALUE_LEN);
        }
    }
}

#[tokio::test]
async fn streamed_statuses_are_ordered() {
    let (web, _) = StubSearcher::new("web", SourceKind::Web, Behaviour::Return(quicksort_docs()));
    let agent = agent_with(fast_config(), vec![web], Arc::new(EchoModel(ECHO_REPLY.to_string())));
    let (seen, callback) = recording_callback();

    agent
        .research_with_streaming("quicksort in python", &ResearchOptions::default(), callback)
        .await;

    let statuses = seen.lock().unwrap().clone();
    assert_monotonic(&statuses);
    let stages: Vec<ResearchStage> = statuses.iter().map(|s| s.stage).collect();
    assert!(stages.contains(&ResearchStage::Searching));
    assert!(stages.contains(&ResearchStage::Processing));
    assert!(stages.contains(&ResearchStage::Analyzing));
    assert!(!stages.contains(&ResearchStage::Downloading));
}

#[tokio::test]
async fn statuses_stay_ordered_across_a_retry() {
    let (web, calls) = StubSearcher::new("web", SourceKind::Web, Behaviour::EmptyThenReturn(quicksort_docs()));
    let agent = agent_with(fast_config(), vec![web], Arc::new(EchoModel(ECHO_REPLY.to_string())));
    let (seen, callback) = recording_callback();

    let result = agent
        .research_with_streaming("quicksort in python", &ResearchOptions::default(), callback)
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!result.is_degraded());
    assert_eq!(result.metadata.attempts, 2);
    assert_monotonic(&seen.lock().unwrap());
}

#[tokio::test]
async fn stream_ends_with_the_result_frame() {
    let (web, _) = StubSearcher::new("web", SourceKind::Web, Behaviour::Return(quicksort_docs()));
    let agent = agent_with(fast_config(), vec![web], Arc::new(EchoModel(ECHO_REPLY.to_string())));

    let frames: Vec<StreamFrame> = agent
        .research_stream("quicksort in python", ResearchOptions::default())
        .collect()
        .await;

    let (last, statuses) = frames.split_last().unwrap();
    assert!(matches!(last, StreamFrame::Research(result) if result.metadata.sources_count == 3));
    let statuses: Vec<ResearchStatus> = statuses
        .iter()
        .map(|frame| match frame {
            StreamFrame::Status(status) => status.clone(),
            other => panic!("unexpected frame before the end: {:?}", other),
        })
        .collect();
    assert_monotonic(&statuses);
}

#[tokio::test]
async fn short_query_makes_no_calls() {
    let (web, calls) = StubSearcher::new("web", SourceKind::Web, Behaviour::Return(quicksort_docs()));
    let agent = agent_with(fast_config(), vec![web], Arc::new(FailingModel));
    let (seen, callback) = recording_callback();

    let result = agent.research_with_streaming("a", &ResearchOptions::default(), callback).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!result.summary.is_empty());
    assert!(!result.suggested_questions.is_empty());
    assert_eq!(result.metadata.sources_count, 0);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn panicking_searcher_degrades_instead_of_escaping() {
    let (web, _) = StubSearcher::new("web", SourceKind::Web, Behaviour::Panic);
    let agent = agent_with(fast_config(), vec![web], Arc::new(FailingModel));
    let (seen, callback) = recording_callback();

    let result = agent
        .research_with_streaming("ocean currents", &ResearchOptions::default(), callback)
        .await;

    assert!(result.is_degraded());
    assert!(result.metadata.error_message.unwrap_or_default().contains("searcher exploded"));
    assert_monotonic(&seen.lock().unwrap());
}

#[tokio::test]
async fn cancelled_run_stops_before_searching() {
    let (web, calls) = StubSearcher::new("web", SourceKind::Web, Behaviour::Return(quicksort_docs()));
    let agent = agent_with(fast_config(), vec![web], Arc::new(FailingModel));

    let emitter = Arc::new(StatusEmitter::silent());
    emitter.cancel();
    let result = agent
        .research_with_emitter("quicksort in python", &ResearchOptions::default(), emitter)
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(result.is_degraded());
}

#[tokio::test]
async fn academic_sources_follow_the_strategy() {
    let (web, _) = StubSearcher::new("web", SourceKind::Web, Behaviour::Return(quicksort_docs()));
    let (papers, paper_calls) = StubSearcher::new("papers", SourceKind::Academic, Behaviour::Return(Vec::new()));
    let (repos, repo_calls) = StubSearcher::new("repos", SourceKind::Code, Behaviour::Return(Vec::new()));
    let agent = agent_with(
        fast_config(),
        vec![web, papers, repos],
        Arc::new(EchoModel(ECHO_REPLY.to_string())),
    );

    agent.research("quicksort in python", &ResearchOptions::default()).await;
    assert_eq!(paper_calls.load(Ordering::SeqCst), 0);
    assert_eq!(repo_calls.load(Ordering::SeqCst), 1);

    agent
        .research("quicksort in python", &ResearchOptions::with_strategy(Strategy::Comprehensive))
        .await;
    assert_eq!(paper_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn duplicate_urls_count_once() {
    let mut docs = quicksort_docs();
    let mut duplicate = docs[0].clone();
    duplicate.source_url = "https://DOCS.python.org/3/howto/sorting.html/".to_string();
    docs.push(duplicate);

    let (web, _) = StubSearcher::new("web", SourceKind::Web, Behaviour::Return(docs));
    let agent = agent_with(fast_config(), vec![web], Arc::new(EchoModel(ECHO_REPLY.to_string())));
    let result = agent.research("quicksort in python", &ResearchOptions::default()).await;

    assert_eq!(result.metadata.sources_count, 3);
}
