//! Content analysis passes over the processed documents
//!
//! Each pass is one language model call under its own timeout, capped by the
//! processing deadline. A pass that fails, times out or yields nothing usable
//! falls back to deterministic content, so every pass always returns something.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use delve_core::{
    try_with_deadline, AnalysisConfig, Deadline, Finding, LanguageModel, SourceDocument, Statistic,
};

use crate::fallback;
use crate::parser::{self, parse_blocks};
use crate::prompts::{document_context, findings_prompt, questions_prompt, statistics_prompt, summary_prompt};

/// Shortest model summary accepted before falling back
const MIN_SUMMARY_CHARS: usize = 20;

pub struct ContentAnalyzer {
    model: Arc<dyn LanguageModel>,
    config: AnalysisConfig,
}

impl ContentAnalyzer {
    pub fn new(model: Arc<dyn LanguageModel>, config: AnalysisConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// One model call; `None` when the deadline is spent or the call fails
    async fn run_pass(&self, pass: &str, timeout_ms: u64, prompt: String, deadline: &Deadline) -> Option<String> {
        let budget = deadline.cap(Duration::from_millis(timeout_ms));
        if budget.is_zero() {
            debug!(pass, "Skipping analysis pass, no time left");
            return None;
        }

        match try_with_deadline(budget, self.model.invoke(&prompt), pass).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(pass, model = self.model.name(), error = %e, "Analysis pass failed, using fallback");
                None
            }
        }
    }

    fn context(&self, docs: &[SourceDocument]) -> String {
        document_context(docs, self.config.doc_char_budget)
    }

    pub async fn summarize(&self, query: &str, docs: &[SourceDocument], deadline: &Deadline) -> String {
        let prompt = summary_prompt(query, &self.context(docs));
        self.run_pass("summary", self.config.summary_timeout_ms, prompt, deadline)
            .await
            .map(|text| parser::strip_blocks(&text))
            .filter(|text| text.chars().count() >= MIN_SUMMARY_CHARS)
            .unwrap_or_else(|| fallback::summary(query, docs))
    }

    pub async fn extract_findings(&self, query: &str, docs: &[SourceDocument], deadline: &Deadline) -> Vec<Finding> {
        let max = self.config.max_findings;
        let prompt = findings_prompt(query, &self.context(docs), max);
        let mut found = self
            .run_pass("findings", self.config.findings_timeout_ms, prompt, deadline)
            .await
            .map(|text| parser::findings(&parse_blocks(&text)))
            .unwrap_or_default();

        if found.is_empty() {
            return fallback::findings(query, docs, max);
        }
        found.truncate(max);
        found
    }

    pub async fn extract_statistics(&self, query: &str, docs: &[SourceDocument], deadline: &Deadline) -> Vec<Statistic> {
        let max = self.config.max_statistics;
        let prompt = statistics_prompt(query, &self.context(docs), max);
        let mut stats = self
            .run_pass("statistics", self.config.statistics_timeout_ms, prompt, deadline)
            .await
            .map(|text| parser::statistics(&parse_blocks(&text)))
            .unwrap_or_default();

        if stats.is_empty() {
            return fallback::statistics(query, docs, max);
        }
        stats.truncate(max);
        stats
    }

    pub async fn suggest_questions(&self, query: &str, docs: &[SourceDocument], deadline: &Deadline) -> Vec<String> {
        let max = self.config.max_questions;
        let prompt = questions_prompt(query, &self.context(docs), max);
        let mut seen = HashSet::new();
        let mut questions: Vec<String> = self
            .run_pass("questions", self.config.questions_timeout_ms, prompt, deadline)
            .await
            .map(|text| parser::questions(&parse_blocks(&text)))
            .unwrap_or_default()
            .into_iter()
            .filter(|question| seen.insert(question.trim().to_lowercase()))
            .collect();

        if questions.is_empty() {
            return fallback::questions(query, max);
        }
        questions.truncate(max);
        questions
    }
}
