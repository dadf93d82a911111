//! Document processing
//!
//! Quality filtering, ranking, chunking, scoring and batched indexing of the
//! documents gathered for one research call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use delve_core::{EmbeddingStore, ProcessingConfig, SourceDocument};
use delve_search::{is_authoritative, normalize_url, query_terms};

/// Documents shorter than this are penalized when ranking
const SHORT_DOCUMENT_CHARS: usize = 300;
const SHORT_DOCUMENT_PENALTY: f64 = 0.7;
const AUTHORITATIVE_BOOST: f64 = 0.15;
/// Occurrences of a term beyond this add nothing
const TERM_FREQUENCY_CAP: usize = 5;

/// Punctuation that ordinary prose uses and is not counted as junk
const PROSE_PUNCTUATION: &str = ".,;:!?'\"()-";

/// Ordered, deduplicated documents owned by a single research call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedDocumentSet {
    documents: Vec<SourceDocument>,
}

impl RankedDocumentSet {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[SourceDocument] {
        &self.documents
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SourceDocument> {
        self.documents.iter()
    }

    pub fn authoritative_count(&self) -> usize {
        self.documents
            .iter()
            .filter(|doc| is_authoritative(&doc.domain))
            .count()
    }

    pub fn into_documents(self) -> Vec<SourceDocument> {
        self.documents
    }
}

/// Outcome of indexing chunks into an [`EmbeddingStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub batches: usize,
    pub accepted_batches: usize,
    pub skipped_batches: usize,
    pub documents_indexed: usize,
}

/// Fraction of characters that are neither alphanumeric, whitespace nor prose punctuation
pub fn special_char_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut special = 0usize;
    for c in text.chars() {
        total += 1;
        if !(c.is_alphanumeric() || c.is_whitespace() || PROSE_PUNCTUATION.contains(c)) {
            special += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    special as f64 / total as f64
}

/// Default chunk overlap: 15% of the chunk size
pub fn default_overlap(chunk_size: usize) -> usize {
    chunk_size * 15 / 100
}

/// 0.5 base, +0.05 per document up to +0.3, +0.1 per authoritative source,
/// +0.05 per finding up to +0.2, clamped to 1.0
pub fn confidence(docs: &[SourceDocument], findings_count: usize) -> f64 {
    let documents = (0.05 * docs.len() as f64).min(0.3);
    let authoritative = 0.1 * docs.iter().filter(|doc| is_authoritative(&doc.domain)).count() as f64;
    let findings = (0.05 * findings_count as f64).min(0.2);
    (0.5 + documents + authoritative + findings).min(1.0)
}

/// 0.5 base + min(average length / 2000, 0.3) + authoritative fraction × 0.2, clamped to 1.0
pub fn quality_score(docs: &[SourceDocument]) -> f64 {
    if docs.is_empty() {
        return 0.5;
    }
    let count = docs.len() as f64;
    let average_length = docs.iter().map(|doc| doc.content_length as f64).sum::<f64>() / count;
    let authoritative_fraction =
        docs.iter().filter(|doc| is_authoritative(&doc.domain)).count() as f64 / count;
    (0.5 + (average_length / 2000.0).min(0.3) + authoritative_fraction * 0.2).min(1.0)
}

pub struct DocumentProcessor {
    config: ProcessingConfig,
}

impl DocumentProcessor {
    pub fn new(config: ProcessingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Drop documents outside the length window or dominated by special characters
    pub fn filter_quality(&self, docs: Vec<SourceDocument>) -> Vec<SourceDocument> {
        let before = docs.len();
        let kept: Vec<SourceDocument> = docs
            .into_iter()
            .filter(|doc| {
                let length = doc.content.chars().count();
                length >= self.config.min_content_length
                    && length <= self.config.max_content_length
                    && special_char_ratio(&doc.content) <= self.config.max_special_char_ratio
            })
            .collect();
        debug!(before, after = kept.len(), "Quality filter applied");
        kept
    }

    /// Score by capped term frequency blended with the searcher's score, penalize short
    /// documents, boost authoritative domains, dedupe by normalized URL and keep the top `k`.
    pub fn rank(&self, query: &str, docs: Vec<SourceDocument>, k: usize) -> RankedDocumentSet {
        let terms = query_terms(query);
        let mut ranked: Vec<SourceDocument> = Vec::with_capacity(docs.len());
        let mut positions: HashMap<String, usize> = HashMap::new();

        for doc in docs {
            let score = relevance(&terms, &doc);
            let doc = doc.with_score(score);
            let key = normalize_url(&doc.source_url);
            match positions.get(&key) {
                Some(&index) => {
                    if doc.relevance_score > ranked[index].relevance_score {
                        ranked[index] = doc;
                    }
                }
                None => {
                    positions.insert(key, ranked.len());
                    ranked.push(doc);
                }
            }
        }

        ranked.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        ranked.truncate(k);
        RankedDocumentSet { documents: ranked }
    }

    /// Split every document into chunks of at most `chunk_size` new characters,
    /// each prefixed with up to `overlap` characters carried from the previous chunk.
    pub fn chunk(&self, docs: &[SourceDocument], chunk_size: usize, overlap: usize) -> Vec<SourceDocument> {
        docs.iter()
            .flat_map(|doc| {
                split_text(&doc.content, chunk_size, overlap)
                    .into_iter()
                    .map(move |text| SourceDocument {
                        content_length: text.chars().count(),
                        content: text,
                        ..doc.clone()
                    })
            })
            .collect()
    }

    /// Insert chunks in batches. A failed batch is retried once after a fixed delay and
    /// then skipped; batches already accepted stay in the store.
    pub async fn index(&self, store: &Arc<dyn EmbeddingStore>, chunks: &[SourceDocument]) -> IndexReport {
        let batch_size = self.config.embedding_batch_size.max(1);
        let retry_delay = Duration::from_millis(self.config.batch_retry_delay_ms);
        let mut report = IndexReport::default();

        for (batch_index, batch) in chunks.chunks(batch_size).enumerate() {
            report.batches += 1;

            let mut outcome = store.add_documents(batch).await;
            if let Err(e) = &outcome {
                warn!(batch = batch_index, size = batch.len(), error = %e, "Embedding batch failed, retrying once");
                tokio::time::sleep(retry_delay).await;
                outcome = store.add_documents(batch).await;
            }

            match outcome {
                Ok(()) => {
                    report.accepted_batches += 1;
                    report.documents_indexed += batch.len();
                }
                Err(e) => {
                    report.skipped_batches += 1;
                    warn!(batch = batch_index, size = batch.len(), error = %e, "Skipping embedding batch");
                }
            }
        }

        info!(
            batches = report.batches,
            accepted = report.accepted_batches,
            skipped = report.skipped_batches,
            documents = report.documents_indexed,
            "Indexing completed"
        );
        report
    }
}

fn relevance(terms: &[String], doc: &SourceDocument) -> f64 {
    let term_frequency = if terms.is_empty() {
        0.0
    } else {
        let text = format!("{} {}", doc.title, doc.content).to_lowercase();
        let hits: usize = terms
            .iter()
            .map(|term| text.matches(term.as_str()).count().min(TERM_FREQUENCY_CAP))
            .sum();
        hits as f64 / (TERM_FREQUENCY_CAP * terms.len()) as f64
    };

    let mut score = 0.6 * term_frequency + 0.4 * doc.relevance_score.clamp(0.0, 1.0);
    if doc.content_length < SHORT_DOCUMENT_CHARS {
        score *= SHORT_DOCUMENT_PENALTY;
    }
    if is_authoritative(&doc.domain) {
        score += AUTHORITATIVE_BOOST;
    }
    score
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// A piece of text that fits in one chunk
struct Unit {
    text: String,
    starts_paragraph: bool,
}

/// Split on sentence-ending punctuation followed by whitespace
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(next_index, next)) = chars.peek() {
            if next.is_whitespace() {
                let sentence = paragraph[start..next_index].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = next_index;
            }
        }
    }
    let rest = paragraph[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// Split an oversized sentence into pieces of at most `size` characters, preferring whitespace
fn hard_split(sentence: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + size).min(chars.len());
        if end < chars.len() {
            if let Some(space) = chars[start..end].iter().rposition(|c| c.is_whitespace()) {
                if space > size / 2 {
                    end = start + space;
                }
            }
        }
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        start = end;
    }
    pieces
}

fn split_units(text: &str, chunk_size: usize) -> Vec<Unit> {
    let normalized = text.replace("\r\n", "\n");
    let mut units = Vec::new();
    for paragraph in normalized.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if char_len(paragraph) <= chunk_size {
            units.push(Unit {
                text: paragraph.to_string(),
                starts_paragraph: true,
            });
            continue;
        }
        let mut first = true;
        for sentence in split_sentences(paragraph) {
            let pieces = if char_len(&sentence) <= chunk_size {
                vec![sentence]
            } else {
                hard_split(&sentence, chunk_size)
            };
            for piece in pieces {
                units.push(Unit {
                    text: piece,
                    starts_paragraph: first,
                });
                first = false;
            }
        }
    }
    units
}

/// Last `overlap` characters of a chunk, starting at a word boundary when one exists
fn overlap_tail(chunk: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let total = char_len(chunk);
    if total <= overlap {
        return String::new();
    }
    let start = chunk
        .char_indices()
        .nth(total - overlap)
        .map(|(index, _)| index)
        .unwrap_or(0);
    let tail = &chunk[start..];
    let at_boundary = chunk[..start].ends_with(char::is_whitespace);
    let tail = if at_boundary {
        tail
    } else {
        match tail.find(char::is_whitespace) {
            Some(space) => &tail[space..],
            None => tail,
        }
    };
    tail.trim().to_string()
}

/// Paragraph-then-sentence chunking with overlap carried from the previous chunk
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);
    if char_len(text) <= chunk_size {
        return vec![text.to_string()];
    }
    let overlap = overlap.min(chunk_size / 2);

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut fresh = 0usize;

    for unit in split_units(text, chunk_size) {
        let unit_len = char_len(&unit.text);
        let separator = if current.is_empty() {
            ""
        } else if unit.starts_paragraph && fresh > 0 {
            "\n\n"
        } else {
            " "
        };

        if fresh > 0 && fresh + separator.len() + unit_len > chunk_size {
            let finished = std::mem::take(&mut current);
            let tail = overlap_tail(&finished, overlap);
            chunks.push(finished);
            fresh = 0;
            if !tail.is_empty() && unit_len < chunk_size {
                current = tail;
                current.push(' ');
                fresh = 1;
            }
        } else if !separator.is_empty() {
            current.push_str(separator);
            fresh += separator.len();
        }

        current.push_str(&unit.text);
        fresh += unit_len;
    }

    if fresh > 0 {
        chunks.push(current);
    }
    chunks
}
