//! Code example extraction for programming queries
//!
//! Preference order: fenced blocks already present in the sources, then one
//! example generated by the language model, then a templated skeleton.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use delve_core::{
    try_with_deadline, AnalysisConfig, CodeExample, CodeOrigin, Deadline, LanguageModel, SourceDocument,
};
use delve_search::{query_terms, term_overlap};

use crate::fallback;
use crate::parser::{code_examples, fenced_blocks, parse_blocks};
use crate::prompts::{code_prompt, document_context};

/// Direct examples needed before generation is skipped
const MIN_DIRECT_EXAMPLES: usize = 2;
/// Code longer than this is a file dump rather than an example
const MAX_EXAMPLE_CHARS: usize = 4000;

/// Canonical name for fence tags and language labels
pub fn normalize_language(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "py" | "python3" => "python".to_string(),
        "js" | "jsx" | "node" => "javascript".to_string(),
        "ts" | "tsx" => "typescript".to_string(),
        "rs" => "rust".to_string(),
        "golang" => "go".to_string(),
        "c++" | "cxx" => "cpp".to_string(),
        "c#" | "cs" => "csharp".to_string(),
        "sh" | "shell" | "zsh" => "bash".to_string(),
        other => other.to_string(),
    }
}

fn has_braces(code: &str) -> bool {
    code.contains('{') && code.contains('}')
}

fn has_block_colon(code: &str) -> bool {
    code.lines().any(|line| line.trim_end().ends_with(':'))
}

/// Heuristic: the code contains the syntax tokens its language is recognisable by
pub fn is_structurally_valid(code: &str, language: &str) -> bool {
    let code = code.trim();
    if code.len() < 10 || code.len() > MAX_EXAMPLE_CHARS || code.lines().count() < 2 && code.len() < 20 {
        return false;
    }

    match normalize_language(language).as_str() {
        "python" => {
            (code.contains("def ") || code.contains("class ") || code.contains("import ") || code.contains("lambda"))
                && (has_block_colon(code) || code.contains("import "))
        }
        "javascript" | "typescript" => {
            (code.contains("function") || code.contains("=>") || code.contains("const ") || code.contains("let ") || code.contains("class "))
                && (has_braces(code) || code.contains("=>") || code.contains('('))
        }
        "rust" => (code.contains("fn ") || code.contains("struct ") || code.contains("impl ") || code.contains("let ")) && has_braces(code),
        "go" => (code.contains("func ") || code.contains("package ")) && has_braces(code),
        "java" | "csharp" | "kotlin" | "cpp" | "c" | "swift" | "scala" => {
            has_braces(code)
                && ["class ", "void ", "public ", "fun ", "func ", "int ", "return", "#include", "static "]
                    .iter()
                    .any(|token| code.contains(token))
        }
        "ruby" => code.contains("def ") && code.contains("end"),
        "php" => code.contains("function") && has_braces(code),
        "bash" => code.lines().count() >= 2 || code.contains('|') || code.contains("$"),
        "sql" => {
            let upper = code.to_ascii_uppercase();
            ["SELECT", "INSERT", "UPDATE", "CREATE", "DELETE"].iter().any(|kw| upper.contains(kw))
        }
        _ => {
            has_braces(code)
                || has_block_colon(code)
                || ["def ", "function", "fn ", "func "].iter().any(|token| code.contains(token))
        }
    }
}

pub struct CodeProcessor {
    model: Arc<dyn LanguageModel>,
    config: AnalysisConfig,
}

impl CodeProcessor {
    pub fn new(model: Arc<dyn LanguageModel>, config: AnalysisConfig) -> Self {
        Self { model, config }
    }

    /// Valid fenced blocks from the source documents, deduplicated by code
    pub fn extract_direct(&self, docs: &[SourceDocument], default_language: Option<&str>) -> Vec<CodeExample> {
        let mut examples: Vec<CodeExample> = Vec::new();
        for doc in docs {
            for (tag, code) in fenced_blocks(&doc.content) {
                let language = if tag.is_empty() {
                    default_language.unwrap_or_default().to_string()
                } else {
                    normalize_language(&tag)
                };
                if !is_structurally_valid(&code, &language) {
                    continue;
                }
                if examples.iter().any(|e| e.code.trim() == code.trim()) {
                    continue;
                }
                examples.push(CodeExample {
                    title: doc.title.clone(),
                    language,
                    code,
                    description: format!("Code from {}", doc.domain),
                    source: doc.source_url.clone(),
                    origin: CodeOrigin::Direct,
                });
            }
        }
        examples
    }

    async fn generate(
        &self,
        query: &str,
        language: &str,
        docs: &[SourceDocument],
        deadline: &Deadline,
    ) -> Vec<CodeExample> {
        let budget = deadline.cap(Duration::from_millis(self.config.code_timeout_ms));
        if budget.is_zero() {
            debug!("No time left for code generation");
            return Vec::new();
        }

        let prompt = code_prompt(query, language, &document_context(docs, self.config.doc_char_budget));
        let response = match try_with_deadline(budget, self.model.invoke(&prompt), "code_generation").await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Code generation failed");
                return Vec::new();
            }
        };

        code_examples(&parse_blocks(&response))
            .into_iter()
            .map(|mut example| {
                example.language = if example.language.is_empty() {
                    language.to_string()
                } else {
                    normalize_language(&example.language)
                };
                example.source = self.model.name().to_string();
                example.origin = CodeOrigin::Generated;
                example
            })
            .filter(|example| is_structurally_valid(&example.code, &example.language))
            .take(1)
            .collect()
    }

    /// Direct examples, topped up with a generated one, else a skeleton; capped and re-ranked
    pub async fn process(
        &self,
        query: &str,
        language: Option<&str>,
        docs: &[SourceDocument],
        deadline: &Deadline,
    ) -> Vec<CodeExample> {
        let mut examples = self.extract_direct(docs, language);
        let direct = examples.len();

        if direct < MIN_DIRECT_EXAMPLES {
            let target = language
                .map(str::to_string)
                .or_else(|| examples.first().map(|e| e.language.clone()))
                .unwrap_or_else(|| "python".to_string());
            examples.extend(self.generate(query, &target, docs, deadline).await);
        }

        if examples.is_empty() {
            examples.push(fallback::code_skeleton(query, language));
        }

        let ranked = rank_examples(query, examples, self.config.max_code_examples);
        info!(direct, returned = ranked.len(), "Code examples ready");
        ranked
    }
}

/// Stable sort by query-term overlap with the example, capped
pub fn rank_examples(query: &str, examples: Vec<CodeExample>, max: usize) -> Vec<CodeExample> {
    let terms = query_terms(query);
    let mut scored: Vec<(f64, CodeExample)> = examples
        .into_iter()
        .map(|example| {
            let text = format!("{} {} {}", example.title, example.description, example.code);
            (term_overlap(&terms, &text), example)
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().take(max).map(|(_, example)| example).collect()
}
