//! Deterministic fallback content
//!
//! Every extraction pass has a templated answer built from the query (and the
//! top documents, when there are any) so a result is never empty.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

use delve_core::{
    AnalysisConfig, CodeExample, CodeOrigin, Finding, Relevance, ResearchMetadata, ResearchResult,
    SourceDocument, Statistic,
};

use crate::strategy::{classify, StrategyPlan};

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b\d[\d,]*(?:\.\d+)?\s*(?:%|percent\b|ms\b|seconds?\b|minutes?\b|hours?\b|x\b|times\b|million\b|billion\b|thousand\b|k\b|mb\b|gb\b|tb\b)?",
    )
    .expect("valid number regex")
});

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:19|20)\d{2}$").expect("valid year regex"));

const MAX_SENTENCE_CHARS: usize = 300;

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

pub fn summary(query: &str, docs: &[SourceDocument]) -> String {
    if docs.is_empty() {
        return format!(
            "Research on \"{}\" could not gather enough source material for a detailed answer. \
             The suggested questions below may help narrow the topic.",
            query
        );
    }
    let titles: Vec<&str> = docs.iter().take(3).map(|d| d.title.as_str()).collect();
    format!(
        "Research on \"{}\" drew on {} sources, including {}. \
         The key findings below summarize what these sources cover.",
        query,
        docs.len(),
        titles.join("; ")
    )
}

pub fn findings(query: &str, docs: &[SourceDocument], max: usize) -> Vec<Finding> {
    let mut found: Vec<Finding> = docs
        .iter()
        .take(max.min(3))
        .map(|doc| Finding {
            title: doc.title.clone(),
            content: truncate(doc.content.split("\n\n").next().unwrap_or_default().trim(), 240),
            source: doc.source_url.clone(),
            relevance: Relevance::Medium,
            category: "Source overview".to_string(),
        })
        .filter(|f| !f.content.is_empty())
        .collect();

    if found.is_empty() {
        found.push(Finding {
            title: format!("Overview of {}", query),
            content: format!(
                "No detailed sources were available for \"{}\". Consider consulting official \
                 documentation or recent survey articles on the topic.",
                query
            ),
            source: String::new(),
            relevance: Relevance::Low,
            category: "General".to_string(),
        });
    }
    found
}

pub fn questions(query: &str, max: usize) -> Vec<String> {
    [
        format!("What are the main concepts behind {}?", query),
        format!("What are common pitfalls when dealing with {}?", query),
        format!("How does {} compare to its alternatives?", query),
        format!("What are recent developments related to {}?", query),
        format!("Where can I find authoritative resources about {}?", query),
    ]
    .into_iter()
    .take(max.max(1))
    .collect()
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\n', '!', '?'])
        .flat_map(|part| part.split(". "))
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.chars().count() <= MAX_SENTENCE_CHARS)
}

/// Numeric sentences mined from the documents, else a count of analyzed sources
pub fn statistics(query: &str, docs: &[SourceDocument], max: usize) -> Vec<Statistic> {
    let mut stats: Vec<Statistic> = Vec::new();

    'documents: for doc in docs {
        for sentence in sentences(&doc.content) {
            let Some(value) = NUMBER
                .find_iter(sentence)
                .map(|m| m.as_str().trim().to_string())
                .find(|v| !YEAR.is_match(v))
            else {
                continue;
            };
            if !Statistic::is_valid_value(&value) || stats.iter().any(|s| s.value == value && s.source == doc.source_url) {
                continue;
            }
            stats.push(Statistic {
                metric: truncate(&doc.title, 80),
                value,
                context: truncate(sentence, 240),
                source: doc.source_url.clone(),
            });
            if stats.len() >= max {
                break 'documents;
            }
        }
    }

    if stats.is_empty() {
        stats.push(Statistic {
            metric: "Sources analyzed".to_string(),
            value: docs.len().to_string(),
            context: format!("Documents reviewed while researching \"{}\"", query),
            source: "delve".to_string(),
        });
    }
    stats
}

/// Templated skeleton in the given language (python when unknown)
pub fn code_skeleton(query: &str, language: Option<&str>) -> CodeExample {
    let name = identifier(query);
    let language = language.unwrap_or("python");
    let code = match language {
        "python" => format!(
            "# {query}\ndef {name}(data):\n    \"\"\"Starting point for {query}.\"\"\"\n    # TODO: implement\n    return data\n\n\nif __name__ == \"__main__\":\n    print({name}([3, 1, 2]))"
        ),
        "javascript" | "typescript" => format!(
            "// {query}\nfunction {name}(input) {{\n  // TODO: implement\n  return input;\n}}\n\nconsole.log({name}([3, 1, 2]));"
        ),
        "rust" => format!(
            "// {query}\nfn {name}(input: Vec<i32>) -> Vec<i32> {{\n    // TODO: implement\n    input\n}}\n\nfn main() {{\n    println!(\"{{:?}}\", {name}(vec![3, 1, 2]));\n}}"
        ),
        "go" => format!(
            "// {query}\npackage main\n\nimport \"fmt\"\n\nfunc {name}(input []int) []int {{\n\t// TODO: implement\n\treturn input\n}}\n\nfunc main() {{\n\tfmt.Println({name}([]int{{3, 1, 2}}))\n}}"
        ),
        "java" => format!(
            "// {query}\npublic class Example {{\n    static int[] {name}(int[] input) {{\n        // TODO: implement\n        return input;\n    }}\n\n    public static void main(String[] args) {{\n        System.out.println(java.util.Arrays.toString({name}(new int[]{{3, 1, 2}})));\n    }}\n}}"
        ),
        "cpp" => format!(
            "// {query}\n#include <iostream>\n#include <vector>\n\nstd::vector<int> {name}(std::vector<int> input) {{\n    // TODO: implement\n    return input;\n}}\n\nint main() {{\n    for (int value : {name}({{3, 1, 2}})) std::cout << value << ' ';\n    return 0;\n}}"
        ),
        "csharp" => format!(
            "// {query}\nusing System;\n\npublic static class Example {{\n    static int[] {name}(int[] input) {{\n        // TODO: implement\n        return input;\n    }}\n\n    public static void Main() {{\n        Console.WriteLine(string.Join(\", \", {name}(new[] {{ 3, 1, 2 }})));\n    }}\n}}"
        ),
        "kotlin" => format!(
            "// {query}\nfun {name}(input: List<Int>): List<Int> {{\n    // TODO: implement\n    return input\n}}\n\nfun main() {{\n    println({name}(listOf(3, 1, 2)))\n}}"
        ),
        "swift" => format!(
            "// {query}\nfunc {name}(_ input: [Int]) -> [Int] {{\n    // TODO: implement\n    return input\n}}\n\nprint({name}([3, 1, 2]))"
        ),
        "scala" => format!(
            "// {query}\nobject Example {{\n  def {name}(input: Seq[Int]): Seq[Int] = {{\n    // TODO: implement\n    input\n  }}\n\n  def main(args: Array[String]): Unit = println({name}(Seq(3, 1, 2)))\n}}"
        ),
        "ruby" => format!(
            "# {query}\ndef {name}(input)\n  # TODO: implement\n  input\nend\n\np {name}([3, 1, 2])"
        ),
        "php" => format!(
            "<?php\n// {query}\nfunction {name}(array $input): array {{\n    // TODO: implement\n    return $input;\n}}\n\nprint_r({name}([3, 1, 2]));"
        ),
        other => {
            let comment = line_comment(other);
            format!(
                "{comment} {query}\n{comment} Starter outline in {other}:\n{comment} 1. Define a small sample input\n{comment} 2. Implement {name}\n{comment} 3. Print the result for the sample"
            )
        }
    };

    CodeExample {
        title: format!("Starter template: {}", query),
        language: language.to_string(),
        code,
        description: format!("A minimal {} skeleton to start exploring {}.", language, query),
        source: "template".to_string(),
        origin: CodeOrigin::Fallback,
    }
}

fn line_comment(language: &str) -> &'static str {
    match language {
        "haskell" | "sql" | "lua" => "--",
        "bash" | "shell" | "elixir" | "r" | "perl" | "yaml" => "#",
        _ => "//",
    }
}

/// snake_case identifier from the first meaningful words of a query
fn identifier(query: &str) -> String {
    let words: Vec<String> = query
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() > 2 && !w.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .take(3)
        .map(str::to_ascii_lowercase)
        .collect();
    if words.is_empty() {
        "solve".to_string()
    } else {
        words.join("_")
    }
}

/// Result returned when the pipeline gave up: templated content, low confidence, `error` set
pub fn degraded_result(
    query: &str,
    plan: &StrategyPlan,
    limits: &AnalysisConfig,
    reason: &str,
    attempts: u32,
    elapsed_ms: u64,
) -> ResearchResult {
    let code_examples = if plan.is_programming {
        vec![code_skeleton(query, plan.language)]
    } else {
        Vec::new()
    };

    ResearchResult {
        summary: summary(query, &[]),
        findings: findings(query, &[], limits.max_findings),
        statistics: Vec::new(),
        code_examples,
        suggested_questions: questions(query, limits.max_questions),
        metadata: ResearchMetadata {
            sources_count: 0,
            confidence: 0.1,
            quality_score: 0.0,
            research_depth: plan.strategy,
            last_updated: Utc::now(),
            attempts,
            elapsed_ms,
            error: true,
            error_message: Some(reason.to_string()),
        },
    }
}

/// Canned answer for a query too short to research; no network calls are made
pub fn invalid_query_result(raw: &str, reason: &str) -> ResearchResult {
    ResearchResult {
        summary: "Please ask a more specific question so there is something to research. \
                  Include the topic and what you want to know about it."
            .to_string(),
        findings: Vec::new(),
        statistics: Vec::new(),
        code_examples: Vec::new(),
        suggested_questions: vec![
            "How does quicksort work in Python?".to_string(),
            "What are the latest advances in quantum error correction?".to_string(),
            "Which Rust web frameworks are most widely used?".to_string(),
        ],
        metadata: ResearchMetadata {
            sources_count: 0,
            confidence: 0.0,
            quality_score: 0.0,
            research_depth: classify(raw),
            last_updated: Utc::now(),
            attempts: 0,
            elapsed_ms: 0,
            error: false,
            error_message: Some(reason.to_string()),
        },
    }
}
