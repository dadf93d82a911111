//! Prompt templates for the extraction passes

use delve_core::SourceDocument;

/// Numbered source excerpts, each cut to `char_budget` characters
pub fn document_context(docs: &[SourceDocument], char_budget: usize) -> String {
    docs.iter()
        .enumerate()
        .map(|(index, doc)| {
            let excerpt: String = doc.content.chars().take(char_budget).collect();
            let ellipsis = if doc.content.chars().count() > char_budget { "..." } else { "" };
            format!(
                "[{}] {}\nURL: {}\n{}{}",
                index + 1,
                doc.title,
                doc.source_url,
                excerpt.trim(),
                ellipsis
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn summary_prompt(query: &str, context: &str) -> String {
    format!(
        r#"You are a research assistant. Using only the sources below, write a concise summary (3-5 sentences) answering the question.

Question: "{query}"

Sources:
{context}

Write plain prose. Do not use headings, lists or code."#
    )
}

pub fn findings_prompt(query: &str, context: &str, max_findings: usize) -> String {
    format!(
        r#"Extract up to {max_findings} key findings about "{query}" from the sources below.

Sources:
{context}

Write each finding exactly in this format:
FINDING_START
TITLE: short title
CONTENT: one or two sentences
RELEVANCE: High, Medium or Low
CATEGORY: one or two words
SOURCE: URL of the supporting source
FINDING_END"#
    )
}

pub fn statistics_prompt(query: &str, context: &str, max_statistics: usize) -> String {
    format!(
        r#"Extract up to {max_statistics} quantitative data points related to "{query}" from the sources below. Only include numbers that appear in the sources.

Sources:
{context}

Write each data point exactly in this format:
STAT_START
METRIC: what is measured
VALUE: the number with its unit
CONTEXT: one sentence of context
SOURCE: URL of the source
STAT_END"#
    )
}

pub fn questions_prompt(query: &str, context: &str, max_questions: usize) -> String {
    format!(
        r#"Based on the research question "{query}" and the sources below, suggest {max_questions} follow-up questions a curious reader would ask next.

Sources:
{context}

Write one question per line, each starting with "Q: "."#
    )
}

pub fn code_prompt(query: &str, language: &str, context: &str) -> String {
    format!(
        r#"Write one short, complete and runnable {language} example for: "{query}".

Reference material:
{context}

Answer exactly in this format:
TITLE: short title
LANGUAGE: {language}
```{language}
the code
```
DESCRIPTION: one sentence explaining the example"#
    )
}
