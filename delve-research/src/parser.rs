//! Tagged-block parser for language model output
//!
//! Model replies are free text containing tagged blocks:
//!
//! ````text
//! FINDING_START
//! TITLE: ...
//! CONTENT: ...
//! RELEVANCE: High|Medium|Low
//! CATEGORY: ...
//! SOURCE: ...
//! FINDING_END
//!
//! STAT_START
//! METRIC: ...
//! VALUE: ...
//! CONTEXT: ...
//! SOURCE: ...
//! STAT_END
//!
//! Q: a follow-up question
//!
//! TITLE: ...
//! LANGUAGE: ...
//! ```lang
//! code
//! ```
//! DESCRIPTION: ...
//! ````
//!
//! Anything that does not match is ignored, and a malformed block is skipped
//! without affecting its neighbours.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use delve_core::{CodeExample, CodeOrigin, Finding, Relevance, Statistic};

static FINDING_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)FINDING_START(.*?)FINDING_END").expect("valid finding regex"));

static STAT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)STAT_START(.*?)STAT_END").expect("valid stat regex"));

static QUESTION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:\d+[.)][ \t]*)?Q:[ \t]*(.+?)[ \t]*$").expect("valid question regex"));

static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)TITLE:[ \t]*(?P<title>[^\n]+)\n\s*LANGUAGE:[ \t]*(?P<language>[^\n]+)\n\s*```[^\n]*\n(?P<code>.*?)```(?:[ \t]*\n\s*DESCRIPTION:[ \t]*(?P<description>[^\n]+))?",
    )
    .expect("valid code block regex")
});

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*(?P<language>[A-Za-z0-9_+#-]*)[^\n]*\n(?P<code>.*?)```").expect("valid fence regex")
});

/// Only these keys open a field; other `WORD:` lines continue the current value
static FIELD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*\**(TITLE|CONTENT|RELEVANCE|CATEGORY|CONFIDENCE|METRIC|VALUE|CONTEXT|SOURCE|LANGUAGE|DESCRIPTION)\**\s*:\s*(.*)$",
    )
    .expect("valid field regex")
});

/// One recognised unit of model output
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBlock {
    Finding(Finding),
    Statistic(Statistic),
    Question(String),
    CodeExample(CodeExample),
}

/// Shortest accepted follow-up question
const MIN_QUESTION_CHARS: usize = 10;

/// Split a block body into `KEY: value` fields. Lines that are not a field
/// continue the previous field's value.
fn parse_fields(body: &str) -> HashMap<String, String> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut current: Option<String> = None;

    for line in body.lines() {
        if let Some(captures) = FIELD_LINE.captures(line) {
            let key = captures[1].trim().to_ascii_uppercase().replace(' ', "_");
            let value = captures[2].trim().to_string();
            fields.insert(key.clone(), value);
            current = Some(key);
        } else if let Some(key) = &current {
            let continuation = line.trim();
            if continuation.is_empty() {
                continue;
            }
            if let Some(value) = fields.get_mut(key) {
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(continuation);
            }
        }
    }
    fields
}

fn field(fields: &HashMap<String, String>, key: &str) -> Option<String> {
    fields
        .get(key)
        .map(|v| v.trim().trim_matches('*').trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_finding(body: &str) -> Option<Finding> {
    let fields = parse_fields(body);
    let title = field(&fields, "TITLE")?;
    let content = field(&fields, "CONTENT")?;
    Some(Finding {
        title,
        content,
        source: field(&fields, "SOURCE").unwrap_or_default(),
        relevance: field(&fields, "RELEVANCE")
            .map(|r| Relevance::parse_lenient(&r))
            .unwrap_or(Relevance::Medium),
        category: field(&fields, "CATEGORY").unwrap_or_else(|| "General".to_string()),
    })
}

fn parse_statistic(body: &str) -> Option<Statistic> {
    let fields = parse_fields(body);
    let metric = field(&fields, "METRIC")?;
    let value = field(&fields, "VALUE")?;
    if !Statistic::is_valid_value(&value) {
        return None;
    }
    Some(Statistic {
        metric,
        value,
        context: field(&fields, "CONTEXT").unwrap_or_default(),
        source: field(&fields, "SOURCE").unwrap_or_default(),
    })
}

fn overlaps(taken: &[Range<usize>], span: &Range<usize>) -> bool {
    taken.iter().any(|r| r.start < span.end && span.start < r.end)
}

/// Extract every well-formed block, in the order they appear in `text`
pub fn parse_blocks(text: &str) -> Vec<ParsedBlock> {
    let mut blocks: Vec<(usize, ParsedBlock)> = Vec::new();
    let mut taken: Vec<Range<usize>> = Vec::new();

    for captures in FINDING_BLOCK.captures_iter(text) {
        let span = captures.get(0).map(|m| m.range()).unwrap_or_default();
        taken.push(span.clone());
        if let Some(finding) = parse_finding(&captures[1]) {
            blocks.push((span.start, ParsedBlock::Finding(finding)));
        }
    }

    for captures in STAT_BLOCK.captures_iter(text) {
        let span = captures.get(0).map(|m| m.range()).unwrap_or_default();
        taken.push(span.clone());
        if let Some(statistic) = parse_statistic(&captures[1]) {
            blocks.push((span.start, ParsedBlock::Statistic(statistic)));
        }
    }

    for captures in CODE_BLOCK.captures_iter(text) {
        let span = captures.get(0).map(|m| m.range()).unwrap_or_default();
        if overlaps(&taken, &span) {
            continue;
        }
        taken.push(span.clone());
        let code = captures["code"].trim_end().to_string();
        if code.trim().is_empty() {
            continue;
        }
        blocks.push((
            span.start,
            ParsedBlock::CodeExample(CodeExample {
                title: captures["title"].trim().to_string(),
                language: captures["language"].trim().to_ascii_lowercase(),
                code,
                description: captures
                    .name("description")
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default(),
                source: String::new(),
                origin: CodeOrigin::Generated,
            }),
        ));
    }

    // Bare fences the structured form did not claim
    for captures in FENCE.captures_iter(text) {
        let span = captures.get(0).map(|m| m.range()).unwrap_or_default();
        if overlaps(&taken, &span) {
            continue;
        }
        taken.push(span.clone());
        let code = captures["code"].trim_end().to_string();
        if code.trim().is_empty() {
            continue;
        }
        blocks.push((
            span.start,
            ParsedBlock::CodeExample(CodeExample {
                title: "Example".to_string(),
                language: captures["language"].trim().to_ascii_lowercase(),
                code,
                description: String::new(),
                source: String::new(),
                origin: CodeOrigin::Generated,
            }),
        ));
    }

    for captures in QUESTION_LINE.captures_iter(text) {
        let span = captures.get(0).map(|m| m.range()).unwrap_or_default();
        if overlaps(&taken, &span) {
            continue;
        }
        let question = captures[1].trim().to_string();
        if question.chars().count() > MIN_QUESTION_CHARS {
            blocks.push((span.start, ParsedBlock::Question(question)));
        }
    }

    blocks.sort_by_key(|(position, _)| *position);
    blocks.into_iter().map(|(_, block)| block).collect()
}

pub fn findings(blocks: &[ParsedBlock]) -> Vec<Finding> {
    blocks
        .iter()
        .filter_map(|b| match b {
            ParsedBlock::Finding(f) => Some(f.clone()),
            _ => None,
        })
        .collect()
}

pub fn statistics(blocks: &[ParsedBlock]) -> Vec<Statistic> {
    blocks
        .iter()
        .filter_map(|b| match b {
            ParsedBlock::Statistic(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

pub fn questions(blocks: &[ParsedBlock]) -> Vec<String> {
    blocks
        .iter()
        .filter_map(|b| match b {
            ParsedBlock::Question(q) => Some(q.clone()),
            _ => None,
        })
        .collect()
}

pub fn code_examples(blocks: &[ParsedBlock]) -> Vec<CodeExample> {
    blocks
        .iter()
        .filter_map(|b| match b {
            ParsedBlock::CodeExample(c) => Some(c.clone()),
            _ => None,
        })
        .collect()
}

/// Fenced code blocks in arbitrary text, as `(language, code)` pairs
pub fn fenced_blocks(text: &str) -> Vec<(String, String)> {
    FENCE
        .captures_iter(text)
        .map(|c| (c["language"].trim().to_ascii_lowercase(), c["code"].trim_end().to_string()))
        .filter(|(_, code)| !code.trim().is_empty())
        .collect()
}

/// Model text with every tagged block and code fence removed
pub fn strip_blocks(text: &str) -> String {
    let without_findings = FINDING_BLOCK.replace_all(text, "");
    let without_stats = STAT_BLOCK.replace_all(&without_findings, "");
    let without_code = FENCE.replace_all(&without_stats, "");
    without_code
        .lines()
        .map(str::trim_end)
        .filter(|line| !QUESTION_LINE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_finding_blocks() {
        let text = "Here you go:\n\
            FINDING_START\n\
            TITLE: Average complexity\n\
            CONTENT: Quicksort runs in O(n log n) on average\n\
            and O(n^2) in the worst case.\n\
            RELEVANCE: high\n\
            CATEGORY: Performance\n\
            SOURCE: https://en.wikipedia.org/wiki/Quicksort\n\
            FINDING_END";
        let blocks = parse_blocks(text);
        assert_eq!(blocks.len(), 1);
        let ParsedBlock::Finding(finding) = &blocks[0] else {
            panic!("expected a finding, got {:?}", blocks[0]);
        };
        assert_eq!(finding.title, "Average complexity");
        assert!(finding.content.ends_with("in the worst case."));
        assert_eq!(finding.relevance, Relevance::High);
        assert_eq!(finding.category, "Performance");
    }

    #[test]
    fn unknown_uppercase_labels_stay_in_the_content() {
        let text = "FINDING_START\n\
            TITLE: Rate limits\n\
            CONTENT: Requests are throttled per key.\n\
            NOTE: bursts above 10 per second are rejected.\n\
            API: the limit applies to every endpoint.\n\
            CATEGORY: Operations\n\
            FINDING_END";
        let blocks = parse_blocks(text);
        let ParsedBlock::Finding(finding) = &blocks[0] else {
            panic!("expected a finding, got {:?}", blocks);
        };
        assert_eq!(
            finding.content,
            "Requests are throttled per key. NOTE: bursts above 10 per second are rejected. \
             API: the limit applies to every endpoint."
        );
        assert_eq!(finding.category, "Operations");
    }

    #[test]
    fn malformed_blocks_are_skipped() {
        let text = "FINDING_START\nTITLE: Missing content\nFINDING_END\n\
            FINDING_START\nTITLE: Good\nCONTENT: Kept\nFINDING_END\n\
            FINDING_START\nCONTENT: no closing tag";
        let found = findings(&parse_blocks(text));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Good");
        assert_eq!(found[0].category, "General");
    }

    #[test]
    fn statistics_require_numeric_values() {
        let text = "STAT_START\nMETRIC: Adoption\nVALUE: 42%\nCONTEXT: of developers\nSTAT_END\n\
            STAT_START\nMETRIC: Mood\nVALUE: very positive overall\nSTAT_END\n\
            STAT_START\nMETRIC: Essay\nVALUE: 1 and then a very long explanation that goes on and on and on without stopping at all\nSTAT_END";
        let stats = statistics(&parse_blocks(text));
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].value, "42%");
    }

    #[test]
    fn questions_must_be_long_enough() {
        let text = "Q: Why?\nQ: How does pivot choice affect performance?\n2. Q: Is quicksort stable in Python?";
        assert_eq!(
            questions(&parse_blocks(text)),
            vec![
                "How does pivot choice affect performance?".to_string(),
                "Is quicksort stable in Python?".to_string()
            ]
        );
    }

    #[test]
    fn parses_structured_and_bare_code() {
        let text = "TITLE: Recursive quicksort\nLANGUAGE: Python\n```python\ndef quicksort(xs):\n    return xs\n```\n\
            DESCRIPTION: Simple version\n\n\
            ```js\nconst f = () => 1;\n```";
        let examples = code_examples(&parse_blocks(text));
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].title, "Recursive quicksort");
        assert_eq!(examples[0].language, "python");
        assert_eq!(examples[0].description, "Simple version");
        assert!(examples[0].code.contains("def quicksort"));
        assert_eq!(examples[1].language, "js");
        assert_eq!(examples[1].title, "Example");
    }

    #[test]
    fn blocks_keep_document_order() {
        let text = "Q: What about merge sort instead?\n\
            FINDING_START\nTITLE: T\nCONTENT: C\nFINDING_END";
        let blocks = parse_blocks(text);
        assert!(matches!(blocks[0], ParsedBlock::Question(_)));
        assert!(matches!(blocks[1], ParsedBlock::Finding(_)));
    }

    #[test]
    fn strip_blocks_leaves_prose() {
        let text = "Quicksort is fast.\nFINDING_START\nTITLE: T\nCONTENT: C\nFINDING_END\n```python\npass\n```\nQ: Anything else to know?";
        assert_eq!(strip_blocks(text), "Quicksort is fast.");
    }
}
