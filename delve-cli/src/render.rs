//! Terminal rendering of research results and status events

use std::fmt::Write;

use delve_core::{ResearchResult, ResearchStage, ResearchStatus};

pub fn status_line(status: &ResearchStatus) -> String {
    let icon = match status.stage {
        ResearchStage::Searching => "🔍",
        ResearchStage::Downloading => "📥",
        ResearchStage::Processing => "⚙️ ",
        ResearchStage::Analyzing => "🧠",
        ResearchStage::Complete => "✅",
    };
    format!(
        "{} [{:>3}%] {}",
        icon,
        status.progress.current * 100 / status.progress.total.max(1),
        status.message
    )
}

/// Human-readable report; `writeln!` into a `String` cannot fail
pub fn render_result(result: &ResearchResult) -> String {
    let mut out = String::new();

    if result.metadata.error {
        let reason = result.metadata.error_message.as_deref().unwrap_or("unknown error");
        let _ = writeln!(out, "⚠️  Research degraded: {}\n", reason);
    }

    let _ = writeln!(out, "📋 Summary\n{}\n", result.summary);

    if !result.findings.is_empty() {
        let _ = writeln!(out, "🔎 Key findings");
        for (index, finding) in result.findings.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {}. [{:?}] {} ({})",
                index + 1,
                finding.relevance,
                finding.title,
                finding.category
            );
            let _ = writeln!(out, "     {}", finding.content);
            if !finding.source.is_empty() {
                let _ = writeln!(out, "     ↳ {}", finding.source);
            }
        }
        out.push('\n');
    }

    if !result.statistics.is_empty() {
        let _ = writeln!(out, "📊 Statistics");
        for statistic in &result.statistics {
            let _ = writeln!(out, "  • {}: {}", statistic.metric, statistic.value);
            if !statistic.context.is_empty() {
                let _ = writeln!(out, "    {}", statistic.context);
            }
        }
        out.push('\n');
    }

    if !result.code_examples.is_empty() {
        let _ = writeln!(out, "💻 Code examples");
        for example in &result.code_examples {
            let _ = writeln!(out, "  ── {} ({}) ──", example.title, example.language);
            for line in example.code.lines() {
                let _ = writeln!(out, "  {}", line);
            }
            if !example.description.is_empty() {
                let _ = writeln!(out, "  {}", example.description);
            }
            out.push('\n');
        }
    }

    if !result.suggested_questions.is_empty() {
        let _ = writeln!(out, "❓ Follow-up questions");
        for question in &result.suggested_questions {
            let _ = writeln!(out, "  • {}", question);
        }
        out.push('\n');
    }

    let metadata = &result.metadata;
    let _ = write!(
        out,
        "ℹ️  {} sources · confidence {:.2} · quality {:.2} · {} · {} attempt(s) · {} ms",
        metadata.sources_count,
        metadata.confidence,
        metadata.quality_score,
        metadata.research_depth,
        metadata.attempts,
        metadata.elapsed_ms
    );
    out
}
