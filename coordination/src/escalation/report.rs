//! Markdown review request for escalated runs.

use std::fmt::Write;

use crate::state::OrchestrationResult;

fn preview(text: &str, limit: usize) -> String {
    let mut out: String = text.chars().take(limit).collect();
    if text.chars().count() > limit {
        out.push('…');
    }
    out
}

/// Render a human review request: why review is needed, the validator's
/// concerns, each backend's analysis and the merge plan.
pub fn format_review_request(result: &OrchestrationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Human Review Required\n");
    let _ = writeln!(out, "**Run:** {}", result.run_id);
    let _ = writeln!(out, "**Task:** {}", preview(&result.task.description, 200));
    let _ = writeln!(
        out,
        "**Routing:** {} ({} mode), primaries {}",
        result.routing.category,
        result.routing.mode,
        result
            .routing
            .primaries
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    let _ = writeln!(out, "**Status:** {}", result.status);
    if let Some(analysis) = &result.analysis {
        let _ = writeln!(out, "**Confidence:** {:.0}%", analysis.confidence * 100.0);
        if !analysis.validators.is_empty() {
            let _ = writeln!(
                out,
                "**Validators:** {}",
                analysis
                    .validators
                    .iter()
                    .map(|b| b.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }

    let _ = writeln!(out, "\n## Why Review Needed\n");
    for reason in &result.review_reasons {
        let _ = writeln!(out, "- {reason}");
    }

    if let Some(analysis) = &result.analysis {
        if !analysis.concerns.is_empty() {
            let _ = writeln!(out, "\n## Concerns\n");
            for concern in &analysis.concerns {
                let _ = writeln!(out, "- {concern}");
            }
        }

        let _ = writeln!(out, "\n## Backend Analyses\n");
        for a in &analysis.analyses {
            let _ = writeln!(
                out,
                "### {} (score {:.0}{})",
                a.backend,
                a.score,
                if a.merge_worthy { ", merge-worthy" } else { "" }
            );
            if !a.strengths.is_empty() {
                let list = a.strengths.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ");
                let _ = writeln!(out, "**Strengths:** {list}");
            }
            if !a.weaknesses.is_empty() {
                let list = a.weaknesses.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ");
                let _ = writeln!(out, "**Weaknesses:** {list}");
            }
            for issue in &a.issues {
                let _ = writeln!(out, "- [{}] {}", issue.severity, issue.message);
            }
            for note in &a.notes {
                let _ = writeln!(out, "- _{note}_");
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "## Recommendation\n");
        let _ = writeln!(out, "**Strategy:** {}", analysis.strategy);
        let _ = writeln!(
            out,
            "**Merge order:** {}",
            analysis
                .recommendation
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join(" → ")
        );
    } else {
        let _ = writeln!(out, "\n## Raw Outputs\n");
        for outcome in result.successful_outcomes() {
            let _ = writeln!(out, "- {} ({} ms)", outcome.backend, outcome.latency_ms);
        }
    }

    if !result.conflict_notes.is_empty() {
        let _ = writeln!(out, "\n## Merge Conflicts\n");
        for note in &result.conflict_notes {
            let _ = writeln!(out, "- {note}");
        }
    }

    let _ = writeln!(out, "\n---\n*Please review and approve or reject the merge.*");
    out
}
