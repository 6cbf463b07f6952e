//! Cross-backend review: prompt construction and reply parsing.
//!
//! Validator backends receive the task plus every successful primary
//! output and answer with a JSON object. The reply refines the local
//! heuristic analysis; it never replaces it. A reply that cannot be parsed
//! leaves the heuristic analysis standing with a concern attached and
//! confidence capped.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::config::EngineConfig;
use crate::ensemble::validator::{build_analysis, finalize};
use crate::state::{BackendId, ExecutionOutcome, Issue, Severity, ValidationAnalysis};

/// Per-output text limit inside the review prompt.
const MAX_OUTPUT_CHARS: usize = 8_000;

/// Confidence ceiling when a reply could not be parsed.
const UNPARSEABLE_CONFIDENCE: f64 = 0.5;

pub const UNPARSEABLE_CONCERN: &str = "Failed to parse validator response";

static JSON_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("JSON_FENCE_RE regex should compile")
});

static JSON_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("JSON_OBJECT_RE regex should compile"));

const REVIEW_INSTRUCTIONS: &str = r#"## Your Validation Tasks

1. Score each output from 0 to 100 for correctness, structure, best practices and completeness.
2. For each output list strengths, weaknesses and critical issues (bugs, security problems).
3. Recommend which outputs to merge and in what order.
4. Flag concerns that need human review.

## Response Format

Respond with a single JSON object:
```json
{
  "analyses": {
    "backend_id": {
      "score": 85,
      "strengths": ["..."],
      "weaknesses": ["..."],
      "issues": ["critical: ...", "..."],
      "merge_worthy": true,
      "notes": "..."
    }
  },
  "merge_recommendation": ["backend_a", "backend_b"],
  "merge_strategy": "combine|use_best|sequential",
  "concerns": ["..."],
  "confidence": 0.95,
  "summary": "..."
}
```
Only include backends listed above."#;

/// Prompt sent to each validator backend.
pub fn review_prompt(description: &str, outcomes: &[ExecutionOutcome]) -> String {
    let outputs = outcomes
        .iter()
        .filter(|o| o.success)
        .map(|o| {
            let mut text: String = o.text.chars().take(MAX_OUTPUT_CHARS).collect();
            if o.text.chars().count() > MAX_OUTPUT_CHARS {
                text.push_str("\n...[truncated]");
            }
            format!("### {}\n````\n{}\n````", o.backend, text)
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("## Task\n{description}\n\n## Outputs to Validate\n\n{outputs}\n\n{REVIEW_INSTRUCTIONS}")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReviewIssue {
    Text(String),
    Detailed {
        #[serde(default)]
        severity: Option<Severity>,
        message: String,
    },
}

impl ReviewIssue {
    /// `critical:` / `info:` prefixes set severity on plain strings;
    /// anything else is a warning.
    pub fn into_issue(self) -> Issue {
        match self {
            Self::Detailed { severity, message } => Issue::new(severity.unwrap_or(Severity::Warning), message),
            Self::Text(text) => {
                let trimmed = text.trim();
                let lowered = trimmed.to_ascii_lowercase();
                for (prefix, severity) in [
                    ("critical:", Severity::Critical),
                    ("warning:", Severity::Warning),
                    ("info:", Severity::Info),
                ] {
                    if lowered.starts_with(prefix) {
                        return Issue::new(severity, trimmed[prefix.len()..].trim());
                    }
                }
                Issue::new(Severity::Warning, trimmed)
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewEntry {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub merge_worthy: Option<bool>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Parsed validator reply. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewReport {
    #[serde(default)]
    pub analyses: HashMap<String, ReviewEntry>,
    #[serde(default)]
    pub merge_recommendation: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Pull the JSON object out of a reply: a ```json fence first, else the
/// outermost braces.
pub fn parse_review(raw: &str) -> Result<ReviewReport, String> {
    let json = JSON_FENCE_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .or_else(|| JSON_OBJECT_RE.find(raw))
        .map(|m| m.as_str())
        .ok_or_else(|| "no JSON object in reply".to_string())?;
    serde_json::from_str(json).map_err(|e| e.to_string())
}

/// Fold one validator's reply into the local analysis.
///
/// Review issues are added to the matching backend's analysis, an explicit
/// `merge_worthy: false` vetoes the local flag, and the final confidence is
/// the lower of the local and reviewed values. Review scores are kept as
/// notes only.
pub fn apply_review(
    description: &str,
    local: &ValidationAnalysis,
    validator: &BackendId,
    reply: &str,
    config: &EngineConfig,
) -> ValidationAnalysis {
    let report = match parse_review(reply) {
        Ok(report) => report,
        Err(error) => {
            warn!(validator = %validator, error = %error, "Unparseable validator reply");
            let mut analysis = local.clone();
            analysis.concerns.push(UNPARSEABLE_CONCERN.to_string());
            analysis.confidence = analysis.confidence.min(UNPARSEABLE_CONFIDENCE);
            analysis.validators.push(validator.clone());
            return analysis;
        }
    };

    let analyses = local
        .analyses
        .iter()
        .map(|a| {
            let Some(entry) = report.analyses.get(a.backend.as_str()) else {
                return a.clone();
            };
            let mut issues = a.issues.clone();
            for issue in entry.issues.iter().cloned().map(ReviewIssue::into_issue) {
                if !issues.contains(&issue) {
                    issues.push(issue);
                }
            }
            let mut reviewed = build_analysis(a.backend.clone(), a.sub_scores, issues, config);
            reviewed.score = a.score;
            reviewed.merge_worthy =
                reviewed.merge_worthy && a.merge_worthy && entry.merge_worthy.unwrap_or(true);
            reviewed.notes = a.notes.clone();
            if let Some(score) = entry.score {
                reviewed.notes.push(format!("{validator} scored {score:.0}"));
            }
            if !entry.strengths.is_empty() {
                reviewed.notes.push(format!("{validator} strengths: {}", entry.strengths.join(", ")));
            }
            if !entry.weaknesses.is_empty() {
                reviewed.notes.push(format!("{validator} weaknesses: {}", entry.weaknesses.join(", ")));
            }
            if let Some(notes) = entry.notes.as_deref().filter(|n| !n.trim().is_empty()) {
                reviewed.notes.push(format!("{validator}: {notes}"));
            }
            reviewed
        })
        .collect();

    let mut concerns = local.concerns.clone();
    concerns.extend(report.concerns.iter().filter(|c| !c.trim().is_empty()).cloned());
    let mut validators = local.validators.clone();
    validators.push(validator.clone());

    let mut reviewed = finalize(description, analyses, concerns, validators);
    let reported = report.confidence.map(|c| c.clamp(0.0, 1.0)).unwrap_or(1.0);
    reviewed.confidence = reviewed.confidence.min(local.confidence).min(reported);
    if let Some(summary) = report.summary.filter(|s| !s.trim().is_empty()) {
        reviewed.summary = format!("{} Review by {validator}: {summary}", reviewed.summary);
    }
    reviewed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::validator::validate;
    use crate::state::BackendRole;

    const SOLID: &str = "Implementation with docs and tests.\n\n```python\n\"\"\"Math helpers.\"\"\"\n\ndef add(a: int, b: int) -> int:\n    \"\"\"Add two numbers.\"\"\"\n    # plain addition\n    try:\n        return a + b\n    except TypeError:\n        raise ValueError(\"bad input\")\n\n\ndef test_add():\n    assert add(1, 2) == 3\n```\n";

    fn local() -> ValidationAnalysis {
        let outcome = ExecutionOutcome::succeeded("claude".into(), BackendRole::Primary, SOLID.into(), 10, 1);
        validate("add numbers", &[outcome], &EngineConfig::default())
    }

    #[test]
    fn test_prompt_lists_successful_outputs_only() {
        let ok = ExecutionOutcome::succeeded("a".into(), BackendRole::Primary, "x = 1".into(), 1, 1);
        let bad = ExecutionOutcome::failed(
            "b".into(),
            BackendRole::Primary,
            crate::state::ErrorKind::Timeout,
            "slow",
            1,
            1,
        );
        let prompt = review_prompt("do it", &[ok, bad]);
        assert!(prompt.contains("### a"));
        assert!(!prompt.contains("### b"));
        assert!(prompt.contains("\"merge_worthy\""));
    }

    #[test]
    fn test_parse_fenced_json() {
        let reply = "Here you go:\n```json\n{\"confidence\": 0.8, \"concerns\": [\"edge cases\"]}\n```\nThanks";
        let report = parse_review(reply).unwrap();
        assert_eq!(report.confidence, Some(0.8));
        assert_eq!(report.concerns, vec!["edge cases"]);
    }

    #[test]
    fn test_parse_bare_json_and_issue_shapes() {
        let reply = r#"Result: {"analyses": {"claude": {"issues": ["critical: SQL injection", "info: nit", {"severity": "warning", "message": "slow"}, "vague"]}}}"#;
        let report = parse_review(reply).unwrap();
        let issues: Vec<Issue> = report.analyses["claude"]
            .issues
            .iter()
            .cloned()
            .map(ReviewIssue::into_issue)
            .collect();
        assert_eq!(issues[0], Issue::new(Severity::Critical, "SQL injection"));
        assert_eq!(issues[1].severity, Severity::Info);
        assert_eq!(issues[2], Issue::new(Severity::Warning, "slow"));
        assert_eq!(issues[3].severity, Severity::Warning);
    }

    #[test]
    fn test_unparseable_reply_caps_confidence() {
        let base = local();
        let reviewed = apply_review("add numbers", &base, &"gemini".into(), "looks fine to me", &EngineConfig::default());
        assert!(reviewed.confidence <= 0.5);
        assert!(reviewed.concerns.iter().any(|c| c == UNPARSEABLE_CONCERN));
        assert_eq!(reviewed.validators, vec![BackendId::from("gemini")]);
    }

    #[test]
    fn test_review_veto_and_lower_confidence() {
        let base = local();
        assert!(base.analyses[0].merge_worthy, "{:?}", base.analyses[0]);

        let reply = r#"```json
{"analyses": {"claude": {"score": 60, "merge_worthy": false, "issues": ["warning: no input validation"]}},
 "confidence": 0.7, "summary": "Usable but thin."}
```"#;
        let reviewed = apply_review("add numbers", &base, &"gemini".into(), reply, &EngineConfig::default());
        let a = &reviewed.analyses[0];
        assert!(!a.merge_worthy);
        assert_eq!(a.score, base.analyses[0].score);
        assert!(a.notes.iter().any(|n| n.contains("scored 60")));
        assert!(a.issues.iter().any(|i| i.message == "no input validation"));
        assert!(reviewed.confidence <= 0.5);
        assert!(reviewed.summary.contains("Usable but thin."));
    }

    #[test]
    fn test_review_critical_issue_blocks_merge() {
        let base = local();
        let reply = r#"{"analyses": {"claude": {"issues": ["critical: swallows errors"]}}, "confidence": 0.95}"#;
        let reviewed = apply_review("add numbers", &base, &"codex".into(), reply, &EngineConfig::default());
        assert!(reviewed.has_critical());
        assert!(!reviewed.analyses[0].merge_worthy);
    }
}
