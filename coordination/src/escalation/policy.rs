//! Escalation Policy: deterministic human-review decision
//!
//! Consumes a [`ValidationAnalysis`] plus the raw outcomes and decides
//! whether the merged result may be trusted without a human. Pure: no I/O,
//! no backend calls. Every trigger that fires contributes a reason; none
//! short-circuits the others.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, AUTO_MERGE_THRESHOLD};
use crate::state::{ExecutionOutcome, Severity, ValidationAnalysis};

/// Patterns that force review wherever they appear in successful output:
/// credentials, destructive database operations, authn/authz. Each is
/// matched case-insensitively on word boundaries.
pub const SECURITY_PATTERNS: &[&str] = &[
    r"passwords?",
    r"passwd",
    r"secrets?",
    r"credentials?",
    r"(?:api|private|secret|access)[_ -]?keys?",
    r"(?:access|auth|bearer|refresh)[_ -]?tokens?",
    r"authentication",
    r"authorization",
    r"drop\s+(?:table|database|schema)",
    r"drop\s+the\s+\w+\s+(?:table|database)",
    r"truncate\s+table",
    r"delete\s+from",
];

static SECURITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = SECURITY_PATTERNS.join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("SECURITY_RE regex should compile")
});

/// Outcome of the policy: `needs_review` is true iff `reasons` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub needs_review: bool,
    pub reasons: Vec<String>,
}

impl ReviewDecision {
    fn from_reasons(reasons: Vec<String>) -> Self {
        Self {
            needs_review: !reasons.is_empty(),
            reasons,
        }
    }

    pub fn into_parts(self) -> (bool, Vec<String>) {
        (self.needs_review, self.reasons)
    }
}

/// Distinct security-sensitive matches in `text`, lowercased with
/// whitespace collapsed, in first-seen order.
pub fn security_hits(text: &str) -> Vec<String> {
    let mut hits: Vec<String> = Vec::new();
    for m in SECURITY_RE.find_iter(text) {
        let word = m.as_str().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        if !hits.contains(&word) {
            hits.push(word);
        }
    }
    hits
}

fn security_reasons(outcomes: &[ExecutionOutcome]) -> Vec<String> {
    outcomes
        .iter()
        .filter(|o| o.success)
        .filter_map(|o| {
            let hits = security_hits(&o.text);
            (!hits.is_empty()).then(|| {
                format!("Security-sensitive content in {} output: {}", o.backend, hits.join(", "))
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscalationPolicy {
    /// Confidence strictly below this forces review
    pub auto_merge_threshold: f64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            auto_merge_threshold: AUTO_MERGE_THRESHOLD,
        }
    }
}

impl EscalationPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            auto_merge_threshold: config.auto_merge_threshold,
        }
    }

    pub fn needs_review(&self, validation: &ValidationAnalysis, outcomes: &[ExecutionOutcome]) -> ReviewDecision {
        let mut reasons = Vec::new();

        if validation.confidence < self.auto_merge_threshold {
            reasons.push(format!(
                "Confidence {:.0}% below threshold {:.0}%",
                validation.confidence * 100.0,
                self.auto_merge_threshold * 100.0
            ));
        }

        for analysis in &validation.analyses {
            let critical: Vec<&str> = analysis
                .issues
                .iter()
                .filter(|i| i.severity == Severity::Critical)
                .map(|i| i.message.as_str())
                .collect();
            if !critical.is_empty() {
                reasons.push(format!(
                    "{} has {} critical issue(s): {}",
                    analysis.backend,
                    critical.len(),
                    critical.join("; ")
                ));
            }
        }

        reasons.extend(security_reasons(outcomes));

        if !validation.analyses.iter().any(|a| a.merge_worthy) {
            reasons.push("No output is merge-worthy".to_string());
        }

        if !validation.concerns.is_empty() {
            reasons.push(format!(
                "Validator flagged {} concern(s): {}",
                validation.concerns.len(),
                validation.concerns.join("; ")
            ));
        }

        ReviewDecision::from_reasons(reasons)
    }

    /// Simple mode has no analysis; only the security scan applies.
    pub fn scan_only(&self, outcomes: &[ExecutionOutcome]) -> ReviewDecision {
        ReviewDecision::from_reasons(security_reasons(outcomes))
    }
}

/// [`EscalationPolicy::needs_review`] with the default threshold.
pub fn needs_review(validation: &ValidationAnalysis, outcomes: &[ExecutionOutcome]) -> (bool, Vec<String>) {
    EscalationPolicy::default().needs_review(validation, outcomes).into_parts()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BackendAnalysis, BackendRole, Issue, MergeStrategy, SubScores};

    fn analysis(confidence: f64, worthy: bool, issues: Vec<Issue>) -> ValidationAnalysis {
        ValidationAnalysis {
            analyses: vec![BackendAnalysis {
                backend: "claude".into(),
                score: 92.0,
                sub_scores: SubScores::default(),
                strengths: vec![],
                weaknesses: vec![],
                issues,
                merge_worthy: worthy,
                notes: vec![],
            }],
            recommendation: vec!["claude".into()],
            strategy: MergeStrategy::UseBest,
            confidence,
            concerns: vec![],
            summary: String::new(),
            validators: vec![],
        }
    }

    fn output(text: &str) -> ExecutionOutcome {
        ExecutionOutcome::succeeded("claude".into(), BackendRole::Primary, text.into(), 1, 1)
    }

    #[test]
    fn test_clean_run_auto_merges() {
        let (review, reasons) = needs_review(&analysis(0.95, true, vec![]), &[output("def add(a, b):\n    return a + b")]);
        assert!(!review, "{reasons:?}");
        assert!(reasons.is_empty());
    }

    #[test]
    fn test_confidence_floor_is_strict() {
        let (review, reasons) = needs_review(&analysis(0.85, true, vec![]), &[output("x = 1")]);
        assert!(review);
        assert_eq!(reasons, vec!["Confidence 85% below threshold 90%"]);

        let (at_threshold, _) = needs_review(&analysis(0.90, true, vec![]), &[output("x = 1")]);
        assert!(!at_threshold);
    }

    #[test]
    fn test_security_keyword_fires_regardless_of_score() {
        let (review, reasons) = needs_review(
            &analysis(1.0, true, vec![]),
            &[output("First we drop the production database, then reseed it.")],
        );
        assert!(review);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].ends_with("drop the production database"), "{}", reasons[0]);
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        assert!(security_hits("the monkey dropped keyboards").is_empty());
        assert_eq!(security_hits("Password and PASSWORD"), vec!["password"]);
    }

    #[test]
    fn test_ordinary_identifiers_do_not_fire() {
        let code = "def lookup(cache: dict, key: str) -> str:\n    return cache[key]\n\n\
                    fn next_token(&mut self) -> Option<Token> { None }\n\
                    // critical section: hold the lock\n\
                    items.delete(id)\n\
                    unsafe { ptr.read() }\n\
                    The production database stays read-only.\n";
        assert_eq!(security_hits(code), Vec::<String>::new());
    }

    #[test]
    fn test_credentials_and_destructive_sql_fire() {
        let hits = security_hits(
            "API_KEY = load()\nDROP TABLE users;\nDELETE FROM orders;\nsend the bearer token\ncheck authorization",
        );
        assert_eq!(
            hits,
            vec!["api_key", "drop table", "delete from", "bearer token", "authorization"]
        );
    }

    #[test]
    fn test_failed_outcomes_are_not_scanned() {
        let mut failed = output("");
        failed.success = false;
        failed.text = "leaked secret".into();
        assert!(EscalationPolicy::default().scan_only(&[failed]).reasons.is_empty());
    }

    #[test]
    fn test_reasons_accumulate() {
        let mut validation = analysis(0.4, false, vec![Issue::new(Severity::Critical, "syntax error")]);
        validation.concerns.push("missing error handling".into());
        let (review, reasons) = needs_review(&validation, &[output("store the password here")]);
        assert!(review);
        assert_eq!(reasons.len(), 5, "{reasons:?}");
        assert!(reasons[1].starts_with("claude has 1 critical issue(s)"));
        assert_eq!(reasons[3], "No output is merge-worthy");
    }

    #[test]
    fn test_threshold_from_config() {
        let config = EngineConfig {
            auto_merge_threshold: 0.8,
            ..EngineConfig::default()
        };
        let policy = EscalationPolicy::from_config(&config);
        assert!(!policy.needs_review(&analysis(0.85, true, vec![]), &[]).needs_review);
    }
}
