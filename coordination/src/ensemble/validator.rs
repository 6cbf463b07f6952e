//! Validator: heuristic scoring, merge recommendation and confidence
//!
//! Every successful primary output is scored on six weighted criteria:
//!
//! | Criterion      | Weight | Base | Bonuses / penalties                               |
//! |----------------|--------|------|---------------------------------------------------|
//! | correctness    | 20     | 15   | +5 balanced; 5 if tagged code unbalanced; −5 stubs |
//! | structure      | 20     | 10   | +5 named sections, +3 compact, +2 explicit return |
//! | performance    | 15     | 10   | +5 clean; −3 blocking sleep, −2 `range(len())`    |
//! | best_practices | 20     | 10   | +5 type annotations, +3 naming, +2 no escapes     |
//! | documentation  | 15     | 5    | +8 doc comments, +2 line comments, +2 prose       |
//! | testing        | 10     | 3    | +4 error handling, +2 error raising, +3 asserts   |
//!
//! An output is merge-worthy when its score is at least 70 and it carries
//! no critical issue. Strengths are criteria at ≥85% of their weight,
//! weaknesses those below 50%.
//!
//! ## Recommendation
//!
//! ```text
//! staged task, ≥2 merge-worthy      → sequential, dispatch order
//! exactly 1 merge-worthy            → use_best
//! ≥2 merge-worthy, complementary    → combine, score descending
//! otherwise                         → use_best, top output
//! ```
//!
//! Two outputs are complementary when neither one's strength set is a
//! subset of the other's: each brings something the other lacks.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::EngineConfig;
use crate::ensemble::sections::{check_balanced, extract_code_blocks, CodeBlock, Section};
use crate::state::{
    BackendAnalysis, BackendId, Criterion, ExecutionOutcome, Issue, MergeStrategy, Severity,
    SubScores, ValidationAnalysis,
};

static STAGED_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:\d+[.)]\s+\S|step\s+\d+\b)").expect("STAGED_LINE_RE regex should compile")
});

static STAGED_INLINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bstep\s+\d+\b").expect("STAGED_INLINE_RE regex should compile"));

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\btodo!\(|\bunimplemented!\(|\bNotImplementedError\b|//\s*TODO\b|#\s*TODO\b|\.\.\.\s*rest of)")
        .expect("PLACEHOLDER_RE regex should compile")
});

static RANGE_LEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"for\s+\w+\s+in\s+range\s*\(\s*len\(").expect("RANGE_LEN_RE regex should compile")
});

static HARDCODED_SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:password|passwd|secret|api_key|apikey|access_token)\s*[:=]\s*["'][^"'\s]{4,}["']"#)
        .expect("HARDCODED_SECRET_RE regex should compile")
});

static SNAKE_CASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("SNAKE_CASE_RE regex should compile"));

static CAMEL_OR_SNAKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_$][A-Za-z0-9_$]*$").expect("CAMEL_OR_SNAKE_RE regex should compile"));

static PASCAL_CASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").expect("PASCAL_CASE_RE regex should compile"));

/// Confidence penalty per warning among merge-worthy outputs.
const WARNING_PENALTY: f64 = 0.03;
/// Confidence penalty per info note among merge-worthy outputs.
const INFO_PENALTY: f64 = 0.01;
/// Confidence penalty per critical issue on any analysed output.
const CRITICAL_PENALTY: f64 = 0.25;
/// Confidence ceiling when nothing is merge-worthy.
const NO_MERGE_WORTHY_CAP: f64 = 0.5;
/// Score spread (points) at which separation stops adding confidence.
const FULL_SEPARATION_POINTS: f64 = 10.0;

/// Whether the task describes ordered stages (numbered lines or "step N").
pub fn is_staged(description: &str) -> bool {
    STAGED_LINE_RE.find_iter(description).count() >= 2
        || STAGED_INLINE_RE.find_iter(description).count() >= 2
}

fn code_of(blocks: &[CodeBlock]) -> String {
    blocks.iter().map(|b| b.code.as_str()).collect::<Vec<_>>().join("\n")
}

fn prose_len(text: &str, blocks: &[CodeBlock]) -> usize {
    if blocks.len() == 1 && blocks[0].code == text {
        return 0;
    }
    let code_len: usize = blocks.iter().map(|b| b.code.len()).sum();
    text.len().saturating_sub(code_len)
}

fn score_correctness(blocks: &[CodeBlock], code: &str, issues: &mut Vec<Issue>) -> f64 {
    if code.trim().is_empty() {
        issues.push(Issue::new(Severity::Critical, "Output contains no code"));
        return 0.0;
    }
    let mut points = 15.0;
    let mut balanced = true;
    let mut broken = false;
    for block in blocks {
        if let Err(problem) = check_balanced(&block.code, block.language.as_deref()) {
            balanced = false;
            // untagged text may be prose; only tagged code is held to the strict check
            if block.language.is_some() {
                issues.push(Issue::new(Severity::Critical, format!("Unbalanced delimiters: {problem}")));
                broken = true;
            } else {
                issues.push(Issue::new(
                    Severity::Warning,
                    format!("Possibly unbalanced delimiters in untagged text: {problem}"),
                ));
            }
        }
    }
    if balanced {
        points += 5.0;
    } else if broken {
        points = 5.0;
    }
    if PLACEHOLDER_RE.is_match(code) {
        issues.push(Issue::new(Severity::Warning, "Placeholder left in output"));
        points -= 5.0;
    }
    points
}

fn score_structure(sections: &[Section], code: &str, issues: &mut Vec<Issue>) -> f64 {
    let mut points = 10.0;
    let named: Vec<&Section> = sections.iter().filter(|s| s.is_named()).collect();
    if !named.is_empty() {
        points += 5.0;
    }
    let mut oversized = false;
    for section in &named {
        let lines = section.content.lines().count();
        if lines > 100 {
            oversized = true;
            issues.push(Issue::new(
                Severity::Warning,
                format!(
                    "Section `{}` too long ({lines} lines)",
                    section.name.as_deref().unwrap_or_default()
                ),
            ));
        }
    }
    if oversized {
        points -= 5.0;
    } else if !named.is_empty() {
        points += 3.0;
    }
    if code.contains("return") || code.contains("->") || code.contains("=>") {
        points += 2.0;
    }
    points
}

fn score_performance(code: &str, issues: &mut Vec<Issue>) -> f64 {
    let mut points = 10.0;
    let mut clean = true;
    if (code.contains("time.sleep(") || code.contains("thread::sleep(")) && !code.contains("async") {
        points -= 3.0;
        clean = false;
        issues.push(Issue::new(Severity::Warning, "Blocking sleep in sync code"));
    }
    if RANGE_LEN_RE.is_match(code) {
        points -= 2.0;
        clean = false;
        issues.push(Issue::new(Severity::Info, "Using range(len()) instead of enumerate"));
    }
    if code.to_ascii_uppercase().contains("SELECT *") {
        points -= 2.0;
        clean = false;
        issues.push(Issue::new(Severity::Info, "SELECT * fetches unused columns"));
    }
    if clean {
        points += 5.0;
    }
    points
}

fn naming_ok(section: &Section) -> bool {
    let (Some(kind), Some(name)) = (section.kind.as_deref(), section.name.as_deref()) else {
        return true;
    };
    match kind {
        "fn" | "def" => SNAKE_CASE_RE.is_match(name),
        "function" => CAMEL_OR_SNAKE_RE.is_match(name),
        "class" | "struct" | "enum" | "trait" | "interface" => PASCAL_CASE_RE.is_match(name),
        _ => true,
    }
}

fn score_best_practices(sections: &[Section], code: &str, issues: &mut Vec<Issue>) -> f64 {
    let mut points = 10.0;
    if code.contains("->") || code.contains("): ") || code.contains(": str") || code.contains(": int") {
        points += 5.0;
    }

    let misnamed: Vec<&str> = sections
        .iter()
        .filter(|s| !naming_ok(s))
        .filter_map(|s| s.name.as_deref())
        .collect();
    if misnamed.is_empty() {
        points += 3.0;
    } else {
        for name in misnamed {
            issues.push(Issue::new(Severity::Info, format!("`{name}` breaks naming conventions")));
        }
    }

    let mut escapes = false;
    if HARDCODED_SECRET_RE.is_match(code) {
        issues.push(Issue::new(Severity::Critical, "Hard-coded credential"));
        points -= 10.0;
        escapes = true;
    }
    if code.contains("eval(") {
        issues.push(Issue::new(Severity::Warning, "Dynamic eval"));
        points -= 3.0;
        escapes = true;
    }
    if code.matches(".unwrap()").count() > 3 {
        issues.push(Issue::new(Severity::Warning, "Frequent unwrap() instead of error propagation"));
        points -= 2.0;
        escapes = true;
    }
    if !escapes {
        points += 2.0;
    }
    points
}

fn score_documentation(text: &str, blocks: &[CodeBlock], code: &str) -> f64 {
    let mut points = 5.0;
    if code.contains("\"\"\"")
        || code.contains("'''")
        || code.contains("///")
        || code.contains("//!")
        || code.contains("/**")
    {
        points += 8.0;
    }
    let line_comment = code.lines().any(|l| {
        let t = l.trim_start();
        (t.starts_with("//") && !t.starts_with("///")) || (t.starts_with("# ") && !t.starts_with("#!"))
    });
    if line_comment {
        points += 2.0;
    }
    if prose_len(text, blocks) > 40 {
        points += 2.0;
    }
    points
}

fn score_testing(code: &str) -> f64 {
    let mut points = 3.0;
    if ["try:", "except", "catch", "Result<", "?;", "if err != nil", "set -e", "rescue"]
        .iter()
        .any(|m| code.contains(m))
    {
        points += 4.0;
    }
    if ["raise ", "throw ", "Err(", "bail!", "return err"]
        .iter()
        .any(|m| code.contains(m))
    {
        points += 2.0;
    }
    if ["assert", "#[test]", "def test_", "describe(", "it(\"", "expect("]
        .iter()
        .any(|m| code.contains(m))
    {
        points += 3.0;
    }
    points
}

/// Score one output's text. Sub-scores are clamped to their weights.
pub fn score_output(text: &str) -> (SubScores, Vec<Issue>) {
    let blocks = extract_code_blocks(text);
    let code = code_of(&blocks);
    let sections: Vec<Section> = blocks.iter().flat_map(crate::ensemble::sections::split_sections).collect();
    let mut issues = Vec::new();
    let mut scores = SubScores::default();

    scores.set(Criterion::Correctness, score_correctness(&blocks, &code, &mut issues));
    scores.set(Criterion::Structure, score_structure(&sections, &code, &mut issues));
    scores.set(Criterion::Performance, score_performance(&code, &mut issues));
    scores.set(Criterion::BestPractices, score_best_practices(&sections, &code, &mut issues));
    scores.set(Criterion::Documentation, score_documentation(text, &blocks, &code));
    scores.set(Criterion::Testing, score_testing(&code));

    (scores, issues)
}

/// Build an analysis from sub-scores and issues, deriving everything else.
pub fn build_analysis(
    backend: BackendId,
    sub_scores: SubScores,
    issues: Vec<Issue>,
    config: &EngineConfig,
) -> BackendAnalysis {
    let score = sub_scores.total();
    let strengths = Criterion::ALL
        .iter()
        .copied()
        .filter(|c| sub_scores.get(*c) >= 0.85 * c.weight())
        .collect();
    let weaknesses = Criterion::ALL
        .iter()
        .copied()
        .filter(|c| sub_scores.get(*c) < 0.5 * c.weight())
        .collect();
    let has_critical = issues.iter().any(|i| i.severity == Severity::Critical);
    BackendAnalysis {
        backend,
        score,
        sub_scores,
        strengths,
        weaknesses,
        issues,
        merge_worthy: score >= config.merge_worthy_score && !has_critical,
        notes: Vec::new(),
    }
}

pub fn analyze_outcome(outcome: &ExecutionOutcome, config: &EngineConfig) -> BackendAnalysis {
    let (sub_scores, issues) = score_output(&outcome.text);
    build_analysis(outcome.backend.clone(), sub_scores, issues, config)
}

/// Neither strength set is contained in the other.
pub fn complementary(a: &BackendAnalysis, b: &BackendAnalysis) -> bool {
    let sa: BTreeSet<Criterion> = a.strengths.iter().copied().collect();
    let sb: BTreeSet<Criterion> = b.strengths.iter().copied().collect();
    !sa.is_subset(&sb) && !sb.is_subset(&sa)
}

fn by_score_desc<'a>(analyses: &[&'a BackendAnalysis]) -> Vec<&'a BackendAnalysis> {
    let mut sorted = analyses.to_vec();
    // stable sort keeps dispatch order among equal scores
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));
    sorted
}

/// Ordered recommendation and strategy for analyses given in dispatch order.
pub fn recommend(description: &str, analyses: &[BackendAnalysis]) -> (Vec<BackendId>, MergeStrategy) {
    let worthy: Vec<&BackendAnalysis> = analyses.iter().filter(|a| a.merge_worthy).collect();

    if worthy.len() >= 2 && is_staged(description) {
        return (
            worthy.iter().map(|a| a.backend.clone()).collect(),
            MergeStrategy::Sequential,
        );
    }

    match worthy.len() {
        0 => {
            let all: Vec<&BackendAnalysis> = analyses.iter().collect();
            let top = by_score_desc(&all).first().map(|a| a.backend.clone());
            (top.into_iter().collect(), MergeStrategy::UseBest)
        }
        1 => (vec![worthy[0].backend.clone()], MergeStrategy::UseBest),
        _ => {
            let ranked = by_score_desc(&worthy);
            let top = ranked[0];
            let partners: Vec<&BackendAnalysis> = ranked[1..]
                .iter()
                .copied()
                .filter(|other| complementary(top, other))
                .collect();
            if partners.is_empty() {
                (vec![top.backend.clone()], MergeStrategy::UseBest)
            } else {
                let mut recommendation = vec![top.backend.clone()];
                recommendation.extend(partners.iter().map(|a| a.backend.clone()));
                (recommendation, MergeStrategy::Combine)
            }
        }
    }
}

/// Confidence from score separation minus issue penalties, in [0, 1].
pub fn confidence(analyses: &[BackendAnalysis]) -> f64 {
    if analyses.is_empty() {
        return 0.0;
    }
    let all: Vec<&BackendAnalysis> = analyses.iter().collect();
    let ranked = by_score_desc(&all);
    let separation = match ranked.get(1) {
        None => 1.0,
        Some(second) => {
            let spread = (ranked[0].score - second.score).clamp(0.0, FULL_SEPARATION_POINTS);
            0.8 + 2.0 * spread / 100.0
        }
    };

    let penalty: f64 = analyses
        .iter()
        .flat_map(|a| a.issues.iter().map(move |i| (a.merge_worthy, i.severity)))
        .map(|(worthy, severity)| match (worthy, severity) {
            (_, Severity::Critical) => CRITICAL_PENALTY,
            (true, Severity::Warning) => WARNING_PENALTY,
            (true, Severity::Info) => INFO_PENALTY,
            (false, _) => 0.0,
        })
        .sum();

    let mut value = (separation - penalty).clamp(0.0, 1.0);
    if !analyses.iter().any(|a| a.merge_worthy) {
        value = value.min(NO_MERGE_WORTHY_CAP);
    }
    value
}

fn summarize(analyses: &[BackendAnalysis], strategy: MergeStrategy, recommendation: &[BackendId]) -> String {
    let scores = analyses
        .iter()
        .map(|a| format!("{}={:.0}", a.backend, a.score))
        .collect::<Vec<_>>()
        .join(", ");
    let picks = recommendation
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(" + ");
    format!("Scores: {scores}. Strategy {strategy}: {picks}")
}

/// Assemble a full analysis from per-backend analyses.
pub fn finalize(
    description: &str,
    analyses: Vec<BackendAnalysis>,
    concerns: Vec<String>,
    validators: Vec<BackendId>,
) -> ValidationAnalysis {
    let (recommendation, strategy) = recommend(description, &analyses);
    let confidence = confidence(&analyses);
    let summary = summarize(&analyses, strategy, &recommendation);
    ValidationAnalysis {
        analyses,
        recommendation,
        strategy,
        confidence,
        concerns,
        summary,
        validators,
    }
}

/// Local analysis of every successful outcome, in dispatch order.
pub fn validate(description: &str, outcomes: &[ExecutionOutcome], config: &EngineConfig) -> ValidationAnalysis {
    let analyses = outcomes
        .iter()
        .filter(|o| o.success)
        .map(|o| analyze_outcome(o, config))
        .collect();
    finalize(description, analyses, Vec::new(), Vec::new())
}

/// Reconcile two validators' analyses of the same outputs.
///
/// Issues are unioned, scores take the minimum, an output stays
/// merge-worthy only if both analyses agree, and confidence is the lower of
/// the two. Differing top picks push confidence below the auto-merge line.
pub fn combine_analyses(
    description: &str,
    first: &ValidationAnalysis,
    second: &ValidationAnalysis,
    config: &EngineConfig,
) -> ValidationAnalysis {
    let analyses: Vec<BackendAnalysis> = first
        .analyses
        .iter()
        .map(|a| match second.analysis_for(&a.backend) {
            None => a.clone(),
            Some(b) => {
                let mut issues = a.issues.clone();
                for issue in &b.issues {
                    if !issues.contains(issue) {
                        issues.push(issue.clone());
                    }
                }
                let (sub_scores, score) = if b.score < a.score {
                    (b.sub_scores, b.score)
                } else {
                    (a.sub_scores, a.score)
                };
                let mut notes = a.notes.clone();
                notes.extend(b.notes.iter().filter(|n| !a.notes.contains(n)).cloned());
                let mut merged = build_analysis(a.backend.clone(), sub_scores, issues, config);
                merged.score = score;
                merged.merge_worthy = merged.merge_worthy && a.merge_worthy && b.merge_worthy;
                merged.notes = notes;
                merged
            }
        })
        .collect();

    let mut concerns = first.concerns.clone();
    for concern in &second.concerns {
        if !concerns.contains(concern) {
            concerns.push(concern.clone());
        }
    }

    let mut validators = first.validators.clone();
    validators.extend(second.validators.iter().filter(|v| !first.validators.contains(v)).cloned());

    let mut combined = finalize(description, analyses, concerns, validators);
    combined.confidence = combined.confidence.min(first.confidence).min(second.confidence);

    let pick_a = first.recommendation.first();
    let pick_b = second.recommendation.first();
    if pick_a != pick_b {
        combined.confidence = combined.confidence.min(config.auto_merge_threshold - 0.01);
        combined.concerns.push(format!(
            "Validators disagree on the best output ({} vs {})",
            pick_a.map(|b| b.to_string()).unwrap_or_else(|| "none".into()),
            pick_b.map(|b| b.to_string()).unwrap_or_else(|| "none".into()),
        ));
    }
    combined.confidence = combined.confidence.clamp(0.0, 1.0);
    combined
}
