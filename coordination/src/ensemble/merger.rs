//! Consensus merger
//!
//! Turns the validator's recommendation into one artifact.
//!
//! * `use_best`: the top output, verbatim.
//! * `combine`: sections are aligned by name (unnamed preambles by
//!   position). The higher-scoring output's section wins unless the other
//!   output is stronger on some criterion, in which case both are kept
//!   with an inline note. Sections only one output has are appended with
//!   attribution.
//! * `sequential`: outputs are concatenated in recommendation order with a
//!   step header per output.
//!
//! A consistency pass then records conflict notes on the merged text.
//! Merging never fails; problems become notes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::ensemble::sections::{
    check_balanced, comment_prefix, extract_code_blocks, extract_sections, split_sections, Section,
};
use crate::state::{
    BackendAnalysis, BackendId, ConsensusArtifact, Criterion, ExecutionOutcome, MergeStrategy,
    ValidationAnalysis,
};

static CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("CALL_RE regex should compile"));

#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub artifact: ConsensusArtifact,
    pub conflict_notes: Vec<String>,
}

struct Source<'a> {
    outcome: &'a ExecutionOutcome,
    analysis: Option<&'a BackendAnalysis>,
    sections: Vec<Section>,
}

impl<'a> Source<'a> {
    fn new(outcome: &'a ExecutionOutcome, analysis: Option<&'a BackendAnalysis>) -> Self {
        let sections = if outcome.sections.is_empty() {
            extract_sections(&outcome.text)
        } else {
            outcome.sections.clone()
        };
        Self {
            outcome,
            analysis,
            sections,
        }
    }

    fn backend(&self) -> &BackendId {
        &self.outcome.backend
    }

    fn strengths(&self) -> BTreeSet<Criterion> {
        self.analysis
            .map(|a| a.strengths.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Merge the recommended outputs. `None` only when no successful output
/// exists to merge.
pub fn merge(analysis: &ValidationAnalysis, outcomes: &[ExecutionOutcome]) -> Option<MergeOutput> {
    let successful = |id: &BackendId| outcomes.iter().find(|o| o.success && &o.backend == id);

    let mut picked: Vec<&ExecutionOutcome> = analysis.recommendation.iter().filter_map(successful).collect();
    if picked.is_empty() {
        picked.extend(outcomes.iter().find(|o| o.success));
    }
    let first = *picked.first()?;

    let strategy = if picked.len() == 1 {
        MergeStrategy::UseBest
    } else {
        analysis.strategy
    };

    let sources: Vec<Source> = picked
        .iter()
        .map(|o| Source::new(o, analysis.analysis_for(&o.backend)))
        .collect();

    let (content, mut notes) = match strategy {
        MergeStrategy::UseBest => (first.text.clone(), Vec::new()),
        MergeStrategy::Combine => combine(&sources),
        MergeStrategy::Sequential => (sequential(&sources), Vec::new()),
    };

    let defined: BTreeSet<String> = sources
        .iter()
        .flat_map(|s| s.sections.iter().filter_map(|sec| sec.name.clone()))
        .collect();
    notes.extend(check_consistency(&content, &defined));

    Some(MergeOutput {
        artifact: ConsensusArtifact {
            content,
            strategy,
            sources: picked.iter().map(|o| o.backend.clone()).collect(),
            provisional: false,
        },
        conflict_notes: notes,
    })
}

/// Sections grouped per language, in first-seen order.
#[derive(Default)]
struct Assembly {
    order: Vec<Option<String>>,
    groups: BTreeMap<Option<String>, Vec<String>>,
}

impl Assembly {
    fn push(&mut self, language: Option<String>, chunk: String) {
        if !self.groups.contains_key(&language) {
            self.order.push(language.clone());
        }
        self.groups.entry(language).or_default().push(chunk);
    }

    fn render(self) -> String {
        let Assembly { order, mut groups } = self;
        order
            .into_iter()
            .filter_map(|lang| {
                let chunks = groups.remove(&lang)?;
                Some(fence(lang.as_deref(), &chunks.join("\n\n")))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn fence(language: Option<&str>, code: &str) -> String {
    match language {
        Some(lang) => format!("```{lang}\n{code}\n```"),
        None => code.to_string(),
    }
}

fn preamble_union(base: &str, other: &str) -> String {
    let present: BTreeSet<&str> = base.lines().map(str::trim).collect();
    let extra: Vec<&str> = other
        .lines()
        .filter(|l| !l.trim().is_empty() && !present.contains(l.trim()))
        .collect();
    if extra.is_empty() {
        base.to_string()
    } else {
        format!("{}\n{}", base.trim_end(), extra.join("\n"))
    }
}

fn criteria_list(criteria: &BTreeSet<Criterion>) -> String {
    criteria.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
}

fn combine(sources: &[Source]) -> (String, Vec<String>) {
    let mut notes = Vec::new();
    let base = &sources[0];

    // (language, content) slots seeded from the top output
    let mut slots: Vec<(Option<String>, String)> = base
        .sections
        .iter()
        .map(|s| (s.language.clone(), s.content.clone()))
        .collect();
    let named_slot: BTreeMap<&str, usize> = base
        .sections
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.name.as_deref().map(|n| (n, i)))
        .collect();
    let unnamed_slots: Vec<usize> = base
        .sections
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_named())
        .map(|(i, _)| i)
        .collect();

    let base_strengths = base.strengths();
    let mut appended: Vec<(Option<String>, String)> = Vec::new();

    for other in &sources[1..] {
        let extra_strengths: BTreeSet<Criterion> =
            other.strengths().difference(&base_strengths).copied().collect();
        let mut unnamed_seen = 0usize;

        for section in &other.sections {
            let prefix = comment_prefix(section.language.as_deref());
            match section.name.as_deref() {
                Some(name) => match named_slot.get(name) {
                    Some(&slot) => {
                        if slots[slot].1.trim() == section.content.trim() {
                            continue;
                        }
                        if extra_strengths.is_empty() {
                            notes.push(format!(
                                "`{name}`: kept {} version over {}",
                                base.backend(),
                                other.backend()
                            ));
                        } else {
                            let criteria = criteria_list(&extra_strengths);
                            notes.push(format!(
                                "`{name}`: kept versions from {} and {} ({} stronger on {criteria})",
                                base.backend(),
                                other.backend(),
                                other.backend()
                            ));
                            slots[slot].1 = format!(
                                "{}\n\n{prefix} Alternative `{name}` from {} (stronger on {criteria})\n{}",
                                slots[slot].1,
                                other.backend(),
                                section.content
                            );
                        }
                    }
                    None => appended.push((
                        section.language.clone(),
                        format!("{prefix} From {}\n{}", other.backend(), section.content),
                    )),
                },
                None => {
                    match unnamed_slots.get(unnamed_seen) {
                        Some(&slot) if slots[slot].0 == section.language => {
                            slots[slot].1 = preamble_union(&slots[slot].1, &section.content);
                        }
                        _ => appended.push((
                            section.language.clone(),
                            format!("{prefix} From {}\n{}", other.backend(), section.content),
                        )),
                    }
                    unnamed_seen += 1;
                }
            }
        }
    }

    let mut assembly = Assembly::default();
    for (language, content) in slots.into_iter().chain(appended) {
        assembly.push(language, content);
    }
    (assembly.render(), notes)
}

fn sequential(sources: &[Source]) -> String {
    let total = sources.len();
    sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let step = i + 1;
            extract_code_blocks(&source.outcome.text)
                .into_iter()
                .map(|block| {
                    let prefix = comment_prefix(block.language.as_deref());
                    let header = format!("{prefix} Step {step}/{total}: {}", source.backend());
                    fence(
                        block.language.as_deref(),
                        &format!("{header}\n{}", block.code.trim_end()),
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Notes on the merged text: unbalanced delimiters, duplicate definitions,
/// and calls to names some source defined but the merge dropped.
pub fn check_consistency(content: &str, source_definitions: &BTreeSet<String>) -> Vec<String> {
    let mut notes = Vec::new();
    let blocks = extract_code_blocks(content);

    let mut defined: BTreeMap<String, usize> = BTreeMap::new();
    for block in &blocks {
        if let Err(problem) = check_balanced(&block.code, block.language.as_deref()) {
            let language = block.language.as_deref().unwrap_or("merged");
            notes.push(format!("Unbalanced delimiters in {language} code: {problem}"));
        }
        for section in split_sections(block) {
            if let (Some(name), Some(kind)) = (section.name, section.kind.as_deref()) {
                // impl blocks legitimately repeat per trait
                if kind != "impl" {
                    *defined.entry(name).or_default() += 1;
                }
            }
        }
    }

    for (name, count) in &defined {
        if *count > 1 {
            notes.push(format!("`{name}` is defined {count} times"));
        }
    }

    let mut missing = BTreeSet::new();
    for block in &blocks {
        for caps in CALL_RE.captures_iter(&block.code) {
            let Some(name) = caps.get(1).map(|m| m.as_str()) else {
                continue;
            };
            if source_definitions.contains(name) && !defined.contains_key(name) {
                missing.insert(name.to_string());
            }
        }
    }
    for name in missing {
        notes.push(format!("`{name}` is referenced but its definition was dropped"));
    }

    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BackendRole, SubScores};

    fn outcome(id: &str, text: &str) -> ExecutionOutcome {
        let mut o = ExecutionOutcome::succeeded(id.into(), BackendRole::Primary, text.into(), 1, 1);
        o.sections = extract_sections(text);
        o
    }

    fn analysis_of(id: &str, score: f64, strengths: &[Criterion]) -> BackendAnalysis {
        BackendAnalysis {
            backend: id.into(),
            score,
            sub_scores: SubScores::default(),
            strengths: strengths.to_vec(),
            weaknesses: vec![],
            issues: vec![],
            merge_worthy: true,
            notes: vec![],
        }
    }

    fn plan(strategy: MergeStrategy, analyses: Vec<BackendAnalysis>) -> ValidationAnalysis {
        ValidationAnalysis {
            recommendation: analyses.iter().map(|a| a.backend.clone()).collect(),
            analyses,
            strategy,
            confidence: 0.95,
            concerns: vec![],
            summary: String::new(),
            validators: vec![],
        }
    }

    #[test]
    fn test_use_best_is_verbatim() {
        let text = "Answer:\n```python\ndef f():\n    return 1\n```\n";
        let outcomes = vec![outcome("a", text), outcome("b", "other")];
        let result = merge(&plan(MergeStrategy::UseBest, vec![analysis_of("a", 90.0, &[])]), &outcomes).unwrap();
        assert_eq!(result.artifact.content, text);
        assert_eq!(result.artifact.sources, vec![BackendId::from("a")]);
        assert!(result.conflict_notes.is_empty(), "{:?}", result.conflict_notes);
    }

    #[test]
    fn test_combine_aligns_sections_and_appends_unique() {
        let a = "```python\nimport os\n\ndef load(path):\n    return open(path).read()\n```";
        let b = "```python\nimport sys\n\ndef load(path):\n    with open(path) as f:\n        return f.read()\n\ndef test_load():\n    assert load(__file__)\n```";
        let outcomes = vec![outcome("a", a), outcome("b", b)];
        let analysis = plan(
            MergeStrategy::Combine,
            vec![
                analysis_of("a", 88.0, &[Criterion::Correctness]),
                analysis_of("b", 80.0, &[Criterion::Correctness]),
            ],
        );
        let result = merge(&analysis, &outcomes).unwrap();
        let content = &result.artifact.content;

        assert!(content.starts_with("```python\nimport os\nimport sys"));
        assert_eq!(content.matches("def load").count(), 1);
        assert!(content.contains("return open(path).read()"));
        assert!(content.contains("# From b\ndef test_load"));
        assert!(result.conflict_notes.iter().any(|n| n.contains("kept a version over b")));
        assert_eq!(result.artifact.strategy, MergeStrategy::Combine);
    }

    #[test]
    fn test_combine_keeps_both_when_lower_is_stronger_somewhere() {
        let a = "```rust\nfn parse(s: &str) -> u32 {\n    s.parse().unwrap_or(0)\n}\n```";
        let b = "```rust\n/// Parse with a default.\nfn parse(s: &str) -> u32 {\n    s.trim().parse().unwrap_or_default()\n}\n```";
        let outcomes = vec![outcome("a", a), outcome("b", b)];
        let analysis = plan(
            MergeStrategy::Combine,
            vec![
                analysis_of("a", 88.0, &[Criterion::Correctness]),
                analysis_of("b", 80.0, &[Criterion::Documentation]),
            ],
        );
        let result = merge(&analysis, &outcomes).unwrap();
        let content = &result.artifact.content;
        assert!(content.contains("// Alternative `parse` from b (stronger on documentation)"));
        assert!(result.conflict_notes.iter().any(|n| n.contains("`parse` is defined 2 times")));
    }

    #[test]
    fn test_sequential_in_order_with_step_headers() {
        let a = "```sql\nCREATE TABLE t (id INT);\n```";
        let b = "```bash\npsql -f migrate.sql\n```";
        let outcomes = vec![outcome("a", a), outcome("b", b)];
        let analysis = plan(
            MergeStrategy::Sequential,
            vec![analysis_of("a", 75.0, &[]), analysis_of("b", 95.0, &[])],
        );
        let result = merge(&analysis, &outcomes).unwrap();
        let content = &result.artifact.content;
        let first = content.find("-- Step 1/2: a").unwrap();
        let second = content.find("# Step 2/2: b").unwrap();
        assert!(first < second);
        assert_eq!(result.artifact.sources, vec![BackendId::from("a"), BackendId::from("b")]);
    }

    #[test]
    fn test_failed_recommendation_falls_back_to_success() {
        let mut failed = outcome("a", "");
        failed.success = false;
        let outcomes = vec![failed, outcome("b", "plain answer")];
        let analysis = plan(MergeStrategy::Combine, vec![analysis_of("a", 90.0, &[])]);
        let result = merge(&analysis, &outcomes).unwrap();
        assert_eq!(result.artifact.content, "plain answer");
        assert_eq!(result.artifact.strategy, MergeStrategy::UseBest);
    }

    #[test]
    fn test_nothing_to_merge() {
        let analysis = plan(MergeStrategy::UseBest, vec![]);
        assert!(merge(&analysis, &[]).is_none());
    }

    #[test]
    fn test_consistency_flags_dropped_definition_and_imbalance() {
        let content = "```python\ndef main():\n    return helper(1\n```";
        let sources: BTreeSet<String> = ["main".to_string(), "helper".to_string()].into();
        let notes = check_consistency(content, &sources);
        assert!(notes.iter().any(|n| n.starts_with("Unbalanced delimiters in python code")));
        assert!(notes.iter().any(|n| n.contains("`helper` is referenced")));
    }
}
