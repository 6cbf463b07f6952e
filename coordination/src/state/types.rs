//! Core types for orchestration runs
//!
//! Everything a run produces is a plain serde value: the submitted [`Task`],
//! the per-backend [`ExecutionOutcome`]s, the validator's
//! [`ValidationAnalysis`], and the final [`OrchestrationResult`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ensemble::sections::Section;
use crate::router::RoutingDecision;
use crate::state::machine::{RunStatus, TransitionRecord};

/// Identity of a worker backend (e.g. `claude`, `codex`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BackendId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How many backends a run fans out to, and whether it is validated.
///
/// Doubles as the caller's complexity hint on [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One primary, no validator
    Simple,
    /// Two primaries, one validator
    Medium,
    /// Two primaries, two validators
    Complex,
    /// Every registered backend, no validator
    Architectural,
}

impl ExecutionMode {
    pub fn primary_count(self, registered: usize) -> usize {
        match self {
            Self::Simple => 1,
            Self::Medium | Self::Complex => 2,
            Self::Architectural => registered,
        }
    }

    pub fn validator_count(self) -> usize {
        match self {
            Self::Simple | Self::Architectural => 0,
            Self::Medium => 1,
            Self::Complex => 2,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Medium => write!(f, "medium"),
            Self::Complex => write!(f, "complex"),
            Self::Architectural => write!(f, "architectural"),
        }
    }
}

/// Caller preference used when filling backend slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceHint {
    /// Lowest average latency first
    Fast,
    /// Lowest cost first
    #[default]
    Balanced,
    /// Highest cost (most capable) first
    Thorough,
}

/// A unit of work submitted by the caller. Never mutated after submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity_hint: Option<ExecutionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_hint: Option<PerformanceHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_backend: Option<BackendId>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: None,
            complexity_hint: None,
            performance_hint: None,
            override_backend: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_complexity(mut self, mode: ExecutionMode) -> Self {
        self.complexity_hint = Some(mode);
        self
    }

    pub fn with_performance(mut self, hint: PerformanceHint) -> Self {
        self.performance_hint = Some(hint);
        self
    }

    pub fn with_override(mut self, backend: impl Into<BackendId>) -> Self {
        self.override_backend = Some(backend.into());
        self
    }
}

/// Which side of the barrier a call ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendRole {
    Primary,
    Validator,
}

/// Why a backend call did not produce output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Per-call deadline elapsed
    Timeout,
    /// Rate limit or network failure that outlived the retry budget
    Transient,
    /// Authentication or other non-retriable failure
    Fatal,
    /// Run was cancelled while the call was in flight
    Cancelled,
    /// Backend missing from the pool or the call task panicked
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Settled result of one backend call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub backend: BackendId,
    pub role: BackendRole,
    pub success: bool,
    /// Raw output text, empty on failure
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<Section>,
    pub latency_ms: u64,
    /// Attempts made, including retries
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(
        backend: BackendId,
        role: BackendRole,
        text: String,
        latency_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            backend,
            role,
            success: true,
            text,
            sections: Vec::new(),
            latency_ms,
            attempts,
            error: None,
            error_message: None,
        }
    }

    pub fn failed(
        backend: BackendId,
        role: BackendRole,
        kind: ErrorKind,
        message: impl Into<String>,
        latency_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            backend,
            role,
            success: false,
            text: String::new(),
            sections: Vec::new(),
            latency_ms,
            attempts,
            error: Some(kind),
            error_message: Some(message.into()),
        }
    }

    /// One-line failure description, `None` for successful calls.
    pub fn failure_reason(&self) -> Option<String> {
        if self.success {
            return None;
        }
        let kind = self.error.unwrap_or(ErrorKind::Internal);
        Some(match &self.error_message {
            Some(msg) => format!("{}: {} ({})", self.backend, kind, msg),
            None => format!("{}: {}", self.backend, kind),
        })
    }
}

/// Severity of a flagged issue. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// The six scoring criteria, in weight-table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Correctness,
    Structure,
    Performance,
    BestPractices,
    Documentation,
    Testing,
}

impl Criterion {
    pub const ALL: [Criterion; 6] = [
        Criterion::Correctness,
        Criterion::Structure,
        Criterion::Performance,
        Criterion::BestPractices,
        Criterion::Documentation,
        Criterion::Testing,
    ];

    /// Maximum points this criterion contributes to the 0–100 score.
    pub fn weight(self) -> f64 {
        match self {
            Self::Correctness => 20.0,
            Self::Structure => 20.0,
            Self::Performance => 15.0,
            Self::BestPractices => 20.0,
            Self::Documentation => 15.0,
            Self::Testing => 10.0,
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Correctness => write!(f, "correctness"),
            Self::Structure => write!(f, "structure"),
            Self::Performance => write!(f, "performance"),
            Self::BestPractices => write!(f, "best_practices"),
            Self::Documentation => write!(f, "documentation"),
            Self::Testing => write!(f, "testing"),
        }
    }
}

/// Points earned per criterion, each bounded by [`Criterion::weight`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub correctness: f64,
    pub structure: f64,
    pub performance: f64,
    pub best_practices: f64,
    pub documentation: f64,
    pub testing: f64,
}

impl SubScores {
    pub fn get(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::Correctness => self.correctness,
            Criterion::Structure => self.structure,
            Criterion::Performance => self.performance,
            Criterion::BestPractices => self.best_practices,
            Criterion::Documentation => self.documentation,
            Criterion::Testing => self.testing,
        }
    }

    pub fn set(&mut self, criterion: Criterion, points: f64) {
        let clamped = points.clamp(0.0, criterion.weight());
        match criterion {
            Criterion::Correctness => self.correctness = clamped,
            Criterion::Structure => self.structure = clamped,
            Criterion::Performance => self.performance = clamped,
            Criterion::BestPractices => self.best_practices = clamped,
            Criterion::Documentation => self.documentation = clamped,
            Criterion::Testing => self.testing = clamped,
        }
    }

    pub fn total(&self) -> f64 {
        Criterion::ALL.iter().map(|c| self.get(*c)).sum()
    }
}

/// Validator verdict for one successful primary output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendAnalysis {
    pub backend: BackendId,
    /// Weighted score in [0, 100]
    pub score: f64,
    pub sub_scores: SubScores,
    pub strengths: Vec<Criterion>,
    pub weaknesses: Vec<Criterion>,
    pub issues: Vec<Issue>,
    pub merge_worthy: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl BackendAnalysis {
    pub fn has_critical(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    UseBest,
    Combine,
    Sequential,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UseBest => write!(f, "use_best"),
            Self::Combine => write!(f, "combine"),
            Self::Sequential => write!(f, "sequential"),
        }
    }
}

/// Aggregate validator output for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationAnalysis {
    /// Per-backend analyses, in dispatch order
    pub analyses: Vec<BackendAnalysis>,
    /// Ordered subset of backends whose output should be merged
    pub recommendation: Vec<BackendId>,
    pub strategy: MergeStrategy,
    /// Aggregate confidence in [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub concerns: Vec<String>,
    pub summary: String,
    /// Validator backends whose reviews were folded in
    #[serde(default)]
    pub validators: Vec<BackendId>,
}

impl ValidationAnalysis {
    pub fn analysis_for(&self, backend: &BackendId) -> Option<&BackendAnalysis> {
        self.analyses.iter().find(|a| &a.backend == backend)
    }

    pub fn merge_worthy(&self) -> impl Iterator<Item = &BackendAnalysis> {
        self.analyses.iter().filter(|a| a.merge_worthy)
    }

    pub fn has_critical(&self) -> bool {
        self.analyses.iter().any(BackendAnalysis::has_critical)
    }

    /// Highest scoring backend, earliest dispatch wins ties.
    pub fn top(&self) -> Option<&BackendAnalysis> {
        self.analyses.iter().fold(None, |best, a| match best {
            Some(b) if b.score >= a.score => Some(b),
            _ => Some(a),
        })
    }
}

/// Merged output attached to a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusArtifact {
    pub content: String,
    pub strategy: MergeStrategy,
    pub sources: Vec<BackendId>,
    /// Set when the run escalated; the content awaits human sign-off
    pub provisional: bool,
}

/// Final record of a run. Assembled once, never mutated after return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub task: Task,
    pub routing: RoutingDecision,
    /// Primary outcomes in dispatch order
    pub outcomes: Vec<ExecutionOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validator_outcomes: Vec<ExecutionOutcome>,
    pub analysis: Option<ValidationAnalysis>,
    pub artifact: Option<ConsensusArtifact>,
    #[serde(default)]
    pub conflict_notes: Vec<String>,
    pub needs_human_review: bool,
    #[serde(default)]
    pub review_reasons: Vec<String>,
    #[serde(default)]
    pub failure_reasons: Vec<String>,
    pub total_time_ms: u64,
    pub status: RunStatus,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,
}

impl OrchestrationResult {
    pub fn successful_outcomes(&self) -> impl Iterator<Item = &ExecutionOutcome> {
        self.outcomes.iter().filter(|o| o.success)
    }
}
