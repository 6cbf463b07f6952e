//! Task Router
//!
//! Turns a [`Task`] into a [`RoutingDecision`]: which category it belongs
//! to, which backends produce output, which backends review it, and in
//! which execution mode.
//!
//! # Selection order
//!
//! ```text
//! override_backend set?  → sole primary, no validator, simple mode, stickiness reset
//! sticky window open?    → reuse previous backend set, decrement window
//! explicit category?     → use it directly
//! otherwise              → keyword/pattern scoring, cost-aware tie-break,
//!                          default category below threshold
//! ```
//!
//! # Backend counts per mode
//!
//! | Mode          | Primaries | Validators |
//! |---------------|-----------|------------|
//! | simple        | 1         | 0          |
//! | medium        | 2         | 1          |
//! | complex       | 2         | 2          |
//! | architectural | all (≤4)  | 0          |
//!
//! Routing is a pure function of task, snapshot and session state. The
//! caller owns [`SessionState`] and threads it from turn to turn.

pub mod classifier;
pub mod config;
pub mod task_classifier;

pub use classifier::{CategoryClassifier, CategoryScore};
pub use config::{CategoryConfig, ConfigError, RoutingConfig};
pub use task_classifier::ModeEstimator;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::registry::{BackendRegistry, EngineSnapshot};
use crate::state::{BackendId, ExecutionMode, PerformanceHint, Task};

/// Upper bound on primaries for any mode.
pub const MAX_PRIMARIES: usize = 4;

/// Category name recorded on decisions forced by `override_backend`.
pub const OVERRIDE_CATEGORY: &str = "override";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RoutingError {
    #[error("Override backend '{0}' is not registered")]
    UnknownOverride(BackendId),

    #[error("Explicit category '{0}' is not configured")]
    UnknownCategory(String),

    #[error("No registered backend can serve category '{0}'")]
    NoBackends(String),
}

/// Computed once per task, never revised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub category: String,
    /// Non-empty, at most [`MAX_PRIMARIES`]
    pub primaries: Vec<BackendId>,
    /// Disjoint from `primaries`
    pub validators: Vec<BackendId>,
    pub sticky: bool,
    pub mode: ExecutionMode,
    /// Winning classification score (1.0 for overrides and explicit categories)
    pub score: f64,
    /// Set when no category cleared its threshold and the default was used
    #[serde(default)]
    pub fallback: bool,
    pub reason: String,
}

/// Routing continuity carried between turns by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub category: Option<String>,
    #[serde(default)]
    pub primaries: Vec<BackendId>,
    #[serde(default)]
    pub validators: Vec<BackendId>,
    pub mode: Option<ExecutionMode>,
    /// Turns left in which the previous backend set is reused
    #[serde(default)]
    pub remaining_turns: u32,
}

impl SessionState {
    pub fn is_sticky(&self) -> bool {
        self.remaining_turns > 0 && !self.primaries.is_empty()
    }
}

/// Route `task` against `snapshot`, returning the decision and the next session state.
pub fn route(
    task: &Task,
    snapshot: &EngineSnapshot,
    session: &SessionState,
) -> Result<(RoutingDecision, SessionState), RoutingError> {
    let registry = &snapshot.registry;
    let config = &snapshot.routing;

    if let Some(backend) = &task.override_backend {
        if !registry.contains(backend) {
            return Err(RoutingError::UnknownOverride(backend.clone()));
        }
        info!(backend = %backend, "Routing override");
        let decision = RoutingDecision {
            category: OVERRIDE_CATEGORY.to_string(),
            primaries: vec![backend.clone()],
            validators: Vec::new(),
            sticky: false,
            mode: ExecutionMode::Simple,
            score: 1.0,
            fallback: false,
            reason: format!("Override: {backend}"),
        };
        return Ok((decision, SessionState::default()));
    }

    let mode = snapshot.modes.select(task);
    let hint = task.performance_hint.unwrap_or_default();

    if session.is_sticky() && session.primaries.iter().all(|b| registry.contains(b)) {
        let category = session
            .category
            .clone()
            .unwrap_or_else(|| config.default_category.clone());
        let next = SessionState {
            remaining_turns: session.remaining_turns - 1,
            ..session.clone()
        };
        info!(
            category = %category,
            remaining = next.remaining_turns,
            "Sticky routing: reusing previous backend set"
        );
        let decision = RoutingDecision {
            category: category.clone(),
            primaries: session.primaries.clone(),
            validators: session.validators.clone(),
            sticky: true,
            mode: session.mode.unwrap_or(mode),
            score: 1.0,
            fallback: false,
            reason: format!(
                "Sticky: continuing {category} ({} turns left)",
                session.remaining_turns
            ),
        };
        return Ok((decision, next));
    }

    let (category, score, fallback, reason) = match &task.category {
        Some(name) => {
            let category = config
                .category(name)
                .ok_or_else(|| RoutingError::UnknownCategory(name.clone()))?;
            (category, 1.0, false, format!("Explicit category: {name}"))
        }
        None => classify(task, snapshot, mode, hint)?,
    };

    let (primaries, validators) = select_backends(category, mode, hint, registry);
    if primaries.is_empty() {
        return Err(RoutingError::NoBackends(category.name.clone()));
    }

    let next = if category.sticky {
        SessionState {
            category: Some(category.name.clone()),
            primaries: primaries.clone(),
            validators: validators.clone(),
            mode: Some(mode),
            remaining_turns: config.sticky_turns.saturating_sub(1),
        }
    } else {
        SessionState::default()
    };

    info!(
        category = %category.name,
        score,
        mode = %mode,
        primaries = ?primaries,
        validators = ?validators,
        sticky = category.sticky,
        "Task routed"
    );

    Ok((
        RoutingDecision {
            category: category.name.clone(),
            primaries,
            validators,
            sticky: category.sticky,
            mode,
            score,
            fallback,
            reason,
        },
        next,
    ))
}

fn classify<'a>(
    task: &Task,
    snapshot: &'a EngineSnapshot,
    mode: ExecutionMode,
    hint: PerformanceHint,
) -> Result<(&'a CategoryConfig, f64, bool, String), RoutingError> {
    let config = &snapshot.routing;
    let ranked = snapshot.classifier.rank(&task.description);

    let eligible: Vec<(&CategoryScore, &CategoryConfig)> = ranked
        .iter()
        .filter_map(|s| config.category(&s.category).map(|c| (s, c)))
        .filter(|(s, c)| s.score > 0.0 && s.score >= c.min_score.unwrap_or(config.confidence_threshold))
        .collect();

    for s in ranked.iter().filter(|s| s.score > 0.0) {
        debug!(
            category = %s.category,
            score = s.score,
            keyword_hits = s.keyword_hits,
            pattern_hits = s.pattern_hits,
            "Category score"
        );
    }

    let Some(&(top_score, top)) = eligible.first() else {
        let default = config
            .default_category()
            .ok_or_else(|| RoutingError::UnknownCategory(config.default_category.clone()))?;
        debug!(default = %default.name, "No category cleared threshold, using default");
        return Ok((
            default,
            0.0,
            true,
            format!("Default: no category reached {:.2}", config.confidence_threshold),
        ));
    };

    if let Some(&(second_score, second)) = eligible.get(1) {
        let spread = top_score.score - second_score.score;
        if spread <= config.tie_margin * top_score.score {
            let top_cost = pairing_cost(top, mode, hint, &snapshot.registry);
            let second_cost = pairing_cost(second, mode, hint, &snapshot.registry);
            debug!(
                top = %top.name,
                top_cost,
                second = %second.name,
                second_cost,
                spread,
                "Near tie between top categories"
            );
            if second_cost < top_cost {
                return Ok((
                    second,
                    second_score.score,
                    false,
                    format!(
                        "Cost-aware: {} (cost {:.2}) over {} (cost {:.2}), scores within {:.0}%",
                        second.name,
                        second_cost,
                        top.name,
                        top_cost,
                        config.tie_margin * 100.0
                    ),
                ));
            }
        }
    }

    Ok((
        top,
        top_score.score,
        false,
        format!(
            "Matched {} (score {:.2}, keywords {}, patterns {})",
            top.name, top_score.score, top_score.keyword_hits, top_score.pattern_hits
        ),
    ))
}

/// Category cost plus the cost of the primaries it would get for this mode.
pub fn pairing_cost(
    category: &CategoryConfig,
    mode: ExecutionMode,
    hint: PerformanceHint,
    registry: &BackendRegistry,
) -> f64 {
    let (primaries, _) = select_backends(category, mode, hint, registry);
    category.cost_weight + primaries.iter().map(|b| registry.cost_of(b)).sum::<f64>()
}

/// Preferred backends first, then fill-in ordered by `hint`. Validators never overlap primaries.
pub fn select_backends(
    category: &CategoryConfig,
    mode: ExecutionMode,
    hint: PerformanceHint,
    registry: &BackendRegistry,
) -> (Vec<BackendId>, Vec<BackendId>) {
    let ranked: Vec<BackendId> = registry.ranked(hint).into_iter().map(|p| p.id.clone()).collect();
    let primary_count = mode
        .primary_count(registry.len())
        .min(registry.len())
        .min(MAX_PRIMARIES);

    let mut primaries: Vec<BackendId> = Vec::with_capacity(primary_count);
    let preferred = if mode == ExecutionMode::Architectural {
        &[][..]
    } else {
        &category.primaries[..]
    };
    for id in preferred.iter().chain(ranked.iter()) {
        if primaries.len() == primary_count {
            break;
        }
        if registry.contains(id) && !primaries.contains(id) {
            primaries.push(id.clone());
        }
    }

    let validator_count = mode.validator_count();
    let mut validators: Vec<BackendId> = Vec::with_capacity(validator_count);
    for id in category.validators.iter().chain(ranked.iter()) {
        if validators.len() == validator_count {
            break;
        }
        if registry.contains(id) && !primaries.contains(id) && !validators.contains(id) {
            validators.push(id.clone());
        }
    }

    (primaries, validators)
}
