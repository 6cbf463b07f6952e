//! Orchestration engine - drives one task through a full run
//!
//! ```text
//! Pending ─► Routing ─► Executing ─┬─► Validating ─► Merging ─┬─► Complete
//!                                  │                          └─► Escalated
//!                                  ├─► Merging (simple mode)
//!                                  └─► Failed (no backend succeeded)
//! ```
//!
//! Each run loads the engine snapshot once and uses it end to end, so a
//! registry swap mid-run never mixes two configurations. Routing errors and
//! cancellation surface as `Err`; every other outcome, including total
//! backend failure, comes back as an [`OrchestrationResult`].

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::ensemble::backend::BackendPool;
use crate::ensemble::executor::{BackendCall, ExecutionContext, Executor};
use crate::ensemble::merger::merge;
use crate::ensemble::review::{apply_review, review_prompt};
use crate::ensemble::validator::{combine_analyses, validate};
use crate::errors::OrchestrationError;
use crate::escalation::{EscalationPolicy, ReviewDecision};
use crate::events::{ProgressEvent, SharedEventBus};
use crate::registry::SnapshotHandle;
use crate::router::{route, RoutingDecision, SessionState};
use crate::state::{
    BackendRole, ConsensusArtifact, ExecutionMode, ExecutionOutcome, MergeStrategy,
    OrchestrationResult, RunStateMachine, RunStatus, Task, ValidationAnalysis,
};

/// Shared reference to OrchestrationEngine
pub type SharedOrchestrationEngine = Arc<OrchestrationEngine>;

/// What the validation phase produced.
enum Validation {
    /// Simple mode: no comparison, the sole output is used as-is
    Skipped,
    Analysed(ValidationAnalysis),
    /// Every assigned validator failed
    Unavailable(Vec<String>),
}

pub struct OrchestrationEngine {
    snapshots: SnapshotHandle,
    executor: Executor,
    config: Arc<EngineConfig>,
    events: Option<SharedEventBus>,
}

impl OrchestrationEngine {
    pub fn new(snapshots: SnapshotHandle, pool: BackendPool, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        Self {
            snapshots,
            executor: Executor::new(Arc::new(pool), config.clone()),
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn shared(self) -> SharedOrchestrationEngine {
        Arc::new(self)
    }

    pub fn snapshots(&self) -> &SnapshotHandle {
        &self.snapshots
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn run(
        &self,
        task: Task,
        session: &SessionState,
    ) -> Result<(OrchestrationResult, SessionState), OrchestrationError> {
        self.run_with_cancel(task, session, CancellationToken::new()).await
    }

    /// Run `task` to a terminal state. Cancelling `cancel` stops in-flight
    /// backend calls and returns [`OrchestrationError::Cancelled`].
    pub async fn run_with_cancel(
        &self,
        task: Task,
        session: &SessionState,
        cancel: CancellationToken,
    ) -> Result<(OrchestrationResult, SessionState), OrchestrationError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let snapshot = self.snapshots.load();
        let ctx = ExecutionContext::new(run_id)
            .with_cancel(cancel)
            .with_events(self.events.clone());
        let mut machine = RunStateMachine::new();

        ctx.emit(ProgressEvent::task_received(run_id, &task.description));
        info!(
            run_id = %run_id,
            registry_version = snapshot.registry.version(),
            "Run started"
        );

        machine.advance(RunStatus::Routing, None)?;
        let (decision, next_session) = match route(&task, &snapshot, session) {
            Ok(routed) => routed,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Routing failed");
                ctx.emit(ProgressEvent::RunFailed {
                    run_id,
                    reasons: vec![e.to_string()],
                    timestamp: Utc::now(),
                });
                return Err(e.into());
            }
        };
        info!(
            run_id = %run_id,
            category = %decision.category,
            mode = %decision.mode,
            primaries = ?decision.primaries,
            validators = ?decision.validators,
            sticky = decision.sticky,
            "Task routed"
        );
        ctx.emit(ProgressEvent::TaskRouted {
            run_id,
            category: decision.category.clone(),
            mode: decision.mode,
            primaries: decision.primaries.clone(),
            validators: decision.validators.clone(),
            sticky: decision.sticky,
            timestamp: Utc::now(),
        });

        machine.advance(RunStatus::Executing, Some(&decision.reason))?;
        let outcomes = match self.executor.execute(&decision, &task, &ctx).await {
            Ok(outcomes) => outcomes,
            Err(OrchestrationError::NoBackendsSucceeded { outcomes }) => {
                let failure_reasons: Vec<String> =
                    outcomes.iter().filter_map(ExecutionOutcome::failure_reason).collect();
                machine.advance(RunStatus::Failed, Some("no backend succeeded"))?;
                error!(run_id = %run_id, reasons = ?failure_reasons, "No backends succeeded");
                ctx.emit(ProgressEvent::RunFailed {
                    run_id,
                    reasons: failure_reasons.clone(),
                    timestamp: Utc::now(),
                });
                let result = OrchestrationResult {
                    run_id,
                    started_at,
                    task,
                    routing: decision,
                    outcomes,
                    validator_outcomes: Vec::new(),
                    analysis: None,
                    artifact: None,
                    conflict_notes: Vec::new(),
                    needs_human_review: false,
                    review_reasons: Vec::new(),
                    failure_reasons,
                    total_time_ms: elapsed_ms(clock),
                    status: machine.current(),
                    transitions: machine.into_transitions(),
                };
                return Ok((result, next_session));
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Run aborted during execution");
                ctx.emit(ProgressEvent::RunFailed {
                    run_id,
                    reasons: e.failure_reasons(),
                    timestamp: Utc::now(),
                });
                return Err(e);
            }
        };

        let (validation, validator_outcomes) = if decision.mode == ExecutionMode::Simple {
            (Validation::Skipped, Vec::new())
        } else {
            machine.advance(RunStatus::Validating, None)?;
            self.validate_outputs(&task, &decision, &outcomes, &ctx).await?
        };

        let stage = match &validation {
            Validation::Skipped => "simple mode, validation skipped",
            Validation::Analysed(_) => "validated",
            Validation::Unavailable(_) => "validation unavailable",
        };
        machine.advance(RunStatus::Merging, Some(stage))?;

        let policy = EscalationPolicy::from_config(&self.config);
        let (analysis, mut artifact, conflict_notes, review) = match validation {
            Validation::Skipped => {
                let artifact = outcomes.iter().find(|o| o.success).map(|o| ConsensusArtifact {
                    content: o.text.clone(),
                    strategy: MergeStrategy::UseBest,
                    sources: vec![o.backend.clone()],
                    provisional: false,
                });
                (None, artifact, Vec::new(), policy.scan_only(&outcomes))
            }
            Validation::Analysed(analysis) => {
                let (artifact, notes) = match merge(&analysis, &outcomes) {
                    Some(merged) => (Some(merged.artifact), merged.conflict_notes),
                    None => (None, Vec::new()),
                };
                let review = policy.needs_review(&analysis, &outcomes);
                (Some(analysis), artifact, notes, review)
            }
            Validation::Unavailable(reasons) => {
                let mut review_reasons = vec![format!("Validation unavailable: {}", reasons.join("; "))];
                review_reasons.extend(policy.scan_only(&outcomes).reasons);
                let review = ReviewDecision {
                    needs_review: true,
                    reasons: review_reasons,
                };
                (None, None, Vec::new(), review)
            }
        };

        if let Some(artifact) = &artifact {
            ctx.emit(ProgressEvent::MergeCompleted {
                run_id,
                strategy: artifact.strategy,
                conflicts: conflict_notes.len(),
                timestamp: Utc::now(),
            });
        }
        if !conflict_notes.is_empty() {
            warn!(run_id = %run_id, notes = ?conflict_notes, "Merge produced conflict notes");
        }

        let status = if review.needs_review {
            if let Some(artifact) = artifact.as_mut() {
                artifact.provisional = true;
            }
            RunStatus::Escalated
        } else {
            RunStatus::Complete
        };
        let reason = review.reasons.first().map(String::as_str);
        machine.advance(status, reason)?;

        let total_time_ms = elapsed_ms(clock);
        info!(
            run_id = %run_id,
            status = %status,
            needs_human_review = review.needs_review,
            reasons = ?review.reasons,
            total_time_ms,
            "Run finished"
        );
        ctx.emit(ProgressEvent::RunCompleted {
            run_id,
            status,
            needs_human_review: review.needs_review,
            total_time_ms,
            timestamp: Utc::now(),
        });

        let result = OrchestrationResult {
            run_id,
            started_at,
            task,
            routing: decision,
            failure_reasons: outcomes.iter().filter_map(ExecutionOutcome::failure_reason).collect(),
            outcomes,
            validator_outcomes,
            analysis,
            artifact,
            conflict_notes,
            needs_human_review: review.needs_review,
            review_reasons: review.reasons,
            total_time_ms,
            status: machine.current(),
            transitions: machine.into_transitions(),
        };
        Ok((result, next_session))
    }

    /// Local heuristic analysis, refined by each assigned validator's review.
    async fn validate_outputs(
        &self,
        task: &Task,
        decision: &RoutingDecision,
        outcomes: &[ExecutionOutcome],
        ctx: &ExecutionContext,
    ) -> Result<(Validation, Vec<ExecutionOutcome>), OrchestrationError> {
        let successful = outcomes.iter().filter(|o| o.success).count();
        ctx.emit(ProgressEvent::ValidationStarted {
            run_id: ctx.run_id,
            validators: decision.validators.clone(),
            outputs: successful,
            timestamp: Utc::now(),
        });

        let local = validate(&task.description, outcomes, &self.config);
        if decision.validators.is_empty() {
            self.validation_completed(ctx, &local);
            return Ok((Validation::Analysed(local), Vec::new()));
        }

        let prompt: Arc<str> = Arc::from(review_prompt(&task.description, outcomes));
        let calls = decision
            .validators
            .iter()
            .map(|v| BackendCall::new(v.clone(), BackendRole::Validator, prompt.clone()))
            .collect();
        let reviews = self.executor.dispatch(calls, ctx).await;

        if ctx.cancel.is_cancelled() {
            let mut settled = outcomes.to_vec();
            settled.extend(reviews);
            return Err(OrchestrationError::Cancelled { settled });
        }

        let reviewed: Vec<ValidationAnalysis> = reviews
            .iter()
            .filter(|r| r.success)
            .map(|r| apply_review(&task.description, &local, &r.backend, &r.text, &self.config))
            .collect();
        let unavailable: Vec<String> = reviews.iter().filter_map(ExecutionOutcome::failure_reason).collect();

        let validation = match reviewed.as_slice() {
            [] => {
                warn!(run_id = %ctx.run_id, reasons = ?unavailable, "Validation unavailable");
                return Ok((Validation::Unavailable(unavailable), reviews));
            }
            [only] => {
                let mut analysis = only.clone();
                for reason in &unavailable {
                    analysis.concerns.push(format!("Validator unavailable: {reason}"));
                }
                analysis
            }
            [first, second, ..] => combine_analyses(&task.description, first, second, &self.config),
        };

        self.validation_completed(ctx, &validation);
        Ok((Validation::Analysed(validation), reviews))
    }

    fn validation_completed(&self, ctx: &ExecutionContext, analysis: &ValidationAnalysis) {
        info!(
            run_id = %ctx.run_id,
            confidence = analysis.confidence,
            strategy = %analysis.strategy,
            recommendation = ?analysis.recommendation,
            "Validation complete"
        );
        ctx.emit(ProgressEvent::ValidationCompleted {
            run_id: ctx.run_id,
            confidence: analysis.confidence,
            strategy: analysis.strategy,
            recommendation: analysis.recommendation.clone(),
            timestamp: Utc::now(),
        });
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
