//! Executor: concurrent fan-out to backends with per-call deadlines
//!
//! Every call runs as its own task in a [`JoinSet`]. A call settles exactly
//! once, as success or a classified failure:
//!
//! ```text
//! attempt ──ok──────────────────────────────► succeeded
//!    │
//!    ├─ deadline elapsed ──────────────────► failed(timeout)     never retried
//!    ├─ fatal ─────────────────────────────► failed(fatal)
//!    ├─ transient / rate limited
//!    │     retries left → back off, attempt again
//!    │     otherwise ──────────────────────► failed(transient)
//!    └─ run cancelled ─────────────────────► failed(cancelled)
//! ```
//!
//! Outcomes come back in dispatch order regardless of completion order.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::ensemble::backend::{BackendPool, SharedBackend};
use crate::ensemble::sections::extract_sections;
use crate::errors::OrchestrationError;
use crate::events::{ProgressEvent, SharedEventBus};
use crate::router::RoutingDecision;
use crate::state::{BackendId, BackendRole, ErrorKind, ExecutionOutcome, Task};

/// Per-run plumbing shared by every call of that run.
#[derive(Clone)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub cancel: CancellationToken,
    pub events: Option<SharedEventBus>,
}

impl ExecutionContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: Option<SharedEventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(bus) = &self.events {
            let _ = bus.publish(event);
        }
    }
}

/// One backend invocation to dispatch.
#[derive(Debug, Clone)]
pub struct BackendCall {
    pub backend: BackendId,
    pub role: BackendRole,
    pub prompt: Arc<str>,
}

impl BackendCall {
    pub fn new(backend: BackendId, role: BackendRole, prompt: Arc<str>) -> Self {
        Self {
            backend,
            role,
            prompt,
        }
    }
}

/// Prompt sent to every primary backend.
pub fn primary_prompt(task: &Task, decision: &RoutingDecision) -> String {
    format!(
        "You are a {category} specialist. Complete the following task. \
         Put all code in fenced blocks tagged with their language.\n\n{description}",
        category = decision.category,
        description = task.description
    )
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone)]
pub struct Executor {
    pool: Arc<BackendPool>,
    config: Arc<EngineConfig>,
}

impl Executor {
    pub fn new(pool: Arc<BackendPool>, config: Arc<EngineConfig>) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run all primaries for a routed task.
    ///
    /// Returns every outcome in dispatch order when at least one call
    /// succeeded. Cancellation wins over every other result.
    pub async fn execute(
        &self,
        decision: &RoutingDecision,
        task: &Task,
        ctx: &ExecutionContext,
    ) -> Result<Vec<ExecutionOutcome>, OrchestrationError> {
        let prompt: Arc<str> = Arc::from(primary_prompt(task, decision));
        let calls = decision
            .primaries
            .iter()
            .map(|b| BackendCall::new(b.clone(), BackendRole::Primary, prompt.clone()))
            .collect();

        let outcomes = self.dispatch(calls, ctx).await;

        if ctx.cancel.is_cancelled() {
            return Err(OrchestrationError::Cancelled { settled: outcomes });
        }
        if !outcomes.iter().any(|o| o.success) {
            return Err(OrchestrationError::NoBackendsSucceeded { outcomes });
        }
        Ok(outcomes)
    }

    /// Dispatch calls concurrently and wait for all of them to settle.
    pub async fn dispatch(&self, calls: Vec<BackendCall>, ctx: &ExecutionContext) -> Vec<ExecutionOutcome> {
        let mut slots: Vec<Option<ExecutionOutcome>> = vec![None; calls.len()];
        let ids: Vec<(BackendId, BackendRole)> = calls.iter().map(|c| (c.backend.clone(), c.role)).collect();
        let mut join_set: JoinSet<(usize, ExecutionOutcome)> = JoinSet::new();

        for (index, call) in calls.into_iter().enumerate() {
            let backend = self.pool.get(&call.backend);
            let config = self.config.clone();
            let ctx = ctx.clone();
            join_set.spawn(async move { (index, run_call(backend, call, config, ctx).await) });
        }

        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((index, outcome)) => {
                    debug!(
                        backend = %outcome.backend,
                        success = outcome.success,
                        latency_ms = outcome.latency_ms,
                        "Backend call settled"
                    );
                    slots[index] = Some(outcome);
                }
                Err(e) => {
                    warn!(error = %e, "Backend call task panicked");
                }
            }
        }

        slots
            .into_iter()
            .zip(ids)
            .map(|(slot, (backend, role))| {
                slot.unwrap_or_else(|| {
                    ExecutionOutcome::failed(backend, role, ErrorKind::Internal, "call task aborted", 0, 0)
                })
            })
            .collect()
    }
}

enum Attempt {
    Settled(ExecutionOutcome),
    Retry(Duration, String),
}

async fn run_call(
    backend: Option<SharedBackend>,
    call: BackendCall,
    config: Arc<EngineConfig>,
    ctx: ExecutionContext,
) -> ExecutionOutcome {
    let started = Instant::now();
    ctx.emit(ProgressEvent::BackendStarted {
        run_id: ctx.run_id,
        backend: call.backend.clone(),
        role: call.role,
        timestamp: Utc::now(),
    });

    let outcome = match backend {
        Some(backend) => attempt_loop(backend, &call, &config, &ctx, started).await,
        None => ExecutionOutcome::failed(
            call.backend.clone(),
            call.role,
            ErrorKind::Internal,
            "backend not registered",
            0,
            0,
        ),
    };

    if outcome.success {
        info!(
            backend = %outcome.backend,
            role = ?outcome.role,
            latency_ms = outcome.latency_ms,
            attempts = outcome.attempts,
            "Backend call succeeded"
        );
        ctx.emit(ProgressEvent::BackendCompleted {
            run_id: ctx.run_id,
            backend: outcome.backend.clone(),
            role: outcome.role,
            latency_ms: outcome.latency_ms,
            attempts: outcome.attempts,
            timestamp: Utc::now(),
        });
    } else {
        let error = outcome.error.unwrap_or(ErrorKind::Internal);
        let message = outcome.error_message.clone().unwrap_or_default();
        warn!(
            backend = %outcome.backend,
            role = ?outcome.role,
            error = %error,
            message = %message,
            attempts = outcome.attempts,
            "Backend call failed"
        );
        ctx.emit(ProgressEvent::BackendFailed {
            run_id: ctx.run_id,
            backend: outcome.backend.clone(),
            role: outcome.role,
            error,
            message,
            timestamp: Utc::now(),
        });
    }
    outcome
}

async fn attempt_loop(
    backend: SharedBackend,
    call: &BackendCall,
    config: &EngineConfig,
    ctx: &ExecutionContext,
    started: Instant,
) -> ExecutionOutcome {
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let step = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Attempt::Settled(ExecutionOutcome::failed(
                call.backend.clone(),
                call.role,
                ErrorKind::Cancelled,
                "run cancelled",
                elapsed_ms(started),
                attempts,
            )),
            result = tokio::time::timeout(
                config.timeout_per_call,
                backend.execute(&call.prompt, config.timeout_per_call),
            ) => match result {
                Err(_) => Attempt::Settled(ExecutionOutcome::failed(
                    call.backend.clone(),
                    call.role,
                    ErrorKind::Timeout,
                    format!("no response within {}ms", config.timeout_per_call.as_millis()),
                    elapsed_ms(started),
                    attempts,
                )),
                Ok(Ok(text)) => {
                    let mut outcome = ExecutionOutcome::succeeded(
                        call.backend.clone(),
                        call.role,
                        text,
                        elapsed_ms(started),
                        attempts,
                    );
                    if call.role == BackendRole::Primary {
                        outcome.sections = extract_sections(&outcome.text);
                    }
                    Attempt::Settled(outcome)
                }
                Ok(Err(e)) if e.is_retriable() && attempts <= config.max_retries => {
                    Attempt::Retry(config.backoff_for(attempts - 1), e.to_string())
                }
                Ok(Err(e)) => Attempt::Settled(ExecutionOutcome::failed(
                    call.backend.clone(),
                    call.role,
                    e.kind(),
                    e.to_string(),
                    elapsed_ms(started),
                    attempts,
                )),
            },
        };

        match step {
            Attempt::Settled(outcome) => return outcome,
            Attempt::Retry(delay, error) => {
                warn!(
                    backend = %call.backend,
                    attempt = attempts,
                    max_retries = config.max_retries,
                    backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Transient error, retrying"
                );
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => {
                        return ExecutionOutcome::failed(
                            call.backend.clone(),
                            call.role,
                            ErrorKind::Cancelled,
                            "run cancelled during back-off",
                            elapsed_ms(started),
                            attempts,
                        );
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
