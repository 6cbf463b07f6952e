//! Consensus coordination library
//!
//! Dispatches one unit of work to several interchangeable backends, runs
//! them concurrently under timeout and retry discipline, scores and
//! compares the results, merges them into one artifact and decides whether
//! that artifact can be trusted without human review.
//!
//! ```text
//! Task ─► Router ─► Executor ─► Validator ─► Escalation Policy ─► Merger
//!           │          │            │                                │
//!   RoutingDecision  outcomes   analysis + confidence      OrchestrationResult
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use coordination::{
//!     BackendPool, BackendRegistry, EngineConfig, EngineSnapshot, OrchestrationEngine,
//!     RoutingConfig, SessionState, SnapshotHandle, Task,
//! };
//!
//! let snapshot = EngineSnapshot::new(BackendRegistry::default(), RoutingConfig::default())?;
//! let engine = OrchestrationEngine::new(
//!     SnapshotHandle::new(snapshot),
//!     BackendPool::new().with(my_backend),
//!     EngineConfig::from_env(),
//! );
//!
//! let (result, session) = engine
//!     .run(Task::new("Build a CI/CD pipeline for Docker"), &SessionState::default())
//!     .await?;
//! println!("{} (review: {})", result.status, result.needs_human_review);
//! ```

pub mod config;
pub mod ensemble;
pub mod errors;
pub mod escalation;
pub mod events;
pub mod registry;
pub mod router;
pub mod state;

pub use config::{EngineConfig, AUTO_MERGE_THRESHOLD, MERGE_WORTHY_SCORE};

// Re-export key ensemble types
pub use ensemble::{
    Backend, BackendPool, ExecutionContext, Executor, MergeOutput, OrchestrationEngine,
    SharedBackend, SharedOrchestrationEngine,
};

// Re-export error types
pub use errors::{BackendError, OrchestrationError, RetryCategory};

// Re-export escalation types
pub use escalation::{format_review_request, needs_review, EscalationPolicy, ReviewDecision};

// Re-export event types
pub use events::{EventBus, EventBusExt, EventFilter, ProgressEvent, SharedEventBus};

// Re-export registry and routing types
pub use registry::{BackendProfile, BackendRegistry, EngineSnapshot, SnapshotHandle};
pub use router::{
    route, CategoryConfig, ConfigError, RoutingConfig, RoutingDecision, RoutingError, SessionState,
};

// Re-export key state types
pub use state::{
    BackendAnalysis, BackendId, BackendRole, ConsensusArtifact, Criterion, ErrorKind,
    ExecutionMode, ExecutionOutcome, Issue, MergeStrategy, OrchestrationResult, PerformanceHint,
    RunStatus, Severity, Task, ValidationAnalysis,
};
