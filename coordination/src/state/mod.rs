//! Run state: task and outcome types plus the run status state machine.
//!
//! Nothing in here is shared between runs. Each run owns its
//! [`RunStateMachine`] and produces one immutable [`OrchestrationResult`].

pub mod machine;
pub mod types;

pub use machine::{IllegalTransition, RunStateMachine, RunStatus, TransitionRecord};
pub use types::{
    BackendAnalysis, BackendId, BackendRole, ConsensusArtifact, Criterion, ErrorKind,
    ExecutionMode, ExecutionOutcome, Issue, MergeStrategy, OrchestrationResult, PerformanceHint,
    Severity, SubScores, Task, ValidationAnalysis,
};
