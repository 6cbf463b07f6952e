//! Progress event types
//!
//! One event per observable step of a run, from task receipt to the final
//! status. Every event carries the run id so subscribers can follow
//! concurrent runs on a shared bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{BackendId, BackendRole, ErrorKind, ExecutionMode, MergeStrategy, RunStatus};

/// Longest task description carried in a `TaskReceived` event.
const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    TaskReceived {
        run_id: Uuid,
        preview: String,
        timestamp: DateTime<Utc>,
    },

    TaskRouted {
        run_id: Uuid,
        category: String,
        mode: ExecutionMode,
        primaries: Vec<BackendId>,
        validators: Vec<BackendId>,
        sticky: bool,
        timestamp: DateTime<Utc>,
    },

    BackendStarted {
        run_id: Uuid,
        backend: BackendId,
        role: BackendRole,
        timestamp: DateTime<Utc>,
    },

    BackendCompleted {
        run_id: Uuid,
        backend: BackendId,
        role: BackendRole,
        latency_ms: u64,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    BackendFailed {
        run_id: Uuid,
        backend: BackendId,
        role: BackendRole,
        error: ErrorKind,
        message: String,
        timestamp: DateTime<Utc>,
    },

    ValidationStarted {
        run_id: Uuid,
        validators: Vec<BackendId>,
        outputs: usize,
        timestamp: DateTime<Utc>,
    },

    ValidationCompleted {
        run_id: Uuid,
        confidence: f64,
        strategy: MergeStrategy,
        recommendation: Vec<BackendId>,
        timestamp: DateTime<Utc>,
    },

    MergeCompleted {
        run_id: Uuid,
        strategy: MergeStrategy,
        conflicts: usize,
        timestamp: DateTime<Utc>,
    },

    RunCompleted {
        run_id: Uuid,
        status: RunStatus,
        needs_human_review: bool,
        total_time_ms: u64,
        timestamp: DateTime<Utc>,
    },

    RunFailed {
        run_id: Uuid,
        reasons: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    pub fn task_received(run_id: Uuid, description: &str) -> Self {
        let mut preview: String = description.chars().take(PREVIEW_CHARS).collect();
        if description.chars().count() > PREVIEW_CHARS {
            preview.push('…');
        }
        Self::TaskReceived {
            run_id,
            preview,
            timestamp: Utc::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            Self::TaskReceived { run_id, .. }
            | Self::TaskRouted { run_id, .. }
            | Self::BackendStarted { run_id, .. }
            | Self::BackendCompleted { run_id, .. }
            | Self::BackendFailed { run_id, .. }
            | Self::ValidationStarted { run_id, .. }
            | Self::ValidationCompleted { run_id, .. }
            | Self::MergeCompleted { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunFailed { run_id, .. } => *run_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TaskReceived { timestamp, .. }
            | Self::TaskRouted { timestamp, .. }
            | Self::BackendStarted { timestamp, .. }
            | Self::BackendCompleted { timestamp, .. }
            | Self::BackendFailed { timestamp, .. }
            | Self::ValidationStarted { timestamp, .. }
            | Self::ValidationCompleted { timestamp, .. }
            | Self::MergeCompleted { timestamp, .. }
            | Self::RunCompleted { timestamp, .. }
            | Self::RunFailed { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskReceived { .. } => "task_received",
            Self::TaskRouted { .. } => "task_routed",
            Self::BackendStarted { .. } => "backend_started",
            Self::BackendCompleted { .. } => "backend_completed",
            Self::BackendFailed { .. } => "backend_failed",
            Self::ValidationStarted { .. } => "validation_started",
            Self::ValidationCompleted { .. } => "validation_completed",
            Self::MergeCompleted { .. } => "merge_completed",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunFailed { .. } => "run_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunCompleted { .. } | Self::RunFailed { .. })
    }
}
