//! Run state machine: explicit states and legal transition guards.
//!
//! Every run starts at `Pending` and ends at `Complete`, `Escalated` or
//! `Failed`. The coordinator calls [`RunStateMachine::advance`] between
//! phases; each call checks the edge against the transition table and
//! records it for the result's audit trail.
//!
//! ```text
//! Pending → Routing → Executing → Validating → Merging → Complete
//!                         │            ▲            │
//!                         ├────────────┘ (skip)     └──→ Escalated
//!                         └──→ Failed  (zero successful primaries)
//! ```

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Routing,
    Executing,
    Validating,
    Merging,
    /// Artifact produced and auto-mergeable
    Complete,
    /// Artifact (if any) is provisional; a human must review
    Escalated,
    /// No primary backend succeeded
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Escalated | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Routing => write!(f, "Routing"),
            Self::Executing => write!(f, "Executing"),
            Self::Validating => write!(f, "Validating"),
            Self::Merging => write!(f, "Merging"),
            Self::Complete => write!(f, "Complete"),
            Self::Escalated => write!(f, "Escalated"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

fn is_legal_transition(from: RunStatus, to: RunStatus) -> bool {
    use RunStatus::*;

    matches!(
        (from, to),
        (Pending, Routing)
            | (Routing, Executing)
            | (Executing, Validating)
            // Simple and architectural runs have no validator
            | (Executing, Merging)
            | (Executing, Failed)
            | (Validating, Merging)
            | (Merging, Complete)
            | (Merging, Escalated)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RunStatus,
    pub to: RunStatus,
    /// Milliseconds since the run started
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Illegal run transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// Tracks the current status of one run and its transition log.
pub struct RunStateMachine {
    current: RunStatus,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            current: RunStatus::Pending,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> RunStatus {
        self.current
    }

    /// Move to `to`, or return `IllegalTransition` without changing state.
    pub fn advance(&mut self, to: RunStatus, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };
        tracing::debug!(from = %record.from, to = %record.to, reason = ?record.reason, "Run transition");
        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_with_validation() {
        let mut sm = RunStateMachine::new();
        for to in [
            RunStatus::Routing,
            RunStatus::Executing,
            RunStatus::Validating,
            RunStatus::Merging,
            RunStatus::Complete,
        ] {
            sm.advance(to, None).unwrap();
        }
        assert_eq!(sm.current(), RunStatus::Complete);
        assert!(sm.current().is_terminal());
        assert_eq!(sm.transitions().len(), 5);
    }

    #[test]
    fn test_simple_mode_skips_validation() {
        let mut sm = RunStateMachine::new();
        sm.advance(RunStatus::Routing, None).unwrap();
        sm.advance(RunStatus::Executing, None).unwrap();
        sm.advance(RunStatus::Merging, Some("no validator")).unwrap();
        sm.advance(RunStatus::Escalated, Some("security keyword")).unwrap();
        assert_eq!(sm.transitions()[2].reason.as_deref(), Some("no validator"));
    }

    #[test]
    fn test_failed_only_from_executing() {
        let mut sm = RunStateMachine::new();
        assert!(sm.advance(RunStatus::Failed, None).is_err());
        sm.advance(RunStatus::Routing, None).unwrap();
        assert!(sm.advance(RunStatus::Failed, None).is_err());
        sm.advance(RunStatus::Executing, None).unwrap();
        sm.advance(RunStatus::Failed, Some("no successes")).unwrap();
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut sm = RunStateMachine::new();
        sm.advance(RunStatus::Routing, None).unwrap();
        sm.advance(RunStatus::Executing, None).unwrap();
        sm.advance(RunStatus::Merging, None).unwrap();
        sm.advance(RunStatus::Complete, None).unwrap();

        let err = sm.advance(RunStatus::Merging, None).unwrap_err();
        assert_eq!(err.from, RunStatus::Complete);
        assert_eq!(err.to.to_string(), "Merging");
        assert_eq!(sm.current(), RunStatus::Complete);
    }

    #[test]
    fn test_illegal_transition_message() {
        let err = IllegalTransition {
            from: RunStatus::Pending,
            to: RunStatus::Merging,
        };
        assert_eq!(err.to_string(), "Illegal run transition: Pending → Merging");
    }
}
