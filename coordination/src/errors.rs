//! Orchestration error taxonomy with retry classification.
//!
//! Backend implementations report failures as [`BackendError`]; the executor
//! asks [`BackendError::retry_category`] whether another attempt is allowed
//! instead of string matching.
//!
//! ## Retry categories
//!
//! | Category   | Retriable | Notes                              |
//! |------------|-----------|------------------------------------|
//! | Transient  | yes       | network resets, 502/503            |
//! | RateLimit  | yes       | 429, exponential back-off          |
//! | Fatal      | no        | auth failures, malformed requests  |
//!
//! Timeouts are not a backend error: the executor owns the deadline and
//! never retries it.

use std::fmt;

use thiserror::Error;

use crate::router::config::ConfigError;
use crate::router::RoutingError;
use crate::state::{ErrorKind, ExecutionOutcome, IllegalTransition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    Transient,
    RateLimit,
    Fatal,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimit)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Failure reported by a backend capability for a single attempt.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Fatal failure: {0}")]
    Fatal(String),
}

impl BackendError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::RateLimited(_) => RetryCategory::RateLimit,
            Self::Transient(_) => RetryCategory::Transient,
            Self::Fatal(_) => RetryCategory::Fatal,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }

    /// Outcome classification once the error is final.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited(_) | Self::Transient(_) => ErrorKind::Transient,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

/// Run-level errors.
///
/// `NoBackendsSucceeded` and `ValidationUnavailable` are caught by the
/// coordinator and folded into the [`OrchestrationResult`]; only routing,
/// cancellation and internal faults surface to callers of `run`.
///
/// [`OrchestrationResult`]: crate::state::OrchestrationResult
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("No backends succeeded ({} failed)", .outcomes.len())]
    NoBackendsSucceeded { outcomes: Vec<ExecutionOutcome> },

    #[error("Validation unavailable: {}", .reasons.join("; "))]
    ValidationUnavailable { reasons: Vec<String> },

    #[error("Run cancelled ({} calls settled)", .settled.iter().filter(|o| o.success).count())]
    Cancelled { settled: Vec<ExecutionOutcome> },

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl OrchestrationError {
    /// Failure reasons for every outcome carried by this error.
    pub fn failure_reasons(&self) -> Vec<String> {
        match self {
            Self::NoBackendsSucceeded { outcomes } | Self::Cancelled { settled: outcomes } => {
                outcomes.iter().filter_map(|o| o.failure_reason()).collect()
            }
            Self::ValidationUnavailable { reasons } => reasons.clone(),
            other => vec![other.to_string()],
        }
    }
}
