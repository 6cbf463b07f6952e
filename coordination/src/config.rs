//! Engine configuration
//!
//! Execution budgets and decision thresholds. [`EngineConfig::default`]
//! carries the stock values; [`EngineConfig::from_env`] overlays any
//! `CONSENSUS_*` environment variables on top of them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Confidence strictly below this forces human review.
pub const AUTO_MERGE_THRESHOLD: f64 = 0.90;

/// Minimum weighted score for an output to be merge-worthy.
pub const MERGE_WORTHY_SCORE: f64 = 70.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deadline for a single backend attempt
    pub timeout_per_call: Duration,
    /// Retries after the first attempt, transient errors only
    pub max_retries: u32,
    /// First back-off delay; doubles per retry
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub auto_merge_threshold: f64,
    pub merge_worthy_score: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_per_call: Duration::from_secs(120),
            max_retries: 2,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            auto_merge_threshold: AUTO_MERGE_THRESHOLD,
            merge_worthy_score: MERGE_WORTHY_SCORE,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl EngineConfig {
    /// Defaults overridden by `CONSENSUS_TIMEOUT_SECS`, `CONSENSUS_MAX_RETRIES`,
    /// `CONSENSUS_BACKOFF_MS`, `CONSENSUS_MAX_BACKOFF_MS`,
    /// `CONSENSUS_AUTO_MERGE_THRESHOLD` and `CONSENSUS_MERGE_WORTHY_SCORE`.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout_per_call: env_parse::<u64>("CONSENSUS_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout_per_call),
            max_retries: env_parse("CONSENSUS_MAX_RETRIES").unwrap_or(defaults.max_retries),
            base_backoff: env_parse::<u64>("CONSENSUS_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_backoff),
            max_backoff: env_parse::<u64>("CONSENSUS_MAX_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            auto_merge_threshold: env_parse::<f64>("CONSENSUS_AUTO_MERGE_THRESHOLD")
                .filter(|t| (0.0..=1.0).contains(t))
                .unwrap_or(defaults.auto_merge_threshold),
            merge_worthy_score: env_parse::<f64>("CONSENSUS_MERGE_WORTHY_SCORE")
                .filter(|s| (0.0..=100.0).contains(s))
                .unwrap_or(defaults.merge_worthy_score),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_per_call = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_backoff = base_backoff;
        self
    }

    /// Delay before retry number `retry` (0-based): `base × 2^retry`, capped.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}
