//! Execution mode estimation
//!
//! Picks a mode from the caller's complexity hint, or estimates one from the
//! task description when no hint is given.

use regex::Regex;

use crate::router::classifier::keyword_regex;
use crate::router::config::{ConfigError, RoutingConfig};
use crate::state::{ExecutionMode, Task};

/// Descriptions this short, with no complexity vocabulary, run in simple mode.
const SIMPLE_MAX_WORDS: usize = 5;

/// Descriptions longer than this run in complex mode.
const COMPLEX_MIN_WORDS: usize = 120;

/// Complexity vocabulary hits needed for complex mode.
const COMPLEX_KEYWORD_HITS: usize = 2;

/// Complexity vocabulary and architectural phrasing, compiled once per snapshot.
#[derive(Debug)]
pub struct ModeEstimator {
    architectural_phrases: Vec<String>,
    complexity_keywords: Vec<Regex>,
}

impl ModeEstimator {
    pub fn new(config: &RoutingConfig) -> Result<Self, ConfigError> {
        let complexity_keywords = config
            .complexity_keywords
            .iter()
            .map(|k| keyword_regex(k))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "complexity_keywords",
                message: e.to_string(),
            })?;
        Ok(Self {
            architectural_phrases: config.architectural_phrases.iter().map(|p| p.to_lowercase()).collect(),
            complexity_keywords,
        })
    }

    pub fn select(&self, task: &Task) -> ExecutionMode {
        task.complexity_hint.unwrap_or_else(|| self.estimate(&task.description))
    }

    /// Architectural only on explicit phrasing; otherwise by length and vocabulary.
    pub fn estimate(&self, description: &str) -> ExecutionMode {
        let lowered = description.to_lowercase();
        if self
            .architectural_phrases
            .iter()
            .any(|p| lowered.contains(p.as_str()))
        {
            return ExecutionMode::Architectural;
        }

        let words = description.split_whitespace().count();
        let hits = self
            .complexity_keywords
            .iter()
            .filter(|re| re.is_match(description))
            .count();

        if hits >= COMPLEX_KEYWORD_HITS || words > COMPLEX_MIN_WORDS {
            ExecutionMode::Complex
        } else if words <= SIMPLE_MAX_WORDS && hits == 0 {
            ExecutionMode::Simple
        } else {
            ExecutionMode::Medium
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> ModeEstimator {
        ModeEstimator::new(&RoutingConfig::default()).unwrap()
    }

    fn mode(text: &str) -> ExecutionMode {
        estimator().estimate(text)
    }

    #[test]
    fn test_short_task_is_simple() {
        assert_eq!(mode("rename this variable"), ExecutionMode::Simple);
    }

    #[test]
    fn test_devops_description_is_medium() {
        assert_eq!(
            mode("build a CI/CD pipeline for Docker and Kubernetes"),
            ExecutionMode::Medium
        );
    }

    #[test]
    fn test_complexity_vocabulary_is_complex() {
        assert_eq!(
            mode("refactor the scheduler and optimize lock contention"),
            ExecutionMode::Complex
        );
    }

    #[test]
    fn test_single_complexity_word_in_short_text_is_medium() {
        assert_eq!(mode("refactor this"), ExecutionMode::Medium);
    }

    #[test]
    fn test_long_description_is_complex() {
        let text = "word ".repeat(COMPLEX_MIN_WORDS + 1);
        assert_eq!(mode(&text), ExecutionMode::Complex);
    }

    #[test]
    fn test_architectural_phrase() {
        assert_eq!(
            mode("Propose a system design for the billing platform"),
            ExecutionMode::Architectural
        );
    }

    #[test]
    fn test_hint_wins_over_estimate() {
        let task = Task::new("rename this variable").with_complexity(ExecutionMode::Complex);
        assert_eq!(estimator().select(&task), ExecutionMode::Complex);
    }

    #[test]
    fn test_estimator_follows_its_own_config() {
        let mut config = RoutingConfig::default();
        config.complexity_keywords = vec!["shard".into(), "c++".into()];
        config.architectural_phrases = vec!["Greenfield Platform".into()];
        let estimator = ModeEstimator::new(&config).unwrap();

        assert_eq!(estimator.estimate("shard the C++ index"), ExecutionMode::Complex);
        // default vocabulary no longer counts
        assert_eq!(
            estimator.estimate("refactor and optimize the whole scheduler loop"),
            ExecutionMode::Medium
        );
        assert_eq!(estimator.estimate("plan a greenfield platform"), ExecutionMode::Architectural);
        assert_eq!(estimator.estimate("shard it"), ExecutionMode::Medium);
    }
}
