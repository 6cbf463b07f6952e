//! Category classifier: keyword and pattern scoring.
//!
//! Each category is scored independently against the task text:
//!
//! | Signal   | First hit | Each extra hit | Cap  |
//! |----------|-----------|----------------|------|
//! | keyword  | 0.50      | +0.15          | 0.80 |
//! | pattern  | 0.55      | +0.15          | 0.70 |
//!
//! The two parts are summed and capped at 1.0. A category hit by both kinds
//! of signal gets a ×1.1 boost, still capped at 1.0.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::router::config::{ConfigError, RoutingConfig};

const KEYWORD_FIRST: f64 = 0.5;
const KEYWORD_CAP: f64 = 0.8;
const PATTERN_FIRST: f64 = 0.55;
const PATTERN_CAP: f64 = 0.7;
const EXTRA_HIT: f64 = 0.15;
const COMBINED_BOOST: f64 = 1.1;

/// Score of one category for one text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: String,
    pub score: f64,
    pub keyword_hits: usize,
    pub pattern_hits: usize,
    pub priority: u32,
    /// Position in the routing config, the last tie-break
    pub index: usize,
}

#[derive(Debug)]
struct CompiledCategory {
    name: String,
    priority: u32,
    keywords: Vec<Regex>,
    patterns: Vec<String>,
}

/// Pre-compiled signal matchers for every configured category.
#[derive(Debug)]
pub struct CategoryClassifier {
    categories: Vec<CompiledCategory>,
}

/// Case-insensitive keyword matcher with word boundaries on word-character edges.
pub(crate) fn keyword_regex(keyword: &str) -> Result<Regex, regex::Error> {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let lead = if keyword.chars().next().map(is_word).unwrap_or(false) { r"\b" } else { "" };
    let trail = if keyword.chars().last().map(is_word).unwrap_or(false) { r"\b" } else { "" };
    Regex::new(&format!("(?i){lead}{}{trail}", regex::escape(keyword)))
}

fn signal_score(hits: usize, first: f64, cap: f64) -> f64 {
    if hits == 0 {
        return 0.0;
    }
    (first + (hits - 1) as f64 * EXTRA_HIT).min(cap)
}

impl CategoryClassifier {
    pub fn new(config: &RoutingConfig) -> Result<Self, ConfigError> {
        let categories = config
            .categories
            .iter()
            .map(|category| {
                let keywords = category
                    .keywords
                    .iter()
                    .map(|k| keyword_regex(k))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ConfigError::InvalidPattern {
                        category: category.name.clone(),
                        message: e.to_string(),
                    })?;
                Ok(CompiledCategory {
                    name: category.name.clone(),
                    priority: category.priority,
                    keywords,
                    patterns: category.patterns.iter().map(|p| p.to_lowercase()).collect(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { categories })
    }

    /// Scores in config order.
    pub fn score(&self, text: &str) -> Vec<CategoryScore> {
        let lowered = text.to_lowercase();
        self.categories
            .iter()
            .enumerate()
            .map(|(index, category)| {
                let keyword_hits = category.keywords.iter().filter(|re| re.is_match(text)).count();
                let pattern_hits = category
                    .patterns
                    .iter()
                    .filter(|p| lowered.contains(p.as_str()))
                    .count();

                let mut score = (signal_score(keyword_hits, KEYWORD_FIRST, KEYWORD_CAP)
                    + signal_score(pattern_hits, PATTERN_FIRST, PATTERN_CAP))
                .min(1.0);
                if keyword_hits > 0 && pattern_hits > 0 {
                    score = (score * COMBINED_BOOST).min(1.0);
                }

                CategoryScore {
                    category: category.name.clone(),
                    score,
                    keyword_hits,
                    pattern_hits,
                    priority: category.priority,
                    index,
                }
            })
            .collect()
    }

    /// Scores sorted by score, then priority, then config order.
    pub fn rank(&self, text: &str) -> Vec<CategoryScore> {
        let mut scores = self.score(text);
        scores.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| a.index.cmp(&b.index))
        });
        scores
    }
}
