//! Routing configuration
//!
//! Category definitions (keyword and pattern signals, thresholds, sticky
//! flag, cost weight, preferred backends) plus global routing knobs. The
//! engine consumes an already-parsed [`RoutingConfig`]; [`RoutingConfig::from_toml_str`]
//! and [`RoutingConfig::load`] are conveniences for file-backed setups.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::BackendRegistry;
use crate::state::BackendId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse routing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Default category '{0}' is not defined")]
    MissingDefaultCategory(String),

    #[error("Duplicate category '{0}'")]
    DuplicateCategory(String),

    #[error("Category '{category}' references unknown backend '{backend}'")]
    UnknownBackend { category: String, backend: BackendId },

    #[error("Invalid pattern in category '{category}': {message}")]
    InvalidPattern { category: String, message: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("Backend registry is empty")]
    EmptyRegistry,
}

fn default_priority() -> u32 {
    1
}

fn default_cost_weight() -> f64 {
    1.0
}

/// One routable category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    /// Single words, matched case-insensitively on word boundaries
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Multi-word phrases, matched case-insensitively as substrings
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Breaks exact score ties; higher wins
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default = "default_cost_weight")]
    pub cost_weight: f64,
    /// Overrides the global confidence threshold for this category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    /// Preferred primary backends, in order
    #[serde(default)]
    pub primaries: Vec<BackendId>,
    /// Preferred validator backends, in order
    #[serde(default)]
    pub validators: Vec<BackendId>,
}

impl CategoryConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keywords: Vec::new(),
            patterns: Vec::new(),
            priority: default_priority(),
            sticky: false,
            cost_weight: default_cost_weight(),
            min_score: None,
            primaries: Vec::new(),
            validators: Vec::new(),
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_patterns(mut self, patterns: &[&str]) -> Self {
        self.patterns = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    pub fn with_cost_weight(mut self, cost: f64) -> Self {
        self.cost_weight = cost;
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn with_backends(mut self, primaries: &[&str], validators: &[&str]) -> Self {
        self.primaries = primaries.iter().map(|b| BackendId::from(*b)).collect();
        self.validators = validators.iter().map(|b| BackendId::from(*b)).collect();
        self
    }
}

fn default_threshold() -> f64 {
    0.5
}

fn default_category_name() -> String {
    "generic".to_string()
}

fn default_sticky_turns() -> u32 {
    3
}

fn default_tie_margin() -> f64 {
    0.10
}

fn default_complexity_keywords() -> Vec<String> {
    [
        "refactor",
        "concurrent",
        "concurrency",
        "distributed",
        "migration",
        "migrate",
        "optimize",
        "scalable",
        "integrate",
        "algorithm",
        "multi-step",
        "end-to-end",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_architectural_phrases() -> Vec<String> {
    [
        "system design",
        "design the architecture",
        "architecture overhaul",
        "re-architect",
        "full system",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Full routing configuration. Category order is significant: it is the
/// final tie-break after score and priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default, rename = "category")]
    pub categories: Vec<CategoryConfig>,
    #[serde(default = "default_category_name")]
    pub default_category: String,
    /// Minimum score a category needs to win outright
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f64,
    /// Length of a sticky window, counting the turn that opened it
    #[serde(default = "default_sticky_turns")]
    pub sticky_turns: u32,
    /// Top-two spread, as a fraction of the top score, that counts as a tie
    #[serde(default = "default_tie_margin")]
    pub tie_margin: f64,
    #[serde(default = "default_complexity_keywords")]
    pub complexity_keywords: Vec<String>,
    #[serde(default = "default_architectural_phrases")]
    pub architectural_phrases: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            categories: vec![
                CategoryConfig::new("frontend")
                    .with_keywords(&["react", "component", "frontend", "ui", "button", "form", "dashboard", "css"])
                    .with_patterns(&["user interface", "landing page", "single page app"])
                    .with_priority(2)
                    .with_cost_weight(1.0)
                    .with_backends(&["gemini", "claude"], &["codex"]),
                CategoryConfig::new("backend")
                    .with_keywords(&["api", "endpoint", "service", "backend", "middleware", "database", "rest", "graphql"])
                    .with_patterns(&["rest api", "http handler", "database schema"])
                    .with_priority(2)
                    .with_cost_weight(1.2)
                    .with_backends(&["claude", "codex"], &["gemini"]),
                CategoryConfig::new("devops")
                    .with_keywords(&["docker", "kubernetes", "ci/cd", "pipeline", "terraform", "deploy", "helm"])
                    .with_patterns(&["github actions", "deployment pipeline", "infrastructure as code"])
                    .with_priority(2)
                    .with_cost_weight(1.0)
                    .with_backends(&["codex", "grok"], &["claude"]),
                CategoryConfig::new("scripts")
                    .with_keywords(&["script", "bash", "automation", "cli", "tool", "cron"])
                    .with_patterns(&["shell script", "command line tool"])
                    .with_priority(1)
                    .with_cost_weight(0.8)
                    .with_backends(&["codex", "gemini"], &["claude"]),
                CategoryConfig::new("architecture")
                    .with_keywords(&["architecture", "design", "system", "scale", "pattern", "microservices"])
                    .with_patterns(&["system design", "design pattern", "trade-offs"])
                    .with_priority(3)
                    .with_sticky(true)
                    .with_cost_weight(1.5)
                    .with_backends(&["grok", "claude"], &["codex"]),
                CategoryConfig::new("data")
                    .with_keywords(&["data", "pipeline", "etl", "sql", "analytics", "warehouse"])
                    .with_patterns(&["data pipeline", "data model", "query optimization"])
                    .with_priority(2)
                    .with_cost_weight(1.1)
                    .with_backends(&["codex", "claude"], &["gemini"]),
                CategoryConfig::new("generic")
                    .with_priority(0)
                    .with_cost_weight(1.0)
                    .with_backends(&["claude", "codex"], &["gemini"]),
            ],
            default_category: default_category_name(),
            confidence_threshold: default_threshold(),
            sticky_turns: default_sticky_turns(),
            tie_margin: default_tie_margin(),
            complexity_keywords: default_complexity_keywords(),
            architectural_phrases: default_architectural_phrases(),
        }
    }
}

impl RoutingConfig {
    /// Parse a TOML document. Categories are `[[category]]` tables.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn category(&self, name: &str) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn default_category(&self) -> Option<&CategoryConfig> {
        self.category(&self.default_category)
    }

    /// Structural checks that do not need a registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for category in &self.categories {
            if !seen.insert(category.name.as_str()) {
                return Err(ConfigError::DuplicateCategory(category.name.clone()));
            }
            if category.cost_weight < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "cost_weight",
                    message: format!("category '{}' has negative cost", category.name),
                });
            }
        }
        if self.default_category().is_none() {
            return Err(ConfigError::MissingDefaultCategory(self.default_category.clone()));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "confidence_threshold",
                message: format!("{} is outside [0, 1]", self.confidence_threshold),
            });
        }
        if self.sticky_turns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sticky_turns",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Every backend a category names must be registered.
    pub fn validate_against(&self, registry: &BackendRegistry) -> Result<(), ConfigError> {
        self.validate()?;
        if registry.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }
        for category in &self.categories {
            for backend in category.primaries.iter().chain(&category.validators) {
                if !registry.contains(backend) {
                    return Err(ConfigError::UnknownBackend {
                        category: category.name.clone(),
                        backend: backend.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RoutingConfig::default();
        config.validate().unwrap();
        config.validate_against(&BackendRegistry::default()).unwrap();
        assert_eq!(config.default_category().map(|c| c.name.as_str()), Some("generic"));
        assert!(config.category("architecture").map(|c| c.sticky).unwrap_or(false));
    }

    #[test]
    fn test_from_toml_applies_defaults() {
        let source = r#"
default_category = "misc"
sticky_turns = 2

[[category]]
name = "web"
keywords = ["html", "css"]
sticky = true
primaries = ["a", "b"]
validators = ["c"]

[[category]]
name = "misc"
"#;
        let config = RoutingConfig::from_toml_str(source).unwrap();
        assert_eq!(config.categories.len(), 2);
        assert_eq!(config.sticky_turns, 2);
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.tie_margin, 0.10);
        let web = config.category("web").unwrap();
        assert_eq!(web.priority, 1);
        assert_eq!(web.cost_weight, 1.0);
        assert_eq!(web.validators, vec![BackendId::from("c")]);
    }

    #[test]
    fn test_missing_default_category_rejected() {
        let err = RoutingConfig::from_toml_str("default_category = \"nope\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingDefaultCategory(ref c) if c == "nope"));
    }

    #[test]
    fn test_duplicate_category_rejected() {
        let mut config = RoutingConfig::default();
        config.categories.push(CategoryConfig::new("devops"));
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateCategory(_))));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut config = RoutingConfig::default();
        config.categories[0].primaries.push(BackendId::from("mystery"));
        let err = config.validate_against(&BackendRegistry::default()).unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routing.toml");
        std::fs::write(&path, "[[category]]\nname = \"generic\"\n").unwrap();
        let config = RoutingConfig::load(&path).unwrap();
        assert_eq!(config.categories.len(), 1);

        let missing = RoutingConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
