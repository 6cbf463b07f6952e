use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Backends the default routing table refers to.
pub const KNOWN_BACKENDS: [&str; 4] = ["claude", "codex", "gemini", "grok"];

/// OpenAI-compatible chat endpoint for one backend.
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Top-level runner configuration.
#[derive(Debug, Clone)]
pub struct AgentsConfig {
    /// One endpoint per backend id, in `KNOWN_BACKENDS` order
    pub endpoints: Vec<(String, Endpoint)>,
    /// Routing TOML (None = built-in categories)
    pub routing_path: Option<PathBuf>,
    /// Connect timeout for the shared HTTP client
    pub connect_timeout: Duration,
}

fn default_model(id: &str) -> &'static str {
    match id {
        "claude" => "claude-sonnet-4-5",
        "codex" => "gpt-5-codex",
        "gemini" => "gemini-2.5-pro",
        "grok" => "grok-4",
        _ => "default",
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        let shared_url = std::env::var("CONSENSUS_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8317/v1".into());
        let shared_key = std::env::var("CONSENSUS_API_KEY").ok();

        let endpoints = KNOWN_BACKENDS
            .iter()
            .map(|id| {
                let prefix = format!("CONSENSUS_{}", id.to_uppercase());
                let endpoint = Endpoint {
                    url: std::env::var(format!("{prefix}_URL"))
                        .unwrap_or_else(|_| shared_url.clone()),
                    model: std::env::var(format!("{prefix}_MODEL"))
                        .unwrap_or_else(|_| default_model(id).into()),
                    api_key: std::env::var(format!("{prefix}_API_KEY"))
                        .ok()
                        .or_else(|| shared_key.clone()),
                };
                (id.to_string(), endpoint)
            })
            .collect();

        Self {
            endpoints,
            routing_path: std::env::var("CONSENSUS_ROUTING_CONFIG").ok().map(PathBuf::from),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl AgentsConfig {
    pub fn endpoint(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|(name, _)| name == id)
            .map(|(_, endpoint)| endpoint)
    }
}

/// Check if an endpoint is reachable (GET /models).
pub async fn check_endpoint(endpoint: &Endpoint) -> bool {
    let models_url = format!("{}/models", endpoint.url.trim_end_matches('/'));
    let mut request = reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5));
    if let Some(key) = &endpoint.api_key {
        request = request.bearer_auth(key);
    }
    match request.send().await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
