//! Runner for the consensus orchestration engine.
//!
//! Wires OpenAI-compatible HTTP endpoints into a `BackendPool` and exposes
//! the configuration the `consensus-agents` binary reads from the
//! environment.

pub mod config;
pub mod http_backend;

pub use config::{check_endpoint, AgentsConfig, Endpoint, KNOWN_BACKENDS};
pub use http_backend::{build_pool, classify_status, HttpBackend};
