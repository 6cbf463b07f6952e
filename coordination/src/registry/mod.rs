//! Backend Registry: identity, capability, cost and latency metadata
//!
//! The registry is read-mostly and never mutated in place. An offline
//! calibration process builds a new [`BackendRegistry`] (see
//! [`BackendRegistry::with_latency`]) and publishes it through
//! [`SnapshotHandle::replace_registry`]. Each run loads one
//! [`EngineSnapshot`] at start and uses it end-to-end, so a concurrent swap
//! never produces a half-updated view.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::router::classifier::CategoryClassifier;
use crate::router::task_classifier::ModeEstimator;
use crate::router::config::{ConfigError, RoutingConfig};
use crate::state::{BackendId, PerformanceHint};

/// Static and calibrated metadata for one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendProfile {
    pub id: BackendId,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Relative cost; only ratios between backends matter
    pub cost_weight: f64,
    /// Rolling average latency reported by calibration
    pub avg_latency_ms: u64,
}

impl BackendProfile {
    pub fn new(id: impl Into<BackendId>, cost_weight: f64, avg_latency_ms: u64) -> Self {
        Self {
            id: id.into(),
            capabilities: Vec::new(),
            cost_weight,
            avg_latency_ms,
        }
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Immutable set of known backends, keyed and iterated by identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRegistry {
    version: u64,
    backends: BTreeMap<BackendId, BackendProfile>,
}

impl BackendRegistry {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            backends: BTreeMap::new(),
        }
    }

    pub fn with_backend(mut self, profile: BackendProfile) -> Self {
        self.backends.insert(profile.id.clone(), profile);
        self
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, id: &BackendId) -> Option<&BackendProfile> {
        self.backends.get(id)
    }

    pub fn contains(&self, id: &BackendId) -> bool {
        self.backends.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn profiles(&self) -> impl Iterator<Item = &BackendProfile> {
        self.backends.values()
    }

    pub fn cost_of(&self, id: &BackendId) -> f64 {
        self.get(id).map(|p| p.cost_weight).unwrap_or(0.0)
    }

    /// Backends ordered for slot filling under `hint`. Identity breaks ties.
    pub fn ranked(&self, hint: PerformanceHint) -> Vec<&BackendProfile> {
        let mut profiles: Vec<&BackendProfile> = self.backends.values().collect();
        match hint {
            PerformanceHint::Fast => profiles.sort_by(|a, b| {
                a.avg_latency_ms
                    .cmp(&b.avg_latency_ms)
                    .then_with(|| a.id.cmp(&b.id))
            }),
            PerformanceHint::Balanced => profiles.sort_by(|a, b| {
                a.cost_weight
                    .total_cmp(&b.cost_weight)
                    .then_with(|| a.id.cmp(&b.id))
            }),
            PerformanceHint::Thorough => profiles.sort_by(|a, b| {
                b.cost_weight
                    .total_cmp(&a.cost_weight)
                    .then_with(|| a.id.cmp(&b.id))
            }),
        }
        profiles
    }

    /// A new registry version with one backend's latency recalibrated.
    pub fn with_latency(&self, id: &BackendId, avg_latency_ms: u64) -> Self {
        let mut next = self.clone();
        next.version = self.version + 1;
        if let Some(profile) = next.backends.get_mut(id) {
            profile.avg_latency_ms = avg_latency_ms;
        }
        next
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new(1)
            .with_backend(
                BackendProfile::new("claude", 3.0, 2_500).with_capabilities(&["reasoning", "review", "backend"]),
            )
            .with_backend(BackendProfile::new("codex", 2.0, 1_800).with_capabilities(&["code", "scripts", "devops"]))
            .with_backend(
                BackendProfile::new("gemini", 1.5, 1_500).with_capabilities(&["frontend", "long_context"]),
            )
            .with_backend(BackendProfile::new("grok", 1.0, 2_000).with_capabilities(&["architecture", "reasoning"]))
    }
}

/// Registry plus routing config plus its compiled matchers, swapped as one.
#[derive(Debug)]
pub struct EngineSnapshot {
    pub registry: BackendRegistry,
    pub routing: RoutingConfig,
    pub classifier: CategoryClassifier,
    pub modes: ModeEstimator,
}

impl EngineSnapshot {
    pub fn new(registry: BackendRegistry, routing: RoutingConfig) -> Result<Self, ConfigError> {
        routing.validate_against(&registry)?;
        let classifier = CategoryClassifier::new(&routing)?;
        let modes = ModeEstimator::new(&routing)?;
        Ok(Self {
            registry,
            routing,
            classifier,
            modes,
        })
    }
}

/// Shared, atomically swappable view of the current [`EngineSnapshot`].
#[derive(Clone)]
pub struct SnapshotHandle {
    current: Arc<ArcSwap<EngineSnapshot>>,
}

impl SnapshotHandle {
    pub fn new(snapshot: EngineSnapshot) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(snapshot)),
        }
    }

    /// The snapshot in effect right now. Hold the `Arc` for a whole run.
    pub fn load(&self) -> Arc<EngineSnapshot> {
        self.current.load_full()
    }

    pub fn store(&self, snapshot: EngineSnapshot) {
        info!(
            registry_version = snapshot.registry.version(),
            backends = snapshot.registry.len(),
            categories = snapshot.routing.categories.len(),
            "Engine snapshot replaced"
        );
        self.current.store(Arc::new(snapshot));
    }

    /// Publish a recalibrated registry, keeping the current routing config.
    pub fn replace_registry(&self, registry: BackendRegistry) -> Result<(), ConfigError> {
        let routing = self.load().routing.clone();
        self.store(EngineSnapshot::new(registry, routing)?);
        Ok(())
    }

    pub fn replace_routing(&self, routing: RoutingConfig) -> Result<(), ConfigError> {
        let registry = self.load().registry.clone();
        self.store(EngineSnapshot::new(registry, routing)?);
        Ok(())
    }
}
