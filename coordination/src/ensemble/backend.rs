//! Backend capability and the pool the executor dispatches into.
//!
//! A backend is anything that turns a prompt into text: a hosted model
//! behind HTTP, a local CLI, or a scripted fake in tests. The engine only
//! sees [`Backend`]; transport concerns stay in the implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::BackendError;
use crate::state::BackendId;

#[async_trait]
pub trait Backend: Send + Sync {
    fn id(&self) -> &BackendId;

    /// Run one attempt. `timeout` is advisory; the executor enforces its own
    /// deadline around this call regardless.
    async fn execute(&self, prompt: &str, timeout: Duration) -> Result<String, BackendError>;
}

pub type SharedBackend = Arc<dyn Backend>;

/// Backends available to a running engine, keyed by id.
#[derive(Clone, Default)]
pub struct BackendPool {
    backends: HashMap<BackendId, SharedBackend>,
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, replacing any previous one with the same id.
    pub fn register(&mut self, backend: SharedBackend) {
        self.backends.insert(backend.id().clone(), backend);
    }

    pub fn with(mut self, backend: impl Backend + 'static) -> Self {
        self.register(Arc::new(backend));
        self
    }

    pub fn get(&self, id: &BackendId) -> Option<SharedBackend> {
        self.backends.get(id).cloned()
    }

    pub fn contains(&self, id: &BackendId) -> bool {
        self.backends.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<BackendId> {
        let mut ids: Vec<BackendId> = self.backends.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendPool").field("backends", &self.ids()).finish()
    }
}
