use std::collections::HashMap;
use std::sync::Arc;
use crate::error::{Error, Result};
use super::{Backend, BackendKind};

/// Runtimes available to the engine, at most one per [`BackendKind`].
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a runtime, replacing any previous one of the same kind.
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn get(&self, kind: BackendKind) -> Result<Arc<dyn Backend>> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::backend(format!("Backend not loaded: {kind}")))
    }

    pub fn is_loaded(&self, kind: BackendKind) -> bool {
        self.backends.contains_key(&kind)
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.backends.keys()).finish()
    }
}
