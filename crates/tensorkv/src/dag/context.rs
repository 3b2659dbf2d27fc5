use std::collections::HashMap;
use crate::tensor::Tensor;

/// Tensors visible to the ops of one DAG run.
///
/// Owned by a single execution and never shared with the keyspace; values
/// only leave it through `PERSIST`.
#[derive(Debug, Default)]
pub struct LocalContext {
    tensors: HashMap<String, Tensor>,
}

impl LocalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    /// Writes `tensor` under `name`, replacing any earlier value.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    /// Clones every named tensor, or `None` as soon as one is missing.
    pub fn collect(&self, names: &[String]) -> Option<Vec<Tensor>> {
        names.iter().map(|name| self.get(name).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}
