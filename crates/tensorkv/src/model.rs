//! Stored models.

use std::fmt;
use std::time::Duration;
use bytes::Bytes;
use uuid::Uuid;
use crate::backend::{BackendKind, BackendRegistry, LoadOptions, ModelHandle};
use crate::config::Config;
use crate::device::Device;
use crate::error::Result;
use crate::stats::{EntityKind, RunStats};
use crate::tensor::Tensor;

/// How concurrent runs of one model are merged.
///
/// A zero `batch_size` disables batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub min_batch_size: usize,
    pub min_batch_timeout: Duration,
}

impl BatchPolicy {
    pub fn is_enabled(&self) -> bool {
        self.batch_size > 0
    }
}

/// Header of a model as given to `AI.MODELSTORE`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefinition {
    pub backend: BackendKind,
    pub device: Device,
    pub tag: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub policy: BatchPolicy,
}

/// A model loaded into its backend.
///
/// Every load gets a fresh [`Uuid`]; the batching engine only merges requests
/// that point at the same instance.
pub struct Model {
    id: Uuid,
    key: String,
    definition: ModelDefinition,
    input_count: usize,
    output_count: usize,
    blob: Bytes,
    handle: Box<dyn ModelHandle>,
    stats: RunStats,
}

impl Model {
    /// Loads `blob` through the backend named by `definition`.
    pub fn load(
        key: &str,
        definition: ModelDefinition,
        blob: Bytes,
        backends: &BackendRegistry,
        config: &Config,
    ) -> Result<Self> {
        let backend = backends.get(definition.backend)?;
        let options = LoadOptions {
            device: definition.device.clone(),
            inputs: definition.inputs.clone(),
            outputs: definition.outputs.clone(),
            batch_size: definition.policy.batch_size,
            intra_op_parallelism: config.intra_op_parallelism,
            inter_op_parallelism: config.inter_op_parallelism,
            timeout: config.backend_timeout,
        };
        let handle = backend.load_model(&blob, &options)?;
        let input_count = match definition.inputs.len() {
            0 => handle.input_count(),
            n => n,
        };
        let output_count = match definition.outputs.len() {
            0 => handle.output_count(),
            n => n,
        };
        let stats = RunStats::new(
            key,
            EntityKind::Model,
            definition.backend,
            definition.device.clone(),
            &definition.tag,
        );
        Ok(Self {
            id: Uuid::new_v4(),
            key: key.to_string(),
            definition,
            input_count,
            output_count,
            blob,
            handle,
            stats,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.definition
    }

    pub fn backend(&self) -> BackendKind {
        self.definition.backend
    }

    pub fn device(&self) -> &Device {
        &self.definition.device
    }

    pub fn tag(&self) -> &str {
        &self.definition.tag
    }

    pub fn policy(&self) -> BatchPolicy {
        self.definition.policy
    }

    pub fn input_count(&self) -> usize {
        self.input_count
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    /// The serialized model as it was stored.
    pub fn blob(&self) -> &Bytes {
        &self.blob
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub(crate) fn run(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        self.handle.run(inputs)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("definition", &self.definition)
            .field("blob_len", &self.blob.len())
            .finish()
    }
}
