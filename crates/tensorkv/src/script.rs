//! Stored scripts.

use std::fmt;
use uuid::Uuid;
use crate::backend::{BackendKind, BackendRegistry, ScriptCall, ScriptHandle};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::stats::{EntityKind, RunStats};
use crate::tensor::Tensor;

/// Runtime every script is compiled by.
pub const SCRIPT_BACKEND: BackendKind = BackendKind::Torch;

/// Header and source of a script as given to `AI.SCRIPTSTORE`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptDefinition {
    pub device: Device,
    pub tag: String,
    /// Callable functions. `None` exposes every function in the source.
    pub entry_points: Option<Vec<String>>,
    pub source: String,
}

/// A compiled script.
pub struct Script {
    id: Uuid,
    key: String,
    device: Device,
    tag: String,
    source: String,
    entry_points: Vec<String>,
    handle: Box<dyn ScriptHandle>,
    stats: RunStats,
}

impl Script {
    /// Compiles the source and checks every declared entry point exists in it.
    pub fn load(key: &str, definition: ScriptDefinition, backends: &BackendRegistry) -> Result<Self> {
        let backend = backends.get(SCRIPT_BACKEND)?;
        let handle = backend.load_script(&definition.source, &definition.device)?;
        let functions = handle.functions();
        let entry_points = match definition.entry_points {
            Some(entry_points) => {
                if let Some(missing) = entry_points.iter().find(|name| !functions.contains(name)) {
                    return Err(Error::backend(format!(
                        "Function {missing} does not exist in the given script."
                    )));
                }
                entry_points
            }
            None => functions,
        };
        let stats = RunStats::new(
            key,
            EntityKind::Script,
            SCRIPT_BACKEND,
            definition.device.clone(),
            &definition.tag,
        );
        Ok(Self {
            id: Uuid::new_v4(),
            key: key.to_string(),
            device: definition.device,
            tag: definition.tag,
            source: definition.source,
            entry_points,
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

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub(crate) fn run(&self, function: &str, call: ScriptCall<'_>) -> Result<Vec<Tensor>> {
        if !self.entry_points.iter().any(|name| name == function) {
            return Err(Error::backend(format!(
                "Function {function} is not an entry point of the script"
            )));
        }
        self.handle.run(function, call)
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("device", &self.device)
            .field("entry_points", &self.entry_points)
            .finish()
    }
}
