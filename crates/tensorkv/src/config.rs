//! Engine configuration.
//!
//! Values are given at load time as a flat `KEY VALUE` list and a subset can
//! be changed later through `AI.CONFIG`.

use std::time::Duration;
use crate::error::{Error, Result};

pub const DEFAULT_MODEL_CHUNK_SIZE: usize = 511 * 1024 * 1024;
const MIN_BACKEND_TIMEOUT_MS: u64 = 1000;

/// Tunables read by the batching engine and handed to backends on load.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Worker tasks serving each device run queue.
    pub threads_per_queue: usize,
    /// Threads a backend may use inside one operator. `0` lets the backend decide.
    pub intra_op_parallelism: usize,
    /// Threads a backend may use across operators. `0` lets the backend decide.
    pub inter_op_parallelism: usize,
    /// Largest chunk a model blob is split into when returned to clients.
    pub model_chunk_size: usize,
    /// Upper bound a backend may spend on one run. Zero disables it.
    pub backend_timeout: Duration,
    /// Directory backends are looked up in.
    pub backends_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads_per_queue: 1,
            intra_op_parallelism: 0,
            inter_op_parallelism: 0,
            model_chunk_size: DEFAULT_MODEL_CHUNK_SIZE,
            backend_timeout: Duration::ZERO,
            backends_path: None,
        }
    }
}

fn positive(name: &str, value: &str) -> Result<usize> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!("Invalid value for {name}: {value}"))),
    }
}

impl Config {
    /// Builds a configuration from `KEY VALUE` pairs, starting from the defaults.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        if args.len() % 2 != 0 {
            return Err(Error::Config(
                "Invalid number of arguments, expected KEY VALUE pairs".to_string(),
            ));
        }
        let mut config = Config::default();
        for pair in args.chunks(2) {
            config.set(pair[0].as_ref(), pair[1].as_ref())?;
        }
        Ok(config)
    }

    /// Applies a single setting. Keys are case-insensitive.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key.to_ascii_uppercase().as_str() {
            "THREADS_PER_QUEUE" => self.threads_per_queue = positive("THREADS_PER_QUEUE", value)?,
            "INTRA_OP_PARALLELISM" => {
                self.intra_op_parallelism = positive("INTRA_OP_PARALLELISM", value)?
            }
            "INTER_OP_PARALLELISM" => {
                self.inter_op_parallelism = positive("INTER_OP_PARALLELISM", value)?
            }
            "MODEL_CHUNK_SIZE" => self.model_chunk_size = positive("MODEL_CHUNK_SIZE", value)?,
            "ONNX_TIMEOUT" | "BACKEND_TIMEOUT" => {
                let millis = positive(key, value)? as u64;
                if millis < MIN_BACKEND_TIMEOUT_MS {
                    return Err(Error::Config(format!(
                        "{key} must be at least {MIN_BACKEND_TIMEOUT_MS} milliseconds"
                    )));
                }
                self.backend_timeout = Duration::from_millis(millis);
            }
            "BACKENDSPATH" => self.backends_path = Some(value.to_string()),
            _ => return Err(Error::Config(format!("Invalid configuration parameter: {key}"))),
        }
        Ok(())
    }

    /// Reads back a setting for `AI.CONFIG GET`.
    pub fn get(&self, key: &str) -> Option<String> {
        match key.to_ascii_uppercase().as_str() {
            "THREADS_PER_QUEUE" => Some(self.threads_per_queue.to_string()),
            "INTRA_OP_PARALLELISM" => Some(self.intra_op_parallelism.to_string()),
            "INTER_OP_PARALLELISM" => Some(self.inter_op_parallelism.to_string()),
            "MODEL_CHUNK_SIZE" => Some(self.model_chunk_size.to_string()),
            "ONNX_TIMEOUT" | "BACKEND_TIMEOUT" => {
                Some(self.backend_timeout.as_millis().to_string())
            }
            "BACKENDSPATH" => self.backends_path.clone(),
            _ => None,
        }
    }
}
