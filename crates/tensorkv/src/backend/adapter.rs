//! Uniform run surface over models and scripts.
//!
//! Every backend call made by the engine goes through [`invoke`], which times
//! the call and checks the number of outputs. Statistics are recorded by the
//! caller once it knows how the outputs map back to requests.

use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;
use crate::backend::ScriptCall;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::model::{BatchPolicy, Model};
use crate::script::Script;
use crate::stats::RunStats;
use crate::tensor::Tensor;

/// A script function bound to its call arguments.
#[derive(Debug, Clone)]
pub struct ScriptInvocation {
    pub script: Arc<Script>,
    pub function: String,
    /// Sizes of the variadic lists at the tail of the inputs.
    pub list_sizes: Vec<usize>,
    pub keys: Vec<String>,
    pub args: Vec<String>,
}

/// What a queued run executes.
#[derive(Debug, Clone)]
pub enum RunTarget {
    Model(Arc<Model>),
    Script(ScriptInvocation),
}

impl RunTarget {
    pub fn key(&self) -> &str {
        match self {
            RunTarget::Model(model) => model.key(),
            RunTarget::Script(call) => call.script.key(),
        }
    }

    pub fn device(&self) -> &Device {
        match self {
            RunTarget::Model(model) => model.device(),
            RunTarget::Script(call) => call.script.device(),
        }
    }

    /// Id of the loaded instance. Runs are only merged within one instance.
    pub fn instance_id(&self) -> Uuid {
        match self {
            RunTarget::Model(model) => model.id(),
            RunTarget::Script(call) => call.script.id(),
        }
    }

    /// Scripts are never batched.
    pub fn policy(&self) -> BatchPolicy {
        match self {
            RunTarget::Model(model) => model.policy(),
            RunTarget::Script(_) => BatchPolicy::default(),
        }
    }

    pub fn stats(&self) -> &RunStats {
        match self {
            RunTarget::Model(model) => model.stats(),
            RunTarget::Script(call) => call.script.stats(),
        }
    }

    /// Samples credited to the stats for one successful request.
    pub fn samples(&self, outputs: &[Tensor]) -> usize {
        match self {
            RunTarget::Model(_) => outputs.first().map(Tensor::batch_size).unwrap_or(0),
            RunTarget::Script(_) => 1,
        }
    }

    /// Records the outcome of one request against the target's stats.
    pub fn record(&self, duration: Duration, outputs: &Result<Vec<Tensor>>) {
        match outputs {
            Ok(outputs) => self.stats().record_success(duration, self.samples(outputs)),
            Err(_) => self.stats().record_error(),
        }
    }
}

/// Outputs of one backend call and the time it took.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub outputs: Result<Vec<Tensor>>,
    pub duration: Duration,
}

/// Runs `target` on `inputs` and checks it produced `output_count` tensors.
///
/// This blocks for as long as the backend computes, so the batching engine
/// calls it from a blocking task.
pub fn invoke(target: &RunTarget, inputs: &[Tensor], output_count: usize) -> Invocation {
    let started = Instant::now();
    let outputs = match target {
        RunTarget::Model(model) => model.run(inputs).and_then(|outputs| {
            if outputs.len() < output_count {
                return Err(Error::backend("Model did not generate the expected number of outputs"));
            }
            Ok(outputs)
        }),
        RunTarget::Script(call) => {
            let script_call = ScriptCall {
                inputs,
                list_sizes: &call.list_sizes,
                keys: &call.keys,
                args: &call.args,
            };
            call.script.run(&call.function, script_call).and_then(|outputs| {
                if outputs.len() < output_count {
                    return Err(Error::backend("Script did not generate the expected number of outputs"));
                }
                Ok(outputs)
            })
        }
    };
    Invocation {
        outputs: outputs.map(|mut outputs| {
            outputs.truncate(output_count);
            outputs
        }),
        duration: started.elapsed(),
    }
}
