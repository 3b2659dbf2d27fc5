use std::fmt;
use std::time::Duration;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Runtime family a model is stored for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Tf,
    TfLite,
    Torch,
    Onnx,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [BackendKind::Tf, BackendKind::TfLite, BackendKind::Torch, BackendKind::Onnx];

    /// Parses a backend name, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Tf => "TF",
            BackendKind::TfLite => "TFLITE",
            BackendKind::Torch => "TORCH",
            BackendKind::Onnx => "ONNX",
        }
    }

    /// Backends that address inputs and outputs by graph node name.
    pub fn requires_io_names(&self) -> bool {
        matches!(self, BackendKind::Tf)
    }

    pub(crate) fn code(&self) -> u8 {
        match self {
            BackendKind::Tf => 0,
            BackendKind::TfLite => 1,
            BackendKind::Torch => 2,
            BackendKind::Onnx => 3,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a backend is told when it loads a model blob.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub device: Device,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub batch_size: usize,
    pub intra_op_parallelism: usize,
    pub inter_op_parallelism: usize,
    pub timeout: Duration,
}

/// Arguments of one script call.
///
/// `inputs` holds the positional tensors followed by every variadic list, in
/// order; `list_sizes` says how many trailing tensors belong to each list.
#[derive(Debug, Clone, Copy)]
pub struct ScriptCall<'a> {
    pub inputs: &'a [Tensor],
    pub list_sizes: &'a [usize],
    pub keys: &'a [String],
    pub args: &'a [String],
}

/// The trait that must be fulfilled by any inference runtime
pub trait Backend: Send + Sync + 'static {
    /// Which runtime family this is
    fn kind(&self) -> BackendKind;

    /// Deserialize a model blob into a runnable handle
    fn load_model(&self, blob: &[u8], options: &LoadOptions) -> Result<Box<dyn ModelHandle>>;

    /// Compile script source into a runnable handle
    fn load_script(&self, _source: &str, _device: &Device) -> Result<Box<dyn ScriptHandle>> {
        Err(Error::backend(format!("{} backend does not support scripts", self.kind())))
    }
}

/// A loaded model. Dropping the handle frees the backend resources.
pub trait ModelHandle: Send + Sync + 'static {
    /// Number of inputs the graph expects
    fn input_count(&self) -> usize;

    /// Number of outputs the graph produces
    fn output_count(&self) -> usize;

    /// Run the graph on batched inputs, outputs keep the batch dimension first
    fn run(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>>;
}

/// A compiled script.
pub trait ScriptHandle: Send + Sync + 'static {
    /// Names of every function defined by the source
    fn functions(&self) -> Vec<String>;

    /// Call `function` and return its output tensors
    fn run(&self, function: &str, call: ScriptCall<'_>) -> Result<Vec<Tensor>>;
}
