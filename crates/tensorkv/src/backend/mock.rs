use std::sync::{Arc, Mutex};
use std::time::Duration;
use crate::backend::{Backend, BackendKind, LoadOptions, ModelHandle, ScriptCall, ScriptHandle};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::model::{BatchPolicy, ModelDefinition};
use crate::tensor::Tensor;

/// Script source understood by the mock backend.
pub const MOCK_SCRIPT: &str = "\
def bar(tensors: List[Tensor], keys: List[str], args: List[str]):
    return tensors[0] + tensors[1]

def sum_list(tensors: List[Tensor], keys: List[str], args: List[str]):
    return sum(tensors)

def fail(tensors: List[Tensor], keys: List[str], args: List[str]):
    raise RuntimeError('boom')
";

pub fn mock_definition(policy: BatchPolicy) -> ModelDefinition {
    ModelDefinition {
        backend: BackendKind::Torch,
        device: Device::Cpu(None),
        tag: String::new(),
        inputs: vec![],
        outputs: vec![],
        policy,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Mul,
    Add,
    Identity,
    Fail,
    WrongBatch,
    Sleep(u64),
}

impl Op {
    fn parse(blob: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(blob).ok()?;
        match text {
            "mul" => Some(Op::Mul),
            "add" => Some(Op::Add),
            "identity" => Some(Op::Identity),
            "fail" => Some(Op::Fail),
            "wrong_batch" => Some(Op::WrongBatch),
            _ => text.strip_prefix("sleep:")?.parse().ok().map(Op::Sleep),
        }
    }

    fn input_count(&self) -> usize {
        match self {
            Op::Mul | Op::Add => 2,
            _ => 1,
        }
    }
}

/// Deterministic backend used by tests.
///
/// Model blobs are op names (`mul`, `add`, `identity`, `fail`, `wrong_batch`,
/// `sleep:<ms>`). Every run records the leading dimension of its first input.
pub struct MockBackend {
    kind: BackendKind,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
}

impl MockBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self { kind, batch_sizes: Default::default() }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }
}

impl Backend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn load_model(&self, blob: &[u8], _options: &LoadOptions) -> Result<Box<dyn ModelHandle>> {
        let op = Op::parse(blob).ok_or_else(|| Error::backend("Invalid model blob"))?;
        Ok(Box::new(MockModel { op, batch_sizes: self.batch_sizes.clone() }))
    }

    fn load_script(&self, source: &str, _device: &Device) -> Result<Box<dyn ScriptHandle>> {
        let functions: Vec<String> = source
            .lines()
            .filter_map(|line| line.strip_prefix("def "))
            .filter_map(|rest| rest.split_once('(').map(|(name, _)| name.trim().to_string()))
            .collect();
        if functions.is_empty() {
            return Err(Error::backend("Invalid script source"));
        }
        Ok(Box::new(MockScript { functions }))
    }
}

fn elementwise(inputs: &[Tensor], combine: fn(f64, f64) -> f64) -> Result<Tensor> {
    let first = inputs.first().ok_or_else(|| Error::backend("no inputs"))?;
    let mut acc = first.to_f64_vec().ok_or_else(|| Error::backend("numeric input expected"))?;
    for other in &inputs[1..] {
        if other.shape() != first.shape() {
            return Err(Error::backend("Incompatible shapes for elementwise op"));
        }
        let values = other.to_f64_vec().ok_or_else(|| Error::backend("numeric input expected"))?;
        acc.iter_mut().zip(values).for_each(|(a, b)| *a = combine(*a, b));
    }
    Tensor::from_f64(first.dtype(), first.shape().to_vec(), &acc)
}

struct MockModel {
    op: Op,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
}

impl ModelHandle for MockModel {
    fn input_count(&self) -> usize {
        self.op.input_count()
    }

    fn output_count(&self) -> usize {
        1
    }

    fn run(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        self.batch_sizes
            .lock()
            .unwrap()
            .push(inputs.first().map(Tensor::batch_size).unwrap_or(0));
        if inputs.len() != self.op.input_count() {
            return Err(Error::backend("wrong number of inputs"));
        }
        let output = match self.op {
            Op::Mul => elementwise(inputs, |a, b| a * b)?,
            Op::Add => elementwise(inputs, |a, b| a + b)?,
            Op::Identity => inputs[0].clone(),
            Op::Fail => return Err(Error::backend("mock model failure")),
            Op::WrongBatch => crate::tensor::operations::concat_batch(&[inputs[0].clone(), inputs[0].clone()])?,
            Op::Sleep(ms) => {
                std::thread::sleep(Duration::from_millis(ms));
                inputs[0].clone()
            }
        };
        Ok(vec![output])
    }
}

struct MockScript {
    functions: Vec<String>,
}

impl ScriptHandle for MockScript {
    fn functions(&self) -> Vec<String> {
        self.functions.clone()
    }

    fn run(&self, function: &str, call: ScriptCall<'_>) -> Result<Vec<Tensor>> {
        if function == "fail" {
            return Err(Error::backend("boom"));
        }
        Ok(vec![elementwise(call.inputs, |a, b| a + b)?])
    }
}
