//! # DAG
//!
//! A DAG is a pipeline of tensor, model and script ops sharing one transient
//! namespace, the [`LocalContext`]. Keys named by `LOAD` are copied into the
//! context before the first op, keys named by `PERSIST` are written back
//! after the last one. Everything else an op produces lives and dies with the
//! DAG.
//!
//! Standalone `AI.MODELEXECUTE` and `AI.SCRIPTEXECUTE` run as single op DAGs
//! whose inputs are loaded and whose outputs are persisted.

mod context;
mod executor;
mod parser;

use std::time::Duration;
use crate::command::model::ModelRun;
use crate::command::script::ScriptRun;
use crate::command::tensor::{TensorGet, TensorSet};

pub use context::LocalContext;
pub use executor::execute;
pub use parser::{parse_dag, DagFlavor};

/// One step of a DAG.
#[derive(Debug, Clone)]
pub enum Op {
    TensorSet(TensorSet),
    TensorGet(TensorGet),
    ModelExecute(ModelRun),
    ScriptExecute(ScriptRun),
}

impl Op {
    /// Local names the op reads.
    pub fn inputs(&self) -> &[String] {
        match self {
            Op::TensorSet(_) => &[],
            Op::TensorGet(get) => std::slice::from_ref(&get.key),
            Op::ModelExecute(run) => &run.inputs,
            Op::ScriptExecute(run) => &run.inputs,
        }
    }

    /// Local names the op writes.
    pub fn outputs(&self) -> &[String] {
        match self {
            Op::TensorSet(set) => std::slice::from_ref(&set.key),
            Op::TensorGet(_) => &[],
            Op::ModelExecute(run) => &run.outputs,
            Op::ScriptExecute(run) => &run.outputs,
        }
    }

    /// Host keys the op touches besides local names.
    fn keys(&self) -> Vec<&str> {
        match self {
            Op::ModelExecute(run) => vec![run.model.key()],
            Op::ScriptExecute(run) => std::iter::once(run.script.key())
                .chain(run.keys.iter().map(String::as_str))
                .collect(),
            _ => vec![],
        }
    }

    fn timeout(&self) -> Option<Duration> {
        match self {
            Op::ModelExecute(run) => run.timeout,
            Op::ScriptExecute(run) => run.timeout,
            _ => None,
        }
    }
}

/// A parsed DAG, ready to execute.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    pub ops: Vec<Op>,
    pub load: Vec<String>,
    pub persist: Vec<String>,
    pub routing: Option<String>,
    pub timeout: Option<Duration>,
    pub read_only: bool,
    /// Reply with the op result itself rather than an array of results.
    pub single_op: bool,
}

impl Dag {
    /// Wraps one model or script op so it runs like a standalone command.
    pub fn single(op: Op) -> Self {
        let mut load: Vec<String> = vec![];
        for name in op.inputs() {
            if !load.contains(name) {
                load.push(name.clone());
            }
        }
        let mut persist: Vec<String> = vec![];
        for name in op.outputs() {
            if !persist.contains(name) {
                persist.push(name.clone());
            }
        }
        Self {
            timeout: op.timeout(),
            ops: vec![op],
            load,
            persist,
            routing: None,
            read_only: false,
            single_op: true,
        }
    }

    /// Every host key the DAG touches, for cluster slot validation.
    ///
    /// Local names are not keys and are left out.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.routing.iter().map(String::as_str).collect();
        keys.extend(self.load.iter().map(String::as_str));
        keys.extend(self.persist.iter().map(String::as_str));
        keys.extend(self.ops.iter().flat_map(Op::keys));
        keys
    }
}
