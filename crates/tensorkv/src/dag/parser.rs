use std::collections::HashSet;
use bytes::Bytes;
use crate::args::{as_str, parse_i64, to_strings, Args};
use crate::command::model::{parse_model_execute, parse_model_run};
use crate::command::script::{parse_script_execute, parse_script_run};
use crate::command::tensor::{parse_tensor_get, parse_tensor_set};
use crate::command::{command_name, is_chain, parse_timeout, CHAIN};
use crate::error::{Error, Result};
use crate::keyspace::Keyspace;
use super::{Dag, Op};

/// Which DAG command is being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DagFlavor {
    Execute,
    ExecuteReadOnly,
    /// Deprecated `AI.DAGRUN`.
    Run,
    /// Deprecated `AI.DAGRUN_RO`.
    RunReadOnly,
}

impl DagFlavor {
    pub fn name(&self) -> &'static str {
        match self {
            DagFlavor::Execute => "AI.DAGEXECUTE",
            DagFlavor::ExecuteReadOnly => "AI.DAGEXECUTE_RO",
            DagFlavor::Run => "AI.DAGRUN",
            DagFlavor::RunReadOnly => "AI.DAGRUN_RO",
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, DagFlavor::ExecuteReadOnly | DagFlavor::RunReadOnly)
    }

    pub fn is_deprecated(&self) -> bool {
        matches!(self, DagFlavor::Run | DagFlavor::RunReadOnly)
    }
}

fn unexpected(arg: &Bytes) -> Error {
    Error::dag(format!("Invalid DAG command. Unexpected argument: {}", String::from_utf8_lossy(arg)))
}

/// Reads the `<count> key...` that follows `LOAD` or `PERSIST`.
fn key_list(args: &mut Args<'_>, keyword: &str, mismatch: &str) -> Result<Vec<String>> {
    let count = args
        .next_arg()
        .ok_or_else(|| Error::dag(format!("missing arguments after {keyword} keyword in DAG command")))?;
    let count = match parse_i64(count) {
        Some(n) if n > 0 => n as usize,
        _ => {
            return Err(Error::dag(format!(
                "invalid or negative value found in number of keys to {keyword}"
            )));
        }
    };
    match args.take(count) {
        Some(keys) if !keys.iter().any(is_chain) => to_strings(keys),
        _ => Err(Error::dag(mismatch.to_string())),
    }
}

/// Parses `LOAD`, `PERSIST`, `ROUTING` and `TIMEOUT` up to the first `|>`.
fn parse_prologue(args: &mut Args<'_>, flavor: DagFlavor, dag: &mut Dag) -> Result<()> {
    let mut seen = HashSet::new();
    while let Some(arg) = args.peek() {
        if is_chain(arg) {
            break;
        }
        args.next_arg();
        let keyword = String::from_utf8_lossy(arg).to_ascii_uppercase();
        let known = match keyword.as_str() {
            "ROUTING" => !flavor.is_deprecated(),
            "LOAD" | "PERSIST" | "TIMEOUT" => true,
            _ => false,
        };
        if !known || !seen.insert(keyword.clone()) {
            return Err(unexpected(arg));
        }
        match keyword.as_str() {
            "LOAD" => {
                dag.load = key_list(
                    args,
                    "LOAD",
                    "number of keys to LOAD into DAG does not match the number of given arguments",
                )?;
            }
            "PERSIST" => {
                if flavor.is_read_only() {
                    return Err(Error::dag("PERSIST cannot be specified in a read-only DAG"));
                }
                let persist = key_list(
                    args,
                    "PERSIST",
                    "number of keys to PERSIST after DAG execution does not match the number of given arguments",
                )?;
                let unique: HashSet<&String> = persist.iter().collect();
                if unique.len() != persist.len() {
                    return Err(Error::dag("PERSIST keys must be unique"));
                }
                dag.persist = persist;
            }
            "ROUTING" => {
                let key = args
                    .next_arg()
                    .filter(|arg| !is_chain(arg))
                    .ok_or_else(|| Error::dag("Missing ROUTING value"))?;
                dag.routing = Some(as_str(key)?.to_string());
            }
            _ => {
                let value = args
                    .next_arg()
                    .filter(|arg| !is_chain(arg))
                    .ok_or_else(|| Error::dag("No value provided for TIMEOUT"))?;
                dag.timeout = Some(parse_timeout(value)?);
            }
        }
    }
    Ok(())
}

fn parse_op(segment: &[Bytes], flavor: DagFlavor, keyspace: &dyn Keyspace) -> Result<Op> {
    let name = command_name(segment);
    let op = match name.as_str() {
        "AI.TENSORSET" => Op::TensorSet(parse_tensor_set(segment)?),
        "AI.TENSORGET" => Op::TensorGet(parse_tensor_get(segment)?),
        "AI.MODELEXECUTE" => {
            if flavor.is_deprecated() {
                return Err(Error::dag("AI.MODELEXECUTE cannot be used in a deprecated AI.DAGRUN command"));
            }
            Op::ModelExecute(parse_model_execute(segment, keyspace)?)
        }
        "AI.SCRIPTEXECUTE" => {
            if flavor.is_read_only() {
                return Err(Error::dag("AI.SCRIPTEXECUTE command cannot be specified in a read-only DAG"));
            }
            if flavor.is_deprecated() {
                return Err(Error::dag("AI.SCRIPTEXECUTE cannot be used in a deprecated AI.DAGRUN command"));
            }
            Op::ScriptExecute(parse_script_execute(segment, keyspace)?)
        }
        "AI.MODELRUN" => {
            if !flavor.is_deprecated() {
                return Err(Error::dag("Deprecated AI.MODELRUN cannot be used in AI.DAGEXECUTE command"));
            }
            Op::ModelExecute(parse_model_run(segment, keyspace)?)
        }
        "AI.SCRIPTRUN" => {
            if !flavor.is_deprecated() {
                return Err(Error::dag("Deprecated AI.SCRIPTRUN cannot be used in AI.DAGEXECUTE command"));
            }
            if flavor.is_read_only() {
                return Err(Error::dag("AI.SCRIPTRUN command cannot be specified in a read-only DAG"));
            }
            Op::ScriptExecute(parse_script_run(segment, keyspace)?)
        }
        _ => return Err(Error::dag("Unsupported command within DAG")),
    };
    if op.timeout().is_some() {
        return Err(Error::dag("TIMEOUT not allowed within a DAG command"));
    }
    Ok(op)
}

/// Checks every op input is loaded or produced by an earlier op, and every
/// persisted name is available by the end.
fn validate_names(dag: &Dag) -> Result<()> {
    let mut available: HashSet<&str> = dag.load.iter().map(String::as_str).collect();
    for op in &dag.ops {
        if op.inputs().iter().any(|name| !available.contains(name.as_str())) {
            return Err(Error::dag("INPUT key cannot be found in DAG"));
        }
        available.extend(op.outputs().iter().map(String::as_str));
    }
    if dag.persist.iter().any(|name| !available.contains(name.as_str())) {
        return Err(Error::dag("PERSIST key cannot be found in DAG"));
    }
    Ok(())
}

/// Parses a full DAG command, command name included.
///
/// Model and script references are resolved here, so a parsed DAG holds the
/// exact instances it will run even if the keys are overwritten meanwhile.
pub fn parse_dag(raw: &[Bytes], flavor: DagFlavor, keyspace: &dyn Keyspace) -> Result<Dag> {
    if flavor.is_deprecated() {
        if raw.len() < 4 {
            return Err(Error::WrongArity(flavor.name().into()));
        }
    } else if raw.len() < 6 {
        return Err(Error::dag(format!("missing arguments for '{}' command", flavor.name())));
    }

    let mut dag = Dag { read_only: flavor.is_read_only(), ..Default::default() };
    let mut args = Args::new(raw);
    args.next_arg();
    parse_prologue(&mut args, flavor, &mut dag)?;

    if !flavor.is_deprecated() && dag.routing.is_none() && dag.load.is_empty() && dag.persist.is_empty() {
        return Err(Error::dag(
            "AI.DAGEXECUTE and AI.DAGEXECUTE_RO commands must contain at least one out of ROUTING, LOAD, PERSIST keywords",
        ));
    }

    let ops = args.rest();
    let Some((_, ops)) = ops.split_first() else {
        return Err(Error::dag("DAG is empty"));
    };
    for segment in ops.split(is_chain) {
        if segment.is_empty() {
            // a dangling or doubled `|>`
            return Err(unexpected(&Bytes::from_static(CHAIN.as_bytes())));
        }
        dag.ops.push(parse_op(segment, flavor, keyspace)?);
    }
    if dag.ops.is_empty() {
        return Err(Error::dag("DAG is empty"));
    }

    validate_names(&dag)?;
    Ok(dag)
}
