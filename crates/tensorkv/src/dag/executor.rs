use tokio::time::Instant;
use crate::backend::adapter::RunTarget;
use crate::batching::BatchingEngine;
use crate::error::{Error, Result};
use crate::keyspace::Keyspace;
use crate::keyspace::slot::common_slot;
use crate::reply::Reply;
use super::{Dag, LocalContext, Op};

/// Runs one op against the local context.
///
/// `Err` is only returned for [`Error::TimedOut`]; every other failure is
/// scoped to the op and comes back as an error reply.
async fn run_op(
    op: &Op,
    context: &mut LocalContext,
    batching: &BatchingEngine,
    deadline: Option<Instant>,
) -> Result<Reply> {
    let (target, inputs, outputs) = match op {
        Op::TensorSet(set) => {
            context.insert(set.key.clone(), set.tensor.clone());
            return Ok(Reply::ok());
        }
        Op::TensorGet(get) => {
            return Ok(match context.get(&get.key) {
                Some(tensor) => get.format.reply(tensor),
                None => Reply::not_available(),
            });
        }
        Op::ModelExecute(run) => (RunTarget::Model(run.model.clone()), &run.inputs, &run.outputs),
        Op::ScriptExecute(run) => (RunTarget::Script(run.invocation()), &run.inputs, &run.outputs),
    };

    let Some(inputs) = context.collect(inputs) else {
        tracing::debug!(key = %target.key(), "skipping op with missing inputs");
        return Ok(Reply::not_available());
    };
    let pending = batching.submit(target, inputs, outputs.len(), deadline).await;
    match pending.await {
        Ok(tensors) => {
            for (name, tensor) in outputs.iter().zip(tensors) {
                context.insert(name.clone(), tensor);
            }
            Ok(Reply::ok())
        }
        Err(Error::TimedOut) => Err(Error::TimedOut),
        Err(error) => Ok(Reply::Error(error)),
    }
}

async fn run_ops(
    ops: &[Op],
    context: &mut LocalContext,
    batching: &BatchingEngine,
    deadline: Option<Instant>,
) -> Result<Vec<Reply>> {
    let mut replies = Vec::with_capacity(ops.len());
    for op in ops {
        replies.push(run_op(op, context, batching, deadline).await?);
    }
    Ok(replies)
}

/// Writes every `PERSIST` name back to the keyspace and returns one error
/// reply per name that could not be written.
fn persist(dag: &Dag, context: &LocalContext, keyspace: &dyn Keyspace) -> Vec<Reply> {
    let mut failures = vec![];
    for name in &dag.persist {
        let result = match context.get(name) {
            Some(tensor) => keyspace.put_tensor(name, tensor.clone()),
            None => Err(Error::dag("PERSIST key cannot be found in DAG")),
        };
        if let Err(error) = result {
            tracing::warn!(key = %name, error = %error, "failed to persist DAG output");
            failures.push(Reply::Error(error));
        }
    }
    failures
}

/// Executes a parsed DAG.
///
/// Keys are checked for a common cluster slot first when `cluster_mode` is
/// set. A `LOAD` failure aborts before any op runs. Ops then run in order; an
/// op whose inputs are missing replies `NA` and the others still run. When
/// the deadline passes the whole reply is `TIMEDOUT` and nothing is
/// persisted.
pub async fn execute(
    dag: &Dag,
    keyspace: &dyn Keyspace,
    batching: &BatchingEngine,
    cluster_mode: bool,
) -> Reply {
    if cluster_mode {
        if let Err(error) = common_slot(dag.keys()) {
            return Reply::Error(error);
        }
    }

    let mut context = LocalContext::new();
    for name in &dag.load {
        match keyspace.get_tensor(name) {
            Ok(tensor) => context.insert(name.clone(), tensor),
            Err(error) => return Reply::Error(error),
        }
    }

    let deadline = dag.timeout.map(|timeout| Instant::now() + timeout);
    tracing::debug!(ops = dag.ops.len(), load = dag.load.len(), timeout = ?dag.timeout, "executing DAG");
    let ops = run_ops(&dag.ops, &mut context, batching, deadline);
    let results = match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, ops)
            .await
            .unwrap_or(Err(Error::TimedOut)),
        None => ops.await,
    };
    let mut replies = match results {
        Ok(replies) => replies,
        Err(_) => {
            tracing::debug!(timeout = ?dag.timeout, "DAG timed out");
            return Reply::timed_out();
        }
    };

    let failures = persist(dag, &context, keyspace);
    if dag.single_op {
        let reply = replies.pop().unwrap_or_else(Reply::not_available);
        if reply.is_error() {
            return reply;
        }
        return failures.into_iter().next().unwrap_or(reply);
    }
    replies.extend(failures);
    Reply::Array(replies)
}
