//! `AI.INFO <key> [RESETSTAT]`

use bytes::Bytes;
use crate::args::{as_str, is_keyword};
use crate::error::{Error, Result};
use crate::keyspace::{Keyspace, Value};
use crate::reply::Reply;
use crate::stats::RunStats;

fn with_stats<T>(keyspace: &dyn Keyspace, key: &str, f: impl FnOnce(&RunStats) -> T) -> Result<T> {
    match keyspace.get(key) {
        Some(Value::Model(model)) => Ok(f(model.stats())),
        Some(Value::Script(script)) => Ok(f(script.stats())),
        _ => Err(Error::syntax("cannot find run info for key")),
    }
}

pub(crate) fn info(keyspace: &dyn Keyspace, raw: &[Bytes]) -> Result<Reply> {
    if raw.len() != 2 && raw.len() != 3 {
        return Err(Error::WrongArity("AI.INFO".into()));
    }
    let key = as_str(&raw[1])?;
    match raw.get(2) {
        None => with_stats(keyspace, key, RunStats::info_reply),
        Some(arg) if is_keyword(arg, "RESETSTAT") => {
            with_stats(keyspace, key, RunStats::reset)?;
            tracing::debug!(key = %key, "run statistics reset");
            Ok(Reply::ok())
        }
        Some(arg) => Err(Error::syntax(format!(
            "unsupported subcommand {} for AI.INFO",
            String::from_utf8_lossy(arg)
        ))),
    }
}
