//! Model commands: store, get, delete, scan and run.

use std::sync::Arc;
use std::time::Duration;
use bytes::{Bytes, BytesMut};
use crate::args::{as_str, is_keyword, parse_i64, to_strings, Args};
use crate::backend::BackendKind;
use crate::device::Device;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::keyspace::{Keyspace, Value};
use crate::model::{BatchPolicy, Model, ModelDefinition};
use crate::reply::Reply;
use super::parse_timeout;

/// Parsed `AI.MODELSTORE`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelStore {
    pub key: String,
    pub definition: ModelDefinition,
    pub blob: Bytes,
}

/// A model run as written in `AI.MODELEXECUTE` or the deprecated `AI.MODELRUN`.
#[derive(Debug, Clone)]
pub struct ModelRun {
    pub model: Arc<Model>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub timeout: Option<Duration>,
}

fn non_negative(arg: Option<&Bytes>, name: &str) -> Result<usize> {
    match arg.and_then(|arg| parse_i64(arg)) {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(Error::syntax(format!("Invalid argument for {name}"))),
    }
}

/// Reads `<count> name...` for a TF graph input or output list.
fn io_names(args: &mut Args<'_>, kind: &str) -> Result<Vec<String>> {
    let count = match args.next_arg().and_then(|arg| parse_i64(arg)) {
        Some(n) if n > 0 => n as usize,
        _ => return Err(Error::syntax(format!("Invalid argument for {kind}_count"))),
    };
    let names = args.take(count).ok_or_else(|| {
        Error::syntax(format!("number of model {kind}s does not match the number of given arguments"))
    })?;
    to_strings(names)
}

/// `AI.MODELSTORE <key> <backend> <device> [TAG t] [BATCHSIZE n [MINBATCHSIZE m
/// [MINBATCHTIMEOUT ms]]] [INPUTS n names... OUTPUTS n names...] BLOB chunk...`
///
/// `command` names the command in arity errors, so the deprecated
/// `AI.MODELSET` shares this grammar.
pub fn parse_model_store(raw: &[Bytes], command: &str) -> Result<ModelStore> {
    if raw.len() < 6 {
        return Err(Error::WrongArity(command.to_string()));
    }
    let mut args = Args::new(raw);
    args.next_arg();
    let key = as_str(&raw[1])?.to_string();
    args.next_arg();

    let backend = args
        .next_str()
        .and_then(|name| name.ok())
        .and_then(BackendKind::parse)
        .ok_or_else(|| Error::syntax("unsupported backend"))?;
    let device: Device = args
        .next_str()
        .unwrap_or_else(|| Err(Error::syntax("Invalid DEVICE")))?
        .parse()?;

    let mut tag = String::new();
    if args.peek_keyword("TAG") {
        args.next_arg();
        tag = args.next_str().unwrap_or_else(|| Err(Error::syntax("Missing TAG value")))?.to_string();
    }

    let mut policy = BatchPolicy::default();
    if args.peek_keyword("BATCHSIZE") {
        args.next_arg();
        policy.batch_size = non_negative(args.next_arg(), "BATCHSIZE")?;
    }
    if args.peek_keyword("MINBATCHSIZE") {
        args.next_arg();
        policy.min_batch_size = non_negative(args.next_arg(), "MINBATCHSIZE")?;
        if policy.batch_size == 0 && policy.min_batch_size > 0 {
            return Err(Error::syntax("MINBATCHSIZE specified without BATCHSIZE"));
        }
    }
    if args.peek_keyword("MINBATCHTIMEOUT") {
        args.next_arg();
        let millis = non_negative(args.next_arg(), "MINBATCHTIMEOUT")?;
        if policy.min_batch_size == 0 && millis > 0 {
            return Err(Error::syntax("MINBATCHTIMEOUT specified without MINBATCHSIZE"));
        }
        policy.min_batch_timeout = Duration::from_millis(millis as u64);
    }

    let missing_blob = || Error::syntax("Insufficient arguments, missing model BLOB");
    let mut next = args.next_arg().ok_or_else(missing_blob)?;
    let (mut inputs, mut outputs) = (vec![], vec![]);
    if backend.requires_io_names() {
        if !is_keyword(next, "INPUTS") {
            return Err(Error::syntax(format!("INPUTS not specified for {backend}")));
        }
        inputs = io_names(&mut args, "input")?;
        if !args.peek_keyword("OUTPUTS") {
            return Err(Error::syntax(format!("OUTPUTS not specified for {backend}")));
        }
        args.next_arg();
        outputs = io_names(&mut args, "output")?;
        next = args.next_arg().ok_or_else(missing_blob)?;
    } else if is_keyword(next, "INPUTS") {
        return Err(Error::syntax("INPUTS argument should not be specified for this backend"));
    }

    if !is_keyword(next, "BLOB") {
        return Err(Error::syntax("Invalid argument, expected BLOB"));
    }
    let chunks = args.rest();
    if chunks.is_empty() {
        return Err(missing_blob());
    }
    let blob = match chunks {
        [single] => single.clone(),
        _ => {
            let mut joined = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
            chunks.iter().for_each(|chunk| joined.extend_from_slice(chunk));
            joined.freeze()
        }
    };

    Ok(ModelStore {
        key,
        definition: ModelDefinition { backend, device, tag, inputs, outputs, policy },
        blob,
    })
}

/// `AI.MODELEXECUTE <key> INPUTS n in... OUTPUTS n out... [TIMEOUT ms]`
pub fn parse_model_execute(raw: &[Bytes], keyspace: &dyn Keyspace) -> Result<ModelRun> {
    if raw.len() < 8 {
        return Err(Error::WrongArity("AI.MODELEXECUTE".into()));
    }
    let model = keyspace.get_model(as_str(&raw[1])?)?;
    let mut args = Args::new(&raw[2..]);

    if !args.next_arg().is_some_and(|arg| is_keyword(arg, "INPUTS")) {
        return Err(Error::syntax("INPUTS not specified"));
    }
    let inputs = scoped_names(&mut args, "input", model.input_count())?;

    if !args.next_arg().is_some_and(|arg| is_keyword(arg, "OUTPUTS")) {
        return Err(Error::syntax("OUTPUTS not specified"));
    }
    let outputs = scoped_names(&mut args, "output", model.output_count())?;

    let mut timeout = None;
    if let Some(arg) = args.next_arg() {
        if !is_keyword(arg, "TIMEOUT") {
            return Err(Error::syntax(format!("Invalid argument: {}", String::from_utf8_lossy(arg))));
        }
        let value = args.next_arg().ok_or_else(|| Error::syntax("No value provided for TIMEOUT"))?;
        timeout = Some(parse_timeout(value)?);
    }
    if let Some(extra) = args.next_arg() {
        return Err(Error::syntax(format!("Invalid argument: {}", String::from_utf8_lossy(extra))));
    }
    Ok(ModelRun { model, inputs, outputs, timeout })
}

/// Reads `<count> name...` and checks the count against the model.
fn scoped_names(args: &mut Args<'_>, kind: &str, expected: usize) -> Result<Vec<String>> {
    let count = args
        .next_arg()
        .and_then(|arg| parse_i64(arg))
        .ok_or_else(|| Error::syntax(format!("Invalid argument for {kind}_count")))?;
    if count <= 0 {
        let mut capitalised = kind.to_string();
        capitalised[..1].make_ascii_uppercase();
        return Err(Error::syntax(format!("{capitalised} count must be a positive integer")));
    }
    if count as usize != expected {
        return Err(Error::syntax(format!(
            "Number of keys given as {}S here does not match model definition",
            kind.to_ascii_uppercase()
        )));
    }
    let names = args.take(count as usize).ok_or_else(|| {
        Error::syntax(format!(
            "number of {kind} keys to AI.MODELEXECUTE command does not match the number of given arguments"
        ))
    })?;
    to_strings(names)
}

/// Deprecated `AI.MODELRUN <key> [TIMEOUT ms] INPUTS in... OUTPUTS out...`
pub fn parse_model_run(raw: &[Bytes], keyspace: &dyn Keyspace) -> Result<ModelRun> {
    if raw.len() < 6 {
        return Err(Error::WrongArity("AI.MODELRUN".into()));
    }
    let model = keyspace.get_model(as_str(&raw[1])?)?;
    let mut args = Args::new(&raw[2..]);

    let mut timeout = None;
    if args.peek_keyword("TIMEOUT") {
        args.next_arg();
        let value = args.next_arg().ok_or_else(|| Error::syntax("No value provided for TIMEOUT"))?;
        timeout = Some(parse_timeout(value)?);
    }
    if !args.next_arg().is_some_and(|arg| is_keyword(arg, "INPUTS")) {
        return Err(Error::syntax("INPUTS not specified"));
    }
    let (mut inputs, mut outputs) = (vec![], vec![]);
    let mut in_outputs = false;
    while let Some(arg) = args.next_arg() {
        if !in_outputs && is_keyword(arg, "OUTPUTS") {
            in_outputs = true;
            continue;
        }
        let name = as_str(arg)?.to_string();
        if in_outputs {
            outputs.push(name);
        } else {
            inputs.push(name);
        }
    }
    if inputs.len() != model.input_count() {
        return Err(Error::syntax("Number of keys given as INPUTS here does not match model definition"));
    }
    if outputs.len() != model.output_count() {
        return Err(Error::syntax("Number of keys given as OUTPUTS here does not match model definition"));
    }
    Ok(ModelRun { model, inputs, outputs, timeout })
}

/// Loads and stores a model, creating the run queue for its device.
pub(crate) fn store(engine: &Engine, raw: &[Bytes], command: &str) -> Result<Reply> {
    let ModelStore { key, definition, blob } = parse_model_store(raw, command)?;
    if matches!(engine.keyspace().get(&key), Some(value) if !matches!(value, Value::Model(_))) {
        return Err(Error::WrongType);
    }
    let config = engine.config();
    let model = Model::load(&key, definition, blob, &engine.backends(), &config)?;
    engine.batching().ensure_queue(model.device());
    tracing::info!(
        key = %key,
        backend = %model.backend(),
        device = %model.device(),
        batch_size = model.policy().batch_size,
        "model stored"
    );
    engine.keyspace().put_model(&key, Arc::new(model))?;
    Ok(Reply::ok())
}

fn chunked(blob: &Bytes, chunk_size: usize) -> Reply {
    if blob.len() <= chunk_size {
        return Reply::Bulk(blob.clone());
    }
    let chunks = (0..blob.len())
        .step_by(chunk_size)
        .map(|start| Reply::Bulk(blob.slice(start..(start + chunk_size).min(blob.len()))))
        .collect();
    Reply::Array(chunks)
}

/// `AI.MODELGET <key> [META] [BLOB]`
pub(crate) fn get(engine: &Engine, raw: &[Bytes]) -> Result<Reply> {
    if raw.len() < 2 || raw.len() > 4 {
        return Err(Error::WrongArity("AI.MODELGET".into()));
    }
    let model = engine.keyspace().get_model(as_str(&raw[1])?)?;
    let meta = raw[2..].iter().any(|arg| is_keyword(arg, "META"));
    let blob = raw[2..].iter().any(|arg| is_keyword(arg, "BLOB"));
    let chunk_size = engine.config().model_chunk_size;

    if !meta && blob {
        return Ok(chunked(model.blob(), chunk_size));
    }
    let policy = model.policy();
    let names = |names: &[String]| Reply::Array(names.iter().map(Reply::bulk).collect());
    let mut fields = vec![
        Reply::status("backend"),
        Reply::status(model.backend().name()),
        Reply::status("device"),
        Reply::status(model.device().to_string()),
        Reply::status("tag"),
        Reply::bulk(model.tag()),
        Reply::status("batchsize"),
        Reply::Integer(policy.batch_size as i64),
        Reply::status("minbatchsize"),
        Reply::Integer(policy.min_batch_size as i64),
        Reply::status("minbatchtimeout"),
        Reply::Integer(policy.min_batch_timeout.as_millis() as i64),
        Reply::status("inputs"),
        names(&model.definition().inputs),
        Reply::status("outputs"),
        names(&model.definition().outputs),
    ];
    if !meta || blob {
        fields.push(Reply::status("blob"));
        fields.push(chunked(model.blob(), chunk_size));
    }
    Ok(Reply::Array(fields))
}

/// `AI.MODELDEL <key>`
pub(crate) fn delete(engine: &Engine, raw: &[Bytes]) -> Result<Reply> {
    if raw.len() != 2 {
        return Err(Error::WrongArity("AI.MODELDEL".into()));
    }
    let key = as_str(&raw[1])?;
    engine.keyspace().get_model(key)?;
    engine.keyspace().remove(key);
    tracing::info!(key = %key, "model deleted");
    Ok(Reply::ok())
}

/// `AI._MODELSCAN`: `[key, tag]` of every stored model.
pub(crate) fn scan(engine: &Engine) -> Reply {
    let models = engine
        .keyspace()
        .entries()
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Model(model) => Some(Reply::Array(vec![Reply::bulk(&key), Reply::bulk(model.tag())])),
            _ => None,
        })
        .collect();
    Reply::Array(models)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendRegistry;
    use crate::backend::mock::MockBackend;
    use crate::config::Config;
    use crate::keyspace::MemoryKeyspace;

    fn argv(line: &str) -> Vec<Bytes> {
        line.split_whitespace().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    fn store_error(line: &str) -> String {
        parse_model_store(&argv(line), "AI.MODELSTORE").unwrap_err().to_string()
    }

    fn keyspace_with_mul() -> MemoryKeyspace {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(MockBackend::new(BackendKind::Torch)));
        let parsed = parse_model_store(&argv("AI.MODELSTORE m{1} TORCH CPU BLOB mul"), "AI.MODELSTORE").unwrap();
        let model = Model::load(&parsed.key, parsed.definition, parsed.blob, &registry, &Config::default()).unwrap();
        let keyspace = MemoryKeyspace::new();
        keyspace.put_model("m{1}", Arc::new(model)).unwrap();
        keyspace
    }

    #[test]
    fn test_model_store_full_header() {
        let parsed = parse_model_store(
            &argv("AI.MODELSTORE m tf gpu:1 TAG v2 BATCHSIZE 4 MINBATCHSIZE 2 MINBATCHTIMEOUT 30 INPUTS 2 a b OUTPUTS 1 c BLOB part1 part2"),
            "AI.MODELSTORE",
        ).unwrap();
        let definition = parsed.definition;
        assert_eq!(definition.backend, BackendKind::Tf);
        assert_eq!(definition.device, Device::Gpu(Some(1)));
        assert_eq!(definition.tag, "v2");
        assert_eq!(definition.policy, BatchPolicy {
            batch_size: 4,
            min_batch_size: 2,
            min_batch_timeout: Duration::from_millis(30),
        });
        assert_eq!(definition.inputs, vec!["a", "b"]);
        assert_eq!(definition.outputs, vec!["c"]);
        assert_eq!(parsed.blob.as_ref(), b"part1part2");
    }

    #[test]
    fn test_model_store_errors() {
        assert_eq!(store_error("AI.MODELSTORE m TORCH CPU BLOB"), "ERR wrong number of arguments for 'AI.MODELSTORE' command");
        assert_eq!(store_error("AI.MODELSTORE m CAFFE CPU BLOB x"), "ERR unsupported backend");
        assert_eq!(store_error("AI.MODELSTORE m TORCH TPU BLOB x"), "ERR Invalid DEVICE");
        assert_eq!(store_error("AI.MODELSTORE m TORCH CPU MINBATCHSIZE 2 BLOB x"), "ERR MINBATCHSIZE specified without BATCHSIZE");
        assert_eq!(
            store_error("AI.MODELSTORE m TORCH CPU BATCHSIZE 2 MINBATCHTIMEOUT 5 BLOB x"),
            "ERR MINBATCHTIMEOUT specified without MINBATCHSIZE"
        );
        assert_eq!(store_error("AI.MODELSTORE m TORCH CPU INPUTS 1 a BLOB x"), "ERR INPUTS argument should not be specified for this backend");
        assert_eq!(store_error("AI.MODELSTORE m TF CPU BLOB x y"), "ERR INPUTS not specified for TF");
        assert_eq!(store_error("AI.MODELSTORE m TORCH CPU TAG v1 SOURCE x"), "ERR Invalid argument, expected BLOB");
        assert_eq!(store_error("AI.MODELSTORE m TORCH CPU TAG v1 BLOB"), "ERR Insufficient arguments, missing model BLOB");
    }

    #[test]
    fn test_model_execute() {
        let keyspace = keyspace_with_mul();
        let run = parse_model_execute(&argv("AI.MODELEXECUTE m{1} INPUTS 2 a b OUTPUTS 1 c TIMEOUT 100"), &keyspace).unwrap();
        assert_eq!(run.inputs, vec!["a", "b"]);
        assert_eq!(run.outputs, vec!["c"]);
        assert_eq!(run.timeout, Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_model_execute_errors() {
        let keyspace = keyspace_with_mul();
        let error = |line: &str| parse_model_execute(&argv(line), &keyspace).unwrap_err().to_string();
        assert_eq!(error("AI.MODELEXECUTE m{1} INPUTS 1 a OUTPUTS"), "ERR wrong number of arguments for 'AI.MODELEXECUTE' command");
        assert_eq!(error("AI.MODELEXECUTE nope INPUTS 2 a b OUTPUTS 1 c"), "ERR model key is empty");
        assert_eq!(error("AI.MODELEXECUTE m{1} IN 2 a b OUTPUTS 1 c"), "ERR INPUTS not specified");
        assert_eq!(error("AI.MODELEXECUTE m{1} INPUTS x a b OUTPUTS 1 c"), "ERR Invalid argument for input_count");
        assert_eq!(error("AI.MODELEXECUTE m{1} INPUTS 0 a b OUTPUTS 1 c"), "ERR Input count must be a positive integer");
        assert_eq!(
            error("AI.MODELEXECUTE m{1} INPUTS 1 a OUTPUTS 1 c d"),
            "ERR Number of keys given as INPUTS here does not match model definition"
        );
        assert_eq!(
            error("AI.MODELEXECUTE m{1} INPUTS 2 a b OUTPUTS 2 c d"),
            "ERR Number of keys given as OUTPUTS here does not match model definition"
        );
        assert_eq!(error("AI.MODELEXECUTE m{1} INPUTS 2 a b OUTPUTS 1 c SLOW 5"), "ERR Invalid argument: SLOW");
        assert_eq!(error("AI.MODELEXECUTE m{1} INPUTS 2 a b OUTPUTS 1 c TIMEOUT"), "ERR No value provided for TIMEOUT");
    }

    #[test]
    fn test_deprecated_model_run() {
        let keyspace = keyspace_with_mul();
        let run = parse_model_run(&argv("AI.MODELRUN m{1} TIMEOUT 5 INPUTS a b OUTPUTS c"), &keyspace).unwrap();
        assert_eq!((run.inputs.len(), run.outputs.len()), (2, 1));
        assert_eq!(run.timeout, Some(Duration::from_millis(5)));

        let error = parse_model_run(&argv("AI.MODELRUN m{1} INPUTS a OUTPUTS c"), &keyspace).unwrap_err();
        assert_eq!(error.to_string(), "ERR Number of keys given as INPUTS here does not match model definition");
    }

    #[test]
    fn test_chunked_blob() {
        let blob = Bytes::from_static(b"abcdefg");
        assert_eq!(chunked(&blob, 16), Reply::Bulk(blob.clone()));
        assert_eq!(
            chunked(&blob, 3),
            Reply::Array(vec![Reply::bulk("abc"), Reply::bulk("def"), Reply::bulk("g")])
        );
    }
}
