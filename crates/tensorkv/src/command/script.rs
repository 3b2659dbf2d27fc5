//! Script commands: store, get, delete, scan and run.

use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use crate::args::{as_str, is_keyword, parse_i64, to_strings, Args};
use crate::backend::adapter::ScriptInvocation;
use crate::device::Device;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::keyspace::{Keyspace, Value};
use crate::reply::Reply;
use crate::script::{Script, ScriptDefinition};
use super::{is_any_keyword, parse_timeout};

const SCOPES: [&str; 6] = ["TIMEOUT", "INPUTS", "OUTPUTS", "KEYS", "LIST_INPUTS", "ARGS"];

/// Marks the start of the variadic tensor list in the deprecated `AI.SCRIPTRUN`.
const VARIADIC: &str = "$";

/// A script call as written in `AI.SCRIPTEXECUTE` or the deprecated `AI.SCRIPTRUN`.
#[derive(Debug, Clone)]
pub struct ScriptRun {
    pub script: Arc<Script>,
    pub function: String,
    pub keys: Vec<String>,
    /// Positional inputs followed by every list input.
    pub inputs: Vec<String>,
    pub list_sizes: Vec<usize>,
    pub outputs: Vec<String>,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl ScriptRun {
    pub(crate) fn invocation(&self) -> ScriptInvocation {
        ScriptInvocation {
            script: self.script.clone(),
            function: self.function.clone(),
            list_sizes: self.list_sizes.clone(),
            keys: self.keys.clone(),
            args: self.args.clone(),
        }
    }
}

/// Parsed `AI.SCRIPTSTORE` or `AI.SCRIPTSET`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptStore {
    pub key: String,
    pub definition: ScriptDefinition,
}

fn device_and_tag(args: &mut Args<'_>) -> Result<(Device, String)> {
    let device: Device = args
        .next_str()
        .unwrap_or_else(|| Err(Error::syntax("Invalid DEVICE")))?
        .parse()?;
    let mut tag = String::new();
    if args.peek_keyword("TAG") {
        args.next_arg();
        tag = args.next_str().unwrap_or_else(|| Err(Error::syntax("Missing TAG value")))?.to_string();
    }
    Ok((device, tag))
}

fn source(args: &mut Args<'_>) -> Result<String> {
    let missing = || Error::syntax("Insufficient arguments, missing script SOURCE");
    if !args.next_arg().is_some_and(|arg| is_keyword(arg, "SOURCE")) {
        return Err(missing());
    }
    match args.rest() {
        [source] => Ok(as_str(source)?.to_string()),
        _ => Err(missing()),
    }
}

/// `AI.SCRIPTSTORE <key> <device> [TAG t] ENTRY_POINTS n fn... SOURCE src`
pub fn parse_script_store(raw: &[Bytes]) -> Result<ScriptStore> {
    if raw.len() < 8 {
        return Err(Error::WrongArity("AI.SCRIPTSTORE".into()));
    }
    let mut args = Args::new(&raw[1..]);
    let key = args.next_str().unwrap_or_else(|| Err(Error::WrongArity("AI.SCRIPTSTORE".into())))?.to_string();
    let (device, tag) = device_and_tag(&mut args)?;

    let missing = || Error::syntax("Insufficient arguments, missing script entry points");
    if !args.next_arg().is_some_and(|arg| is_keyword(arg, "ENTRY_POINTS")) {
        return Err(missing());
    }
    let count = match args.next_arg().and_then(|arg| parse_i64(arg)) {
        Some(n) if n > 0 => n as usize,
        _ => return Err(Error::syntax("Non numeric entry points number provided to AI.SCRIPTSTORE command")),
    };
    let names = args.take(count).ok_or_else(missing)?;
    if names.iter().any(|name| is_keyword(name, "SOURCE")) {
        return Err(missing());
    }
    let entry_points = Some(to_strings(names)?);

    let source = source(&mut args)?;
    Ok(ScriptStore {
        key,
        definition: ScriptDefinition { device, tag, entry_points, source },
    })
}

/// Deprecated `AI.SCRIPTSET <key> <device> [TAG t] SOURCE src`
pub fn parse_script_set(raw: &[Bytes]) -> Result<ScriptStore> {
    if raw.len() < 5 {
        return Err(Error::WrongArity("AI.SCRIPTSET".into()));
    }
    let mut args = Args::new(&raw[1..]);
    let key = args.next_str().unwrap_or_else(|| Err(Error::WrongArity("AI.SCRIPTSET".into())))?.to_string();
    let (device, tag) = device_and_tag(&mut args)?;
    let source = source(&mut args)?;
    Ok(ScriptStore {
        key,
        definition: ScriptDefinition { device, tag, entry_points: None, source },
    })
}

fn function_name(raw: &[Bytes]) -> Result<String> {
    let function = &raw[2];
    if is_any_keyword(function, &SCOPES) {
        return Err(Error::syntax("function name not specified"));
    }
    Ok(as_str(function)?.to_string())
}

/// Reads `<count> name...` of one `AI.SCRIPTEXECUTE` scope.
fn scope_names(args: &mut Args<'_>, what: &str, scope: &str) -> Result<Vec<String>> {
    let count = match args.next_arg().and_then(|arg| parse_i64(arg)) {
        Some(n) if n > 0 => n as usize,
        _ => return Err(Error::syntax(format!("Invalid argument for {what} count in AI.SCRIPTEXECUTE"))),
    };
    let names = args.take(count).ok_or_else(|| {
        Error::syntax(format!(
            "number of {scope} to AI.SCRIPTEXECUTE command does not match the number of given arguments"
        ))
    })?;
    to_strings(names)
}

/// `AI.SCRIPTEXECUTE <key> <function> [KEYS n k...] [INPUTS n i...]
/// [LIST_INPUTS n l...]... [OUTPUTS n o...] [ARGS n a...] [TIMEOUT ms]`
pub fn parse_script_execute(raw: &[Bytes], keyspace: &dyn Keyspace) -> Result<ScriptRun> {
    if raw.len() < 3 {
        return Err(Error::WrongArity("AI.SCRIPTEXECUTE".into()));
    }
    let script = keyspace.get_script(as_str(&raw[1])?)?;
    let function = function_name(raw)?;

    let mut args = Args::new(&raw[3..]);
    let mut run = ScriptRun {
        script,
        function,
        keys: vec![],
        inputs: vec![],
        list_sizes: vec![],
        outputs: vec![],
        args: vec![],
        timeout: None,
    };
    let mut list_inputs = vec![];
    let (mut seen_inputs, mut seen_keys, mut seen_outputs, mut seen_args) = (false, false, false, false);
    let already = |scope: &str| {
        Error::syntax(format!("Already Encountered {scope} scope in AI.SCRIPTEXECUTE command"))
    };

    while let Some(arg) = args.next_arg() {
        if is_keyword(arg, "TIMEOUT") {
            let value = args
                .next_arg()
                .ok_or_else(|| Error::syntax("No value provided for TIMEOUT in AI.SCRIPTEXECUTE"))?;
            run.timeout = Some(parse_timeout(value)?);
            if let Some(extra) = args.next_arg() {
                return Err(Error::syntax(format!(
                    "Unrecognized parameter to AI.SCRIPTEXECUTE: {}",
                    String::from_utf8_lossy(extra)
                )));
            }
        } else if is_keyword(arg, "INPUTS") {
            if std::mem::replace(&mut seen_inputs, true) {
                return Err(already("INPUTS"));
            }
            run.inputs = scope_names(&mut args, "input", "input keys")?;
        } else if is_keyword(arg, "KEYS") {
            if std::mem::replace(&mut seen_keys, true) {
                return Err(already("KEYS"));
            }
            run.keys = scope_names(&mut args, "key", "keys")?;
        } else if is_keyword(arg, "OUTPUTS") {
            if std::mem::replace(&mut seen_outputs, true) {
                return Err(already("OUTPUTS"));
            }
            run.outputs = scope_names(&mut args, "output", "output keys")?;
        } else if is_keyword(arg, "ARGS") {
            if std::mem::replace(&mut seen_args, true) {
                return Err(already("ARGS"));
            }
            run.args = scope_names(&mut args, "args", "args")?;
        } else if is_keyword(arg, "LIST_INPUTS") {
            let list = scope_names(&mut args, "list input", "list input keys")?;
            run.list_sizes.push(list.len());
            list_inputs.extend(list);
        } else {
            return Err(Error::syntax(format!(
                "Unrecognized parameter to AI.SCRIPTEXECUTE: {}",
                String::from_utf8_lossy(arg)
            )));
        }
    }
    run.inputs.extend(list_inputs);
    Ok(run)
}

/// Deprecated `AI.SCRIPTRUN <key> <function> [INPUTS i... [$ l...]] [OUTPUTS o...] [TIMEOUT ms]`
pub fn parse_script_run(raw: &[Bytes], keyspace: &dyn Keyspace) -> Result<ScriptRun> {
    #[derive(PartialEq)]
    enum Section {
        None,
        Inputs,
        List,
        Outputs,
    }

    if raw.len() < 4 {
        return Err(Error::WrongArity("AI.SCRIPTRUN".into()));
    }
    let script = keyspace.get_script(as_str(&raw[1])?)?;
    let function = function_name(raw)?;

    let (mut inputs, mut list, mut outputs) = (vec![], vec![], vec![]);
    let (mut seen_inputs, mut seen_list) = (false, false);
    let mut timeout = None;
    let mut section = Section::None;
    let mut args = Args::new(&raw[3..]);

    while let Some(arg) = args.next_arg() {
        if is_keyword(arg, "INPUTS") {
            if std::mem::replace(&mut seen_inputs, true) {
                return Err(Error::syntax("Already encountered an INPUTS section in SCRIPTRUN"));
            }
            section = Section::Inputs;
        } else if is_keyword(arg, "OUTPUTS") {
            section = Section::Outputs;
        } else if is_keyword(arg, "TIMEOUT") {
            let value = args.next_arg().ok_or_else(|| Error::syntax("No value provided for TIMEOUT"))?;
            timeout = Some(parse_timeout(value)?);
        } else if arg.as_ref() == VARIADIC.as_bytes() {
            if section != Section::Inputs && section != Section::List {
                return Err(Error::syntax("Encountered a variable size list of tensors outside of input section"));
            }
            if std::mem::replace(&mut seen_list, true) {
                return Err(Error::syntax("Already encountered a variable size list of tensors"));
            }
            section = Section::List;
        } else {
            let name = as_str(arg)?.to_string();
            match section {
                Section::Inputs => inputs.push(name),
                Section::List => list.push(name),
                Section::Outputs => outputs.push(name),
                Section::None => {
                    return Err(Error::syntax(format!("Unrecognized parameter to SCRIPTRUN: {name}")));
                }
            }
        }
    }

    let list_sizes = if seen_list { vec![list.len()] } else { vec![] };
    inputs.extend(list);
    Ok(ScriptRun {
        script,
        function,
        keys: vec![],
        inputs,
        list_sizes,
        outputs,
        args: vec![],
        timeout,
    })
}

/// Compiles and stores a script, creating the run queue for its device.
pub(crate) fn store(engine: &Engine, store: ScriptStore) -> Result<Reply> {
    let ScriptStore { key, definition } = store;
    if matches!(engine.keyspace().get(&key), Some(value) if !matches!(value, Value::Script(_))) {
        return Err(Error::WrongType);
    }
    let script = Script::load(&key, definition, &engine.backends())?;
    engine.batching().ensure_queue(script.device());
    tracing::info!(key = %key, device = %script.device(), entry_points = ?script.entry_points(), "script stored");
    engine.keyspace().put_script(&key, Arc::new(script))?;
    Ok(Reply::ok())
}

/// `AI.SCRIPTGET <key> [META] [SOURCE]`
pub(crate) fn get(engine: &Engine, raw: &[Bytes]) -> Result<Reply> {
    if raw.len() < 2 || raw.len() > 4 {
        return Err(Error::WrongArity("AI.SCRIPTGET".into()));
    }
    let script = engine.keyspace().get_script(as_str(&raw[1])?)?;
    let meta = raw[2..].iter().any(|arg| is_keyword(arg, "META"));
    let with_source = raw[2..].iter().any(|arg| is_keyword(arg, "SOURCE"));
    if !meta && with_source {
        return Ok(Reply::bulk(script.source()));
    }
    let mut fields = vec![
        Reply::status("device"),
        Reply::status(script.device().to_string()),
        Reply::status("tag"),
        Reply::bulk(script.tag()),
        Reply::status("entry_points"),
        Reply::Array(script.entry_points().iter().map(Reply::bulk).collect()),
    ];
    if !meta || with_source {
        fields.push(Reply::status("source"));
        fields.push(Reply::bulk(script.source()));
    }
    Ok(Reply::Array(fields))
}

/// `AI.SCRIPTDEL <key>`
pub(crate) fn delete(engine: &Engine, raw: &[Bytes]) -> Result<Reply> {
    if raw.len() != 2 {
        return Err(Error::WrongArity("AI.SCRIPTDEL".into()));
    }
    let key = as_str(&raw[1])?;
    engine.keyspace().get_script(key)?;
    engine.keyspace().remove(key);
    tracing::info!(key = %key, "script deleted");
    Ok(Reply::ok())
}

/// `AI._SCRIPTSCAN`: `[key, tag]` of every stored script.
pub(crate) fn scan(engine: &Engine) -> Reply {
    let scripts = engine
        .keyspace()
        .entries()
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Script(script) => Some(Reply::Array(vec![Reply::bulk(&key), Reply::bulk(script.tag())])),
            _ => None,
        })
        .collect();
    Reply::Array(scripts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendKind, BackendRegistry};
    use crate::backend::mock::{MockBackend, MOCK_SCRIPT};
    use crate::keyspace::MemoryKeyspace;

    fn argv(line: &str) -> Vec<Bytes> {
        line.split_whitespace().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    fn keyspace_with_script() -> MemoryKeyspace {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(MockBackend::new(BackendKind::Torch)));
        let definition = ScriptDefinition {
            device: Device::Cpu(None),
            tag: String::new(),
            entry_points: None,
            source: MOCK_SCRIPT.to_string(),
        };
        let keyspace = MemoryKeyspace::new();
        keyspace.put_script("s{1}", Arc::new(Script::load("s{1}", definition, &registry).unwrap())).unwrap();
        keyspace
    }

    #[test]
    fn test_script_store() {
        let mut raw = argv("AI.SCRIPTSTORE s CPU TAG v1 ENTRY_POINTS 2 bar sum_list SOURCE");
        raw.push(Bytes::from_static(MOCK_SCRIPT.as_bytes()));
        let parsed = parse_script_store(&raw).unwrap();
        assert_eq!(parsed.key, "s");
        assert_eq!(parsed.definition.tag, "v1");
        assert_eq!(parsed.definition.entry_points, Some(vec!["bar".to_string(), "sum_list".to_string()]));
        assert_eq!(parsed.definition.source, MOCK_SCRIPT);
    }

    #[test]
    fn test_script_store_errors() {
        let error = |line: &str| parse_script_store(&argv(line)).unwrap_err().to_string();
        assert_eq!(error("AI.SCRIPTSTORE s CPU ENTRY_POINTS 1 bar SOURCE"), "ERR wrong number of arguments for 'AI.SCRIPTSTORE' command");
        assert_eq!(
            error("AI.SCRIPTSTORE s CPU ENTRY_POINTS x bar SOURCE src"),
            "ERR Non numeric entry points number provided to AI.SCRIPTSTORE command"
        );
        assert_eq!(
            error("AI.SCRIPTSTORE s CPU ENTRY_POINTS 3 bar SOURCE src"),
            "ERR Insufficient arguments, missing script entry points"
        );
        assert_eq!(
            error("AI.SCRIPTSTORE s CPU ENTRY_POINTS 1 bar SRC src"),
            "ERR Insufficient arguments, missing script SOURCE"
        );
    }

    #[test]
    fn test_script_set_exposes_every_function() {
        let parsed = parse_script_set(&argv("AI.SCRIPTSET s GPU:0 SOURCE src")).unwrap();
        assert_eq!(parsed.definition.device, Device::Gpu(Some(0)));
        assert_eq!(parsed.definition.entry_points, None);
    }

    #[test]
    fn test_script_execute_scopes() {
        let keyspace = keyspace_with_script();
        let run = parse_script_execute(
            &argv("AI.SCRIPTEXECUTE s{1} sum_list KEYS 1 s{1} INPUTS 1 a LIST_INPUTS 2 b c LIST_INPUTS 1 d OUTPUTS 1 out ARGS 1 x TIMEOUT 10"),
            &keyspace,
        ).unwrap();
        assert_eq!(run.function, "sum_list");
        assert_eq!(run.keys, vec!["s{1}"]);
        assert_eq!(run.inputs, vec!["a", "b", "c", "d"]);
        assert_eq!(run.list_sizes, vec![2, 1]);
        assert_eq!(run.outputs, vec!["out"]);
        assert_eq!(run.args, vec!["x"]);
        assert_eq!(run.timeout, Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_script_execute_errors() {
        let keyspace = keyspace_with_script();
        let error = |line: &str| parse_script_execute(&argv(line), &keyspace).unwrap_err().to_string();
        assert_eq!(error("AI.SCRIPTEXECUTE s{1} INPUTS 1 a"), "ERR function name not specified");
        assert_eq!(error("AI.SCRIPTEXECUTE t bar"), "ERR script key is empty");
        assert_eq!(
            error("AI.SCRIPTEXECUTE s{1} bar INPUTS 1 a INPUTS 1 b"),
            "ERR Already Encountered INPUTS scope in AI.SCRIPTEXECUTE command"
        );
        assert_eq!(error("AI.SCRIPTEXECUTE s{1} bar INPUTS x a"), "ERR Invalid argument for input count in AI.SCRIPTEXECUTE");
        assert_eq!(
            error("AI.SCRIPTEXECUTE s{1} bar OUTPUTS 2 a"),
            "ERR number of output keys to AI.SCRIPTEXECUTE command does not match the number of given arguments"
        );
        assert_eq!(error("AI.SCRIPTEXECUTE s{1} bar INPUTS 1 a TIMEOUT"), "ERR No value provided for TIMEOUT in AI.SCRIPTEXECUTE");
        assert_eq!(error("AI.SCRIPTEXECUTE s{1} bar FOO"), "ERR Unrecognized parameter to AI.SCRIPTEXECUTE: FOO");
    }

    #[test]
    fn test_deprecated_script_run() {
        let keyspace = keyspace_with_script();
        let run = parse_script_run(&argv("AI.SCRIPTRUN s{1} sum_list INPUTS a $ b c OUTPUTS out TIMEOUT 5"), &keyspace).unwrap();
        assert_eq!(run.inputs, vec!["a", "b", "c"]);
        assert_eq!(run.list_sizes, vec![2]);
        assert_eq!(run.outputs, vec!["out"]);
        assert_eq!(run.timeout, Some(Duration::from_millis(5)));

        let error = |line: &str| parse_script_run(&argv(line), &keyspace).unwrap_err().to_string();
        assert_eq!(error("AI.SCRIPTRUN s{1} bar INPUTS a INPUTS b"), "ERR Already encountered an INPUTS section in SCRIPTRUN");
        assert_eq!(
            error("AI.SCRIPTRUN s{1} bar OUTPUTS $ b"),
            "ERR Encountered a variable size list of tensors outside of input section"
        );
        assert_eq!(error("AI.SCRIPTRUN s{1} bar INPUTS $ a $ b"), "ERR Already encountered a variable size list of tensors");
        assert_eq!(error("AI.SCRIPTRUN s{1} bar a b"), "ERR Unrecognized parameter to SCRIPTRUN: a");
    }
}
