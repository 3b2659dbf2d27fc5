//! The command surface: one [`Engine`] per host process.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use bytes::Bytes;
use crate::backend::{Backend, BackendRegistry};
use crate::batching::BatchingEngine;
use crate::codec;
use crate::command::config::parse_config;
use crate::command::model::{parse_model_execute, parse_model_run};
use crate::command::script::{parse_script_execute, parse_script_run, parse_script_set, parse_script_store};
use crate::command::{command_name, info, model, script, tensor};
use crate::config::Config;
use crate::dag::{self, parse_dag, Dag, DagFlavor, Op};
use crate::error::{Error, Result};
use crate::keyspace::{Keyspace, Value};
use crate::reply::Reply;

/// Tensor, model and script engine bound to a host keyspace.
///
/// Commands arrive as the raw argument vector, command name first, and are
/// answered with a [`Reply`]. Model and script runs are queued on per-device
/// run queues, so [`Engine::execute`] must be awaited inside a Tokio runtime.
pub struct Engine {
    keyspace: Arc<dyn Keyspace>,
    backends: RwLock<BackendRegistry>,
    config: RwLock<Config>,
    batching: BatchingEngine,
    cluster_mode: bool,
}

impl Engine {
    pub fn new(config: Config, keyspace: Arc<dyn Keyspace>) -> Self {
        tracing::info!(
            threads_per_queue = config.threads_per_queue,
            model_chunk_size = config.model_chunk_size,
            "engine created"
        );
        Self {
            keyspace,
            backends: RwLock::new(BackendRegistry::new()),
            batching: BatchingEngine::new(config.threads_per_queue),
            config: RwLock::new(config),
            cluster_mode: false,
        }
    }

    /// Enables cross slot validation of the keys touched by each DAG.
    pub fn with_cluster_mode(mut self, enabled: bool) -> Self {
        self.cluster_mode = enabled;
        self
    }

    /// Makes a runtime available to `AI.MODELSTORE` and `AI.SCRIPTSTORE`.
    pub fn register_backend(&self, backend: Arc<dyn Backend>) {
        tracing::info!(backend = %backend.kind(), "backend registered");
        self.backends.write().unwrap_or_else(PoisonError::into_inner).register(backend);
    }

    pub fn keyspace(&self) -> &dyn Keyspace {
        self.keyspace.as_ref()
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Config {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_cluster_mode(&self) -> bool {
        self.cluster_mode
    }

    pub(crate) fn backends(&self) -> RwLockReadGuard<'_, BackendRegistry> {
        self.backends.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn batching(&self) -> &BatchingEngine {
        &self.batching
    }

    /// Executes one `AI.*` command.
    pub async fn execute(&self, args: &[Bytes]) -> Reply {
        let name = command_name(args);
        let keyspace = self.keyspace();
        let result = match name.as_str() {
            "AI.TENSORSET" => tensor::tensor_set(keyspace, args),
            "AI.TENSORGET" => tensor::tensor_get(keyspace, args),
            "AI.MODELSTORE" | "AI.MODELSET" => model::store(self, args, &name),
            "AI.MODELGET" => model::get(self, args),
            "AI.MODELDEL" => model::delete(self, args),
            "AI._MODELSCAN" => Ok(model::scan(self)),
            "AI.SCRIPTSTORE" => parse_script_store(args).and_then(|parsed| script::store(self, parsed)),
            "AI.SCRIPTSET" => parse_script_set(args).and_then(|parsed| script::store(self, parsed)),
            "AI.SCRIPTGET" => script::get(self, args),
            "AI.SCRIPTDEL" => script::delete(self, args),
            "AI._SCRIPTSCAN" => Ok(script::scan(self)),
            "AI.MODELEXECUTE" => match parse_model_execute(args, keyspace) {
                Ok(run) => return self.run(&Dag::single(Op::ModelExecute(run))).await,
                Err(error) => Err(error),
            },
            "AI.MODELRUN" => match parse_model_run(args, keyspace) {
                Ok(run) => return self.run(&Dag::single(Op::ModelExecute(run))).await,
                Err(error) => Err(error),
            },
            "AI.SCRIPTEXECUTE" => match parse_script_execute(args, keyspace) {
                Ok(run) => return self.run(&Dag::single(Op::ScriptExecute(run))).await,
                Err(error) => Err(error),
            },
            "AI.SCRIPTRUN" => match parse_script_run(args, keyspace) {
                Ok(run) => return self.run(&Dag::single(Op::ScriptExecute(run))).await,
                Err(error) => Err(error),
            },
            "AI.DAGEXECUTE" => return self.run_dag(args, DagFlavor::Execute).await,
            "AI.DAGEXECUTE_RO" => return self.run_dag(args, DagFlavor::ExecuteReadOnly).await,
            "AI.DAGRUN" => return self.run_dag(args, DagFlavor::Run).await,
            "AI.DAGRUN_RO" => return self.run_dag(args, DagFlavor::RunReadOnly).await,
            "AI.INFO" => info::info(keyspace, args),
            "AI.CONFIG" => parse_config(args).map(|command| {
                let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
                command.apply(&mut config)
            }),
            _ => Err(Error::syntax(format!("unknown command '{name}'"))),
        };
        if let Err(error) = &result {
            tracing::debug!(command = %name, error = %error, "command failed");
        }
        Reply::from(result)
    }

    async fn run_dag(&self, args: &[Bytes], flavor: DagFlavor) -> Reply {
        match parse_dag(args, flavor, self.keyspace()) {
            Ok(dag) => self.run(&dag).await,
            Err(error) => Reply::Error(error),
        }
    }

    async fn run(&self, dag: &Dag) -> Reply {
        dag::execute(dag, self.keyspace(), &self.batching, self.cluster_mode).await
    }

    /// Encodes the model, script or tensor stored at `key`.
    pub fn dump(&self, key: &str) -> Result<Bytes> {
        match self.keyspace.get(key) {
            Some(Value::Model(model)) => Ok(codec::encode_model(&model)),
            Some(Value::Script(script)) => Ok(codec::encode_script(&script)),
            Some(Value::Tensor(tensor)) => Ok(codec::encode_tensor(&tensor)),
            Some(Value::Other(_)) => Err(Error::WrongType),
            None => Err(Error::EmptyKey("tensor, model or script")),
        }
    }

    /// Decodes and stores a model produced by [`Engine::dump`], ready to run.
    pub fn restore_model(&self, key: &str, data: &[u8]) -> Result<()> {
        let model = codec::decode_model(key, data, &self.backends(), &self.config())?;
        self.batching.ensure_queue(model.device());
        self.keyspace.put_model(key, Arc::new(model))
    }

    pub fn restore_script(&self, key: &str, data: &[u8]) -> Result<()> {
        let script = codec::decode_script(key, data, &self.backends())?;
        self.batching.ensure_queue(script.device());
        self.keyspace.put_script(key, Arc::new(script))
    }

    pub fn restore_tensor(&self, key: &str, data: &[u8]) -> Result<()> {
        self.keyspace.put_tensor(key, codec::decode_tensor(data)?)
    }
}
