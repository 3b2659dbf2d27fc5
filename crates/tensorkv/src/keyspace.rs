//! # Keyspace bridge
//!
//! The engine never owns storage. It reads and writes host keys through the
//! [`Keyspace`] trait; [`MemoryKeyspace`] is the in-process implementation.

mod memory;
pub mod slot;

use std::sync::Arc;
use bytes::Bytes;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::script::Script;
use crate::tensor::Tensor;

pub use memory::MemoryKeyspace;

/// A value held at a host key.
#[derive(Debug, Clone)]
pub enum Value {
    Tensor(Tensor),
    Model(Arc<Model>),
    Script(Arc<Script>),
    /// Any value owned by the host that this engine does not understand.
    Other(Bytes),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Tensor(_) => "tensor",
            Value::Model(_) => "model",
            Value::Script(_) => "script",
            Value::Other(_) => "other",
        }
    }
}

/// Storage capability exposed by the host.
///
/// Implementors supply the four raw operations; the typed accessors encode the
/// not-found and wrong-type rules shared by every command.
pub trait Keyspace: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value);

    fn remove(&self, key: &str) -> Option<Value>;

    /// Snapshot of every key and value.
    fn entries(&self) -> Vec<(String, Value)>;

    fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn get_tensor(&self, key: &str) -> Result<Tensor> {
        match self.get(key) {
            Some(Value::Tensor(tensor)) => Ok(tensor),
            Some(_) => Err(Error::WrongType),
            None => Err(Error::EmptyKey("tensor")),
        }
    }

    /// Writes a tensor, refusing to replace a value of another type.
    fn put_tensor(&self, key: &str, tensor: Tensor) -> Result<()> {
        match self.get(key) {
            None | Some(Value::Tensor(_)) => {
                self.set(key, Value::Tensor(tensor));
                Ok(())
            }
            Some(_) => Err(Error::WrongType),
        }
    }

    fn get_model(&self, key: &str) -> Result<Arc<Model>> {
        match self.get(key) {
            Some(Value::Model(model)) => Ok(model),
            Some(_) => Err(Error::WrongType),
            None => Err(Error::EmptyKey("model")),
        }
    }

    fn put_model(&self, key: &str, model: Arc<Model>) -> Result<()> {
        match self.get(key) {
            None | Some(Value::Model(_)) => {
                self.set(key, Value::Model(model));
                Ok(())
            }
            Some(_) => Err(Error::WrongType),
        }
    }

    fn get_script(&self, key: &str) -> Result<Arc<Script>> {
        match self.get(key) {
            Some(Value::Script(script)) => Ok(script),
            Some(_) => Err(Error::WrongType),
            None => Err(Error::EmptyKey("script")),
        }
    }

    fn put_script(&self, key: &str, script: Arc<Script>) -> Result<()> {
        match self.get(key) {
            None | Some(Value::Script(_)) => {
                self.set(key, Value::Script(script));
                Ok(())
            }
            Some(_) => Err(Error::WrongType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_access() {
        let keyspace = MemoryKeyspace::new();
        let tensor = Tensor::from_f32(vec![1], &[1.0]).unwrap();

        assert_eq!(keyspace.get_tensor("t").unwrap_err(), Error::EmptyKey("tensor"));
        keyspace.put_tensor("t", tensor.clone()).unwrap();
        assert_eq!(keyspace.get_tensor("t").unwrap(), tensor);
        assert_eq!(keyspace.get_model("t").unwrap_err(), Error::WrongType);
        assert_eq!(keyspace.get_script("t").unwrap_err(), Error::WrongType);
    }

    #[test]
    fn test_put_refuses_other_types() {
        let keyspace = MemoryKeyspace::new();
        keyspace.set("plain", Value::Other(Bytes::from_static(b"value")));
        let tensor = Tensor::from_f32(vec![1], &[1.0]).unwrap();
        assert_eq!(keyspace.put_tensor("plain", tensor).unwrap_err(), Error::WrongType);
        assert!(matches!(keyspace.get("plain"), Some(Value::Other(_))));
    }
}
