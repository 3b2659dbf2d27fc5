//! `AI.TENSORSET` and `AI.TENSORGET`.

use bytes::Bytes;
use crate::args::{as_str, is_keyword, parse_i64, Args};
use crate::error::{Error, Result};
use crate::keyspace::Keyspace;
use crate::reply::Reply;
use crate::tensor::{element_count, invalid_shape, DataType, Tensor, TensorValue};

/// Parsed `AI.TENSORSET`.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSet {
    pub key: String,
    pub tensor: Tensor,
}

/// Which parts of a tensor `AI.TENSORGET` replies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorFormat {
    pub meta: bool,
    pub blob: bool,
    pub values: bool,
}

impl Default for TensorFormat {
    fn default() -> Self {
        Self { meta: true, blob: true, values: false }
    }
}

/// Parsed `AI.TENSORGET`.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorGet {
    pub key: String,
    pub format: TensorFormat,
}

/// `AI.TENSORSET <key> <dtype> <dim>... [BLOB b | VALUES v...]`
pub fn parse_tensor_set(raw: &[Bytes]) -> Result<TensorSet> {
    if raw.len() < 4 {
        return Err(Error::WrongArity("AI.TENSORSET".into()));
    }
    let mut args = Args::new(raw);
    args.next_arg();
    let key = args.next_str().unwrap_or_else(|| Err(Error::WrongArity("AI.TENSORSET".into())))?.to_string();
    let dtype = args
        .next_str()
        .and_then(|name| name.ok())
        .and_then(DataType::parse)
        .ok_or_else(|| Error::tensor("invalid data type"))?;

    let mut shape = vec![];
    while let Some(arg) = args.peek() {
        if is_keyword(arg, "BLOB") || is_keyword(arg, "VALUES") {
            break;
        }
        match parse_i64(arg) {
            Some(dim) if dim > 0 => shape.push(dim as usize),
            _ => return Err(Error::tensor("invalid or negative value found in tensor shape")),
        }
        args.next_arg();
    }
    let len = element_count(&shape).ok_or_else(invalid_shape)?;

    let tensor = match args.next_arg() {
        None => Tensor::zeros(dtype, shape)?,
        Some(format) if is_keyword(format, "BLOB") => {
            let rest = args.rest();
            let [blob] = rest else {
                return Err(Error::tensor(
                    "a single binary string should come after the BLOB argument in 'AI.TENSORSET' command",
                ));
            };
            Tensor::new(dtype, shape, blob.clone())?
        }
        Some(_) => {
            let values = args.rest();
            if values.len() != len {
                return Err(Error::tensor("wrong number of values was given in 'AI.TENSORSET' command"));
            }
            if dtype == DataType::Bool && values.iter().any(|v| !matches!(v.as_ref(), b"0" | b"1")) {
                return Err(Error::tensor("invalid value"));
            }
            Tensor::from_values(dtype, shape, values)?
        }
    };
    Ok(TensorSet { key, tensor })
}

/// `AI.TENSORGET <key> [META] [BLOB|VALUES]`
pub fn parse_tensor_get(raw: &[Bytes]) -> Result<TensorGet> {
    if raw.len() < 2 || raw.len() > 4 {
        return Err(Error::WrongArity("AI.TENSORGET".into()));
    }
    let key = as_str(&raw[1])?.to_string();
    if raw.len() == 2 {
        return Ok(TensorGet { key, format: TensorFormat::default() });
    }
    let mut format = TensorFormat { meta: false, blob: false, values: false };
    for arg in &raw[2..] {
        if is_keyword(arg, "META") {
            format.meta = true;
        } else if is_keyword(arg, "BLOB") {
            format.blob = true;
        } else if is_keyword(arg, "VALUES") {
            format.values = true;
        } else {
            return Err(Error::tensor("unsupported data format"));
        }
    }
    if format.blob && format.values {
        return Err(Error::tensor("both BLOB and VALUES specified"));
    }
    Ok(TensorGet { key, format })
}

fn values_reply(tensor: &Tensor) -> Reply {
    Reply::Array(
        tensor
            .values()
            .into_iter()
            .map(|value| match value {
                TensorValue::Integer(v) => Reply::Integer(v),
                TensorValue::Double(v) => Reply::Double(v),
                TensorValue::String(v) => Reply::Bulk(v),
            })
            .collect(),
    )
}

impl TensorFormat {
    /// Renders `tensor` in this format.
    ///
    /// Without `META` the bare blob or value list is returned. With it, a flat
    /// `dtype, shape[, blob|values]` field list.
    pub fn reply(&self, tensor: &Tensor) -> Reply {
        if !self.meta {
            if self.blob {
                return Reply::Bulk(tensor.data().clone());
            }
            if self.values {
                return values_reply(tensor);
            }
        }
        let mut fields = vec![
            Reply::status("dtype"),
            Reply::status(tensor.dtype().name()),
            Reply::status("shape"),
            Reply::Array(tensor.shape().iter().map(|d| Reply::Integer(*d as i64)).collect()),
        ];
        if self.blob {
            fields.push(Reply::status("blob"));
            fields.push(Reply::Bulk(tensor.data().clone()));
        } else if self.values {
            fields.push(Reply::status("values"));
            fields.push(values_reply(tensor));
        }
        Reply::Array(fields)
    }
}

pub(crate) fn tensor_set(keyspace: &dyn Keyspace, args: &[Bytes]) -> Result<Reply> {
    let TensorSet { key, tensor } = parse_tensor_set(args)?;
    keyspace.put_tensor(&key, tensor)?;
    Ok(Reply::ok())
}

pub(crate) fn tensor_get(keyspace: &dyn Keyspace, args: &[Bytes]) -> Result<Reply> {
    let TensorGet { key, format } = parse_tensor_get(args)?;
    let tensor = keyspace.get_tensor(&key)?;
    Ok(format.reply(&tensor))
}
