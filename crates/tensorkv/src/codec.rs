//! Versioned binary encoding of stored models, scripts and tensors.
//!
//! Every encoding starts with a little endian `u32` version. Writers always
//! produce the newest version; readers accept every version ever written.
//!
//! | entity | version | adds                          |
//! |--------|---------|-------------------------------|
//! | model  | 1       | header, io names, blob        |
//! | model  | 2       | `minbatchtimeout`             |
//! | script | 1       | device, tag, source           |
//! | script | 2       | entry points                  |
//! | tensor | 1       | dtype, shape, data            |
//!
//! Decoding a model or script loads it through the backend registry, so the
//! result can run straight away.

use std::time::Duration;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::backend::{BackendKind, BackendRegistry};
use crate::config::Config;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::model::{BatchPolicy, Model, ModelDefinition};
use crate::script::{Script, ScriptDefinition};
use crate::tensor::{element_count, DataType, Tensor};

pub const MODEL_VERSION: u32 = 2;
pub const SCRIPT_VERSION: u32 = 2;
pub const TENSOR_VERSION: u32 = 1;

fn unsupported(version: u32) -> Error {
    Error::Codec(format!("unsupported encoding version {version}"))
}

fn truncated() -> Error {
    Error::Codec("truncated encoding".to_string())
}

fn put_str(out: &mut BytesMut, text: &str) {
    out.put_u32_le(text.len() as u32);
    out.put_slice(text.as_bytes());
}

fn put_strs(out: &mut BytesMut, texts: &[String]) {
    out.put_u32_le(texts.len() as u32);
    texts.iter().for_each(|text| put_str(out, text));
}

/// Bounds checked reads over an encoding.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8> {
        if self.buf.remaining() < 1 {
            return Err(truncated());
        }
        Ok(self.buf.get_u8())
    }

    fn u32(&mut self) -> Result<u32> {
        if self.buf.remaining() < 4 {
            return Err(truncated());
        }
        Ok(self.buf.get_u32_le())
    }

    fn u64(&mut self) -> Result<u64> {
        if self.buf.remaining() < 8 {
            return Err(truncated());
        }
        Ok(self.buf.get_u64_le())
    }

    /// A `u64` that must fit in a `usize`.
    fn size(&mut self) -> Result<usize> {
        usize::try_from(self.u64()?).map_err(|_| Error::Codec("size out of range in encoding".to_string()))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.buf.remaining() < len {
            return Err(truncated());
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn str(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| Error::Codec("invalid UTF-8 in encoding".to_string()))
    }

    fn strs(&mut self) -> Result<Vec<String>> {
        let count = self.u32()?;
        (0..count).map(|_| self.str()).collect()
    }

    fn device(&mut self) -> Result<Device> {
        self.str()?.parse()
    }
}

pub fn encode_model(model: &Model) -> Bytes {
    let definition = model.definition();
    let mut out = BytesMut::new();
    out.put_u32_le(MODEL_VERSION);
    out.put_u8(definition.backend.code());
    put_str(&mut out, &definition.device.to_string());
    put_str(&mut out, &definition.tag);
    out.put_u64_le(definition.policy.batch_size as u64);
    out.put_u64_le(definition.policy.min_batch_size as u64);
    out.put_u64_le(definition.policy.min_batch_timeout.as_millis() as u64);
    put_strs(&mut out, &definition.inputs);
    put_strs(&mut out, &definition.outputs);
    out.put_u64_le(model.blob().len() as u64);
    out.put_slice(model.blob());
    out.freeze()
}

pub fn decode_model(key: &str, data: &[u8], backends: &BackendRegistry, config: &Config) -> Result<Model> {
    let mut reader = Reader { buf: data };
    let version = reader.u32()?;
    if version == 0 || version > MODEL_VERSION {
        return Err(unsupported(version));
    }
    let backend = BackendKind::from_code(reader.u8()?)
        .ok_or_else(|| Error::Codec("unknown backend in encoding".to_string()))?;
    let device = reader.device()?;
    let tag = reader.str()?;
    let batch_size = reader.size()?;
    let min_batch_size = reader.size()?;
    let min_batch_timeout = match version {
        1 => Duration::ZERO,
        _ => Duration::from_millis(reader.u64()?),
    };
    let inputs = reader.strs()?;
    let outputs = reader.strs()?;
    let len = reader.size()?;
    let blob = Bytes::copy_from_slice(reader.bytes(len)?);

    let definition = ModelDefinition {
        backend,
        device,
        tag,
        inputs,
        outputs,
        policy: BatchPolicy { batch_size, min_batch_size, min_batch_timeout },
    };
    Model::load(key, definition, blob, backends, config)
}

pub fn encode_script(script: &Script) -> Bytes {
    let mut out = BytesMut::new();
    out.put_u32_le(SCRIPT_VERSION);
    put_str(&mut out, &script.device().to_string());
    put_str(&mut out, script.tag());
    put_strs(&mut out, script.entry_points());
    put_str(&mut out, script.source());
    out.freeze()
}

pub fn decode_script(key: &str, data: &[u8], backends: &BackendRegistry) -> Result<Script> {
    let mut reader = Reader { buf: data };
    let version = reader.u32()?;
    if version == 0 || version > SCRIPT_VERSION {
        return Err(unsupported(version));
    }
    let device = reader.device()?;
    let tag = reader.str()?;
    let entry_points = match version {
        1 => None,
        _ => Some(reader.strs()?),
    };
    let source = reader.str()?;
    Script::load(key, ScriptDefinition { device, tag, entry_points, source }, backends)
}

pub fn encode_tensor(tensor: &Tensor) -> Bytes {
    let mut out = BytesMut::with_capacity(16 + tensor.rank() * 8 + tensor.data().len());
    out.put_u32_le(TENSOR_VERSION);
    out.put_u8(tensor.dtype().code());
    out.put_u32_le(tensor.rank() as u32);
    tensor.shape().iter().for_each(|dim| out.put_u64_le(*dim as u64));
    out.put_u64_le(tensor.data().len() as u64);
    out.put_slice(tensor.data());
    out.freeze()
}

pub fn decode_tensor(data: &[u8]) -> Result<Tensor> {
    let mut reader = Reader { buf: data };
    let version = reader.u32()?;
    if version != TENSOR_VERSION {
        return Err(unsupported(version));
    }
    let dtype = DataType::from_code(reader.u8()?)
        .ok_or_else(|| Error::Codec("unknown data type in encoding".to_string()))?;
    let rank = reader.u32()?;
    let shape = (0..rank).map(|_| reader.size()).collect::<Result<Vec<_>>>()?;
    if element_count(&shape).is_none() {
        return Err(Error::Codec("invalid tensor shape in encoding".to_string()));
    }
    let len = reader.size()?;
    let data = Bytes::copy_from_slice(reader.bytes(len)?);
    Tensor::new(dtype, shape, data)
}
