//! # Tensor values
//!
//! A [`Tensor`] is an immutable, typed, shaped buffer. Numeric elements are
//! stored little-endian in row-major order; `STRING` tensors store each
//! element followed by a NUL byte. Cloning is cheap because the storage is a
//! reference counted [`Bytes`].

mod dtype;
pub mod constant;
pub(crate) mod operations;

use std::ops::Range;
use bytes::{BufMut, Bytes, BytesMut};
use crate::error::{Error, Result};
use constant::{MAX_TENSOR_BYTES, STRING_TERMINATOR};

pub use dtype::DataType;

/// A single element, widened for replies.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorValue {
    Integer(i64),
    Double(f64),
    String(Bytes),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: DataType,
    shape: Vec<usize>,
    data: Bytes,
}

/// Number of elements in `shape`, `None` if it does not fit in a `usize`.
pub(crate) fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |count, dim| count.checked_mul(*dim))
}

/// Bytes needed to hold `shape` elements of a fixed width type.
fn byte_count(shape: &[usize], width: usize) -> Result<usize> {
    element_count(shape)
        .and_then(|count| count.checked_mul(width))
        .ok_or_else(invalid_shape)
}

pub(crate) fn invalid_shape() -> Error {
    Error::tensor("invalid or negative value found in tensor shape")
}

fn length_mismatch() -> Error {
    Error::tensor("data length does not match tensor shape and type")
}

impl Tensor {
    /// Wraps an existing buffer, checking it against `dtype` and `shape`.
    pub fn new(dtype: DataType, shape: Vec<usize>, data: Bytes) -> Result<Self> {
        match dtype.width() {
            Some(width) => {
                if data.len() != byte_count(&shape, width)? {
                    return Err(length_mismatch());
                }
            }
            None => {
                let count = element_count(&shape).ok_or_else(invalid_shape)?;
                let terminated = data.last().is_none_or(|b| *b == STRING_TERMINATOR);
                let elements = data.iter().filter(|b| **b == STRING_TERMINATOR).count();
                if !terminated || elements != count {
                    return Err(length_mismatch());
                }
            }
        }
        Ok(Self { dtype, shape, data })
    }

    /// A tensor whose elements are all zero (empty strings for `STRING`).
    ///
    /// Fails when the buffer would exceed [`MAX_TENSOR_BYTES`].
    pub fn zeros(dtype: DataType, shape: Vec<usize>) -> Result<Self> {
        let bytes = byte_count(&shape, dtype.width().unwrap_or(1))?;
        if bytes > MAX_TENSOR_BYTES {
            return Err(Error::tensor("tensor size exceeds the maximum allowed"));
        }
        Ok(Self { dtype, shape, data: Bytes::from(vec![0u8; bytes]) })
    }

    /// Builds a tensor from textual values, as given after `VALUES`.
    pub fn from_values<V: AsRef<[u8]>>(dtype: DataType, shape: Vec<usize>, values: &[V]) -> Result<Self> {
        if Some(values.len()) != element_count(&shape) {
            return Err(Error::tensor("wrong number of values for tensor shape"));
        }
        let invalid = || Error::tensor("invalid value");
        let mut buffer = BytesMut::with_capacity(values.len() * dtype.width().unwrap_or(8));
        for value in values {
            let value = value.as_ref();
            if dtype == DataType::String {
                if value.contains(&STRING_TERMINATOR) {
                    return Err(invalid());
                }
                buffer.put_slice(value);
                buffer.put_u8(STRING_TERMINATOR);
                continue;
            }
            let text = std::str::from_utf8(value).map_err(|_| invalid())?;
            match dtype {
                DataType::Float => buffer.put_f32_le(text.parse::<f64>().map_err(|_| invalid())? as f32),
                DataType::Double => buffer.put_f64_le(text.parse::<f64>().map_err(|_| invalid())?),
                _ => {
                    let parsed = text.parse::<i64>().map_err(|_| invalid())?;
                    let (min, max) = dtype.integer_range().ok_or_else(invalid)?;
                    if parsed < min || parsed > max {
                        return Err(invalid());
                    }
                    put_integer(&mut buffer, dtype, parsed);
                }
            }
        }
        Self::new(dtype, shape, buffer.freeze())
    }

    /// Convenience constructor for `FLOAT` tensors.
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self> {
        let mut buffer = BytesMut::with_capacity(values.len() * 4);
        values.iter().for_each(|v| buffer.put_f32_le(*v));
        Self::new(DataType::Float, shape, buffer.freeze())
    }

    /// Builds a numeric tensor of `dtype` from widened values, casting each one.
    pub(crate) fn from_f64(dtype: DataType, shape: Vec<usize>, values: &[f64]) -> Result<Self> {
        let mut buffer = BytesMut::with_capacity(values.len() * dtype.width().unwrap_or(8));
        for value in values {
            match dtype {
                DataType::Float => buffer.put_f32_le(*value as f32),
                DataType::Double => buffer.put_f64_le(*value),
                DataType::String => return Err(Error::tensor("STRING tensors are not numeric")),
                _ => put_integer(&mut buffer, dtype, *value as i64),
            }
        }
        Self::new(dtype, shape, buffer.freeze())
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        // shapes are checked on construction
        element_count(&self.shape).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the leading dimension, `0` for scalars.
    pub fn batch_size(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Byte range of every element, in order.
    pub(crate) fn element_ranges(&self) -> Vec<Range<usize>> {
        match self.dtype.width() {
            Some(width) => (0..self.len()).map(|i| i * width..(i + 1) * width).collect(),
            None => {
                let mut ranges = Vec::with_capacity(self.len());
                let mut start = 0;
                for (idx, byte) in self.data.iter().enumerate() {
                    if *byte == STRING_TERMINATOR {
                        ranges.push(start..idx);
                        start = idx + 1;
                    }
                }
                ranges
            }
        }
    }

    /// Every element widened to a reply friendly value.
    pub fn values(&self) -> Vec<TensorValue> {
        self.element_ranges()
            .into_iter()
            .map(|range| {
                let raw = &self.data[range.clone()];
                match self.dtype {
                    DataType::String => TensorValue::String(self.data.slice(range)),
                    DataType::Float | DataType::Double => TensorValue::Double(read_f64(self.dtype, raw)),
                    _ => TensorValue::Integer(read_i64(self.dtype, raw)),
                }
            })
            .collect()
    }

    /// Numeric elements widened to `f64`, or `None` for `STRING` tensors.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        if self.dtype == DataType::String {
            return None;
        }
        Some(
            self.element_ranges()
                .into_iter()
                .map(|range| {
                    let raw = &self.data[range];
                    if self.dtype.is_float() {
                        read_f64(self.dtype, raw)
                    } else {
                        read_i64(self.dtype, raw) as f64
                    }
                })
                .collect(),
        )
    }
}

fn put_integer(buffer: &mut BytesMut, dtype: DataType, value: i64) {
    match dtype {
        DataType::Int8 => buffer.put_i8(value as i8),
        DataType::Int16 => buffer.put_i16_le(value as i16),
        DataType::Int32 => buffer.put_i32_le(value as i32),
        DataType::Int64 => buffer.put_i64_le(value),
        DataType::Uint8 | DataType::Bool => buffer.put_u8(value as u8),
        DataType::Uint16 => buffer.put_u16_le(value as u16),
        DataType::Float | DataType::Double | DataType::String => {}
    }
}

fn read_f64(dtype: DataType, raw: &[u8]) -> f64 {
    match (dtype, raw) {
        (DataType::Float, [a, b, c, d]) => f32::from_le_bytes([*a, *b, *c, *d]) as f64,
        (DataType::Double, bytes) => bytes.try_into().map(f64::from_le_bytes).unwrap_or_default(),
        _ => 0.0,
    }
}

fn read_i64(dtype: DataType, raw: &[u8]) -> i64 {
    match (dtype, raw) {
        (DataType::Int8, [a]) => *a as i8 as i64,
        (DataType::Uint8 | DataType::Bool, [a]) => *a as i64,
        (DataType::Int16, [a, b]) => i16::from_le_bytes([*a, *b]) as i64,
        (DataType::Uint16, [a, b]) => u16::from_le_bytes([*a, *b]) as i64,
        (DataType::Int32, [a, b, c, d]) => i32::from_le_bytes([*a, *b, *c, *d]) as i64,
        (DataType::Int64, bytes) => bytes.try_into().map(i64::from_le_bytes).unwrap_or_default(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checks_length() {
        assert!(Tensor::new(DataType::Float, vec![2, 2], Bytes::from(vec![0u8; 16])).is_ok());
        let err = Tensor::new(DataType::Float, vec![2, 2], Bytes::from(vec![0u8; 15])).unwrap_err();
        assert_eq!(err.to_string(), "ERR data length does not match tensor shape and type");
    }

    #[test]
    fn test_string_tensor_requires_terminated_elements() {
        assert!(Tensor::new(DataType::String, vec![2], Bytes::from_static(b"ab\0c\0")).is_ok());
        assert!(Tensor::new(DataType::String, vec![2], Bytes::from_static(b"ab\0c")).is_err());
        assert!(Tensor::new(DataType::String, vec![3], Bytes::from_static(b"ab\0c\0")).is_err());
    }

    #[test]
    fn test_from_values_float() {
        let t = Tensor::from_values(DataType::Float, vec![2, 2], &["2", "3", "2", "3"]).unwrap();
        assert_eq!(t.to_f64_vec().unwrap(), vec![2.0, 3.0, 2.0, 3.0]);
        assert_eq!(t.batch_size(), 2);
    }

    #[test]
    fn test_from_values_range_checks() {
        assert!(Tensor::from_values(DataType::Int8, vec![1], &["127"]).is_ok());
        assert!(Tensor::from_values(DataType::Int8, vec![1], &["128"]).is_err());
        assert!(Tensor::from_values(DataType::Uint8, vec![1], &["-1"]).is_err());
        assert!(Tensor::from_values(DataType::Bool, vec![2], &["0", "1"]).is_ok());
        assert!(Tensor::from_values(DataType::Bool, vec![1], &["2"]).is_err());
        assert!(Tensor::from_values(DataType::Int32, vec![1], &["1.5"]).is_err());
    }

    #[test]
    fn test_values_widen_per_type() {
        let ints = Tensor::from_values(DataType::Int16, vec![2], &["-5", "7"]).unwrap();
        assert_eq!(ints.values(), vec![TensorValue::Integer(-5), TensorValue::Integer(7)]);

        let strings = Tensor::from_values(DataType::String, vec![2], &["hi", ""]).unwrap();
        assert_eq!(
            strings.values(),
            vec![TensorValue::String(Bytes::from_static(b"hi")), TensorValue::String(Bytes::new())]
        );
        assert!(strings.to_f64_vec().is_none());
    }

    #[test]
    fn test_zeros() {
        let t = Tensor::zeros(DataType::Double, vec![3]).unwrap();
        assert_eq!(t.to_f64_vec().unwrap(), vec![0.0; 3]);
        let s = Tensor::zeros(DataType::String, vec![2]).unwrap();
        assert_eq!(s.values().len(), 2);
    }

    #[test]
    fn test_shape_overflow_is_rejected() {
        let huge = vec![1 << 32, 1 << 32];
        let err = Tensor::new(DataType::Float, huge.clone(), Bytes::new()).unwrap_err();
        assert_eq!(err.to_string(), "ERR invalid or negative value found in tensor shape");
        assert!(Tensor::new(DataType::String, huge.clone(), Bytes::new()).is_err());
        assert!(Tensor::zeros(DataType::Float, huge).is_err());
        // fits in a usize but not in memory
        let err = Tensor::zeros(DataType::Float, vec![100_000, 100_000, 100_000]).unwrap_err();
        assert_eq!(err.to_string(), "ERR tensor size exceeds the maximum allowed");
    }
}
