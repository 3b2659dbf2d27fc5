use bytes::{BufMut, Bytes, BytesMut};
use candle_core::{DType, Device};
use crate::error::{Error, Result};
use crate::tensor::{DataType, Tensor, TensorValue};

fn candle_error(error: candle_core::Error) -> Error {
    Error::tensor(error.to_string())
}

fn integers(tensor: &Tensor) -> Vec<i64> {
    tensor
        .values()
        .into_iter()
        .map(|value| match value {
            TensorValue::Integer(v) => v,
            TensorValue::Double(v) => v as i64,
            TensorValue::String(_) => 0,
        })
        .collect()
}

/// Copies a tensor onto a candle device.
///
/// `FLOAT`, `DOUBLE`, `UINT8` and `INT64` map to their candle dtypes; other
/// types have no candle counterpart and are rejected.
pub fn to_candle(tensor: &Tensor, device: &Device) -> Result<candle_core::Tensor> {
    let shape = tensor.shape().to_vec();
    let numeric = || tensor.to_f64_vec().ok_or_else(|| Error::tensor("STRING tensors are not numeric"));
    let converted = match tensor.dtype() {
        DataType::Float => {
            let values: Vec<f32> = numeric()?.into_iter().map(|v| v as f32).collect();
            candle_core::Tensor::from_vec(values, shape, device)
        }
        DataType::Double => candle_core::Tensor::from_vec(numeric()?, shape, device),
        DataType::Uint8 => candle_core::Tensor::from_vec(tensor.data().to_vec(), shape, device),
        DataType::Int64 => candle_core::Tensor::from_vec(integers(tensor), shape, device),
        other => return Err(Error::tensor(format!("{} tensors cannot be converted to candle", other.name()))),
    };
    converted.map_err(candle_error)
}

/// Copies a candle tensor back into engine storage.
pub fn from_candle(tensor: &candle_core::Tensor) -> Result<Tensor> {
    let shape = tensor.dims().to_vec();
    let flat = tensor.flatten_all().map_err(candle_error)?;
    match tensor.dtype() {
        DType::F32 => Tensor::from_f32(shape, &flat.to_vec1::<f32>().map_err(candle_error)?),
        DType::F64 => {
            let values = flat.to_vec1::<f64>().map_err(candle_error)?;
            Tensor::from_f64(DataType::Double, shape, &values)
        }
        DType::U8 => {
            let values = flat.to_vec1::<u8>().map_err(candle_error)?;
            Tensor::new(DataType::Uint8, shape, Bytes::from(values))
        }
        DType::I64 => {
            let values = flat.to_vec1::<i64>().map_err(candle_error)?;
            let mut buffer = BytesMut::with_capacity(values.len() * 8);
            values.iter().for_each(|v| buffer.put_i64_le(*v));
            Tensor::new(DataType::Int64, shape, buffer.freeze())
        }
        other => Err(Error::tensor(format!("unsupported candle dtype {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_conversion_keeps_shape_and_values() {
        let tensor = Tensor::from_f32(vec![2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let candle = to_candle(&tensor, &Device::Cpu).unwrap();
        assert_eq!(candle.dims(), &[2, 2]);
        assert_eq!(from_candle(&candle).unwrap(), tensor);
    }

    #[test]
    fn test_int64_conversion() {
        let tensor = Tensor::from_values(DataType::Int64, vec![3], &["-1", "0", "9007199254740993"]).unwrap();
        let candle = to_candle(&tensor, &Device::Cpu).unwrap();
        assert_eq!(candle.to_vec1::<i64>().unwrap(), vec![-1, 0, 9007199254740993]);
        assert_eq!(from_candle(&candle).unwrap(), tensor);
    }

    #[test]
    fn test_unsupported_dtype() {
        let tensor = Tensor::zeros(DataType::Int16, vec![1]).unwrap();
        assert!(to_candle(&tensor, &Device::Cpu).is_err());
    }
}
