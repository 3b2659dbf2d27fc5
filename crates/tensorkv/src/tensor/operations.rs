use bytes::BytesMut;
use crate::error::{Error, Result};
use super::{Tensor, constant::BATCH_DIM};

/// Returns the shared leading dimension of a request's inputs.
///
/// # Returns
///
/// The batch size when every input agrees on it, `0` when the inputs disagree,
/// are scalars, or there are no inputs at all. A request reporting `0` cannot
/// be merged with others.
pub(crate) fn shared_batch_size(inputs: &[Tensor]) -> usize {
    let Some(first) = inputs.first() else {
        return 0;
    };
    let size = first.batch_size();
    if inputs.iter().all(|t| t.rank() > BATCH_DIM && t.batch_size() == size) {
        size
    } else {
        0
    }
}

/// Checks whether two tensors can be stacked along the batch dimension.
///
/// Both must share dtype and rank, and agree on every dimension but the first.
pub(crate) fn batch_compatible(a: &Tensor, b: &Tensor) -> bool {
    a.dtype() == b.dtype()
        && a.rank() == b.rank()
        && a.rank() > BATCH_DIM
        && a.shape()[BATCH_DIM + 1..] == b.shape()[BATCH_DIM + 1..]
}

/// Concatenates tensors along the batch dimension, in the order supplied.
///
/// # Parameters
///
/// * `tensors` - Tensors of shape `(n_i, ...rest)` sharing dtype and `rest`
///
/// # Returns
///
/// A tensor of shape `(sum n_i, ...rest)`.
pub(crate) fn concat_batch(tensors: &[Tensor]) -> Result<Tensor> {
    let first = tensors
        .first()
        .ok_or_else(|| Error::tensor("cannot concatenate an empty tensor list"))?;
    if tensors.len() == 1 {
        return Ok(first.clone());
    }
    if !tensors.iter().all(|t| batch_compatible(first, t)) {
        return Err(Error::tensor("tensors cannot be concatenated along the batch dimension"));
    }
    let mut shape = first.shape().to_vec();
    shape[BATCH_DIM] = tensors.iter().map(Tensor::batch_size).sum();
    let mut data = BytesMut::with_capacity(tensors.iter().map(|t| t.data().len()).sum());
    for tensor in tensors {
        data.extend_from_slice(tensor.data());
    }
    Tensor::new(first.dtype(), shape, data.freeze())
}

/// Slices `len` rows starting at `start` from the batch dimension.
pub(crate) fn slice_batch(tensor: &Tensor, start: usize, len: usize) -> Result<Tensor> {
    if tensor.rank() <= BATCH_DIM || start + len > tensor.batch_size() {
        return Err(Error::tensor("slice is out of bounds for the batch dimension"));
    }
    let row: usize = tensor.shape()[BATCH_DIM + 1..].iter().product();
    let ranges = tensor.element_ranges();
    let (first, last) = (start * row, (start + len) * row);
    let bytes = if first == last {
        tensor.data().slice(0..0)
    } else {
        // string rows also own their terminators, so extend to the next element's start
        let begin = ranges[first].start;
        let end = match ranges.get(last) {
            Some(next) => next.start,
            None => tensor.data().len(),
        };
        tensor.data().slice(begin..end)
    };
    let mut shape = tensor.shape().to_vec();
    shape[BATCH_DIM] = len;
    Tensor::new(tensor.dtype(), shape, bytes)
}

/// Splits a batched tensor back into per-request pieces.
///
/// # Parameters
///
/// * `tensor` - Tensor of shape `(sum sizes, ...)`
/// * `sizes` - Leading dimension of every piece, in order
///
/// # Returns
///
/// One tensor per entry of `sizes`, or an error if the leading dimension does
/// not add up.
pub(crate) fn split_batch(tensor: &Tensor, sizes: &[usize]) -> Result<Vec<Tensor>> {
    let total: usize = sizes.iter().sum();
    if tensor.rank() <= BATCH_DIM || tensor.batch_size() != total {
        return Err(Error::backend("Model did not generate the expected batch size"));
    }
    let mut offset = 0;
    sizes
        .iter()
        .map(|size| {
            let piece = slice_batch(tensor, offset, *size);
            offset += size;
            piece
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DataType;

    #[test]
    fn test_shared_batch_size() {
        let a = Tensor::from_f32(vec![2, 3], &[0.0; 6]).unwrap();
        let b = Tensor::from_f32(vec![2, 1], &[0.0; 2]).unwrap();
        let c = Tensor::from_f32(vec![3, 1], &[0.0; 3]).unwrap();
        assert_eq!(shared_batch_size(&[a.clone(), b.clone()]), 2);
        assert_eq!(shared_batch_size(&[a, c]), 0);
        assert_eq!(shared_batch_size(&[]), 0);
    }

    #[test]
    fn test_concat_then_split_preserves_rows() {
        let a = Tensor::from_f32(vec![1, 2], &[1.0, 2.0]).unwrap();
        let b = Tensor::from_f32(vec![2, 2], &[3.0, 4.0, 5.0, 6.0]).unwrap();
        let merged = concat_batch(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(merged.shape(), &[3, 2]);

        let parts = split_batch(&merged, &[1, 2]).unwrap();
        assert_eq!(parts, vec![a, b]);
    }

    #[test]
    fn test_concat_rejects_mismatched_rows() {
        let a = Tensor::from_f32(vec![1, 2], &[1.0, 2.0]).unwrap();
        let b = Tensor::from_f32(vec![1, 3], &[1.0, 2.0, 3.0]).unwrap();
        assert!(concat_batch(&[a, b]).is_err());
    }

    #[test]
    fn test_split_rejects_wrong_total() {
        let t = Tensor::from_f32(vec![3, 1], &[1.0, 2.0, 3.0]).unwrap();
        let err = split_batch(&t, &[1, 1]).unwrap_err();
        assert_eq!(err.to_string(), "ERR Model did not generate the expected batch size");
    }

    #[test]
    fn test_slice_string_rows() {
        let t = Tensor::from_values(DataType::String, vec![3, 1], &["a", "bc", "d"]).unwrap();
        let middle = slice_batch(&t, 1, 2).unwrap();
        assert_eq!(middle.data().as_ref(), b"bc\0d\0");
        assert_eq!(middle.shape(), &[2, 1]);
    }
}
