/// # Constants with reserved meanings in tensorkv

/// Batching concatenates and splits tensors along the `0th` dimension
pub const BATCH_DIM: usize = 0;

/// Byte that terminates every element of a `STRING` tensor
pub const STRING_TERMINATOR: u8 = 0;

/// Largest buffer a tensor is zero-filled with when created without data
pub const MAX_TENSOR_BYTES: usize = 512 * 1024 * 1024;
