//! # Inference Backends
//!
//! This module provides a unified interface over the runtimes models and
//! scripts are executed by, so the DAG executor and the batching engine work
//! in a backend-agnostic manner.
//!
//! ## Structure
//!
//! - [`Backend`] loads model blobs and script sources into handles
//! - [`ModelHandle`] and [`ScriptHandle`] run loaded entities on tensors
//! - [`BackendRegistry`] maps each [`BackendKind`] to the runtime serving it
//! - [`adapter`] wraps a run with output checks and timing
//!
//! ## Feature Flags
//!
//! - `candle`: conversions between [`Tensor`](crate::tensor::Tensor) and
//!   `candle_core::Tensor`, for backends built on candle
//!
//! Runtimes are registered at engine start up. A backend that was never
//! registered answers every load with `ERR Backend not loaded: <NAME>`.

mod core_trait;
mod registry;

pub mod adapter;

#[cfg_attr(docsrs, doc(cfg(feature = "candle")))]
#[cfg(feature = "candle")]
/// Candle tensor interop.
///
/// This module is only available when the `candle` feature flag is enabled.
pub mod candle;

// Re-export the core traits for convenient imports
pub use core_trait::*;
pub use registry::BackendRegistry;

#[cfg(test)]
/// Deterministic backend for tests.
pub(crate) mod mock;
