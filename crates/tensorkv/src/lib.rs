//! # tensorkv
//!
//! An in-process tensor engine that lives next to a key-value store. Tensors,
//! models and scripts are values at host keys; clients drive them with
//! `AI.*` commands.
//!
//! ## Overview
//!
//! - Tensors are typed, dense and row major. Dimension `0` is the batch
//!   dimension.
//! - Models are blobs loaded through a pluggable [`Backend`](backend::Backend).
//!   Scripts are compiled source exposing named entry points.
//! - A DAG chains tensor, model and script ops over a transient local
//!   namespace, reading keys through `LOAD` and writing them back through
//!   `PERSIST`.
//! - Model runs are queued per device and merged into batches according to
//!   each model's `BATCHSIZE`, `MINBATCHSIZE` and `MINBATCHTIMEOUT`.
//!
//! ## Architecture
//!
//! The engine never owns storage. It talks to the host through the
//! [`Keyspace`] trait, and to inference runtimes through the
//! [`Backend`](backend::Backend) trait registered on the [`Engine`].
//!
//! ```text
//! Engine::execute ─▶ command parsers ─▶ Dag ─▶ dag::execute
//!                                               │
//!                                               ▼
//!                              BatchingEngine ─▶ RunQueue (per device)
//!                                               │
//!                                               ▼
//!                                  backend::adapter::invoke
//! ```
//!
//! ## Features
//!
//! - **candle** - conversions between [`Tensor`] and `candle_core::Tensor`

mod args;
mod engine;

pub mod backend;
pub mod batching;
pub mod codec;
pub mod command;
pub mod config;
pub mod dag;
pub mod device;
pub mod error;
pub mod keyspace;
pub mod model;
pub mod reply;
pub mod script;
pub mod stats;
pub mod tensor;

/// Constants for client reference
pub use tensor::constant;

pub use config::Config;
pub use device::Device;
pub use engine::Engine;
pub use error::{Error, Result};
pub use keyspace::{Keyspace, MemoryKeyspace, Value};
pub use model::{BatchPolicy, Model};
pub use reply::Reply;
pub use script::Script;
pub use tensor::{DataType, Tensor};
