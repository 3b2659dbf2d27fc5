//! # Batching Engine
//!
//! Model and script runs are not executed on the caller's task. They are
//! queued on a per-device [`RunQueue`] whose workers merge compatible runs of
//! the same model into one backend call.
//!
//! ## Module Structure
//!
//! * [`request`] - A queued run and the future its submitter awaits
//! * [`handler`] - The [`BatchHandler`] seam: assemble, run and split a group
//! * `worker` - Queue state shared with the workers, closed when the queue drops
//! * [`queue`] - Device queues and the engine owning them
//!
//! ## Policy
//!
//! A model stored with `BATCHSIZE n` has runs of compatible inputs stacked
//! along dimension 0 up to `n` samples. `MINBATCHSIZE m` holds a group back
//! until it has `m` samples, and `MINBATCHTIMEOUT t` bounds that wait to `t`
//! milliseconds. Runs of models without a batch size, and every script run,
//! are executed alone in arrival order.

mod batch;
pub mod handler;
pub mod queue;
pub mod request;
mod worker;

pub use handler::{BatchHandler, RunHandler};
pub use queue::{BatchingEngine, RunQueue};
pub use request::{Pending, RunRequest};
