use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;
use crate::backend::adapter::RunTarget;
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use crate::tensor::operations::{batch_compatible, shared_batch_size};

/// # RunRequest
///
/// One model or script run waiting in a device queue.
///
/// A request pairs its inputs with a oneshot channel on which exactly one
/// result is delivered: the outputs, a backend error, or `TIMEDOUT` when the
/// deadline passes while the request is still queued.
pub struct RunRequest {
    id: Uuid,
    target: RunTarget,
    inputs: Vec<Tensor>,
    output_count: usize,
    batch_size: usize,
    deadline: Option<Instant>,
    enqueued_at: Instant,
    sender: oneshot::Sender<Result<Vec<Tensor>>>,
}

impl RunRequest {
    /// Creates a request and the future its submitter awaits.
    ///
    /// # Parameters
    ///
    /// * `target` - The model or script function to run
    /// * `inputs` - Input tensors in the order the target expects them
    /// * `output_count` - How many outputs the caller will read
    /// * `deadline` - When the caller stops waiting, if ever
    pub fn new(
        target: RunTarget,
        inputs: Vec<Tensor>,
        output_count: usize,
        deadline: Option<Instant>,
    ) -> (Self, Pending) {
        let (sender, receiver) = oneshot::channel();
        let batch_size = shared_batch_size(&inputs);
        let request = Self {
            id: Uuid::new_v4(),
            target,
            inputs,
            output_count,
            batch_size,
            deadline,
            enqueued_at: Instant::now(),
            sender,
        };
        (request, Pending { receiver })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> &RunTarget {
        &self.target
    }

    pub fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    /// Leading dimension shared by every input, `0` if the request cannot be merged.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Whether `other` may be stacked into the same backend call as `self`.
    pub fn can_join(&self, other: &RunRequest) -> bool {
        self.target.instance_id() == other.target.instance_id()
            && self.batch_size > 0
            && other.batch_size > 0
            && self.inputs.len() == other.inputs.len()
            && self.inputs.iter().zip(&other.inputs).all(|(a, b)| batch_compatible(a, b))
    }

    /// Delivers the result to the submitter.
    pub fn complete(self, result: Result<Vec<Tensor>>) {
        if self.sender.send(result).is_err() {
            tracing::warn!(request = %self.id, key = %self.target.key(), "run result dropped, submitter stopped waiting");
        }
    }
}

/// # Pending
///
/// Future resolving to the outputs of a submitted [`RunRequest`].
pub struct Pending {
    receiver: oneshot::Receiver<Result<Vec<Tensor>>>,
}

impl Future for Pending {
    type Output = Result<Vec<Tensor>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(Error::backend("run queue shut down before the request completed"))))
    }
}
