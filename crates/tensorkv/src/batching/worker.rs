//! State a run queue shares with the workers draining it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;
use crate::error::Error;
use super::batch::{select_group, Selection};
use super::request::RunRequest;

/// Waiting requests of one device plus the signals its workers react to.
///
/// The queue starts open. Closing it is final: every request still waiting
/// fails with [`Error::QueueClosed`], later pushes fail the same way, and
/// workers leave their loop the next time they look at the state.
pub(crate) struct QueueState {
    // `None` once closed
    waiting: Mutex<Option<VecDeque<RunRequest>>>,
    wakeup: Notify,
}

impl QueueState {
    pub fn new() -> Self {
        Self {
            waiting: Mutex::new(Some(VecDeque::new())),
            wakeup: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<VecDeque<RunRequest>>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, VecDeque::len)
    }

    /// Queues `request` and wakes idle workers, or fails it if the queue is closed.
    pub fn push(&self, request: RunRequest) {
        let rejected = match self.lock().as_mut() {
            Some(waiting) => {
                waiting.push_back(request);
                None
            }
            None => Some(request),
        };
        match rejected {
            Some(request) => request.complete(Err(Error::QueueClosed)),
            None => self.wakeup.notify_waiters(),
        }
    }

    /// Takes the next group to run. A closed queue yields nothing.
    pub fn select(&self, now: Instant) -> Selection {
        self.lock()
            .as_mut()
            .map(|waiting| select_group(waiting, now))
            .unwrap_or_default()
    }

    /// Closes the queue and fails the requests still waiting.
    ///
    /// Returns how many requests were failed; `0` when already closed.
    pub fn close(&self) -> usize {
        let drained = self.lock().take().unwrap_or_default();
        self.wakeup.notify_waiters();
        let count = drained.len();
        drained.into_iter().for_each(|request| request.complete(Err(Error::QueueClosed)));
        count
    }

    /// Registered before a worker inspects the queue, so no push is missed.
    pub fn wakeup(&self) -> &Notify {
        &self.wakeup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use bytes::Bytes;
    use crate::backend::adapter::RunTarget;
    use crate::backend::mock::{MockBackend, mock_definition};
    use crate::batching::Pending;
    use crate::backend::{BackendKind, BackendRegistry};
    use crate::config::Config;
    use crate::model::{BatchPolicy, Model};
    use crate::tensor::Tensor;

    fn target() -> RunTarget {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(MockBackend::new(BackendKind::Torch)));
        let model = Model::load(
            "m",
            mock_definition(BatchPolicy::default()),
            Bytes::from_static(b"identity"),
            &registry,
            &Config::default(),
        ).unwrap();
        RunTarget::Model(Arc::new(model))
    }

    fn request() -> (RunRequest, Pending) {
        let input = Tensor::from_f32(vec![1], &[1.0]).unwrap();
        RunRequest::new(target(), vec![input], 1, None)
    }

    #[tokio::test]
    async fn test_close_fails_waiting_requests() {
        let state = QueueState::new();
        let (first, first_pending) = request();
        let (second, second_pending) = request();
        state.push(first);
        state.push(second);
        assert_eq!(state.len(), 2);

        assert_eq!(state.close(), 2);
        assert!(!state.is_open());
        assert_eq!(first_pending.await.unwrap_err(), Error::QueueClosed);
        assert_eq!(second_pending.await.unwrap_err().to_string(), "ERR run queue shut down");
        assert_eq!(state.close(), 0);
    }

    #[tokio::test]
    async fn test_push_after_close_is_rejected() {
        let state = QueueState::new();
        state.close();
        let (late, pending) = request();
        state.push(late);
        assert_eq!(state.len(), 0);
        assert_eq!(pending.await.unwrap_err(), Error::QueueClosed);
        assert!(state.select(Instant::now()).group.is_empty());
    }

    #[tokio::test]
    async fn test_push_wakes_registered_worker() {
        let state = QueueState::new();
        let notified = state.wakeup().notified();
        let mut notified = std::pin::pin!(notified);
        notified.as_mut().enable();

        let (queued, _pending) = request();
        state.push(queued);
        tokio::time::timeout(std::time::Duration::from_millis(50), notified)
            .await
            .unwrap();
    }
}
