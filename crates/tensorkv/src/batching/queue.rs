use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use crate::backend::adapter::RunTarget;
use crate::device::Device;
use crate::tensor::Tensor;
use super::batch::batching_loop;
use super::handler::RunHandler;
use super::request::{Pending, RunRequest};
use super::worker::QueueState;

/// FIFO of run requests for one device, drained by a fixed set of workers.
///
/// Dropping the queue closes it: requests still waiting fail with
/// `ERR run queue shut down` and the workers stop after their current group.
pub struct RunQueue {
    device: Device,
    state: Arc<QueueState>,
    workers: Vec<JoinHandle<()>>,
}

impl RunQueue {
    /// Spawns `threads` workers for `device`. Must be called inside a Tokio runtime.
    pub fn new(device: Device, threads: usize) -> Self {
        let state = Arc::new(QueueState::new());
        let workers = (0..threads.max(1))
            .map(|worker| {
                let state = state.clone();
                let device = device.clone();
                tokio::spawn(async move {
                    tracing::info!(device = %device, worker, "run queue worker started");
                    batching_loop(&RunHandler, state).await;
                    tracing::info!(device = %device, worker, "run queue worker stopped");
                })
            })
            .collect();
        Self { device, state, workers }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Workers that have not left their loop yet.
    pub fn running_workers(&self) -> usize {
        self.workers.iter().filter(|worker| !worker.is_finished()).count()
    }

    /// Number of requests not yet picked up by a worker.
    pub fn pending_count(&self) -> usize {
        self.state.len()
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Queues `request`. On a closed queue it fails immediately.
    pub fn push(&self, request: RunRequest) {
        self.state.push(request);
    }

    /// Stops accepting requests and fails the ones still waiting.
    pub fn close(&self) {
        let failed = self.state.close();
        tracing::info!(device = %self.device, failed, "run queue closed");
    }
}

impl Drop for RunQueue {
    fn drop(&mut self) {
        if self.state.is_open() {
            self.close();
        }
    }
}

/// Owns one [`RunQueue`] per device.
///
/// Queues are created lazily, the first time a model or script is stored on
/// a device, and live as long as the engine.
pub struct BatchingEngine {
    threads_per_queue: usize,
    queues: std::sync::Mutex<HashMap<Device, Arc<RunQueue>>>,
}

impl BatchingEngine {
    pub fn new(threads_per_queue: usize) -> Self {
        Self {
            threads_per_queue,
            queues: Default::default(),
        }
    }

    /// Returns the queue serving `device`, spawning it on first use.
    pub fn ensure_queue(&self, device: &Device) -> Arc<RunQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .entry(device.clone())
            .or_insert_with(|| {
                tracing::info!(device = %device, workers = self.threads_per_queue, "creating run queue");
                Arc::new(RunQueue::new(device.clone(), self.threads_per_queue))
            })
            .clone()
    }

    pub fn queue_count(&self) -> usize {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Queues a run on its target's device and returns the future of its outputs.
    ///
    /// The request may be merged with other requests for the same model
    /// instance according to the model's batch policy. When `deadline` passes
    /// before a worker picks the request up, it completes with `TIMEDOUT`.
    pub async fn submit(
        &self,
        target: RunTarget,
        inputs: Vec<Tensor>,
        output_count: usize,
        deadline: Option<Instant>,
    ) -> Pending {
        let queue = self.ensure_queue(target.device());
        let (request, pending) = RunRequest::new(target, inputs, output_count, deadline);
        queue.push(request);
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use bytes::Bytes;
    use futures::future::join_all;
    use crate::backend::mock::{MockBackend, mock_definition};
    use crate::backend::{BackendKind, BackendRegistry};
    use crate::config::Config;
    use crate::model::{BatchPolicy, Model};

    fn setup(policy: BatchPolicy, blob: &'static [u8]) -> (Arc<MockBackend>, RunTarget) {
        let backend = Arc::new(MockBackend::new(BackendKind::Torch));
        let mut registry = BackendRegistry::new();
        registry.register(backend.clone());
        let model = Model::load("m", mock_definition(policy), Bytes::from_static(blob), &registry, &Config::default())
            .unwrap();
        (backend, RunTarget::Model(Arc::new(model)))
    }

    fn row(value: f32) -> Tensor {
        Tensor::from_f32(vec![1, 1], &[value]).unwrap()
    }

    #[tokio::test]
    async fn test_queue_per_device() {
        let engine = BatchingEngine::new(2);
        let cpu = engine.ensure_queue(&Device::Cpu(None));
        engine.ensure_queue(&Device::Cpu(None));
        engine.ensure_queue(&Device::Gpu(Some(0)));
        assert_eq!(engine.queue_count(), 2);
        assert_eq!(cpu.worker_count(), 2);
    }

    #[tokio::test]
    async fn test_min_batch_groups_then_flushes_remainder() {
        let policy = BatchPolicy {
            batch_size: 2,
            min_batch_size: 2,
            min_batch_timeout: Duration::from_millis(50),
        };
        let (backend, target) = setup(policy, b"identity");
        let engine = BatchingEngine::new(1);

        let mut pending = vec![];
        for value in [1.0, 2.0, 3.0] {
            pending.push(engine.submit(target.clone(), vec![row(value)], 1, None).await);
        }
        let results = join_all(pending).await;

        for (result, value) in results.into_iter().zip([1.0, 2.0, 3.0]) {
            assert_eq!(result.unwrap(), vec![row(value)]);
        }
        assert_eq!(backend.batch_sizes(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_unbatched_requests_run_one_by_one() {
        let (backend, target) = setup(BatchPolicy::default(), b"identity");
        let engine = BatchingEngine::new(1);

        let mut pending = vec![];
        for value in [1.0, 2.0, 3.0] {
            pending.push(engine.submit(target.clone(), vec![row(value)], 1, None).await);
        }
        join_all(pending).await;

        assert_eq!(backend.batch_sizes(), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn test_dropping_queue_fails_waiting_requests_and_stops_workers() {
        let policy = BatchPolicy { batch_size: 4, min_batch_size: 4, ..Default::default() };
        let (backend, target) = setup(policy, b"identity");
        let queue = RunQueue::new(Device::Cpu(None), 2);

        let (request, pending) = RunRequest::new(target, vec![row(1.0)], 1, None);
        queue.push(request);
        tokio::time::sleep(Duration::from_millis(20)).await;
        // below MINBATCHSIZE with no timeout, so it keeps waiting
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.running_workers(), 2);

        drop(queue);
        assert_eq!(pending.await.unwrap_err().to_string(), "ERR run queue shut down");
        assert!(backend.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_closed_queue_stops_workers_and_rejects_pushes() {
        let (backend, target) = setup(BatchPolicy::default(), b"identity");
        let queue = RunQueue::new(Device::Cpu(None), 3);
        queue.close();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!queue.is_open());
        assert_eq!(queue.running_workers(), 0);

        let (request, pending) = RunRequest::new(target, vec![row(1.0)], 1, None);
        queue.push(request);
        assert_eq!(pending.await.unwrap_err(), crate::error::Error::QueueClosed);
        assert!(backend.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_request_past_deadline_is_not_run() {
        let policy = BatchPolicy { batch_size: 4, min_batch_size: 4, ..Default::default() };
        let (backend, target) = setup(policy, b"identity");
        let engine = BatchingEngine::new(1);

        let deadline = Instant::now() + Duration::from_millis(30);
        let pending = engine.submit(target, vec![row(1.0)], 1, Some(deadline)).await;

        assert_eq!(pending.await.unwrap_err(), crate::error::Error::TimedOut);
        assert!(backend.batch_sizes().is_empty());
    }
}
