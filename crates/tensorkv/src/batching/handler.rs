use std::time::Duration;
use async_trait::async_trait;
use crate::backend::adapter::{invoke, Invocation};
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use crate::tensor::operations::{concat_batch, split_batch};
use super::request::RunRequest;

#[async_trait]
pub trait BatchHandler: Send + Sync {
    type Request: Send + Sync;
    type ModelInput: Send;
    type ModelOutput: Send;

    /// Build the backend input from a group of queued requests.
    async fn make_batch_input(&self, requests: &[Self::Request]) -> Self::ModelInput;

    /// Run the group once.
    async fn forward(&self, requests: &[Self::Request], model_input: Self::ModelInput) -> Self::ModelOutput;

    /// Hand each request its share of the output.
    async fn handle_outputs(&self, batch: Vec<Self::Request>, output: Self::ModelOutput);
}

/// Runs request groups through the backend adapter.
///
/// A group of one is passed through untouched. Larger groups are concatenated
/// input by input along the batch dimension, run once, and every output is
/// split back by the members' batch sizes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunHandler;

#[async_trait]
impl BatchHandler for RunHandler {
    type Request = RunRequest;
    type ModelInput = Result<Vec<Tensor>>;
    type ModelOutput = Invocation;

    async fn make_batch_input(&self, requests: &[RunRequest]) -> Result<Vec<Tensor>> {
        let [first, rest @ ..] = requests else {
            return Err(Error::backend("cannot run an empty batch"));
        };
        if rest.is_empty() {
            return Ok(first.inputs().to_vec());
        }
        (0..first.inputs().len())
            .map(|idx| {
                let column: Vec<Tensor> = requests.iter().map(|r| r.inputs()[idx].clone()).collect();
                concat_batch(&column)
            })
            .collect()
    }

    /// Runs the backend on a blocking thread so the worker task never stalls the runtime.
    async fn forward(&self, requests: &[RunRequest], model_input: Result<Vec<Tensor>>) -> Invocation {
        let (first, inputs) = match (requests.first(), model_input) {
            (Some(first), Ok(inputs)) => (first, inputs),
            (_, Err(error)) => return Invocation { outputs: Err(error), duration: Duration::ZERO },
            (None, Ok(_)) => {
                return Invocation { outputs: Err(Error::backend("cannot run an empty batch")), duration: Duration::ZERO };
            }
        };
        let target = first.target().clone();
        let output_count = first.output_count();
        tracing::debug!(
            key = %target.key(),
            device = %target.device(),
            requests = requests.len(),
            batch = inputs.first().map(Tensor::batch_size).unwrap_or(0),
            "dispatching run"
        );
        tokio::task::spawn_blocking(move || invoke(&target, &inputs, output_count))
            .await
            .unwrap_or_else(|error| Invocation {
                outputs: Err(Error::backend(format!("backend run aborted: {error}"))),
                duration: Duration::ZERO,
            })
    }

    async fn handle_outputs(&self, mut batch: Vec<RunRequest>, output: Invocation) {
        let Invocation { outputs, duration } = output;
        if batch.len() == 1 {
            if let Some(request) = batch.pop() {
                request.target().record(duration, &outputs);
                request.complete(outputs);
            }
            return;
        }
        let sizes: Vec<usize> = batch.iter().map(RunRequest::batch_size).collect();
        let split = outputs.and_then(|outputs| {
            outputs
                .iter()
                .map(|tensor| split_batch(tensor, &sizes))
                .collect::<Result<Vec<_>>>()
        });
        match split {
            Ok(mut per_output) => {
                for request in batch.into_iter().rev() {
                    // pieces are popped from the back so requests are served in reverse
                    let mine: Vec<Tensor> = per_output
                        .iter_mut()
                        .filter_map(|pieces| pieces.pop())
                        .collect();
                    let result = Ok(mine);
                    request.target().record(duration, &result);
                    request.complete(result);
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, requests = batch.len(), "batched run failed");
                for request in batch {
                    let result = Err(error.clone());
                    request.target().record(duration, &result);
                    request.complete(result);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use bytes::Bytes;
    use crate::backend::adapter::RunTarget;
    use crate::backend::mock::{MockBackend, mock_definition};
    use crate::backend::{BackendKind, BackendRegistry};
    use crate::config::Config;
    use crate::model::{BatchPolicy, Model};

    fn target(blob: &'static [u8]) -> RunTarget {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(MockBackend::new(BackendKind::Torch)));
        let model = Model::load(
            "m",
            mock_definition(BatchPolicy { batch_size: 4, ..Default::default() }),
            Bytes::from_static(blob),
            &registry,
            &Config::default(),
        ).unwrap();
        RunTarget::Model(Arc::new(model))
    }

    fn rows(values: &[f32]) -> Tensor {
        Tensor::from_f32(vec![values.len(), 1], values).unwrap()
    }

    #[tokio::test]
    async fn test_make_batch_input_single_passes_through() {
        let (request, _pending) = RunRequest::new(target(b"identity"), vec![rows(&[1.0])], 1, None);
        let input = RunHandler.make_batch_input(&[request]).await.unwrap();
        assert_eq!(input, vec![rows(&[1.0])]);
    }

    #[tokio::test]
    async fn test_make_batch_input_concatenates_in_order() {
        let target = target(b"identity");
        let (a, _pa) = RunRequest::new(target.clone(), vec![rows(&[1.0])], 1, None);
        let (b, _pb) = RunRequest::new(target, vec![rows(&[2.0, 3.0])], 1, None);
        let input = RunHandler.make_batch_input(&[a, b]).await.unwrap();
        assert_eq!(input, vec![rows(&[1.0, 2.0, 3.0])]);
    }

    #[tokio::test]
    async fn test_batched_run_splits_outputs() {
        let target = target(b"identity");
        let (a, pending_a) = RunRequest::new(target.clone(), vec![rows(&[1.0])], 1, None);
        let (b, pending_b) = RunRequest::new(target.clone(), vec![rows(&[2.0, 3.0])], 1, None);
        let batch = vec![a, b];

        let input = RunHandler.make_batch_input(&batch).await;
        let output = RunHandler.forward(&batch, input).await;
        RunHandler.handle_outputs(batch, output).await;

        assert_eq!(pending_a.await.unwrap(), vec![rows(&[1.0])]);
        assert_eq!(pending_b.await.unwrap(), vec![rows(&[2.0, 3.0])]);

        // every member is a call of its own
        let snapshot = target.stats().snapshot();
        assert_eq!((snapshot.calls, snapshot.samples), (2, 3));
    }

    #[tokio::test]
    async fn test_wrong_batch_size_fails_every_member() {
        let target = target(b"wrong_batch");
        let (a, pending_a) = RunRequest::new(target.clone(), vec![rows(&[1.0])], 1, None);
        let (b, pending_b) = RunRequest::new(target.clone(), vec![rows(&[2.0])], 1, None);
        let batch = vec![a, b];

        let input = RunHandler.make_batch_input(&batch).await;
        let output = RunHandler.forward(&batch, input).await;
        RunHandler.handle_outputs(batch, output).await;

        let expected = "ERR Model did not generate the expected batch size";
        assert_eq!(pending_a.await.unwrap_err().to_string(), expected);
        assert_eq!(pending_b.await.unwrap_err().to_string(), expected);
        assert_eq!(target.stats().snapshot().errors, 2);
    }
}
