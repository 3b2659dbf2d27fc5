use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use crate::error::Error;
use super::handler::BatchHandler;
use super::request::RunRequest;
use super::worker::QueueState;

/// How long an idle worker sleeps before looking at its queue again.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// What a worker should do after looking at its queue.
#[derive(Default)]
pub(crate) struct Selection {
    /// Requests to run as one backend call, in queue order.
    pub group: Vec<RunRequest>,
    /// Requests whose deadline passed while queued.
    pub expired: Vec<RunRequest>,
    /// Earliest moment a waiting group may become ready or a deadline passes.
    pub wake_at: Option<Instant>,
}

fn earliest(current: Option<Instant>, candidate: Instant) -> Option<Instant> {
    Some(current.map_or(candidate, |current| current.min(candidate)))
}

/// Picks the next group to run from `queue`.
///
/// Requests are considered in FIFO order. Each request not yet claimed seeds a
/// group and pulls in the following compatible requests until the next one
/// would overflow `batch_size`. A group runs when it is full, when it reached
/// `min_batch_size`, when no minimum is set, or once `min_batch_timeout` has
/// elapsed since its seed was queued. Groups that are not ready stay queued
/// and do not block groups of other models behind them.
pub(crate) fn select_group(queue: &mut VecDeque<RunRequest>, now: Instant) -> Selection {
    let mut selection = Selection::default();
    let (expired, live): (Vec<_>, Vec<_>) = queue.drain(..).partition(|r| r.is_expired(now));
    selection.expired = expired;

    let mut claimed = vec![false; live.len()];
    let mut chosen: Option<Vec<usize>> = None;
    for seed in 0..live.len() {
        if claimed[seed] {
            continue;
        }
        let head = &live[seed];
        let policy = head.target().policy();
        let mut members = vec![seed];
        let mut total = head.batch_size();
        let mut full = !policy.is_enabled() || total == 0 || total >= policy.batch_size;

        if !full {
            for idx in seed + 1..live.len() {
                if claimed[idx] || !head.can_join(&live[idx]) {
                    continue;
                }
                if total + live[idx].batch_size() > policy.batch_size {
                    full = true;
                    break;
                }
                members.push(idx);
                total += live[idx].batch_size();
                if total == policy.batch_size {
                    full = true;
                    break;
                }
            }
        }

        let waited_out = !policy.min_batch_timeout.is_zero()
            && now >= head.enqueued_at() + policy.min_batch_timeout;
        if full || policy.min_batch_size == 0 || total >= policy.min_batch_size || waited_out {
            chosen = Some(members);
            break;
        }
        if !policy.min_batch_timeout.is_zero() {
            selection.wake_at = earliest(selection.wake_at, head.enqueued_at() + policy.min_batch_timeout);
        }
        members.into_iter().for_each(|idx| claimed[idx] = true);
    }

    let chosen = chosen.unwrap_or_default();
    for (idx, request) in live.into_iter().enumerate() {
        if chosen.contains(&idx) {
            selection.group.push(request);
        } else {
            if let Some(deadline) = request.deadline() {
                selection.wake_at = earliest(selection.wake_at, deadline);
            }
            queue.push_back(request);
        }
    }
    selection
}

/// Drives one worker of a run queue until the queue is closed.
pub(crate) async fn batching_loop<BH>(handler: &BH, state: Arc<QueueState>)
where
    BH: BatchHandler<Request = RunRequest>,
{
    while state.is_open() {
        let notified = state.wakeup().notified();
        let mut notified = std::pin::pin!(notified);
        notified.as_mut().enable();

        let selection = state.select(Instant::now());

        for request in selection.expired {
            tracing::debug!(request = %request.id(), key = %request.target().key(), "request timed out in queue");
            request.complete(Err(Error::TimedOut));
        }

        if !selection.group.is_empty() {
            let input = handler.make_batch_input(&selection.group).await;
            let output = handler.forward(&selection.group, input).await;
            handler.handle_outputs(selection.group, output).await;
            continue;
        }

        let wake_at = selection.wake_at.unwrap_or_else(|| Instant::now() + IDLE_WAIT);
        // a timeout just means it is time to look at the queue again
        let _ = tokio::time::timeout_at(wake_at, notified).await;
    }
}
