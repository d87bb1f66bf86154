use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use orchestration::{Envelope, JobQueue, Lane, QueueError};

/// In-memory lanes shared by producers and workers. Cloning is cheap and
/// every clone addresses the same lanes.
#[derive(Clone, Default)]
pub struct LaneQueue {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    ready: Notify,
}

#[derive(Default)]
struct State {
    lanes: HashMap<Lane, VecDeque<Envelope>>,
    closed: bool,
}

impl LaneQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the next envelope on the first non-empty lane of `lanes`,
    /// in the given order. Returns `None` once the queue is closed.
    pub async fn next(&self, lanes: &[Lane]) -> Option<(Lane, Envelope)> {
        loop {
            // Registered before the check so a push in between is not missed.
            let notified = self.inner.ready.notified();
            {
                let mut state = self.inner.state.lock().await;
                if state.closed {
                    return None;
                }
                for lane in lanes {
                    if let Some(envelope) = state.lanes.get_mut(lane).and_then(VecDeque::pop_front) {
                        return Some((*lane, envelope));
                    }
                }
            }
            notified.await;
        }
    }

    /// Number of envelopes currently waiting on `lane`. Delayed envelopes
    /// are not counted until released.
    pub async fn len(&self, lane: Lane) -> usize {
        let state = self.inner.state.lock().await;
        state.lanes.get(&lane).map_or(0, VecDeque::len)
    }

    /// Stops accepting work and wakes every waiting worker.
    pub async fn close(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.ready.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.state.lock().await.closed
    }

    async fn push(&self, envelope: Envelope, lane: Lane) -> Result<(), QueueError> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.lanes.entry(lane).or_default().push_back(envelope);
        drop(state);
        self.inner.ready.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl JobQueue for LaneQueue {
    async fn enqueue(
        &self,
        envelope: Envelope,
        lane: Lane,
        delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        let delay = match delay {
            Some(delay) if !delay.is_zero() => delay,
            _ => return self.push(envelope, lane).await,
        };

        if self.is_closed().await {
            return Err(QueueError::Closed);
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let job = envelope.job.name();
            if queue.push(envelope, lane).await.is_err() {
                debug!(job, queue = %lane, "Queue closed before delayed job was released");
            }
        });
        Ok(())
    }
}
