//! Periodic maintenance: queue expiry and lost-job recovery.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use orchestration::{
    Envelope, FailureReason, Job, JobQueue, QueueError, StoreError, Task, TaskRepository,
    TaskStatus, Timestamp,
};

use crate::failure::{FailureHandler, FailureOutcome};

pub struct Sweeper {
    tasks: Arc<dyn TaskRepository>,
    queue: Arc<dyn JobQueue>,
    failures: Arc<FailureHandler>,
    queue_ttl: Duration,
    claim_ttl: Duration,
}

impl Sweeper {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        queue: Arc<dyn JobQueue>,
        failures: Arc<FailureHandler>,
        queue_ttl: Duration,
        claim_ttl: Duration,
    ) -> Self {
        Self {
            tasks,
            queue,
            failures,
            queue_ttl,
            claim_ttl,
        }
    }

    /// Fails every task that has waited in `Queued` longer than the TTL.
    /// Returns how many were expired.
    pub async fn expire_queued(&self, now: Timestamp) -> Result<usize, StoreError> {
        let mut expired = 0;
        for task in self.tasks.list_by_status(TaskStatus::Queued).await? {
            let waited = task.updated_at.age_at(now);
            if waited <= self.queue_ttl {
                continue;
            }
            let details = format!("queued for {}s without being picked up", waited.as_secs());
            match self
                .failures
                .fail(task.id, FailureReason::Expired, &details, Vec::new())
                .await
            {
                Ok(FailureOutcome::DeadLettered(_)) => expired += 1,
                Ok(_) => {}
                Err(error) => warn!(task_id = %task.id, %error, "Could not expire task"),
            }
        }
        if expired > 0 {
            info!(count = expired, "Expired queued tasks");
        }
        Ok(expired)
    }

    /// Re-enqueues work whose job may have been lost: every Queued task, and
    /// every Running runner task without a pipeline whose launch has stalled.
    /// Returns how many jobs were enqueued.
    pub async fn recover(&self, now: Timestamp) -> Result<usize, StoreError> {
        let mut candidates = self.tasks.list_by_status(TaskStatus::Queued).await?;
        candidates.extend(
            self.tasks
                .list_by_status(TaskStatus::Running)
                .await?
                .into_iter()
                .filter(|task| self.launch_stalled(task, now)),
        );

        let mut enqueued = 0;
        for task in candidates {
            match self.enqueue(&task).await {
                Ok(()) => enqueued += 1,
                Err(QueueError::Closed) => break,
                Err(error) => warn!(task_id = %task.id, %error, "Could not re-enqueue task"),
            }
        }
        if enqueued > 0 {
            info!(count = enqueued, "Recovered tasks");
        }
        Ok(enqueued)
    }

    // A launch in flight, or a holder waiting out its back-off, keeps the
    // task out of recovery until its claim lapses.
    fn launch_stalled(&self, task: &Task, now: Timestamp) -> bool {
        task.launch_open_to(Envelope::FIRST_ATTEMPT, now)
            && task.updated_at.age_at(now) >= self.claim_ttl
    }

    async fn enqueue(&self, task: &Task) -> Result<(), QueueError> {
        self.queue
            .enqueue(Envelope::new(Job::ProcessTask { task_id: task.id }), task.lane(), None)
            .await
    }
}
