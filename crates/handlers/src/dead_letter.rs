//! Operator actions on dead-letter entries: list, retry, dismiss.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use orchestration::{
    DeadLetterClaim, DeadLetterEntry, DeadLetterId, DeadLetterRepository, DeadLetterRetry,
    Envelope, Job, JobQueue, StoreError, Task, Timestamp, UserId,
};

/// A dead-letter action was refused or failed.
#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("dead-letter entry {0} not found")]
    NotFound(DeadLetterId),

    #[error("dead-letter entry {0} has already been retried")]
    AlreadyRetried(DeadLetterId),

    #[error("dead-letter entry {0} has already been dismissed")]
    AlreadyDismissed(DeadLetterId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DeadLetterError {
    fn from_claim(id: DeadLetterId, claim: DeadLetterClaim) -> Result<DeadLetterEntry, Self> {
        match claim {
            DeadLetterClaim::Claimed(entry) => Ok(entry),
            DeadLetterClaim::AlreadyRetried => Err(DeadLetterError::AlreadyRetried(id)),
            DeadLetterClaim::AlreadyDismissed => Err(DeadLetterError::AlreadyDismissed(id)),
            DeadLetterClaim::NotFound => Err(DeadLetterError::NotFound(id)),
        }
    }
}

pub struct DeadLetterService {
    dead_letters: Arc<dyn DeadLetterRepository>,
    queue: Arc<dyn JobQueue>,
}

impl DeadLetterService {
    pub fn new(dead_letters: Arc<dyn DeadLetterRepository>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            dead_letters,
            queue,
        }
    }

    /// Active entries, or every entry with `include_inactive`.
    pub async fn list(&self, include_inactive: bool) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        Ok(self.dead_letters.list(include_inactive).await?)
    }

    pub async fn get(&self, id: DeadLetterId) -> Result<DeadLetterEntry, DeadLetterError> {
        self.dead_letters
            .get(id)
            .await?
            .ok_or(DeadLetterError::NotFound(id))
    }

    /// Spawns a fresh queued task from the entry's snapshot.
    ///
    /// Marking the entry retried and creating the task are one store write:
    /// a failure leaves the entry active, and a second retry (or a retry
    /// racing a dismiss) fails without creating a task.
    pub async fn retry(&self, id: DeadLetterId, actor: UserId) -> Result<Task, DeadLetterError> {
        let entry = self.get(id).await?;
        let mut new = entry.task.to_new_task();
        new.result = executor_context(&entry.task);

        let task = match self
            .dead_letters
            .retry(id, new, actor, Timestamp::now())
            .await?
        {
            DeadLetterRetry::Spawned { task, .. } => task,
            DeadLetterRetry::Linked { task, .. } => {
                warn!(dead_letter_id = %id, task_id = %task.id, "Active task already covers the snapshot; linked it");
                return Ok(task);
            }
            DeadLetterRetry::AlreadyRetried => return Err(DeadLetterError::AlreadyRetried(id)),
            DeadLetterRetry::AlreadyDismissed => return Err(DeadLetterError::AlreadyDismissed(id)),
            DeadLetterRetry::NotFound => return Err(DeadLetterError::NotFound(id)),
        };

        if let Err(error) = self
            .queue
            .enqueue(Envelope::new(Job::ProcessTask { task_id: task.id }), task.lane(), None)
            .await
        {
            // The task stays Queued; the recovery sweep picks it up.
            warn!(task_id = %task.id, %error, "Could not queue retried task");
        }

        info!(
            dead_letter_id = %id,
            original_task_id = %entry.task_id,
            new_task_id = %task.id,
            actor = %actor,
            "Dead-letter entry retried"
        );
        Ok(task)
    }

    /// Acknowledges the entry without retrying it.
    pub async fn dismiss(&self, id: DeadLetterId, actor: UserId) -> Result<DeadLetterEntry, DeadLetterError> {
        let claim = self.dead_letters.dismiss(id, actor, Timestamp::now()).await?;
        let entry = DeadLetterError::from_claim(id, claim)?;
        info!(dead_letter_id = %id, task_id = %entry.task_id, actor = %actor, "Dead-letter entry dismissed");
        Ok(entry)
    }
}

// Intake-seeded keys survive a retry; executor output does not.
fn executor_context(task: &Task) -> Option<serde_json::Value> {
    let result = task.result.as_ref()?.as_object()?;
    let context: serde_json::Map<_, _> = ["intent", "question"]
        .into_iter()
        .filter_map(|key| result.get(key).map(|v| (key.to_string(), v.clone())))
        .collect();
    (!context.is_empty()).then_some(serde_json::Value::Object(context))
}
