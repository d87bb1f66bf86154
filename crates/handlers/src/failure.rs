//! Terminal failure handling: fail the task, archive it, queue a notice.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use orchestration::{
    AttemptRecord, DeadLetterId, DeadLetterInsert, DeadLetterRepository, Envelope, FailureReason,
    Job, JobQueue, Lane, NewDeadLetter, TaskId, TaskRepository, TaskStatus, Timestamp,
    TransitionCheck,
};

use crate::lifecycle::TransitionError;

/// Result of [`FailureHandler::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The task is now Failed and archived under this entry.
    DeadLettered(DeadLetterId),
    /// The task was already terminal; nothing was written.
    AlreadyTerminal(TaskStatus),
    NotFound,
}

/// Moves a task to Failed and archives it in the dead-letter store.
pub struct FailureHandler {
    tasks: Arc<dyn TaskRepository>,
    dead_letters: Arc<dyn DeadLetterRepository>,
    queue: Arc<dyn JobQueue>,
}

impl FailureHandler {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        dead_letters: Arc<dyn DeadLetterRepository>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            tasks,
            dead_letters,
            queue,
        }
    }

    /// Fails `task_id` permanently.
    ///
    /// The Failed transition and the dead-letter entry are written together,
    /// so a store error leaves the task as it was and a rerun can finish the
    /// job. A task that is already terminal (a concurrent success or
    /// supersede won) is left alone.
    pub async fn fail(
        &self,
        task_id: TaskId,
        reason: FailureReason,
        details: &str,
        attempts: Vec<AttemptRecord>,
    ) -> Result<FailureOutcome, TransitionError> {
        let failure = NewDeadLetter {
            failure_reason: reason,
            error_details: details.to_string(),
            attempts,
        };

        // Statuses only move forward, so a lost race is retried at most a
        // couple of times before the task is terminal.
        let entry = loop {
            let Some(task) = self.tasks.get(task_id).await? else {
                warn!(%task_id, %reason, "Cannot fail missing task");
                return Ok(FailureOutcome::NotFound);
            };
            match task.status.check_transition(TaskStatus::Failed) {
                TransitionCheck::Allowed => {}
                TransitionCheck::AlreadyTerminal => {
                    info!(%task_id, status = %task.status, %reason, "Task already terminal; failure ignored");
                    return Ok(FailureOutcome::AlreadyTerminal(task.status));
                }
                TransitionCheck::Illegal => {
                    return Err(TransitionError::Illegal {
                        task: task_id,
                        from: task.status,
                        to: TaskStatus::Failed,
                    })
                }
            }

            match self
                .dead_letters
                .fail_and_archive(task_id, &[task.status], failure.clone(), Timestamp::now())
                .await?
            {
                DeadLetterInsert::Archived(entry) => break entry,
                DeadLetterInsert::Stale { actual } => {
                    debug!(%task_id, expected = %task.status, %actual, "Task moved while failing; re-reading");
                }
                DeadLetterInsert::NotFound => return Ok(FailureOutcome::NotFound),
            }
        };
        let id = entry.id;
        error!(%task_id, %reason, dead_letter_id = %id, details, "Task failed permanently");

        if entry.task.has_discussion_target() {
            let job = Job::NotifyFailure {
                task_id,
                reason,
                details: details.to_string(),
            };
            if let Err(error) = self.queue.enqueue(Envelope::new(job), Lane::Server, None).await {
                warn!(%task_id, %error, "Could not queue failure notice");
            }
        }

        Ok(FailureOutcome::DeadLettered(id))
    }
}
