//! Job execution with uniform retry, back-off and terminal failure handling.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use orchestration::{
    Alert, AlertSeverity, AttemptRecord, BackoffSchedule, Directory, Envelope, ErrorClass,
    ExternalError, FailureReason, Job, JobQueue, Lane, Notifier, ProjectId, QueueError,
    RetryDecision, RetryPolicy, StoreError, TaskId, TaskLocation, TaskRepository, Timestamp,
};

use crate::dispatcher::TaskDispatcher;
use crate::failure::FailureHandler;
use crate::lifecycle::TransitionError;
use crate::results::ResultProcessor;

/// A job attempt failed.
#[derive(Debug, Error)]
pub enum JobError {
    /// The runner could not be launched.
    #[error("runner launch failed: {0}")]
    Launch(#[source] ExternalError),

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("project {0} has no provider project mapping")]
    UnknownProject(ProjectId),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),
}

impl JobError {
    fn external(&self) -> Option<&ExternalError> {
        match self {
            JobError::Launch(e) | JobError::External(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the retry decision for this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            JobError::Launch(e) | JobError::External(e) => e.retry_policy(),
            JobError::Store(e) | JobError::Transition(TransitionError::Store(e)) => e.retry_policy(),
            JobError::Queue(_) => RetryPolicy::Retryable { after: None },
            JobError::Transition(_) | JobError::UnknownProject(_) | JobError::TaskNotFound(_) => {
                RetryPolicy::NonRetryable
            }
        }
    }

    /// Returns `true` when a provider credential was rejected.
    pub fn is_authentication(&self) -> bool {
        self.external().is_some_and(ExternalError::is_authentication)
    }

    /// The failure reason for a non-retried hard failure.
    pub fn failure_reason(&self) -> FailureReason {
        match (self, self.external().map(|e| e.class)) {
            (_, Some(ErrorClass::InvalidRequest)) => FailureReason::InvalidRequest,
            (_, Some(ErrorClass::ContextExceeded)) => FailureReason::ContextExceeded,
            (JobError::Launch(_), _) => FailureReason::PipelineTriggerFailed,
            _ => FailureReason::Generic,
        }
    }
}

/// What happened to one delivered envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    /// Re-enqueued for another attempt.
    Retried { attempt: u32, delay: std::time::Duration },
    /// The task failed permanently.
    Failed(FailureReason),
}

/// Executes jobs pulled off a lane.
pub struct JobRunner {
    tasks: Arc<dyn TaskRepository>,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
    queue: Arc<dyn JobQueue>,
    dispatcher: TaskDispatcher,
    results: ResultProcessor,
    failures: Arc<FailureHandler>,
    backoff: BackoffSchedule,
}

impl JobRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        queue: Arc<dyn JobQueue>,
        dispatcher: TaskDispatcher,
        results: ResultProcessor,
        failures: Arc<FailureHandler>,
        backoff: BackoffSchedule,
    ) -> Self {
        Self {
            tasks,
            directory,
            notifier,
            queue,
            dispatcher,
            results,
            failures,
            backoff,
        }
    }

    /// Runs one attempt of `envelope`, which was taken from `lane`.
    ///
    /// Transient failures are re-enqueued on the same lane after the back-off
    /// delay for this attempt. Everything else, and a spent retry budget,
    /// fails the task through the failure handler.
    #[instrument(skip_all, fields(job = envelope.job.name(), task_id = %envelope.job.task_id(), attempt = envelope.attempt, queue = %lane))]
    pub async fn run(&self, lane: Lane, envelope: Envelope) -> JobOutcome {
        let error = match self.execute(&envelope).await {
            Ok(()) => return JobOutcome::Completed,
            Err(error) => error,
        };

        let task_id = envelope.job.task_id();
        let record = AttemptRecord::new(envelope.attempt, Timestamp::now(), &error.to_string());

        if error.is_authentication() {
            self.alert_authentication(task_id, &error).await;
        }

        let reason = match (error.retry_policy(), envelope.job.is_retryable()) {
            (RetryPolicy::Retryable { after }, true) => match self.backoff.decide(envelope.attempt) {
                RetryDecision::RetryAfter(delay) => {
                    let delay = after.map_or(delay, |after| after.max(delay));
                    let attempt = envelope.attempt;
                    warn!(%error, ?delay, "Transient failure; retrying");
                    match self
                        .queue
                        .enqueue(envelope.clone().next_attempt(record.clone()), lane, Some(delay))
                        .await
                    {
                        Ok(()) => {
                            return JobOutcome::Retried {
                                attempt: attempt + 1,
                                delay,
                            }
                        }
                        Err(queue_error) => {
                            error!(%queue_error, "Could not re-enqueue job; failing task");
                            FailureReason::Generic
                        }
                    }
                }
                RetryDecision::Exhausted => FailureReason::MaxRetriesExceeded,
            },
            _ => error.failure_reason(),
        };

        if let Job::NotifyFailure { .. } = envelope.job {
            // Notices never re-fail the task they report on.
            warn!(%error, "Failure notice not delivered");
            return JobOutcome::Failed(reason);
        }

        let mut attempts = envelope.history;
        attempts.push(record);
        match self
            .failures
            .fail(task_id, reason, &error.to_string(), attempts)
            .await
        {
            Ok(outcome) => info!(?outcome, %reason, "Job failed permanently"),
            Err(fail_error) => error!(%fail_error, %reason, "Could not record task failure"),
        }
        JobOutcome::Failed(reason)
    }

    async fn execute(&self, envelope: &Envelope) -> Result<(), JobError> {
        match &envelope.job {
            Job::ProcessTask { task_id } => {
                self.dispatcher.start(*task_id, envelope.attempt).await?;
            }
            Job::ProcessTaskResult { task_id } => {
                self.results.process_stored(*task_id).await?;
            }
            Job::NotifyFailure {
                task_id,
                reason,
                details,
            } => self.notify_failure(*task_id, *reason, details).await?,
        }
        Ok(())
    }

    async fn notify_failure(
        &self,
        task_id: TaskId,
        reason: FailureReason,
        details: &str,
    ) -> Result<(), JobError> {
        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or(JobError::TaskNotFound(task_id))?;
        let project = self
            .directory
            .external_project(task.project_id)
            .await?
            .ok_or(JobError::UnknownProject(task.project_id))?;
        let location = TaskLocation {
            external_project_id: project,
            mr_iid: task.mr_iid,
            issue_iid: task.issue_iid,
        };
        self.notifier
            .notify_failure(&location, reason, details)
            .await?;
        info!(%task_id, %reason, "Failure notice posted");
        Ok(())
    }

    async fn alert_authentication(&self, task_id: TaskId, error: &JobError) {
        let alert = Alert {
            severity: AlertSeverity::Critical,
            kind: "authentication_failure",
            message: format!("Provider rejected credentials while processing task {task_id}: {error}"),
        };
        if let Err(alert_error) = self.notifier.alert(&alert).await {
            error!(%alert_error, "Could not deliver authentication alert");
        }
    }
}
