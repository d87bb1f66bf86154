//! Result Processor: validates executor output and finalises the task.
//!
//! [`ResultIntake`] is the inbound side: it stores a delivered payload on a
//! running task and queues the processing job, or routes an executor-reported
//! failure to the failure handler.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use orchestration::{
    Envelope, FailureReason, Job, JobQueue, Lane, ResultSchema, SchemaError, Task, TaskId,
    TaskRepository, TaskStatus, TransitionPatch, UpdateOutcome,
};

use crate::failure::{FailureHandler, FailureOutcome};
use crate::intake::IntakeError;
use crate::lifecycle::{self, Transition, TransitionError};

/// Result of [`ResultProcessor::process`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub success: bool,
    /// The stored (sanitised) result on success.
    pub data: Option<Value>,
    pub errors: Vec<String>,
}

impl ProcessOutcome {
    fn succeeded(data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            errors,
        }
    }
}

pub struct ResultProcessor {
    tasks: Arc<dyn TaskRepository>,
}

impl ResultProcessor {
    pub fn new(tasks: Arc<dyn TaskRepository>) -> Self {
        Self { tasks }
    }

    /// Validates `task.result` and moves the task to Completed or Failed.
    ///
    /// A task that has already left `Running` (superseded, or finalised by a
    /// duplicate delivery) is a benign race: non-success, nothing written.
    pub async fn process(&self, task: &Task) -> Result<ProcessOutcome, TransitionError> {
        let payload = task.result.as_ref().unwrap_or(&Value::Null);

        let sanitized = if payload.is_null() {
            Err(SchemaError::NullPayload)
        } else {
            match ResultSchema::for_task_type(task.task_type) {
                Some(schema) => schema.validate_and_strip(payload).map(Some),
                None => Ok(None),
            }
        };

        match sanitized {
            Ok(clean) => {
                let patch = match &clean {
                    Some(clean) => TransitionPatch::with_result(clean.clone()),
                    None => TransitionPatch::default(),
                };
                match lifecycle::transition(self.tasks.as_ref(), task, TaskStatus::Completed, patch)
                    .await?
                {
                    Transition::Applied(done) => {
                        info!(task_id = %task.id, task_type = %task.task_type, "Task completed");
                        Ok(ProcessOutcome::succeeded(done.result))
                    }
                    Transition::AlreadyTerminal(status) | Transition::Stale(status) => {
                        Ok(ProcessOutcome::failed(vec![not_running(status)]))
                    }
                }
            }
            Err(rejected) => {
                let reason = rejected.to_string();
                let errors = match rejected.violations() {
                    [] => vec![reason.clone()],
                    violations => violations.iter().map(ToString::to_string).collect(),
                };
                match lifecycle::transition(
                    self.tasks.as_ref(),
                    task,
                    TaskStatus::Failed,
                    TransitionPatch::failure(reason.as_str()),
                )
                .await?
                {
                    Transition::Applied(_) => {
                        warn!(task_id = %task.id, %reason, "Task result rejected");
                        Ok(ProcessOutcome::failed(errors))
                    }
                    Transition::AlreadyTerminal(status) | Transition::Stale(status) => {
                        Ok(ProcessOutcome::failed(vec![not_running(status)]))
                    }
                }
            }
        }
    }

    /// The `ProcessTaskResult` job: processes the stored task if it is still
    /// running.
    pub async fn process_stored(&self, task_id: TaskId) -> Result<Option<ProcessOutcome>, TransitionError> {
        let Some(task) = self.tasks.get(task_id).await? else {
            warn!(%task_id, "Result for unknown task");
            return Ok(None);
        };
        if task.status != TaskStatus::Running {
            info!(%task_id, status = %task.status, "Task not running; result discarded");
            return Ok(None);
        }
        self.process(&task).await.map(Some)
    }
}

fn not_running(status: TaskStatus) -> String {
    format!("task is no longer running (status: {status})")
}

/// What happened to a delivered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Stored; processing is queued.
    Accepted,
    /// The task is no longer running; the result was dropped.
    Discarded(TaskStatus),
    NotFound,
}

/// Inbound executor results and executor-reported failures.
pub struct ResultIntake {
    tasks: Arc<dyn TaskRepository>,
    queue: Arc<dyn JobQueue>,
    failures: Arc<FailureHandler>,
}

impl ResultIntake {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        queue: Arc<dyn JobQueue>,
        failures: Arc<FailureHandler>,
    ) -> Self {
        Self {
            tasks,
            queue,
            failures,
        }
    }

    /// Stores `payload` on a running task and queues its processing.
    pub async fn submit(&self, task_id: TaskId, payload: Value) -> Result<SubmitOutcome, IntakeError> {
        match self
            .tasks
            .replace_result(task_id, TaskStatus::Running, payload)
            .await?
        {
            UpdateOutcome::Applied(_) => {
                self.queue
                    .enqueue(
                        Envelope::new(Job::ProcessTaskResult { task_id }),
                        Lane::Server,
                        None,
                    )
                    .await?;
                info!(%task_id, "Result received");
                Ok(SubmitOutcome::Accepted)
            }
            UpdateOutcome::Stale { actual } => {
                info!(%task_id, status = %actual, "Result for task that is no longer running; discarded");
                Ok(SubmitOutcome::Discarded(actual))
            }
            UpdateOutcome::NotFound => {
                warn!(%task_id, "Result for unknown task");
                Ok(SubmitOutcome::NotFound)
            }
        }
    }

    /// Fails a task on the executor's report (e.g. `scheduling_timeout`).
    pub async fn report_failure(
        &self,
        task_id: TaskId,
        reason: FailureReason,
        details: &str,
    ) -> Result<FailureOutcome, IntakeError> {
        Ok(self.failures.fail(task_id, reason, details, Vec::new()).await?)
    }
}
