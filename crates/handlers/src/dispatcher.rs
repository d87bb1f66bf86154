//! Task Dispatcher: decides how a queued task executes and starts it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use orchestration::{
    strategy, BranchName, Directory, Envelope, ExecutionMode, ExternalProjectId, Job, JobQueue,
    Lane, LaunchRequest, PipelineId, ReviewStrategy, RunnerLauncher, SourceControl, StrategyPlan,
    Task, TaskId, TaskRepository, TaskStatus, Timestamp, TransitionPatch, UpdateOutcome,
};

use crate::jobs::JobError;
use crate::lifecycle::{self, Transition};

/// What [`TaskDispatcher::start`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// The runner was launched and its pipeline recorded.
    Launched { task: Task, pipeline: PipelineId },
    /// The task is running inline; result processing has been queued.
    ServerQueued(Task),
    /// Nothing to do: the task is gone, finished, already launched, or
    /// another job holds its launch claim.
    Skipped(TaskStatus),
}

pub struct TaskDispatcher {
    tasks: Arc<dyn TaskRepository>,
    directory: Arc<dyn Directory>,
    source_control: Arc<dyn SourceControl>,
    launcher: Arc<dyn RunnerLauncher>,
    queue: Arc<dyn JobQueue>,
    claim_ttl: Duration,
}

impl TaskDispatcher {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        directory: Arc<dyn Directory>,
        source_control: Arc<dyn SourceControl>,
        launcher: Arc<dyn RunnerLauncher>,
        queue: Arc<dyn JobQueue>,
        claim_ttl: Duration,
    ) -> Self {
        Self {
            tasks,
            directory,
            source_control,
            launcher,
            queue,
            claim_ttl,
        }
    }

    /// Starts a queued task, or re-launches a runner task whose launch did not
    /// complete. Safe to call more than once for the same task.
    ///
    /// `attempt` is the job attempt doing the work. The launcher is only
    /// called under a launch claim, which the same job's later attempts may
    /// take over and any other job must wait out.
    pub async fn start(&self, task_id: TaskId, attempt: u32) -> Result<StartOutcome, JobError> {
        let Some(task) = self.tasks.get(task_id).await? else {
            warn!(%task_id, "Task vanished before dispatch");
            return Err(JobError::TaskNotFound(task_id));
        };

        match (task.status, task.execution_mode()) {
            (TaskStatus::Queued, ExecutionMode::Runner) => self.start_runner(task, attempt).await,
            (TaskStatus::Queued, ExecutionMode::Server) => self.start_server(task).await,
            (TaskStatus::Running, ExecutionMode::Runner) if task.pipeline_id.is_none() => {
                if !task.launch_open_to(attempt, Timestamp::now()) {
                    info!(%task_id, attempt, "Launch claimed by another job; skipping");
                    return Ok(StartOutcome::Skipped(task.status));
                }
                info!(%task_id, attempt, "Re-launching runner for running task without a pipeline");
                let strategy = match task.result_str("strategy").and_then(ReviewStrategy::parse) {
                    Some(strategy) => strategy,
                    None => self.resolve_strategy(&task).await?,
                };
                self.launch(task, strategy, attempt).await
            }
            (status, _) => {
                info!(%task_id, %status, "Task not dispatchable; skipping");
                Ok(StartOutcome::Skipped(status))
            }
        }
    }

    async fn start_runner(&self, task: Task, attempt: u32) -> Result<StartOutcome, JobError> {
        let strategy = self.resolve_strategy(&task).await?;
        let patch = TransitionPatch::with_result(with_strategy(task.result.clone(), strategy));

        match lifecycle::transition(self.tasks.as_ref(), &task, TaskStatus::Running, patch).await? {
            Transition::Applied(running) => {
                info!(task_id = %running.id, strategy = %strategy, "Task running");
                self.launch(running, strategy, attempt).await
            }
            Transition::AlreadyTerminal(status) | Transition::Stale(status) => {
                Ok(StartOutcome::Skipped(status))
            }
        }
    }

    async fn start_server(&self, task: Task) -> Result<StartOutcome, JobError> {
        let running = match lifecycle::transition(
            self.tasks.as_ref(),
            &task,
            TaskStatus::Running,
            TransitionPatch::default(),
        )
        .await?
        {
            Transition::Applied(running) => running,
            Transition::AlreadyTerminal(status) | Transition::Stale(status) => {
                return Ok(StartOutcome::Skipped(status))
            }
        };

        self.queue
            .enqueue(
                Envelope::new(Job::ProcessTaskResult { task_id: running.id }),
                Lane::Server,
                None,
            )
            .await?;
        info!(task_id = %running.id, "Task running inline");
        Ok(StartOutcome::ServerQueued(running))
    }

    async fn launch(
        &self,
        task: Task,
        strategy: ReviewStrategy,
        attempt: u32,
    ) -> Result<StartOutcome, JobError> {
        let now = Timestamp::now();
        let task = match self
            .tasks
            .claim_launch(task.id, attempt, now, now.plus(self.claim_ttl))
            .await?
        {
            UpdateOutcome::Applied(task) => task,
            UpdateOutcome::Stale { actual } => {
                info!(task_id = %task.id, attempt, %actual, "Launch claimed by another job; skipping");
                return Ok(StartOutcome::Skipped(actual));
            }
            UpdateOutcome::NotFound => return Err(JobError::TaskNotFound(task.id)),
        };

        let project = self.external_project(&task).await?;
        let request = LaunchRequest {
            task_id: task.id,
            task_type: task.task_type,
            project,
            git_ref: self.git_ref(&task, project).await,
            intent: task.result_str("intent").map(str::to_string),
            strategy,
            question: task.result_str("question").map(str::to_string),
            mr_iid: task.mr_iid,
            issue_iid: task.issue_iid,
        };

        let pipeline = self
            .launcher
            .launch(&request)
            .await
            .map_err(JobError::Launch)?;

        match self.tasks.record_pipeline(task.id, pipeline).await? {
            UpdateOutcome::Applied(task) => {
                info!(task_id = %task.id, pipeline_id = %pipeline, "Runner launched");
                Ok(StartOutcome::Launched { task, pipeline })
            }
            UpdateOutcome::Stale { actual } => {
                // Superseded, or launched by a job whose claim had lapsed. Ours is orphaned.
                info!(task_id = %task.id, %actual, pipeline_id = %pipeline, "Pipeline lost the race to record; cancelling");
                if let Err(error) = self.source_control.cancel_pipeline(project, pipeline).await {
                    warn!(task_id = %task.id, pipeline_id = %pipeline, %error, "Pipeline cancellation failed");
                }
                Ok(StartOutcome::Skipped(actual))
            }
            UpdateOutcome::NotFound => Err(JobError::TaskNotFound(task.id)),
        }
    }

    /// Strategy for a runner task. A failed changed-file lookup falls back to
    /// mixed review.
    async fn resolve_strategy(&self, task: &Task) -> Result<ReviewStrategy, JobError> {
        match (StrategyPlan::for_task(task.task_type, task.mr_iid.is_some()), task.mr_iid) {
            (StrategyPlan::Fixed(strategy), _) => Ok(strategy),
            (StrategyPlan::FromChangedFiles, Some(mr)) => {
                let project = self.external_project(task).await?;
                match self.source_control.changed_paths(project, mr).await {
                    Ok(paths) => Ok(strategy::resolve_from_paths(&paths)),
                    Err(error) => {
                        warn!(task_id = %task.id, %error, "Changed-file lookup failed; using mixed review");
                        Ok(ReviewStrategy::MixedReview)
                    }
                }
            }
            (StrategyPlan::FromChangedFiles, None) => Ok(ReviewStrategy::BackendReview),
        }
    }

    async fn external_project(&self, task: &Task) -> Result<ExternalProjectId, JobError> {
        self.directory
            .external_project(task.project_id)
            .await?
            .ok_or(JobError::UnknownProject(task.project_id))
    }

    async fn git_ref(&self, task: &Task, project: ExternalProjectId) -> BranchName {
        let Some(mr) = task.mr_iid else {
            return BranchName::default_branch();
        };
        match self
            .source_control
            .merge_request_source_branch(project, mr)
            .await
        {
            Ok(branch) => branch,
            Err(error) => {
                warn!(task_id = %task.id, %error, "Source branch lookup failed; using default branch");
                BranchName::default_branch()
            }
        }
    }
}

// Adds the strategy to the executor context, keeping what intake seeded.
fn with_strategy(result: Option<serde_json::Value>, strategy: ReviewStrategy) -> serde_json::Value {
    let mut object = match result {
        Some(serde_json::Value::Object(object)) => object,
        _ => serde_json::Map::new(),
    };
    object.insert("strategy".to_string(), strategy.as_str().into());
    serde_json::Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strategy_is_merged_into_executor_context() {
        let merged = with_strategy(
            Some(json!({"intent": "ask_command", "question": "why?"})),
            ReviewStrategy::BackendReview,
        );
        assert_eq!(
            merged,
            json!({"intent": "ask_command", "question": "why?", "strategy": "backend-review"})
        );
        assert_eq!(
            with_strategy(None, ReviewStrategy::MixedReview),
            json!({"strategy": "mixed-review"})
        );
    }
}
