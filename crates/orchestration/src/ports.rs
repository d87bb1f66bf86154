//! Port traits: the seams between the orchestration core and infrastructure.
//!
//! Persistence ports report uniqueness conflicts and lost races as explicit
//! outcomes, never as errors. External ports return a classified
//! [`ExternalError`] so the job runner can apply the retry policy.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    AppendOutcome, BranchName, CommentId, CommitSha, DeadLetterClaim, DeadLetterEntry,
    DeadLetterId, DeadLetterInsert, DeadLetterRetry, Envelope, EventLogEntry, EventUuid, ExternalError,
    ExternalProjectId, ExternalUserId, FailureReason, IssueIid, Lane, MergeRequestIid,
    NewDeadLetter, NewTask, PipelineId, ProjectId, QueueError, ReviewStrategy, StoreError, Task,
    TaskId, TaskLocation, TaskStatus, TaskType, Timestamp, TransitionPatch, UserId,
};

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Result of creating a task.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateTask {
    Created(Task),
    /// A non-terminal task already exists for the same (project, MR, commit).
    ActiveDuplicate(TaskId),
}

/// Result of a conditional task update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The update applied; the updated row is returned.
    Applied(Task),
    /// The row was not in an expected pre-state.
    Stale { actual: TaskStatus },
    NotFound,
}

/// Task storage.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Inserts a task in `Received`. Rejects a second non-terminal task for
    /// the same (project, MR, commit) when all three are known.
    async fn create(&self, task: NewTask) -> Result<CreateTask, StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Sets the status to `to` only if the current status is one of `from`.
    /// Maintains `started_at`, `completed_at` and `updated_at`.
    async fn transition(
        &self,
        id: TaskId,
        from: &[TaskStatus],
        to: TaskStatus,
        patch: TransitionPatch,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Replaces the result payload only if the status is `expected`.
    async fn replace_result(
        &self,
        id: TaskId,
        expected: TaskStatus,
        result: serde_json::Value,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Claims the runner launch for job `attempt` until `until`.
    ///
    /// Applies only if [`Task::launch_open_to`] holds for `attempt` at `now`.
    /// A task that is Running but shut out by another claim, or already
    /// launched, is `Stale { actual: Running }`.
    async fn claim_launch(
        &self,
        id: TaskId,
        attempt: u32,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Records the external pipeline only if the task is `Running` and has
    /// no pipeline yet.
    async fn record_pipeline(
        &self,
        id: TaskId,
        pipeline: PipelineId,
    ) -> Result<UpdateOutcome, StoreError>;

    /// The non-terminal task for an exact (project, MR, commit), if any.
    async fn find_active_for_commit(
        &self,
        project: ProjectId,
        mr: MergeRequestIid,
        commit: &CommitSha,
    ) -> Result<Option<TaskId>, StoreError>;

    /// Atomically moves every Queued or Running task for (project, MR) to
    /// `Superseded` and returns those tasks as they were before the update.
    async fn supersede_for_merge_request(
        &self,
        project: ProjectId,
        mr: MergeRequestIid,
    ) -> Result<Vec<Task>, StoreError>;

    /// Tasks currently in `status`, oldest first.
    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError>;
}

/// The append-only event log.
#[async_trait]
pub trait EventLogRepository: Send + Sync {
    async fn contains(&self, project: ProjectId, uuid: &EventUuid) -> Result<bool, StoreError>;

    /// Appends a row. A (project, UUID) conflict is `AlreadyLogged`.
    async fn append(&self, entry: EventLogEntry) -> Result<AppendOutcome, StoreError>;
}

/// The dead-letter archive.
#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    /// Moves the task to `Failed` if its status is one of `from`, and
    /// archives the Failed row, as one atomic write. Either both happen or
    /// neither does, so at most one entry exists per task.
    async fn fail_and_archive(
        &self,
        task: TaskId,
        from: &[TaskStatus],
        failure: NewDeadLetter,
        at: Timestamp,
    ) -> Result<DeadLetterInsert, StoreError>;

    async fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterEntry>, StoreError>;

    /// Entries newest first; `include_inactive` adds retried and dismissed
    /// entries.
    async fn list(&self, include_inactive: bool) -> Result<Vec<DeadLetterEntry>, StoreError>;

    /// Retries an active entry as one atomic write: creates `task` directly
    /// in `Queued` (or finds the active task already covering its commit)
    /// and marks the entry retried with a reference to it.
    async fn retry(
        &self,
        id: DeadLetterId,
        task: NewTask,
        actor: UserId,
        at: Timestamp,
    ) -> Result<DeadLetterRetry, StoreError>;

    /// Marks the entry dismissed if it is neither retried nor dismissed.
    async fn dismiss(
        &self,
        id: DeadLetterId,
        actor: UserId,
        at: Timestamp,
    ) -> Result<DeadLetterClaim, StoreError>;
}

/// Lookups of optional relations.
#[async_trait]
pub trait Directory: Send + Sync {
    /// The internal user behind a provider account, if known.
    async fn resolve_user(&self, external: ExternalUserId) -> Result<Option<UserId>, StoreError>;

    /// The provider project id for an internal project, if known.
    async fn external_project(
        &self,
        project: ProjectId,
    ) -> Result<Option<ExternalProjectId>, StoreError>;
}

// ---------------------------------------------------------------------------
// Source control and execution
// ---------------------------------------------------------------------------

/// Where to post a discussion note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteTarget {
    MergeRequest {
        project: ExternalProjectId,
        iid: MergeRequestIid,
    },
    Issue {
        project: ExternalProjectId,
        iid: IssueIid,
    },
}

impl NoteTarget {
    /// The MR target if the location has one, otherwise the issue target.
    pub fn for_location(location: &TaskLocation) -> Option<Self> {
        let project = location.external_project_id;
        match (location.mr_iid, location.issue_iid) {
            (Some(iid), _) => Some(NoteTarget::MergeRequest { project, iid }),
            (None, Some(iid)) => Some(NoteTarget::Issue { project, iid }),
            (None, None) => None,
        }
    }
}

/// The source-control provider API.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// The open merge request whose source branch is `branch`, if any.
    async fn find_open_merge_request(
        &self,
        project: ExternalProjectId,
        branch: &BranchName,
    ) -> Result<Option<MergeRequestIid>, ExternalError>;

    async fn cancel_pipeline(
        &self,
        project: ExternalProjectId,
        pipeline: PipelineId,
    ) -> Result<(), ExternalError>;

    /// Paths touched by the merge request (new path, falling back to old).
    async fn changed_paths(
        &self,
        project: ExternalProjectId,
        mr: MergeRequestIid,
    ) -> Result<Vec<String>, ExternalError>;

    async fn merge_request_source_branch(
        &self,
        project: ExternalProjectId,
        mr: MergeRequestIid,
    ) -> Result<BranchName, ExternalError>;

    async fn post_note(&self, target: NoteTarget, body: &str) -> Result<CommentId, ExternalError>;
}

/// Everything the runner needs to execute a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub project: ExternalProjectId,
    pub git_ref: BranchName,
    pub intent: Option<String>,
    pub strategy: ReviewStrategy,
    pub question: Option<String>,
    pub mr_iid: Option<MergeRequestIid>,
    pub issue_iid: Option<IssueIid>,
}

impl LaunchRequest {
    /// Pipeline variables describing the task, in a stable order.
    pub fn variables(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            ("HOOKLINE_TASK_ID", self.task_id.to_string()),
            ("HOOKLINE_TASK_TYPE", self.task_type.as_str().to_string()),
            (
                "HOOKLINE_INTENT",
                self.intent
                    .clone()
                    .unwrap_or_else(|| self.task_type.as_str().to_string()),
            ),
            ("HOOKLINE_STRATEGY", self.strategy.as_str().to_string()),
            ("HOOKLINE_SKILLS", self.strategy.skills().join(",")),
        ];
        if let Some(question) = &self.question {
            vars.push(("HOOKLINE_QUESTION", question.clone()));
        }
        if let Some(mr) = self.mr_iid {
            vars.push(("HOOKLINE_MR_IID", mr.to_string()));
        }
        if let Some(issue) = self.issue_iid {
            vars.push(("HOOKLINE_ISSUE_IID", issue.to_string()));
        }
        vars
    }
}

/// Starts runner-mode executions.
#[async_trait]
pub trait RunnerLauncher: Send + Sync {
    /// Launches the runner and returns its pipeline id.
    async fn launch(&self, request: &LaunchRequest) -> Result<PipelineId, ExternalError>;
}

// ---------------------------------------------------------------------------
// Notification and queueing
// ---------------------------------------------------------------------------

/// Severity of an operational alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// An operational alert for whoever runs the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub severity: AlertSeverity,
    /// Stable machine-readable kind, e.g. `authentication_failure`.
    pub kind: &'static str,
    pub message: String,
}

/// Best-effort notification sink. Never a correctness dependency.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Posts a failure notice on the task's MR or issue.
    async fn notify_failure(
        &self,
        location: &TaskLocation,
        reason: FailureReason,
        details: &str,
    ) -> Result<(), ExternalError>;

    async fn alert(&self, alert: &Alert) -> Result<(), ExternalError>;
}

/// The queueing substrate.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job on `lane`, released after `delay` when given.
    async fn enqueue(
        &self,
        envelope: Envelope,
        lane: Lane,
        delay: Option<Duration>,
    ) -> Result<(), QueueError>;
}
