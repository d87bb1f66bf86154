//! The [`Task`] entity and its lifecycle.
//!
//! A task is one orchestrated unit of automation work. Its status moves along
//! a fixed directed graph:
//!
//! ```text
//! Received ──► Queued ──► Running ──► Completed
//!                │           │
//!                ├──► Failed ◄┤
//!                └─► Superseded ◄┘
//! ```
//!
//! Completed, Failed and Superseded are terminal. The graph is enforced twice:
//! here, as a pure check, and in the persistence layer, as a conditional
//! update keyed on the observed pre-state.

use serde::{Deserialize, Serialize};

use crate::jobs::Lane;
use crate::{
    CommentId, CommitSha, ExternalProjectId, IssueIid, MergeRequestIid, PipelineId, ProjectId,
    TaskId, Timestamp, UserId,
};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created from an accepted event, not yet on a queue.
    Received,
    /// Waiting on a priority lane for a worker.
    Queued,
    /// Picked up by a worker; executing inline or in an external runner.
    Running,
    /// Result validated and stored.
    Completed,
    /// Permanently failed; see `error_reason`.
    Failed,
    /// Made obsolete by newer code for the same merge request.
    Superseded,
}

/// Outcome of checking a requested status change against the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    /// The edge exists in the graph.
    Allowed,
    /// Both the current and the requested status are terminal. Callers treat
    /// this as a benign no-op (typically a race with a concurrent finaliser).
    AlreadyTerminal,
    /// The edge does not exist. Callers must surface this loudly.
    Illegal,
}

impl TaskStatus {
    /// Statuses in which a task still occupies its (project, MR, commit) slot.
    pub const ACTIVE: [TaskStatus; 3] = [TaskStatus::Received, TaskStatus::Queued, TaskStatus::Running];

    /// Statuses that newer code for the same MR may supersede.
    pub const SUPERSEDABLE: [TaskStatus; 2] = [TaskStatus::Queued, TaskStatus::Running];

    /// Returns the stable snake_case name used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Received => "received",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Superseded => "superseded",
        }
    }

    /// Parses the storage name produced by [`TaskStatus::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "received" => TaskStatus::Received,
            "queued" => TaskStatus::Queued,
            "running" => TaskStatus::Running,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            "superseded" => TaskStatus::Superseded,
            _ => return None,
        })
    }

    /// Returns `true` for Completed, Failed and Superseded.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Superseded
        )
    }

    /// Returns `true` if `self -> to` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Received, Queued)
                | (Queued, Running)
                | (Queued, Failed)
                | (Queued, Superseded)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Superseded)
        )
    }

    /// Classifies a requested change from `self` to `to`.
    pub fn check_transition(self, to: TaskStatus) -> TransitionCheck {
        if self.can_transition_to(to) {
            TransitionCheck::Allowed
        } else if self.is_terminal() && to.is_terminal() {
            TransitionCheck::AlreadyTerminal
        } else {
            TransitionCheck::Illegal
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Type, mode, priority, origin
// ---------------------------------------------------------------------------

/// How a task is executed once a worker picks it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Handled inline by the server (e.g. issue creation via one API call).
    Server,
    /// Delegated to an external, possibly long-running, runner environment.
    Runner,
}

/// The kind of automation work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CodeReview,
    SecurityAudit,
    FeatureDev,
    UiAdjustment,
    IssueDiscussion,
    PrdCreation,
    DeepAnalysis,
}

impl TaskType {
    /// Returns the stable snake_case name used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::CodeReview => "code_review",
            TaskType::SecurityAudit => "security_audit",
            TaskType::FeatureDev => "feature_dev",
            TaskType::UiAdjustment => "ui_adjustment",
            TaskType::IssueDiscussion => "issue_discussion",
            TaskType::PrdCreation => "prd_creation",
            TaskType::DeepAnalysis => "deep_analysis",
        }
    }

    /// Parses the storage name produced by [`TaskType::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "code_review" => TaskType::CodeReview,
            "security_audit" => TaskType::SecurityAudit,
            "feature_dev" => TaskType::FeatureDev,
            "ui_adjustment" => TaskType::UiAdjustment,
            "issue_discussion" => TaskType::IssueDiscussion,
            "prd_creation" => TaskType::PrdCreation,
            "deep_analysis" => TaskType::DeepAnalysis,
            _ => return None,
        })
    }

    /// Execution mode for this task type.
    pub fn execution_mode(self) -> ExecutionMode {
        match self {
            TaskType::PrdCreation => ExecutionMode::Server,
            TaskType::CodeReview
            | TaskType::SecurityAudit
            | TaskType::FeatureDev
            | TaskType::UiAdjustment
            | TaskType::IssueDiscussion
            | TaskType::DeepAnalysis => ExecutionMode::Runner,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority of a task; maps one-to-one onto a runner lane.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl TaskPriority {
    /// Returns the stable snake_case name used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
        }
    }

    /// Parses the storage name produced by [`TaskPriority::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "low" => TaskPriority::Low,
            "normal" => TaskPriority::Normal,
            "high" => TaskPriority::High,
            _ => return None,
        })
    }

    /// The runner lane that serves this priority.
    pub fn runner_lane(self) -> Lane {
        match self {
            TaskPriority::Low => Lane::Low,
            TaskPriority::Normal => Lane::Normal,
            TaskPriority::High => Lane::High,
        }
    }
}

/// Where a task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    #[default]
    Webhook,
    Conversation,
}

impl TaskOrigin {
    /// Returns the stable snake_case name used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskOrigin::Webhook => "webhook",
            TaskOrigin::Conversation => "conversation",
        }
    }

    /// Parses the storage name produced by [`TaskOrigin::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "webhook" => Some(TaskOrigin::Webhook),
            "conversation" => Some(TaskOrigin::Conversation),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Failure reasons
// ---------------------------------------------------------------------------

/// Classified reason a task failed permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    MaxRetriesExceeded,
    InvalidRequest,
    ContextExceeded,
    SchedulingTimeout,
    Expired,
    PipelineTriggerFailed,
    Generic,
}

impl FailureReason {
    /// Returns the stable snake_case name stored as the task's `error_reason`.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::MaxRetriesExceeded => "max_retries_exceeded",
            FailureReason::InvalidRequest => "invalid_request",
            FailureReason::ContextExceeded => "context_exceeded",
            FailureReason::SchedulingTimeout => "scheduling_timeout",
            FailureReason::Expired => "expired",
            FailureReason::PipelineTriggerFailed => "pipeline_trigger_failed",
            FailureReason::Generic => "generic",
        }
    }

    /// Parses the name produced by [`FailureReason::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "max_retries_exceeded" => FailureReason::MaxRetriesExceeded,
            "invalid_request" => FailureReason::InvalidRequest,
            "context_exceeded" => FailureReason::ContextExceeded,
            "scheduling_timeout" => FailureReason::SchedulingTimeout,
            "expired" => FailureReason::Expired,
            "pipeline_trigger_failed" => FailureReason::PipelineTriggerFailed,
            "generic" => FailureReason::Generic,
            _ => return None,
        })
    }

    /// One-line, user-facing explanation posted on the MR or issue.
    pub fn notice(self) -> &'static str {
        match self {
            FailureReason::MaxRetriesExceeded => {
                "The service encountered repeated errors and could not complete after multiple retries."
            }
            FailureReason::InvalidRequest => "The request was invalid and could not be processed.",
            FailureReason::ContextExceeded => {
                "The merge request may be too large for analysis. Consider splitting it into smaller MRs."
            }
            FailureReason::SchedulingTimeout => {
                "The task could not be scheduled for execution within the time limit."
            }
            FailureReason::Expired => {
                "The task expired while waiting in the queue. Push a new commit to trigger a fresh run."
            }
            FailureReason::PipelineTriggerFailed => "Failed to trigger the CI pipeline for execution.",
            FailureReason::Generic => "The task failed unexpectedly.",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One orchestrated unit of automation work.
///
/// Owned exclusively by the orchestration core and mutated only through
/// guarded status transitions. The full record is serialisable so that it can
/// be snapshotted into a dead-letter entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub origin: TaskOrigin,
    /// Acting user, when the event author maps to a known user.
    pub user_id: Option<UserId>,
    pub project_id: ProjectId,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub mr_iid: Option<MergeRequestIid>,
    pub issue_iid: Option<IssueIid>,
    pub commit_sha: Option<CommitSha>,
    /// External runner pipeline, once launched.
    pub pipeline_id: Option<PipelineId>,
    /// Placeholder note on the MR/issue, when one was posted.
    pub comment_id: Option<CommentId>,
    /// Mutable structured payload: executor context before execution, the
    /// validated executor output afterwards.
    pub result: Option<serde_json::Value>,
    pub error_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// Who may call the runner launcher for this task, while it has no
    /// pipeline.
    #[serde(default)]
    pub launch_claim: Option<LaunchClaim>,
}

/// Exclusive right to launch the runner for a Running task.
///
/// Held by one job attempt until `until`. The holder's own retries carry a
/// higher attempt number and take the claim over; every other job waits for
/// it to lapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchClaim {
    pub attempt: u32,
    pub until: Timestamp,
}

impl LaunchClaim {
    /// Returns `true` if a job at `attempt` may take the claim at `now`.
    pub fn admits(&self, attempt: u32, now: Timestamp) -> bool {
        attempt > self.attempt || self.until <= now
    }
}

impl Task {
    /// Returns `true` if the task's status is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Execution mode derived from the task type.
    pub fn execution_mode(&self) -> ExecutionMode {
        self.task_type.execution_mode()
    }

    /// The lane a `ProcessTask` job for this task belongs on.
    pub fn lane(&self) -> Lane {
        match self.execution_mode() {
            ExecutionMode::Server => Lane::Server,
            ExecutionMode::Runner => self.priority.runner_lane(),
        }
    }

    /// Returns `true` if the task refers to an MR or issue a failure notice
    /// could be posted on.
    pub fn has_discussion_target(&self) -> bool {
        self.mr_iid.is_some() || self.issue_iid.is_some()
    }

    /// Returns `true` if a job at `attempt` may launch the runner at `now`:
    /// the task is Running in runner mode, has no pipeline, and holds no
    /// claim that shuts the job out.
    pub fn launch_open_to(&self, attempt: u32, now: Timestamp) -> bool {
        self.status == TaskStatus::Running
            && self.execution_mode() == ExecutionMode::Runner
            && self.pipeline_id.is_none()
            && self.launch_claim.map_or(true, |claim| claim.admits(attempt, now))
    }

    /// Returns a string field from the result payload, if present.
    pub fn result_str(&self, key: &str) -> Option<&str> {
        self.result.as_ref()?.get(key)?.as_str()
    }

    /// Converts the task back into creation parameters, e.g. to spawn a fresh
    /// task from a dead-letter snapshot.
    pub fn to_new_task(&self) -> NewTask {
        NewTask {
            task_type: self.task_type,
            origin: self.origin,
            user_id: self.user_id,
            project_id: self.project_id,
            priority: self.priority,
            mr_iid: self.mr_iid,
            issue_iid: self.issue_iid,
            commit_sha: self.commit_sha.clone(),
            result: None,
        }
    }
}

/// Parameters for creating a task. New tasks always start in `Received`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub task_type: TaskType,
    pub origin: TaskOrigin,
    pub user_id: Option<UserId>,
    pub project_id: ProjectId,
    pub priority: TaskPriority,
    pub mr_iid: Option<MergeRequestIid>,
    pub issue_iid: Option<IssueIid>,
    pub commit_sha: Option<CommitSha>,
    /// Initial executor context (e.g. an extracted question).
    pub result: Option<serde_json::Value>,
}

/// Field updates applied together with a status change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionPatch {
    /// Set as `error_reason` (only meaningful for `Failed`).
    pub error_reason: Option<String>,
    /// Replaces the result payload in the same conditional update.
    pub result: Option<serde_json::Value>,
}

impl TransitionPatch {
    /// A patch that records a failure reason.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            error_reason: Some(reason.into()),
            result: None,
        }
    }

    /// A patch that replaces the result payload.
    pub fn with_result(result: serde_json::Value) -> Self {
        Self {
            error_reason: None,
            result: Some(result),
        }
    }
}

/// Provider-side context for a task: where to make API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskLocation {
    pub external_project_id: ExternalProjectId,
    pub mr_iid: Option<MergeRequestIid>,
    pub issue_iid: Option<IssueIid>,
}
