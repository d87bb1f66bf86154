//! Dead-letter records: the archive of permanently failed tasks.

use serde::{Deserialize, Serialize};

use crate::{DeadLetterId, FailureReason, Task, TaskId, TaskStatus, Timestamp, UserId};

/// Maximum characters of error text kept per attempt.
pub const ATTEMPT_ERROR_LIMIT: usize = 500;

/// One failed attempt of a job, kept for the dead-letter record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub timestamp: Timestamp,
    pub error: String,
}

impl AttemptRecord {
    /// Records an attempt, truncating the error text.
    pub fn new(attempt: u32, timestamp: Timestamp, error: &str) -> Self {
        Self {
            attempt,
            timestamp,
            error: error.chars().take(ATTEMPT_ERROR_LIMIT).collect(),
        }
    }
}

/// Parameters for failing and archiving a task.
///
/// The store snapshots the task itself, as the Failed row it writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDeadLetter {
    pub failure_reason: FailureReason,
    pub error_details: String,
    pub attempts: Vec<AttemptRecord>,
}

/// An archived, permanently failed task.
///
/// Retried and dismissed are mutually exclusive and one-way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: DeadLetterId,
    pub task_id: TaskId,
    pub task: Task,
    pub failure_reason: FailureReason,
    pub error_details: String,
    pub attempts: Vec<AttemptRecord>,
    pub dead_lettered_at: Timestamp,
    pub retried: bool,
    pub retried_at: Option<Timestamp>,
    pub retried_by: Option<UserId>,
    pub retried_task_id: Option<TaskId>,
    pub dismissed: bool,
    pub dismissed_at: Option<Timestamp>,
    pub dismissed_by: Option<UserId>,
}

impl DeadLetterEntry {
    /// Returns `true` while the entry awaits an operator decision.
    pub fn is_active(&self) -> bool {
        !self.retried && !self.dismissed
    }
}

/// Outcome of a conditional dead-letter update.
#[derive(Debug, Clone, PartialEq)]
pub enum DeadLetterClaim {
    /// The update applied; the updated entry is returned.
    Claimed(DeadLetterEntry),
    /// The entry was already retried.
    AlreadyRetried,
    /// The entry was already dismissed.
    AlreadyDismissed,
    /// No entry has this id.
    NotFound,
}

/// Result of failing a task and archiving it in one step.
#[derive(Debug, Clone, PartialEq)]
pub enum DeadLetterInsert {
    /// The task is Failed and archived; `entry.task` is the Failed row.
    Archived(DeadLetterEntry),
    /// The task was not in an expected pre-state; nothing was written.
    Stale { actual: TaskStatus },
    /// No task has this id.
    NotFound,
}

/// Result of retrying a dead-letter entry.
#[derive(Debug, Clone, PartialEq)]
pub enum DeadLetterRetry {
    /// The entry is retried and `task` is the Queued task spawned from it.
    Spawned { entry: DeadLetterEntry, task: Task },
    /// An active task already covers the snapshot's commit. The entry is
    /// retried and points at that task instead.
    Linked { entry: DeadLetterEntry, task: Task },
    AlreadyRetried,
    AlreadyDismissed,
    NotFound,
}
