//! Queued work units.
//!
//! Every asynchronous step of the pipeline is a [`Job`] wrapped in an
//! [`Envelope`] that carries its attempt counter and failure history. Delivery
//! is at-least-once; every job handler tolerates re-delivery.

use serde::{Deserialize, Serialize};

use crate::{AttemptRecord, FailureReason, TaskId};

/// A named queue lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    High,
    Normal,
    Low,
    /// Server-side work: inline tasks, result processing, notifications.
    Server,
}

impl Lane {
    /// Runner lanes in the order workers drain them.
    pub const RUNNER: [Lane; 3] = [Lane::High, Lane::Normal, Lane::Low];

    /// Every lane.
    pub const ALL: [Lane; 4] = [Lane::High, Lane::Normal, Lane::Low, Lane::Server];

    /// Returns the queue name.
    pub fn as_str(self) -> &'static str {
        match self {
            Lane::High => "runner-high",
            Lane::Normal => "runner-normal",
            Lane::Low => "runner-low",
            Lane::Server => "server",
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    /// Pick up a queued task and start executing it.
    ProcessTask { task_id: TaskId },
    /// Validate and finalise a task's result.
    ProcessTaskResult { task_id: TaskId },
    /// Post a failure notice on the task's MR or issue.
    NotifyFailure {
        task_id: TaskId,
        reason: FailureReason,
        details: String,
    },
}

impl Job {
    /// The task the job concerns.
    pub fn task_id(&self) -> TaskId {
        match self {
            Job::ProcessTask { task_id }
            | Job::ProcessTaskResult { task_id }
            | Job::NotifyFailure { task_id, .. } => *task_id,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Job::ProcessTask { .. } => "process_task",
            Job::ProcessTaskResult { .. } => "process_task_result",
            Job::NotifyFailure { .. } => "notify_failure",
        }
    }

    /// Returns `false` for jobs that must run exactly once and never retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Job::NotifyFailure { .. })
    }
}

/// A job plus its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub job: Job,
    /// 1-based attempt number of the next execution.
    pub attempt: u32,
    /// Transient failures of earlier attempts.
    pub history: Vec<AttemptRecord>,
}

impl Envelope {
    /// The attempt number of a freshly enqueued job.
    pub const FIRST_ATTEMPT: u32 = 1;

    /// Wraps a job for its first attempt.
    pub fn new(job: Job) -> Self {
        Self {
            job,
            attempt: Self::FIRST_ATTEMPT,
            history: Vec::new(),
        }
    }

    /// The envelope for the next attempt, with `record` appended.
    pub fn next_attempt(mut self, record: AttemptRecord) -> Self {
        self.history.push(record);
        self.attempt += 1;
        self
    }
}
