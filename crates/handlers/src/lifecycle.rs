//! Guarded task status transitions.
//!
//! Every status change goes through [`transition`]: the requested edge is
//! checked against the lifecycle graph, then applied as a conditional update
//! keyed on the status the caller observed.

use thiserror::Error;
use tracing::{debug, info};

use orchestration::{
    StoreError, Task, TaskId, TaskRepository, TaskStatus, TransitionCheck, TransitionPatch,
    UpdateOutcome,
};

/// A status change could not be applied.
#[derive(Debug, Error)]
pub enum TransitionError {
    /// The edge is not part of the lifecycle graph.
    #[error("illegal transition for task {task}: {from} -> {to}")]
    Illegal {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a guarded transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The change applied; the updated task is returned.
    Applied(Task),
    /// The task was already terminal and the target is terminal too.
    AlreadyTerminal(TaskStatus),
    /// Another writer moved the task first.
    Stale(TaskStatus),
}

impl Transition {
    /// The updated task, if the change applied.
    pub fn applied(self) -> Option<Task> {
        match self {
            Transition::Applied(task) => Some(task),
            _ => None,
        }
    }
}

/// Moves `task` from its observed status to `to`.
///
/// Already-terminal and lost-race outcomes are returned, not raised; only an
/// edge outside the graph is an error.
pub async fn transition(
    tasks: &dyn TaskRepository,
    task: &Task,
    to: TaskStatus,
    patch: TransitionPatch,
) -> Result<Transition, TransitionError> {
    let from = task.status;
    match from.check_transition(to) {
        TransitionCheck::Allowed => {}
        TransitionCheck::AlreadyTerminal => {
            info!(task_id = %task.id, %from, %to, "Task already terminal; transition skipped");
            return Ok(Transition::AlreadyTerminal(from));
        }
        TransitionCheck::Illegal => {
            return Err(TransitionError::Illegal {
                task: task.id,
                from,
                to,
            })
        }
    }

    match tasks.transition(task.id, &[from], to, patch).await? {
        UpdateOutcome::Applied(updated) => {
            debug!(task_id = %task.id, %from, %to, "Task transitioned");
            Ok(Transition::Applied(updated))
        }
        UpdateOutcome::Stale { actual } if actual.is_terminal() && to.is_terminal() => {
            info!(task_id = %task.id, %actual, %to, "Task finalised concurrently; transition skipped");
            Ok(Transition::AlreadyTerminal(actual))
        }
        UpdateOutcome::Stale { actual } => {
            info!(task_id = %task.id, expected = %from, %actual, %to, "Task moved concurrently; transition skipped");
            Ok(Transition::Stale(actual))
        }
        UpdateOutcome::NotFound => Err(TransitionError::NotFound(task.id)),
    }
}
