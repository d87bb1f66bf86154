//! Persistence substrate for Hookline.
//!
//! Two implementations of the repository ports defined in
//! [`orchestration::ports`]:
//!
//! - [`MemoryStore`]: a single `RwLock`-guarded state, for tests and
//!   single-process runs without a database file.
//! - [`SqliteStore`]: a `rusqlite` database whose unique indexes are the
//!   dedup and active-task locks.
//!
//! Both enforce the same contract: conditional status updates keyed on the
//! observed pre-state, uniqueness of (project, event UUID) in the event log,
//! at most one non-terminal task per (project, MR, commit), and at most one
//! dead-letter entry per task.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use orchestration::{Task, TaskStatus, Timestamp, TransitionPatch};

/// Applies a status change and its patch to an in-memory task record.
pub(crate) fn apply_transition(
    task: &mut Task,
    to: TaskStatus,
    patch: TransitionPatch,
    now: Timestamp,
) {
    task.status = to;
    task.updated_at = now;
    match to {
        TaskStatus::Running => task.started_at = Some(now),
        TaskStatus::Completed => task.completed_at = Some(now),
        _ => {}
    }
    if let Some(reason) = patch.error_reason {
        task.error_reason = Some(reason);
    }
    if let Some(result) = patch.result {
        task.result = Some(result);
    }
}
