//! Event log rows: the append-only record of accepted webhook deliveries.
//!
//! Uniqueness on (project, event UUID) is the dedup lock.

use serde::{Deserialize, Serialize};

use crate::{CommitSha, EventUuid, Intent, MergeRequestIid, ProjectId, Timestamp};

/// One accepted delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub event_uuid: EventUuid,
    pub project_id: ProjectId,
    pub event_type: String,
    pub intent: Option<Intent>,
    pub mr_iid: Option<MergeRequestIid>,
    pub commit_sha: Option<CommitSha>,
    pub created_at: Timestamp,
}

/// Result of appending to the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// A row with the same (project, UUID) already exists.
    AlreadyLogged,
}
