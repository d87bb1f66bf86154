//! Core orchestration domain for Hookline.
//!
//! This crate contains every domain concept of the webhook intake and task
//! orchestration pipeline: newtype identifiers, the task lifecycle, the typed
//! webhook event model, routing and strategy rules, result schemas, the retry
//! schedule, and the port traits infrastructure crates implement.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype domain identifiers (`TaskId`, `EventUuid`, etc.) |
//! | [`types`] | Shared value types (`Timestamp`) |
//! | [`errors`] | Error taxonomy and retry-policy types |
//! | [`task`] | `Task`, its status graph, type, priority and failure reasons |
//! | [`events`] | Normalised webhook context and typed `WebhookEvent` |
//! | [`routing`] | `Intent` and `RoutingResult` |
//! | [`strategy`] | `ReviewStrategy` and the changed-file heuristic |
//! | [`backoff`] | Transient-failure retry schedule |
//! | [`dead_letter`] | Dead-letter records and attempt history |
//! | [`event_log`] | Event log rows |
//! | [`schema`] | Per-type result schemas |
//! | [`jobs`] | Queued jobs, envelopes and lanes |
//! | [`config`] | `OrchestratorConfig` |
//! | [`ports`] | Repository, provider, notifier and queue traits |

pub mod backoff;
pub mod config;
pub mod dead_letter;
pub mod errors;
pub mod event_log;
pub mod events;
pub mod identifiers;
pub mod jobs;
pub mod ports;
pub mod routing;
pub mod schema;
pub mod strategy;
pub mod task;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use backoff::{BackoffSchedule, RetryDecision};
pub use config::OrchestratorConfig;
pub use dead_letter::{
    AttemptRecord, DeadLetterClaim, DeadLetterEntry, DeadLetterInsert, DeadLetterRetry,
    NewDeadLetter, ATTEMPT_ERROR_LIMIT,
};
pub use errors::{ErrorClass, ExternalError, QueueError, RetryPolicy, StoreError};
pub use event_log::{AppendOutcome, EventLogEntry};
pub use events::{EventContext, EventKind, MergeRequestDetails, WebhookEvent};
pub use identifiers::{
    BranchName, CommentId, CommitSha, DeadLetterId, EventUuid, ExternalProjectId, ExternalUserId,
    IssueIid, MergeRequestIid, PipelineId, ProjectId, RunId, TaskId, UserId,
};
pub use jobs::{Envelope, Job, Lane};
pub use ports::{
    Alert, AlertSeverity, CreateTask, DeadLetterRepository, Directory, EventLogRepository,
    JobQueue, LaunchRequest, NoteTarget, Notifier, RunnerLauncher, SourceControl, TaskRepository,
    UpdateOutcome,
};
pub use routing::{Intent, RoutingMetadata, RoutingResult};
pub use schema::{ResultSchema, SchemaError};
pub use strategy::{ReviewStrategy, StrategyPlan};
pub use task::{
    ExecutionMode, FailureReason, LaunchClaim, NewTask, Task, TaskLocation, TaskOrigin,
    TaskPriority, TaskStatus, TaskType, TransitionCheck, TransitionPatch,
};
pub use types::Timestamp;
