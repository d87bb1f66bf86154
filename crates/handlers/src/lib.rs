//! Hookline orchestration handlers.
//!
//! This crate sequences the domain rules of the [`orchestration`] crate
//! against its ports: the inbound webhook path (route, dedup, dispatch), the
//! job handlers that start tasks and finalise their results, uniform retry
//! with back-off, dead-lettering, and the maintenance sweeps.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Handlers call port traits only; every concrete
//! store, provider client and queue is injected through [`Ports`]. They hold
//! no shared in-memory state: all coordination goes through conditional
//! updates and uniqueness constraints in the store.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`router`] | Classifier chain and bot-loop filter |
//! | [`dedup`] | UUID and commit dedup, latest-wins superseding |
//! | [`intake`] | Task creation and the full inbound path |
//! | [`lifecycle`] | Guarded status transitions |
//! | [`dispatcher`] | Execution mode, review strategy, runner launch |
//! | [`failure`] | Terminal failure and dead-letter archiving |
//! | [`jobs`] | Job runner with retry and back-off |
//! | [`results`] | Result validation and inbound results |
//! | [`dead_letter`] | Operator retry and dismiss |
//! | [`sweeps`] | Queue expiry and recovery |
//! | [`pipeline`] | Wiring against a [`Ports`] bundle |

pub mod dead_letter;
pub mod dedup;
pub mod dispatcher;
pub mod failure;
pub mod intake;
pub mod jobs;
pub mod lifecycle;
pub mod pipeline;
pub mod results;
pub mod router;
pub mod sweeps;

pub use dead_letter::{DeadLetterError, DeadLetterService};
pub use dedup::{DedupDecision, DedupOutcome, Deduplicator};
pub use dispatcher::{StartOutcome, TaskDispatcher};
pub use failure::{FailureHandler, FailureOutcome};
pub use intake::{IntakeError, IntakeOutcome, TaskDispatchService, WebhookIntake};
pub use jobs::{JobError, JobOutcome, JobRunner};
pub use lifecycle::{Transition, TransitionError};
pub use pipeline::{Pipeline, Ports};
pub use results::{ProcessOutcome, ResultIntake, ResultProcessor, SubmitOutcome};
pub use router::{Classification, IntentClassifier, Mention, Router};
pub use sweeps::Sweeper;
