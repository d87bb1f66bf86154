//! Hookline in-process job queue.
//!
//! Implements the [`orchestration::JobQueue`] port with four named lanes held
//! in memory, and the workers that drain them.
//!
//! - [`LaneQueue`]: FIFO per lane, delayed release for retries, closed on
//!   shutdown.
//! - [`Worker`]: pulls from an ordered set of lanes and hands each envelope
//!   to a [`JobHandler`]. Runner workers drain high before normal before
//!   low; server workers drain the server lane only.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Nothing here is durable. Jobs lost with the process
//! are re-created from persisted task state by the recovery sweep, so the
//! queue never needs to be the source of truth.

mod lanes;
mod worker;

pub use lanes::LaneQueue;
pub use worker::{spawn_workers, JobHandler, Worker, WorkerCounts};
