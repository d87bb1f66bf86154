//! Hookline GitLab adapter.
//!
//! Implements the provider-facing ports defined in the [`orchestration`]
//! crate against the GitLab REST API v4:
//!
//! | Port | GitLab calls |
//! |------|--------------|
//! | [`orchestration::SourceControl`] | MR lookup by branch, MR changes, MR details, pipeline cancel, notes |
//! | [`orchestration::RunnerLauncher`] | Pipeline trigger with task variables |
//! | [`orchestration::Notifier`] | Failure note on the MR or issue; alerts go to the error log |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. Every HTTP
//! failure is classified into an [`orchestration::ErrorClass`] here; the
//! handlers only ever see [`orchestration::ExternalError`].
//!
//! Every request carries the client-wide timeout from [`GitLabConfig`], so a
//! slow provider cannot stall a worker indefinitely.

mod adapters;
mod client;

pub use client::{classify_status, GitLabClient, GitLabConfig};
