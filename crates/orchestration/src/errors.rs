//! Error taxonomy and retry-policy types for the orchestration domain.
//!
//! Errors here cross port boundaries: infrastructure crates produce them,
//! the orchestration layer consumes them.
//!
//! - [`ExternalError`]: a classified failure of an external collaborator
//!   (source-control API, runner launcher, notifier).
//! - [`StoreError`]: a persistence substrate failure.
//! - [`QueueError`]: the queueing substrate rejected an enqueue.
//!
//! [`RetryPolicy`] is the cross-cutting retry decision: any error type that
//! participates in retry decisions must be able to produce one.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by error types to let the job runner decide whether to re-invoke
/// an operation without escalating.
///
/// - `Retryable` errors: rate limits, upstream 5xx, overload, timeouts.
/// - `NonRetryable` errors: malformed request, not found, forbidden,
///   authentication failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried; the work fails permanently.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// External collaborator errors
// ---------------------------------------------------------------------------

/// Classification of an external-call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rate limited, upstream 5xx, overloaded, timed out.
    Transient,
    /// The request was malformed (HTTP 400).
    InvalidRequest,
    /// The input exceeded the executor's context window.
    ContextExceeded,
    /// The credential was rejected (HTTP 401). Affects every later call.
    Authentication,
    /// The credential lacks permission (HTTP 403).
    Forbidden,
    /// The addressed resource does not exist (HTTP 404).
    NotFound,
    /// Anything the classifier does not recognise. Never retried.
    Unknown,
}

impl ErrorClass {
    /// Returns the stable snake_case name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::InvalidRequest => "invalid_request",
            ErrorClass::ContextExceeded => "context_exceeded",
            ErrorClass::Authentication => "authentication",
            ErrorClass::Forbidden => "forbidden",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure from an external collaborator.
#[derive(Debug, Clone, Error)]
#[error("{context} failed ({class}{}): {message}", .status.map(|s| format!(", HTTP {s}")).unwrap_or_default())]
pub struct ExternalError {
    /// How the failure should be treated by retry logic.
    pub class: ErrorClass,
    /// The HTTP status code, if the failure came from an HTTP response.
    pub status: Option<u16>,
    /// Short label of the operation that failed (e.g. `"cancel_pipeline"`).
    pub context: String,
    /// Human-readable detail, typically the (truncated) response body.
    pub message: String,
}

impl ExternalError {
    /// Creates a new classified error.
    pub fn new(class: ErrorClass, context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class,
            status: None,
            context: context.into(),
            message: message.into(),
        }
    }

    /// Attaches the HTTP status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Shorthand for a transient error.
    pub fn transient(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, context, message)
    }

    /// Returns `true` when the credential itself was rejected.
    pub fn is_authentication(&self) -> bool {
        self.class == ErrorClass::Authentication
    }

    /// Returns the retry decision for this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self.class {
            ErrorClass::Transient => RetryPolicy::Retryable { after: None },
            _ => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

/// A persistence substrate failure.
///
/// Uniqueness conflicts are **not** errors: the repository ports report them
/// as explicit outcomes so that callers can treat them as benign races.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backend failed while performing an operation.
    #[error("storage error during {operation}: {message}")]
    Backend {
        /// What the store was doing (e.g. `"insert task"`).
        operation: &'static str,
        /// The backend's error message.
        message: String,
    },

    /// A persisted row could not be decoded into a domain value.
    #[error("corrupt {entity} row: {message}")]
    Corrupt {
        /// Entity name (e.g. `"task"`).
        entity: &'static str,
        /// What was wrong with the row.
        message: String,
    },

    /// A value does not fit the backend's column type.
    #[error("{field} {value} is outside the storable range")]
    OutOfRange {
        /// Column or identifier name (e.g. `"project_id"`).
        field: &'static str,
        value: u64,
    },
}

impl StoreError {
    /// Convenience constructor for backend failures.
    pub fn backend(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            message: message.into(),
        }
    }

    /// Convenience constructor for decoding failures.
    pub fn corrupt(entity: &'static str, message: impl Into<String>) -> Self {
        Self::Corrupt {
            entity,
            message: message.into(),
        }
    }

    /// Storage failures are assumed to be transient (lock contention, I/O).
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            StoreError::Backend { .. } => RetryPolicy::Retryable { after: None },
            StoreError::Corrupt { .. } | StoreError::OutOfRange { .. } => {
                RetryPolicy::NonRetryable
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Queue errors
// ---------------------------------------------------------------------------

/// The queueing substrate could not accept a job.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// The queue has been shut down and accepts no more work.
    #[error("queue is closed")]
    Closed,

    /// The backend rejected the job.
    #[error("enqueue failed: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_external_errors_are_retryable() {
        let transient = ExternalError::transient("cancel_pipeline", "503");
        assert_eq!(transient.retry_policy(), RetryPolicy::Retryable { after: None });

        for class in [
            ErrorClass::InvalidRequest,
            ErrorClass::Authentication,
            ErrorClass::Forbidden,
            ErrorClass::NotFound,
            ErrorClass::Unknown,
        ] {
            let error = ExternalError::new(class, "op", "boom");
            assert_eq!(error.retry_policy(), RetryPolicy::NonRetryable, "{class}");
        }
    }

    #[test]
    fn display_includes_status_when_present() {
        let error = ExternalError::new(ErrorClass::Authentication, "list_changes", "401 Unauthorized")
            .with_status(401);
        assert_eq!(
            error.to_string(),
            "list_changes failed (authentication, HTTP 401): 401 Unauthorized"
        );

        let bare = ExternalError::transient("launch", "connection reset");
        assert_eq!(bare.to_string(), "launch failed (transient): connection reset");
    }
}
