//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! an internal [`ProjectId`] with the provider's [`ExternalProjectId`] even though
//! both are `u64` under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for u64-wrapped newtypes (storage- or provider-assigned integers).
// Generates: struct (Copy), new(), as_u64(), Display.
// ---------------------------------------------------------------------------
macro_rules! u64_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new identifier from a raw integer.
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the underlying integer value.
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: storage-assigned
// ---------------------------------------------------------------------------

u64_id! {
    /// Identifies a persisted [`crate::Task`].
    TaskId
}

u64_id! {
    /// Identifies a persisted [`crate::DeadLetterEntry`].
    DeadLetterId
}

u64_id! {
    /// Internal project identifier (the project row owned by this system).
    ProjectId
}

u64_id! {
    /// Internal user identifier. Also used as the actor on dead-letter actions.
    UserId
}

// ---------------------------------------------------------------------------
// Identifiers: provider-assigned
// ---------------------------------------------------------------------------

u64_id! {
    /// The source-control provider's numeric project id, used for API calls.
    ExternalProjectId
}

u64_id! {
    /// The provider's numeric user id, as carried on webhook payloads.
    ///
    /// Compared against the configured bot account id for loop prevention.
    ExternalUserId
}

u64_id! {
    /// Project-scoped merge request number (`iid`).
    MergeRequestIid
}

u64_id! {
    /// Project-scoped issue number (`iid`).
    IssueIid
}

u64_id! {
    /// Identifies an external CI pipeline running a task in runner mode.
    PipelineId
}

u64_id! {
    /// Identifies a discussion note posted on an MR or issue.
    CommentId
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies one worker process run.
///
/// Generated fresh at startup; attached to the root span so all activity from
/// a single process can be correlated across log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a new random run identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed
// ---------------------------------------------------------------------------

string_id! {
    /// The provider's per-delivery event UUID (e.g. `X-Gitlab-Event-UUID`).
    ///
    /// Redeliveries of the same event carry the same UUID; this is the key of
    /// the event log's uniqueness constraint.
    EventUuid
}

string_id! {
    /// A Git commit SHA (40-character lowercase hex string).
    CommitSha
}

string_id! {
    /// A Git branch name (e.g. `"main"`, `"feature/login"`).
    BranchName
}

impl BranchName {
    /// Extracts the branch name from a fully-qualified ref such as
    /// `refs/heads/feature/login`.
    ///
    /// Refs that are not under `refs/heads/` are returned unchanged.
    pub fn from_ref(git_ref: &str) -> Option<Self> {
        Self::new(git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref))
    }

    /// `main`, the ref used when a task has no merge request branch.
    pub fn default_branch() -> Self {
        Self("main".to_string())
    }
}
