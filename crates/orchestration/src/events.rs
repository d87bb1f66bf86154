//! Typed webhook events.
//!
//! The inbound boundary hands the core a flat, normalised [`EventContext`]
//! (one per delivery). [`WebhookEvent::parse`] turns it into a typed event or
//! rejects it. Events are immutable, used for one routing decision, and never
//! persisted directly.

use serde::{Deserialize, Serialize};

use crate::{
    BranchName, CommitSha, ExternalProjectId, ExternalUserId, IssueIid, MergeRequestIid, ProjectId,
};

// ---------------------------------------------------------------------------
// Normalised context
// ---------------------------------------------------------------------------

/// The normalised webhook context produced by the HTTP boundary.
///
/// Every field other than `event_type` and the project ids is optional; which
/// ones are required depends on the event kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    /// `merge_request`, `note`, `issue` or `push`.
    pub event_type: String,
    /// Internal project id.
    pub project_id: ProjectId,
    /// Provider project id.
    pub gitlab_project_id: ExternalProjectId,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub merge_request_iid: Option<MergeRequestIid>,
    #[serde(default)]
    pub issue_iid: Option<IssueIid>,
    #[serde(default)]
    pub source_branch: Option<String>,
    #[serde(default)]
    pub target_branch: Option<String>,
    #[serde(default)]
    pub author_id: Option<ExternalUserId>,
    /// Push events carry the pusher as `user_id` rather than `author_id`.
    #[serde(default)]
    pub user_id: Option<ExternalUserId>,
    #[serde(default)]
    pub last_commit_sha: Option<String>,
    /// `MergeRequest` or `Issue` for note events.
    #[serde(default)]
    pub noteable_type: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub total_commits_count: u64,
    /// The untouched provider payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Typed events
// ---------------------------------------------------------------------------

/// Fields shared by the merge request lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequestDetails {
    pub mr_iid: MergeRequestIid,
    pub source_branch: Option<BranchName>,
    pub target_branch: Option<BranchName>,
    pub author_id: Option<ExternalUserId>,
    pub last_commit_sha: Option<CommitSha>,
}

/// The variant-specific part of a [`WebhookEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    MergeRequestOpened(MergeRequestDetails),
    MergeRequestUpdated(MergeRequestDetails),
    MergeRequestMerged(MergeRequestDetails),
    NoteOnMergeRequest {
        mr_iid: MergeRequestIid,
        note: String,
        author_id: Option<ExternalUserId>,
    },
    NoteOnIssue {
        issue_iid: IssueIid,
        note: String,
        author_id: Option<ExternalUserId>,
    },
    IssueLabelChanged {
        issue_iid: IssueIid,
        action: String,
        author_id: Option<ExternalUserId>,
        labels: Vec<String>,
    },
    PushToBranch {
        branch: BranchName,
        before_sha: Option<CommitSha>,
        after_sha: Option<CommitSha>,
        author_id: Option<ExternalUserId>,
        total_commits: u64,
    },
}

/// A parsed, typed webhook event.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub project_id: ProjectId,
    pub external_project_id: ExternalProjectId,
    pub payload: serde_json::Value,
    pub kind: EventKind,
}

impl WebhookEvent {
    /// Parses a normalised context into a typed event.
    ///
    /// Returns `None` when the event type or action is unsupported, or when an
    /// identifying field required by the variant is missing.
    pub fn parse(context: &EventContext) -> Option<Self> {
        let kind = match context.event_type.as_str() {
            "merge_request" => parse_merge_request(context)?,
            "note" => parse_note(context)?,
            "issue" => EventKind::IssueLabelChanged {
                issue_iid: context.issue_iid?,
                action: context.action.clone().unwrap_or_default(),
                author_id: context.author_id,
                labels: context.labels.clone(),
            },
            "push" => EventKind::PushToBranch {
                branch: BranchName::from_ref(context.git_ref.as_deref()?)?,
                before_sha: context.before.clone().and_then(CommitSha::new),
                after_sha: context.after.clone().and_then(CommitSha::new),
                author_id: context.user_id,
                total_commits: context.total_commits_count,
            },
            _ => return None,
        };

        Some(Self {
            project_id: context.project_id,
            external_project_id: context.gitlab_project_id,
            payload: context.payload.clone(),
            kind,
        })
    }

    /// The provider's event type name, as stored in the event log.
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            EventKind::MergeRequestOpened(_)
            | EventKind::MergeRequestUpdated(_)
            | EventKind::MergeRequestMerged(_) => "merge_request",
            EventKind::NoteOnMergeRequest { .. } | EventKind::NoteOnIssue { .. } => "note",
            EventKind::IssueLabelChanged { .. } => "issue",
            EventKind::PushToBranch { .. } => "push",
        }
    }

    /// The external id of whoever caused the event, if known.
    pub fn author_id(&self) -> Option<ExternalUserId> {
        match &self.kind {
            EventKind::MergeRequestOpened(mr)
            | EventKind::MergeRequestUpdated(mr)
            | EventKind::MergeRequestMerged(mr) => mr.author_id,
            EventKind::NoteOnMergeRequest { author_id, .. }
            | EventKind::NoteOnIssue { author_id, .. }
            | EventKind::IssueLabelChanged { author_id, .. }
            | EventKind::PushToBranch { author_id, .. } => *author_id,
        }
    }

    /// Returns `true` for discussion notes (the only events subject to the
    /// bot-loop filter).
    pub fn is_note(&self) -> bool {
        matches!(
            self.kind,
            EventKind::NoteOnMergeRequest { .. } | EventKind::NoteOnIssue { .. }
        )
    }

    /// The merge request the event explicitly references.
    ///
    /// Push events carry only a branch; their MR must be resolved separately.
    pub fn merge_request_iid(&self) -> Option<MergeRequestIid> {
        match &self.kind {
            EventKind::MergeRequestOpened(mr)
            | EventKind::MergeRequestUpdated(mr)
            | EventKind::MergeRequestMerged(mr) => Some(mr.mr_iid),
            EventKind::NoteOnMergeRequest { mr_iid, .. } => Some(*mr_iid),
            _ => None,
        }
    }

    /// The issue the event references.
    pub fn issue_iid(&self) -> Option<IssueIid> {
        match &self.kind {
            EventKind::NoteOnIssue { issue_iid, .. }
            | EventKind::IssueLabelChanged { issue_iid, .. } => Some(*issue_iid),
            _ => None,
        }
    }

    /// The commit SHA representing the code state this event reports.
    pub fn commit_sha(&self) -> Option<&CommitSha> {
        match &self.kind {
            EventKind::MergeRequestOpened(mr) | EventKind::MergeRequestUpdated(mr) => {
                mr.last_commit_sha.as_ref()
            }
            EventKind::PushToBranch { after_sha, .. } => after_sha.as_ref(),
            _ => None,
        }
    }

    /// The pushed branch, for push events.
    pub fn pushed_branch(&self) -> Option<&BranchName> {
        match &self.kind {
            EventKind::PushToBranch { branch, .. } => Some(branch),
            _ => None,
        }
    }

    /// Returns `true` if the event reports new code for a merge request and
    /// therefore makes in-flight work for that MR stale.
    pub fn is_new_code(&self) -> bool {
        matches!(
            self.kind,
            EventKind::PushToBranch { .. }
                | EventKind::MergeRequestOpened(_)
                | EventKind::MergeRequestUpdated(_)
        )
    }
}

fn parse_merge_request(context: &EventContext) -> Option<EventKind> {
    let details = MergeRequestDetails {
        mr_iid: context.merge_request_iid?,
        source_branch: context.source_branch.clone().and_then(BranchName::new),
        target_branch: context.target_branch.clone().and_then(BranchName::new),
        author_id: context.author_id,
        last_commit_sha: context.last_commit_sha.clone().and_then(CommitSha::new),
    };
    match context.action.as_deref()? {
        "open" => Some(EventKind::MergeRequestOpened(details)),
        "update" => Some(EventKind::MergeRequestUpdated(details)),
        "merge" => Some(EventKind::MergeRequestMerged(details)),
        _ => None,
    }
}

fn parse_note(context: &EventContext) -> Option<EventKind> {
    let note = context.note.clone().unwrap_or_default();
    match context.noteable_type.as_deref()? {
        "MergeRequest" => Some(EventKind::NoteOnMergeRequest {
            mr_iid: context.merge_request_iid?,
            note,
            author_id: context.author_id,
        }),
        "Issue" => Some(EventKind::NoteOnIssue {
            issue_iid: context.issue_iid?,
            note,
            author_id: context.author_id,
        }),
        _ => None,
    }
}
