//! Event Deduplicator.
//!
//! Guarantees at-most-once acceptance per event UUID, at most one active task
//! per (project, MR, commit), and that the latest code for a merge request
//! wins over in-flight work for older code.

use std::sync::Arc;

use tracing::{debug, info, warn};

use orchestration::{
    AppendOutcome, CommitSha, EventLogEntry, EventLogRepository, EventUuid, MergeRequestIid,
    RoutingResult, SourceControl, StoreError, TaskRepository, Timestamp, WebhookEvent,
};

/// The accept/reject decision for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    Accept,
    /// The event UUID was already logged for this project.
    DuplicateUuid,
    /// A non-terminal task already exists for this exact code snapshot.
    DuplicateCommit,
}

impl DedupDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            DedupDecision::Accept => "accept",
            DedupDecision::DuplicateUuid => "duplicate_uuid",
            DedupDecision::DuplicateCommit => "duplicate_commit",
        }
    }
}

/// Result of [`Deduplicator::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupOutcome {
    pub decision: DedupDecision,
    /// Tasks moved to `Superseded` by this delivery.
    pub superseded: usize,
    /// The merge request the event concerns, including one resolved from a
    /// pushed branch.
    pub merge_request_iid: Option<MergeRequestIid>,
}

impl DedupOutcome {
    fn rejected(decision: DedupDecision, merge_request_iid: Option<MergeRequestIid>) -> Self {
        Self {
            decision,
            superseded: 0,
            merge_request_iid,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.decision == DedupDecision::Accept
    }
}

pub struct Deduplicator {
    tasks: Arc<dyn TaskRepository>,
    event_log: Arc<dyn EventLogRepository>,
    source_control: Arc<dyn SourceControl>,
}

impl Deduplicator {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        event_log: Arc<dyn EventLogRepository>,
        source_control: Arc<dyn SourceControl>,
    ) -> Self {
        Self {
            tasks,
            event_log,
            source_control,
        }
    }

    /// Decides whether a routed delivery is accepted.
    ///
    /// External lookups (branch to MR, pipeline cancellation) are best-effort
    /// and never change the decision. Store failures propagate.
    pub async fn process(
        &self,
        event_uuid: Option<&EventUuid>,
        routing: &RoutingResult,
    ) -> Result<DedupOutcome, StoreError> {
        let event = &routing.event;
        let project = event.project_id;

        if let Some(uuid) = event_uuid {
            if self.event_log.contains(project, uuid).await? {
                debug!(event_uuid = %uuid, "Event UUID already logged");
                return Ok(DedupOutcome::rejected(DedupDecision::DuplicateUuid, None));
            }
        }

        let commit = event.commit_sha();
        let mr = match routing.merge_request_iid() {
            Some(mr) => Some(mr),
            None => self.resolve_pushed_merge_request(event).await,
        };

        if let (Some(mr), Some(commit)) = (mr, commit) {
            if let Some(existing) = self.tasks.find_active_for_commit(project, mr, commit).await? {
                info!(
                    task_id = %existing,
                    mr_iid = %mr,
                    commit_sha = %commit,
                    "Active task already covers this commit"
                );
                return Ok(DedupOutcome::rejected(DedupDecision::DuplicateCommit, Some(mr)));
            }
        }

        // The log row is the concurrency lock: claim it before superseding so
        // that only the winning delivery acts.
        if let Some(uuid) = event_uuid {
            let entry = log_entry(uuid, routing, mr, commit);
            if self.event_log.append(entry).await? == AppendOutcome::AlreadyLogged {
                info!(event_uuid = %uuid, "Concurrent delivery logged the event first");
                return Ok(DedupOutcome::rejected(DedupDecision::DuplicateUuid, mr));
            }
        }

        let superseded = match mr {
            Some(mr) if event.is_new_code() => self.supersede(event, mr).await?,
            _ => 0,
        };

        Ok(DedupOutcome {
            decision: DedupDecision::Accept,
            superseded,
            merge_request_iid: mr,
        })
    }

    async fn resolve_pushed_merge_request(&self, event: &WebhookEvent) -> Option<MergeRequestIid> {
        let branch = event.pushed_branch()?;
        match self
            .source_control
            .find_open_merge_request(event.external_project_id, branch)
            .await
        {
            Ok(mr) => mr,
            Err(error) => {
                warn!(branch = %branch, %error, "Could not resolve merge request for pushed branch");
                None
            }
        }
    }

    async fn supersede(&self, event: &WebhookEvent, mr: MergeRequestIid) -> Result<usize, StoreError> {
        let superseded = self
            .tasks
            .supersede_for_merge_request(event.project_id, mr)
            .await?;

        for task in &superseded {
            let Some(pipeline) = task.pipeline_id else {
                continue;
            };
            if let Err(error) = self
                .source_control
                .cancel_pipeline(event.external_project_id, pipeline)
                .await
            {
                warn!(task_id = %task.id, pipeline_id = %pipeline, %error, "Pipeline cancellation failed");
            }
        }

        if !superseded.is_empty() {
            info!(mr_iid = %mr, count = superseded.len(), "Superseded stale tasks");
        }
        Ok(superseded.len())
    }
}

fn log_entry(
    uuid: &EventUuid,
    routing: &RoutingResult,
    mr: Option<MergeRequestIid>,
    commit: Option<&CommitSha>,
) -> EventLogEntry {
    EventLogEntry {
        event_uuid: uuid.clone(),
        project_id: routing.event.project_id,
        event_type: routing.event.event_type().to_string(),
        intent: Some(routing.intent),
        mr_iid: mr,
        commit_sha: commit.cloned(),
        created_at: Timestamp::now(),
    }
}
