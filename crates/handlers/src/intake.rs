//! Task Dispatch: turns accepted routing results into queued tasks.
//!
//! [`WebhookIntake`] is the full inbound path for one delivery: route, dedup,
//! dispatch.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use orchestration::{
    CreateTask, Directory, Envelope, EventContext, EventUuid, Intent, Job, JobQueue, NewTask,
    QueueError, RoutingResult, StoreError, Task, TaskOrigin, TaskRepository, TaskStatus,
    TransitionPatch, UserId, WebhookEvent,
};

use crate::dedup::{DedupDecision, Deduplicator};
use crate::lifecycle::{self, TransitionError};
use crate::router::Router;

/// Inbound processing failed.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Creates and enqueues tasks for routed events.
pub struct TaskDispatchService {
    tasks: Arc<dyn TaskRepository>,
    directory: Arc<dyn Directory>,
    queue: Arc<dyn JobQueue>,
}

impl TaskDispatchService {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        directory: Arc<dyn Directory>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            tasks,
            directory,
            queue,
        }
    }

    /// Dispatches a routing result as a queued task.
    ///
    /// Returns `None` without side effects for non-dispatchable intents, for
    /// incremental reviews without a merge request, and when an active task
    /// already covers the same commit.
    #[instrument(skip_all, fields(intent = %routing.intent))]
    pub async fn dispatch(&self, routing: &RoutingResult) -> Result<Option<Task>, IntakeError> {
        let Some(task_type) = routing.intent.task_type() else {
            debug!("Non-dispatchable intent");
            return Ok(None);
        };

        let mr_iid = routing.merge_request_iid();
        if routing.intent == Intent::IncrementalReview && mr_iid.is_none() {
            info!("No open merge request for pushed branch; incremental review skipped");
            return Ok(None);
        }

        let event = &routing.event;
        let new = NewTask {
            task_type,
            origin: TaskOrigin::Webhook,
            user_id: self.resolve_user(event).await,
            project_id: event.project_id,
            priority: routing.priority,
            mr_iid,
            issue_iid: event.issue_iid(),
            commit_sha: event.commit_sha().cloned(),
            result: routing.executor_context(),
        };

        let task = match self.tasks.create(new).await? {
            CreateTask::Created(task) => task,
            CreateTask::ActiveDuplicate(existing) => {
                info!(task_id = %existing, "Active task already covers this commit");
                return Ok(None);
            }
        };

        let Some(task) = lifecycle::transition(
            self.tasks.as_ref(),
            &task,
            TaskStatus::Queued,
            TransitionPatch::default(),
        )
        .await?
        .applied() else {
            return Ok(None);
        };

        let lane = task.lane();
        self.queue
            .enqueue(Envelope::new(Job::ProcessTask { task_id: task.id }), lane, None)
            .await?;

        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = task.priority.as_str(),
            queue = %lane,
            "Task dispatched"
        );
        Ok(Some(task))
    }

    async fn resolve_user(&self, event: &WebhookEvent) -> Option<UserId> {
        let external = event.author_id()?;
        match self.directory.resolve_user(external).await {
            Ok(user) => user,
            Err(error) => {
                warn!(author_id = %external, %error, "User lookup failed; task will be anonymous");
                None
            }
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    /// Unsupported, bot-authored or unclassified.
    Ignored,
    /// Rejected by the deduplicator.
    Duplicate(DedupDecision),
    /// Accepted. `task` is `None` for non-dispatchable intents.
    Accepted {
        intent: Intent,
        superseded: usize,
        task: Option<Task>,
    },
}

/// Route → dedup → dispatch for one webhook delivery.
pub struct WebhookIntake {
    router: Router,
    deduplicator: Deduplicator,
    dispatcher: TaskDispatchService,
}

impl WebhookIntake {
    pub fn new(router: Router, deduplicator: Deduplicator, dispatcher: TaskDispatchService) -> Self {
        Self {
            router,
            deduplicator,
            dispatcher,
        }
    }

    #[instrument(skip_all, fields(event_uuid = event_uuid.map(EventUuid::as_str), event_type = %context.event_type))]
    pub async fn handle(
        &self,
        event_uuid: Option<&EventUuid>,
        context: &EventContext,
    ) -> Result<IntakeOutcome, IntakeError> {
        let Some(mut routing) = self.router.route(context) else {
            return Ok(IntakeOutcome::Ignored);
        };

        let dedup = self.deduplicator.process(event_uuid, &routing).await?;
        if !dedup.is_accepted() {
            info!(decision = dedup.decision.as_str(), "Delivery rejected");
            return Ok(IntakeOutcome::Duplicate(dedup.decision));
        }

        if routing.metadata.merge_request_iid.is_none() {
            routing.metadata.merge_request_iid = dedup.merge_request_iid;
        }
        let task = self.dispatcher.dispatch(&routing).await?;
        Ok(IntakeOutcome::Accepted {
            intent: routing.intent,
            superseded: dedup.superseded,
            task,
        })
    }
}
