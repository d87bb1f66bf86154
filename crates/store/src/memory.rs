//! In-memory store.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use orchestration::{
    AppendOutcome, CommitSha, CreateTask, DeadLetterClaim, DeadLetterEntry, DeadLetterId,
    DeadLetterInsert, DeadLetterRepository, DeadLetterRetry, Directory, EventLogEntry, EventLogRepository,
    EventUuid, ExternalProjectId, ExternalUserId, MergeRequestIid, NewDeadLetter, NewTask,
    LaunchClaim, PipelineId, ProjectId, StoreError, Task, TaskId, TaskRepository, TaskStatus, Timestamp,
    TransitionPatch, UpdateOutcome, UserId,
};

use crate::apply_transition;

#[derive(Debug, Default)]
struct State {
    next_task_id: u64,
    tasks: BTreeMap<TaskId, Task>,
    logged: HashSet<(ProjectId, EventUuid)>,
    event_log: Vec<EventLogEntry>,
    next_dead_letter_id: u64,
    dead_letters: BTreeMap<DeadLetterId, DeadLetterEntry>,
    users: HashMap<ExternalUserId, UserId>,
    projects: HashMap<ProjectId, ExternalProjectId>,
}

impl State {
    fn active_for_commit(
        &self,
        project: ProjectId,
        mr: MergeRequestIid,
        commit: &CommitSha,
    ) -> Option<TaskId> {
        self.tasks
            .values()
            .find(|t| {
                t.project_id == project
                    && t.mr_iid == Some(mr)
                    && t.commit_sha.as_ref() == Some(commit)
                    && !t.status.is_terminal()
            })
            .map(|t| t.id)
    }

    // Inserts a task in `status` unless an active one covers its commit.
    fn insert_task(&mut self, new: NewTask, status: TaskStatus, now: Timestamp) -> CreateTask {
        if let (Some(mr), Some(commit)) = (new.mr_iid, new.commit_sha.as_ref()) {
            if let Some(existing) = self.active_for_commit(new.project_id, mr, commit) {
                return CreateTask::ActiveDuplicate(existing);
            }
        }

        self.next_task_id += 1;
        let id = TaskId::new(self.next_task_id);
        let task = Task {
            id,
            task_type: new.task_type,
            origin: new.origin,
            user_id: new.user_id,
            project_id: new.project_id,
            priority: new.priority,
            status,
            mr_iid: new.mr_iid,
            issue_iid: new.issue_iid,
            commit_sha: new.commit_sha,
            pipeline_id: None,
            comment_id: None,
            result: new.result,
            error_reason: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            launch_claim: None,
        };
        self.tasks.insert(id, task.clone());
        CreateTask::Created(task)
    }
}

/// A process-local store. All state sits behind one lock, so every operation
/// is atomic with respect to every other.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a provider account to an internal user.
    pub async fn register_user(&self, external: ExternalUserId, user: UserId) {
        self.state.write().await.users.insert(external, user);
    }

    /// Maps an internal project to its provider project id.
    pub async fn register_project(&self, project: ProjectId, external: ExternalProjectId) {
        self.state.write().await.projects.insert(project, external);
    }

    /// Every event log row, in insertion order.
    pub async fn event_log(&self) -> Vec<EventLogEntry> {
        self.state.read().await.event_log.clone()
    }

    /// Every task, in id order.
    pub async fn tasks(&self) -> Vec<Task> {
        self.state.read().await.tasks.values().cloned().collect()
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn create(&self, new: NewTask) -> Result<CreateTask, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.insert_task(new, TaskStatus::Received, Timestamp::now()))
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.state.read().await.tasks.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: TaskId,
        from: &[TaskStatus],
        to: TaskStatus,
        patch: TransitionPatch,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut state = self.state.write().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if !from.contains(&task.status) {
            return Ok(UpdateOutcome::Stale {
                actual: task.status,
            });
        }
        apply_transition(task, to, patch, Timestamp::now());
        Ok(UpdateOutcome::Applied(task.clone()))
    }

    async fn replace_result(
        &self,
        id: TaskId,
        expected: TaskStatus,
        result: serde_json::Value,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut state = self.state.write().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if task.status != expected {
            return Ok(UpdateOutcome::Stale {
                actual: task.status,
            });
        }
        task.result = Some(result);
        task.updated_at = Timestamp::now();
        Ok(UpdateOutcome::Applied(task.clone()))
    }

    async fn claim_launch(
        &self,
        id: TaskId,
        attempt: u32,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut state = self.state.write().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if !task.launch_open_to(attempt, now) {
            return Ok(UpdateOutcome::Stale {
                actual: task.status,
            });
        }
        task.launch_claim = Some(LaunchClaim { attempt, until });
        task.updated_at = now;
        Ok(UpdateOutcome::Applied(task.clone()))
    }

    async fn record_pipeline(
        &self,
        id: TaskId,
        pipeline: PipelineId,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut state = self.state.write().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if task.status != TaskStatus::Running || task.pipeline_id.is_some() {
            return Ok(UpdateOutcome::Stale {
                actual: task.status,
            });
        }
        task.pipeline_id = Some(pipeline);
        task.updated_at = Timestamp::now();
        Ok(UpdateOutcome::Applied(task.clone()))
    }

    async fn find_active_for_commit(
        &self,
        project: ProjectId,
        mr: MergeRequestIid,
        commit: &CommitSha,
    ) -> Result<Option<TaskId>, StoreError> {
        Ok(self.state.read().await.active_for_commit(project, mr, commit))
    }

    async fn supersede_for_merge_request(
        &self,
        project: ProjectId,
        mr: MergeRequestIid,
    ) -> Result<Vec<Task>, StoreError> {
        let mut state = self.state.write().await;
        let now = Timestamp::now();
        let mut superseded = Vec::new();
        for task in state.tasks.values_mut() {
            if task.project_id == project
                && task.mr_iid == Some(mr)
                && TaskStatus::SUPERSEDABLE.contains(&task.status)
            {
                superseded.push(task.clone());
                apply_transition(task, TaskStatus::Superseded, TransitionPatch::default(), now);
            }
        }
        Ok(superseded)
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventLogRepository for MemoryStore {
    async fn contains(&self, project: ProjectId, uuid: &EventUuid) -> Result<bool, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .logged
            .contains(&(project, uuid.clone())))
    }

    async fn append(&self, entry: EventLogEntry) -> Result<AppendOutcome, StoreError> {
        let mut state = self.state.write().await;
        if !state
            .logged
            .insert((entry.project_id, entry.event_uuid.clone()))
        {
            return Ok(AppendOutcome::AlreadyLogged);
        }
        state.event_log.push(entry);
        Ok(AppendOutcome::Inserted)
    }
}

#[async_trait]
impl DeadLetterRepository for MemoryStore {
    async fn fail_and_archive(
        &self,
        task_id: TaskId,
        from: &[TaskStatus],
        failure: NewDeadLetter,
        at: Timestamp,
    ) -> Result<DeadLetterInsert, StoreError> {
        let mut state = self.state.write().await;
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Ok(DeadLetterInsert::NotFound);
        };
        if !from.contains(&task.status) {
            return Ok(DeadLetterInsert::Stale {
                actual: task.status,
            });
        }
        let reason = failure.failure_reason.as_str();
        apply_transition(task, TaskStatus::Failed, TransitionPatch::failure(reason), at);
        let failed = task.clone();

        state.next_dead_letter_id += 1;
        let id = DeadLetterId::new(state.next_dead_letter_id);
        let entry = DeadLetterEntry {
            id,
            task_id,
            task: failed,
            failure_reason: failure.failure_reason,
            error_details: failure.error_details,
            attempts: failure.attempts,
            dead_lettered_at: at,
            retried: false,
            retried_at: None,
            retried_by: None,
            retried_task_id: None,
            dismissed: false,
            dismissed_at: None,
            dismissed_by: None,
        };
        state.dead_letters.insert(id, entry.clone());
        Ok(DeadLetterInsert::Archived(entry))
    }

    async fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterEntry>, StoreError> {
        Ok(self.state.read().await.dead_letters.get(&id).cloned())
    }

    async fn list(&self, include_inactive: bool) -> Result<Vec<DeadLetterEntry>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .dead_letters
            .values()
            .rev()
            .filter(|e| include_inactive || e.is_active())
            .cloned()
            .collect())
    }

    async fn retry(
        &self,
        id: DeadLetterId,
        new: NewTask,
        actor: UserId,
        at: Timestamp,
    ) -> Result<DeadLetterRetry, StoreError> {
        let mut state = self.state.write().await;
        match state.dead_letters.get(&id) {
            None => return Ok(DeadLetterRetry::NotFound),
            Some(entry) if entry.retried => return Ok(DeadLetterRetry::AlreadyRetried),
            Some(entry) if entry.dismissed => return Ok(DeadLetterRetry::AlreadyDismissed),
            Some(_) => {}
        }

        let (task, spawned) = match state.insert_task(new, TaskStatus::Queued, at) {
            CreateTask::Created(task) => (task, true),
            CreateTask::ActiveDuplicate(existing) => match state.tasks.get(&existing) {
                Some(task) => (task.clone(), false),
                None => {
                    return Err(StoreError::corrupt(
                        "task",
                        format!("active task {existing} is missing"),
                    ))
                }
            },
        };

        let Some(entry) = state.dead_letters.get_mut(&id) else {
            return Ok(DeadLetterRetry::NotFound);
        };
        entry.retried = true;
        entry.retried_at = Some(at);
        entry.retried_by = Some(actor);
        entry.retried_task_id = Some(task.id);
        let entry = entry.clone();
        Ok(if spawned {
            DeadLetterRetry::Spawned { entry, task }
        } else {
            DeadLetterRetry::Linked { entry, task }
        })
    }

    async fn dismiss(
        &self,
        id: DeadLetterId,
        actor: UserId,
        at: Timestamp,
    ) -> Result<DeadLetterClaim, StoreError> {
        let mut state = self.state.write().await;
        let Some(entry) = state.dead_letters.get_mut(&id) else {
            return Ok(DeadLetterClaim::NotFound);
        };
        if entry.dismissed {
            return Ok(DeadLetterClaim::AlreadyDismissed);
        }
        if entry.retried {
            return Ok(DeadLetterClaim::AlreadyRetried);
        }
        entry.dismissed = true;
        entry.dismissed_at = Some(at);
        entry.dismissed_by = Some(actor);
        Ok(DeadLetterClaim::Claimed(entry.clone()))
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn resolve_user(&self, external: ExternalUserId) -> Result<Option<UserId>, StoreError> {
        Ok(self.state.read().await.users.get(&external).copied())
    }

    async fn external_project(
        &self,
        project: ProjectId,
    ) -> Result<Option<ExternalProjectId>, StoreError> {
        Ok(self.state.read().await.projects.get(&project).copied())
    }
}
