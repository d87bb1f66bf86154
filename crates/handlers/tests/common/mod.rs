//! Fakes and a harness shared by the handler integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use handlers::{JobOutcome, Pipeline, Ports};
use orchestration::{
    Alert, BranchName, CommentId, CreateTask, DeadLetterClaim, DeadLetterEntry, DeadLetterId,
    DeadLetterInsert, DeadLetterRepository, DeadLetterRetry, Envelope, EventContext,
    ExternalError, ExternalProjectId, ExternalUserId, FailureReason, JobQueue, Lane,
    LaunchRequest, MergeRequestIid, NewDeadLetter, NewTask, NoteTarget, Notifier,
    OrchestratorConfig, PipelineId, ProjectId, QueueError, RunnerLauncher, SourceControl,
    StoreError, Task, TaskId, TaskLocation, TaskOrigin, TaskPriority, TaskRepository,
    TaskStatus, TaskType, Timestamp, TransitionPatch, UpdateOutcome, UserId,
};
use store::MemoryStore;

pub const PROJECT: u64 = 1;
pub const GITLAB_PROJECT: u64 = 100;
pub const BOT: u64 = 99;
pub const AUTHOR: u64 = 7;
pub const USER: u64 = 3;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeSourceControl {
    pub branches: Mutex<HashMap<String, MergeRequestIid>>,
    pub changed: Mutex<Option<Result<Vec<String>, ExternalError>>>,
    pub cancelled: Mutex<Vec<PipelineId>>,
    pub cancel_fails: AtomicBool,
    pub notes: Mutex<Vec<(NoteTarget, String)>>,
}

impl FakeSourceControl {
    pub fn map_branch(&self, branch: &str, mr: u64) {
        self.branches
            .lock()
            .unwrap()
            .insert(branch.to_string(), MergeRequestIid::new(mr));
    }

    pub fn set_changed(&self, paths: &[&str]) {
        *self.changed.lock().unwrap() = Some(Ok(paths.iter().map(|p| p.to_string()).collect()));
    }

    pub fn fail_changed(&self, error: ExternalError) {
        *self.changed.lock().unwrap() = Some(Err(error));
    }
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    async fn find_open_merge_request(
        &self,
        _project: ExternalProjectId,
        branch: &BranchName,
    ) -> Result<Option<MergeRequestIid>, ExternalError> {
        Ok(self.branches.lock().unwrap().get(branch.as_str()).copied())
    }

    async fn cancel_pipeline(
        &self,
        _project: ExternalProjectId,
        pipeline: PipelineId,
    ) -> Result<(), ExternalError> {
        self.cancelled.lock().unwrap().push(pipeline);
        if self.cancel_fails.load(Ordering::SeqCst) {
            return Err(ExternalError::transient("cancel_pipeline", "HTTP 503"));
        }
        Ok(())
    }

    async fn changed_paths(
        &self,
        _project: ExternalProjectId,
        _mr: MergeRequestIid,
    ) -> Result<Vec<String>, ExternalError> {
        self.changed.lock().unwrap().clone().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn merge_request_source_branch(
        &self,
        _project: ExternalProjectId,
        _mr: MergeRequestIid,
    ) -> Result<BranchName, ExternalError> {
        Ok(BranchName::new("feature").unwrap())
    }

    async fn post_note(&self, target: NoteTarget, body: &str) -> Result<CommentId, ExternalError> {
        let mut notes = self.notes.lock().unwrap();
        notes.push((target, body.to_string()));
        Ok(CommentId::new(notes.len() as u64))
    }
}

pub struct FakeLauncher {
    next: AtomicU64,
    pub failures: Mutex<VecDeque<ExternalError>>,
    pub requests: Mutex<Vec<LaunchRequest>>,
    /// How long each launch call takes.
    pub latency: Mutex<Option<Duration>>,
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(500),
            failures: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            latency: Mutex::new(None),
        }
    }
}

impl FakeLauncher {
    pub fn fail_next(&self, errors: impl IntoIterator<Item = ExternalError>) {
        self.failures.lock().unwrap().extend(errors);
    }
}

#[async_trait]
impl RunnerLauncher for FakeLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<PipelineId, ExternalError> {
        self.requests.lock().unwrap().push(request.clone());
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(PipelineId::new(self.next.fetch_add(1, Ordering::SeqCst)))
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub notices: Mutex<Vec<(TaskLocation, FailureReason)>>,
    pub alerts: Mutex<Vec<Alert>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify_failure(
        &self,
        location: &TaskLocation,
        reason: FailureReason,
        _details: &str,
    ) -> Result<(), ExternalError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExternalError::transient("post_note", "HTTP 502"));
        }
        self.notices.lock().unwrap().push((*location, reason));
        Ok(())
    }

    async fn alert(&self, alert: &Alert) -> Result<(), ExternalError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// The store's dead-letter archive, with writes that can be made to fail.
pub struct FlakyArchive {
    inner: Arc<MemoryStore>,
    failing_writes: AtomicUsize,
}

impl FlakyArchive {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// Makes the next `count` archive writes fail before touching the store.
    pub fn fail_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn write(&self, operation: &'static str) -> Result<(), StoreError> {
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match failing {
            Ok(_) => Err(StoreError::backend(operation, "database is locked")),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl DeadLetterRepository for FlakyArchive {
    async fn fail_and_archive(
        &self,
        task: TaskId,
        from: &[TaskStatus],
        failure: NewDeadLetter,
        at: Timestamp,
    ) -> Result<DeadLetterInsert, StoreError> {
        self.write("archive failed task")?;
        self.inner.fail_and_archive(task, from, failure, at).await
    }

    async fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterEntry>, StoreError> {
        DeadLetterRepository::get(self.inner.as_ref(), id).await
    }

    async fn list(&self, include_inactive: bool) -> Result<Vec<DeadLetterEntry>, StoreError> {
        self.inner.list(include_inactive).await
    }

    async fn retry(
        &self,
        id: DeadLetterId,
        task: NewTask,
        actor: UserId,
        at: Timestamp,
    ) -> Result<DeadLetterRetry, StoreError> {
        self.write("retry dead letter")?;
        self.inner.retry(id, task, actor, at).await
    }

    async fn dismiss(
        &self,
        id: DeadLetterId,
        actor: UserId,
        at: Timestamp,
    ) -> Result<DeadLetterClaim, StoreError> {
        self.write("dismiss dead letter")?;
        self.inner.dismiss(id, actor, at).await
    }
}

/// A queue that only records; tests drain it explicitly.
#[derive(Default)]
pub struct RecordingQueue {
    pub jobs: Mutex<VecDeque<(Envelope, Lane, Option<Duration>)>>,
}

impl RecordingQueue {
    pub fn pop(&self) -> Option<(Envelope, Lane, Option<Duration>)> {
        self.jobs.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn lanes(&self) -> Vec<Lane> {
        self.jobs.lock().unwrap().iter().map(|(_, lane, _)| *lane).collect()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(
        &self,
        envelope: Envelope,
        lane: Lane,
        delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        self.jobs.lock().unwrap().push_back((envelope, lane, delay));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub archive: Arc<FlakyArchive>,
    pub source_control: Arc<FakeSourceControl>,
    pub launcher: Arc<FakeLauncher>,
    pub notifier: Arc<FakeNotifier>,
    pub queue: Arc<RecordingQueue>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(OrchestratorConfig {
            bot_account_id: Some(ExternalUserId::new(BOT)),
            ..OrchestratorConfig::default()
        })
        .await
    }

    pub async fn with_config(config: OrchestratorConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        store
            .register_project(ProjectId::new(PROJECT), ExternalProjectId::new(GITLAB_PROJECT))
            .await;
        store
            .register_user(ExternalUserId::new(AUTHOR), UserId::new(USER))
            .await;

        let source_control = Arc::new(FakeSourceControl::default());
        let launcher = Arc::new(FakeLauncher::default());
        let notifier = Arc::new(FakeNotifier::default());
        let queue = Arc::new(RecordingQueue::default());
        let archive = Arc::new(FlakyArchive::new(store.clone()));

        let ports = Ports {
            tasks: store.clone(),
            event_log: store.clone(),
            dead_letters: archive.clone(),
            directory: store.clone(),
            source_control: source_control.clone(),
            launcher: launcher.clone(),
            notifier: notifier.clone(),
            queue: queue.clone(),
        };
        let pipeline = Pipeline::new(&ports, &config).unwrap();

        Self {
            store,
            archive,
            source_control,
            launcher,
            notifier,
            queue,
            pipeline,
        }
    }

    /// Runs the next queued job, ignoring its delay.
    pub async fn step(&self) -> Option<JobOutcome> {
        let (envelope, lane, _) = self.queue.pop()?;
        Some(self.pipeline.runner.run(lane, envelope).await)
    }

    /// Runs queued jobs until the queue is empty.
    pub async fn drain(&self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.step().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    pub async fn task(&self, id: orchestration::TaskId) -> Task {
        TaskRepository::get(self.store.as_ref(), id)
            .await
            .unwrap()
            .unwrap()
    }

    /// Creates a code review task for `mr`/`sha` directly in `Queued`.
    pub async fn queued_review(&self, mr: u64, sha: &str) -> Task {
        let CreateTask::Created(task) = self
            .store
            .create(NewTask {
                task_type: TaskType::CodeReview,
                origin: TaskOrigin::Webhook,
                user_id: None,
                project_id: ProjectId::new(PROJECT),
                priority: TaskPriority::Normal,
                mr_iid: Some(MergeRequestIid::new(mr)),
                issue_iid: None,
                commit_sha: orchestration::CommitSha::new(sha),
                result: None,
            })
            .await
            .unwrap()
        else {
            panic!("expected a new task");
        };
        self.force(&task, TaskStatus::Received, TaskStatus::Queued).await
    }

    /// Applies a raw status change, bypassing the handlers.
    pub async fn force(&self, task: &Task, from: TaskStatus, to: TaskStatus) -> Task {
        match self
            .store
            .transition(task.id, &[from], to, TransitionPatch::default())
            .await
            .unwrap()
        {
            UpdateOutcome::Applied(task) => task,
            other => panic!("expected transition to apply, got {other:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Event contexts
// ---------------------------------------------------------------------------

pub fn context(event_type: &str) -> EventContext {
    EventContext {
        event_type: event_type.to_string(),
        project_id: ProjectId::new(PROJECT),
        gitlab_project_id: ExternalProjectId::new(GITLAB_PROJECT),
        ..EventContext::default()
    }
}

pub fn mr_event(action: &str, mr: u64, sha: &str) -> EventContext {
    EventContext {
        action: Some(action.to_string()),
        merge_request_iid: Some(MergeRequestIid::new(mr)),
        source_branch: Some("feature".into()),
        target_branch: Some("main".into()),
        author_id: Some(ExternalUserId::new(AUTHOR)),
        last_commit_sha: Some(sha.to_string()),
        ..context("merge_request")
    }
}

pub fn push(branch: &str, sha: &str) -> EventContext {
    EventContext {
        git_ref: Some(format!("refs/heads/{branch}")),
        before: Some("0000".into()),
        after: Some(sha.to_string()),
        user_id: Some(ExternalUserId::new(AUTHOR)),
        total_commits_count: 1,
        ..context("push")
    }
}

pub fn mr_note(mr: u64, note: &str, author: u64) -> EventContext {
    EventContext {
        noteable_type: Some("MergeRequest".into()),
        merge_request_iid: Some(MergeRequestIid::new(mr)),
        note: Some(note.to_string()),
        author_id: Some(ExternalUserId::new(author)),
        ..context("note")
    }
}

pub fn valid_review() -> serde_json::Value {
    serde_json::json!({
        "version": "1.0",
        "summary": {
            "risk_level": "low",
            "total_findings": 0,
            "findings_by_severity": {"critical": 0, "major": 0, "minor": 0},
            "walkthrough": []
        },
        "findings": [],
        "labels": [],
        "commit_status": "success"
    })
}
