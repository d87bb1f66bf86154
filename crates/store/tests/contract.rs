//! Repository contract tests, run against every store implementation.

use std::sync::Arc;
use std::time::Duration;

use orchestration::{
    AppendOutcome, CommitSha, CreateTask, DeadLetterClaim, DeadLetterInsert, DeadLetterRepository,
    DeadLetterRetry, Directory, EventLogEntry, EventLogRepository, EventUuid, ExternalProjectId,
    ExternalUserId, FailureReason, Intent, LaunchClaim, MergeRequestIid, NewDeadLetter, NewTask,
    PipelineId, ProjectId, TaskOrigin, TaskPriority, TaskRepository, TaskStatus, TaskType,
    Timestamp, TransitionPatch, UpdateOutcome, UserId,
};
use store::{MemoryStore, SqliteStore};

trait Store: TaskRepository + EventLogRepository + DeadLetterRepository + Directory {}
impl<T: TaskRepository + EventLogRepository + DeadLetterRepository + Directory> Store for T {}

fn review(mr: u64, sha: &str) -> NewTask {
    NewTask {
        task_type: TaskType::CodeReview,
        origin: TaskOrigin::Webhook,
        user_id: None,
        project_id: ProjectId::new(1),
        priority: TaskPriority::Normal,
        mr_iid: Some(MergeRequestIid::new(mr)),
        issue_iid: None,
        commit_sha: CommitSha::new(sha),
        result: None,
    }
}

fn log_entry(uuid: &str) -> EventLogEntry {
    EventLogEntry {
        event_uuid: EventUuid::new(uuid).unwrap(),
        project_id: ProjectId::new(1),
        event_type: "push".to_string(),
        intent: Some(Intent::IncrementalReview),
        mr_iid: Some(MergeRequestIid::new(5)),
        commit_sha: CommitSha::new("abc"),
        created_at: Timestamp::now(),
    }
}

async fn created(store: &dyn Store, task: NewTask) -> orchestration::Task {
    match store.create(task).await.unwrap() {
        CreateTask::Created(task) => task,
        other => panic!("expected a new task, got {other:?}"),
    }
}

async fn second_active_task_for_same_commit_is_rejected(store: Arc<dyn Store>) {
    let first = created(store.as_ref(), review(5, "abc")).await;
    assert_eq!(first.status, TaskStatus::Received);

    let again = store.create(review(5, "abc")).await.unwrap();
    assert_eq!(again, CreateTask::ActiveDuplicate(first.id));

    // A different commit, or a terminal predecessor, frees the slot.
    created(store.as_ref(), review(5, "def")).await;
    store
        .transition(first.id, &[TaskStatus::Received], TaskStatus::Queued, TransitionPatch::default())
        .await
        .unwrap();
    store
        .transition(
            first.id,
            &[TaskStatus::Queued],
            TaskStatus::Failed,
            TransitionPatch::failure("expired"),
        )
        .await
        .unwrap();
    created(store.as_ref(), review(5, "abc")).await;
}

async fn transitions_are_conditional_on_pre_state(store: Arc<dyn Store>) {
    let task = created(store.as_ref(), review(1, "a1")).await;

    let stale = store
        .transition(task.id, &[TaskStatus::Queued], TaskStatus::Running, TransitionPatch::default())
        .await
        .unwrap();
    assert_eq!(stale, UpdateOutcome::Stale { actual: TaskStatus::Received });

    store
        .transition(task.id, &[TaskStatus::Received], TaskStatus::Queued, TransitionPatch::default())
        .await
        .unwrap();
    let running = store
        .transition(
            task.id,
            &[TaskStatus::Queued],
            TaskStatus::Running,
            TransitionPatch::with_result(serde_json::json!({"strategy": "mixed-review"})),
        )
        .await
        .unwrap();
    let UpdateOutcome::Applied(running) = running else {
        panic!("expected the transition to apply");
    };
    assert!(running.started_at.is_some());
    assert_eq!(running.result_str("strategy"), Some("mixed-review"));

    let missing = store
        .transition(
            orchestration::TaskId::new(999),
            &[TaskStatus::Queued],
            TaskStatus::Running,
            TransitionPatch::default(),
        )
        .await
        .unwrap();
    assert_eq!(missing, UpdateOutcome::NotFound);
}

async fn supersede_touches_only_queued_and_running(store: Arc<dyn Store>) {
    let queued = created(store.as_ref(), review(7, "q")).await;
    let running = created(store.as_ref(), review(7, "r")).await;
    let done = created(store.as_ref(), review(7, "d")).await;
    let other_mr = created(store.as_ref(), review(8, "o")).await;

    for task in [&queued, &running, &done, &other_mr] {
        store
            .transition(task.id, &[TaskStatus::Received], TaskStatus::Queued, TransitionPatch::default())
            .await
            .unwrap();
    }
    for task in [&running, &done] {
        store
            .transition(task.id, &[TaskStatus::Queued], TaskStatus::Running, TransitionPatch::default())
            .await
            .unwrap();
    }
    store
        .record_pipeline(running.id, PipelineId::new(77))
        .await
        .unwrap();
    store
        .transition(done.id, &[TaskStatus::Running], TaskStatus::Completed, TransitionPatch::default())
        .await
        .unwrap();

    let superseded = store
        .supersede_for_merge_request(ProjectId::new(1), MergeRequestIid::new(7))
        .await
        .unwrap();
    let mut ids: Vec<_> = superseded.iter().map(|t| t.id).collect();
    ids.sort();
    assert_eq!(ids, vec![queued.id, running.id]);
    assert!(superseded.iter().any(|t| t.pipeline_id == Some(PipelineId::new(77))));

    let get = |id| {
        let store = Arc::clone(&store);
        async move { TaskRepository::get(store.as_ref(), id).await.unwrap().unwrap().status }
    };
    assert_eq!(get(queued.id).await, TaskStatus::Superseded);
    assert_eq!(get(running.id).await, TaskStatus::Superseded);
    assert_eq!(get(done.id).await, TaskStatus::Completed);
    assert_eq!(get(other_mr.id).await, TaskStatus::Queued);
}

async fn event_log_is_unique_per_project_and_uuid(store: Arc<dyn Store>) {
    let uuid = EventUuid::new("evt-1").unwrap();
    assert!(!store.contains(ProjectId::new(1), &uuid).await.unwrap());
    assert_eq!(store.append(log_entry("evt-1")).await.unwrap(), AppendOutcome::Inserted);
    assert_eq!(
        store.append(log_entry("evt-1")).await.unwrap(),
        AppendOutcome::AlreadyLogged
    );
    assert!(store.contains(ProjectId::new(1), &uuid).await.unwrap());
    assert!(!store.contains(ProjectId::new(2), &uuid).await.unwrap());
}

async fn running(store: &dyn Store, task: NewTask) -> orchestration::Task {
    let task = created(store, task).await;
    store
        .transition(task.id, &[TaskStatus::Received], TaskStatus::Queued, TransitionPatch::default())
        .await
        .unwrap();
    match store
        .transition(task.id, &[TaskStatus::Queued], TaskStatus::Running, TransitionPatch::default())
        .await
        .unwrap()
    {
        UpdateOutcome::Applied(task) => task,
        other => panic!("expected the task to run, got {other:?}"),
    }
}

async fn launch_claims_exclude_other_jobs_until_they_lapse(store: Arc<dyn Store>) {
    let task = running(store.as_ref(), review(9, "l1")).await;
    let now = Timestamp::now();
    let until = now.plus(Duration::from_secs(60));

    let UpdateOutcome::Applied(claimed) = store.claim_launch(task.id, 1, now, until).await.unwrap()
    else {
        panic!("expected the first claim to apply");
    };
    assert_eq!(claimed.launch_claim, Some(LaunchClaim { attempt: 1, until }));

    // A second delivery of the same attempt is shut out; the holder's next
    // attempt takes over.
    assert_eq!(
        store.claim_launch(task.id, 1, now, until).await.unwrap(),
        UpdateOutcome::Stale { actual: TaskStatus::Running }
    );
    assert!(matches!(
        store.claim_launch(task.id, 2, now, until).await.unwrap(),
        UpdateOutcome::Applied(_)
    ));
    // Anyone may take a lapsed claim.
    assert!(matches!(
        store.claim_launch(task.id, 1, until, until.plus(Duration::from_secs(60))).await.unwrap(),
        UpdateOutcome::Applied(_)
    ));

    store.record_pipeline(task.id, PipelineId::new(5)).await.unwrap();
    let late = until.plus(Duration::from_secs(3600));
    assert_eq!(
        store.claim_launch(task.id, 3, late, late).await.unwrap(),
        UpdateOutcome::Stale { actual: TaskStatus::Running }
    );
    assert_eq!(
        store
            .claim_launch(orchestration::TaskId::new(999), 1, now, until)
            .await
            .unwrap(),
        UpdateOutcome::NotFound
    );
}

async fn first_recorded_pipeline_wins(store: Arc<dyn Store>) {
    let task = running(store.as_ref(), review(10, "p1")).await;

    let UpdateOutcome::Applied(recorded) =
        store.record_pipeline(task.id, PipelineId::new(500)).await.unwrap()
    else {
        panic!("expected the first pipeline to be recorded");
    };
    assert_eq!(recorded.pipeline_id, Some(PipelineId::new(500)));
    assert_eq!(
        store.record_pipeline(task.id, PipelineId::new(501)).await.unwrap(),
        UpdateOutcome::Stale { actual: TaskStatus::Running }
    );
    let stored = TaskRepository::get(store.as_ref(), task.id).await.unwrap().unwrap();
    assert_eq!(stored.pipeline_id, Some(PipelineId::new(500)));
}

fn failure() -> NewDeadLetter {
    NewDeadLetter {
        failure_reason: FailureReason::MaxRetriesExceeded,
        error_details: "HTTP 503".to_string(),
        attempts: Vec::new(),
    }
}

async fn failing_archives_the_failed_row(store: Arc<dyn Store>) {
    let task = running(store.as_ref(), review(3, "x")).await;

    assert_eq!(
        store
            .fail_and_archive(task.id, &[TaskStatus::Queued], failure(), Timestamp::now())
            .await
            .unwrap(),
        DeadLetterInsert::Stale { actual: TaskStatus::Running }
    );
    assert!(store.list(true).await.unwrap().is_empty());

    let DeadLetterInsert::Archived(entry) = store
        .fail_and_archive(task.id, &[TaskStatus::Running], failure(), Timestamp::now())
        .await
        .unwrap()
    else {
        panic!("expected the task to be archived");
    };
    assert_eq!(entry.task_id, task.id);
    assert_eq!(entry.task.status, TaskStatus::Failed);
    assert_eq!(entry.task.error_reason.as_deref(), Some("max_retries_exceeded"));
    assert_eq!(
        TaskRepository::get(store.as_ref(), task.id).await.unwrap().unwrap(),
        entry.task
    );

    // Failed is terminal, so a second call never writes a second entry.
    assert_eq!(
        store
            .fail_and_archive(task.id, &[TaskStatus::Running], failure(), Timestamp::now())
            .await
            .unwrap(),
        DeadLetterInsert::Stale { actual: TaskStatus::Failed }
    );
    assert_eq!(store.list(true).await.unwrap().len(), 1);
    assert_eq!(
        store
            .fail_and_archive(orchestration::TaskId::new(999), &[TaskStatus::Running], failure(), Timestamp::now())
            .await
            .unwrap(),
        DeadLetterInsert::NotFound
    );
}

async fn dead_letter_actions_are_one_way(store: Arc<dyn Store>) {
    let task = running(store.as_ref(), review(3, "x")).await;
    let DeadLetterInsert::Archived(entry) = store
        .fail_and_archive(task.id, &[TaskStatus::Running], failure(), Timestamp::now())
        .await
        .unwrap()
    else {
        panic!("expected a new entry");
    };

    let actor = UserId::new(42);
    let DeadLetterRetry::Spawned { entry: retried, task: spawned } = store
        .retry(entry.id, review(3, "x"), actor, Timestamp::now())
        .await
        .unwrap()
    else {
        panic!("expected a spawned task");
    };
    assert_eq!(spawned.status, TaskStatus::Queued);
    assert_ne!(spawned.id, task.id);
    assert_eq!(retried.retried_by, Some(actor));
    assert_eq!(retried.retried_task_id, Some(spawned.id));

    assert_eq!(
        store.retry(entry.id, review(3, "x"), actor, Timestamp::now()).await.unwrap(),
        DeadLetterRetry::AlreadyRetried
    );
    assert_eq!(
        store.dismiss(entry.id, actor, Timestamp::now()).await.unwrap(),
        DeadLetterClaim::AlreadyRetried
    );

    assert!(store.list(false).await.unwrap().is_empty());
    assert_eq!(store.list(true).await.unwrap().len(), 1);
    assert_eq!(
        store
            .retry(orchestration::DeadLetterId::new(404), review(3, "x"), actor, Timestamp::now())
            .await
            .unwrap(),
        DeadLetterRetry::NotFound
    );
}

async fn retry_links_the_active_task_for_the_commit(store: Arc<dyn Store>) {
    let task = running(store.as_ref(), review(4, "y")).await;
    let DeadLetterInsert::Archived(entry) = store
        .fail_and_archive(task.id, &[TaskStatus::Running], failure(), Timestamp::now())
        .await
        .unwrap()
    else {
        panic!("expected a new entry");
    };
    let active = created(store.as_ref(), review(4, "y")).await;

    let outcome = store
        .retry(entry.id, review(4, "y"), UserId::new(1), Timestamp::now())
        .await
        .unwrap();
    let DeadLetterRetry::Linked { entry, task: linked } = outcome else {
        panic!("expected the active task to be linked, got {outcome:?}");
    };
    assert_eq!(linked.id, active.id);
    assert_eq!(linked.status, TaskStatus::Received);
    assert_eq!(entry.retried_task_id, Some(active.id));

    let dismissed = store
        .dismiss(entry.id, UserId::new(1), Timestamp::now())
        .await
        .unwrap();
    assert_eq!(dismissed, DeadLetterClaim::AlreadyRetried);
}

async fn directory_lookups_are_optional(store: Arc<dyn Store>) {
    assert_eq!(store.resolve_user(ExternalUserId::new(9)).await.unwrap(), None);
    assert_eq!(store.external_project(ProjectId::new(1)).await.unwrap(), None);
}

macro_rules! contract_tests {
    ($module:ident, $make:expr) => {
        mod $module {
            use super::*;

            #[tokio::test]
            async fn second_active_task_for_same_commit_is_rejected() {
                super::second_active_task_for_same_commit_is_rejected($make).await;
            }

            #[tokio::test]
            async fn transitions_are_conditional_on_pre_state() {
                super::transitions_are_conditional_on_pre_state($make).await;
            }

            #[tokio::test]
            async fn supersede_touches_only_queued_and_running() {
                super::supersede_touches_only_queued_and_running($make).await;
            }

            #[tokio::test]
            async fn event_log_is_unique_per_project_and_uuid() {
                super::event_log_is_unique_per_project_and_uuid($make).await;
            }

            #[tokio::test]
            async fn launch_claims_exclude_other_jobs_until_they_lapse() {
                super::launch_claims_exclude_other_jobs_until_they_lapse($make).await;
            }

            #[tokio::test]
            async fn first_recorded_pipeline_wins() {
                super::first_recorded_pipeline_wins($make).await;
            }

            #[tokio::test]
            async fn failing_archives_the_failed_row() {
                super::failing_archives_the_failed_row($make).await;
            }

            #[tokio::test]
            async fn dead_letter_actions_are_one_way() {
                super::dead_letter_actions_are_one_way($make).await;
            }

            #[tokio::test]
            async fn retry_links_the_active_task_for_the_commit() {
                super::retry_links_the_active_task_for_the_commit($make).await;
            }

            #[tokio::test]
            async fn directory_lookups_are_optional() {
                super::directory_lookups_are_optional($make).await;
            }
        }
    };
}

contract_tests!(memory, Arc::new(MemoryStore::new()));
contract_tests!(sqlite, Arc::new(SqliteStore::open_in_memory().unwrap()));

#[tokio::test]
async fn sqlite_directory_round_trips_through_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hookline.db");
    let store = SqliteStore::open(&path).unwrap();
    store
        .register_user(ExternalUserId::new(9), UserId::new(3))
        .await
        .unwrap();
    store
        .register_project(ProjectId::new(1), ExternalProjectId::new(100))
        .await
        .unwrap();
    drop(store);

    let reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(
        reopened.resolve_user(ExternalUserId::new(9)).await.unwrap(),
        Some(UserId::new(3))
    );
    assert_eq!(
        reopened.external_project(ProjectId::new(1)).await.unwrap(),
        Some(ExternalProjectId::new(100))
    );
}

#[tokio::test]
async fn sqlite_counts_one_log_row_per_uuid() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.append(log_entry("evt-9")).await.unwrap();
    store.append(log_entry("evt-9")).await.unwrap();
    assert_eq!(
        store
            .event_log_count(ProjectId::new(1), &EventUuid::new("evt-9").unwrap())
            .await
            .unwrap(),
        1
    );
}
