//! Execution path: launching, retry and back-off, dead letters, results and
//! sweeps.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;

use common::*;
use handlers::{
    DeadLetterError, FailureHandler, FailureOutcome, IntakeOutcome, JobOutcome, ResultProcessor,
    SubmitOutcome,
};
use orchestration::{
    AlertSeverity, BackoffSchedule, CreateTask, Envelope, ErrorClass, ExternalError,
    ExternalProjectId, ExternalUserId, FailureReason, Job, JobQueue, Lane, MergeRequestIid,
    NewTask, OrchestratorConfig, ProjectId, Task, TaskOrigin, TaskPriority, TaskRepository,
    TaskStatus, TaskType, Timestamp, UserId,
};

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Delivers an MR-open event and returns the created task.
async fn open_review(h: &Harness, mr: u64, sha: &str) -> Task {
    match h.pipeline.intake.handle(None, &mr_event("open", mr, sha)).await.unwrap() {
        IntakeOutcome::Accepted { task: Some(task), .. } => task,
        other => panic!("expected a task, got {other:?}"),
    }
}

/// Opens a review and runs its launch job.
async fn running_review(h: &Harness, mr: u64, sha: &str) -> Task {
    let task = open_review(h, mr, sha).await;
    assert_eq!(h.step().await, Some(JobOutcome::Completed));
    h.task(task.id).await
}

// ---------------------------------------------------------------------------
// Launching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn launch_records_strategy_and_pipeline() {
    let h = Harness::new().await;
    h.source_control.set_changed(&["src/app.php", "ui/App.vue"]);

    let task = open_review(&h, 4, "sha1").await;
    assert_eq!(h.queue.lanes(), vec![Lane::Normal]);
    assert_eq!(h.drain().await, vec![JobOutcome::Completed]);

    let task = h.task(task.id).await;
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.result_str("strategy"), Some("mixed-review"));
    assert_eq!(task.pipeline_id.map(|p| p.as_u64()), Some(500));
    assert!(task.started_at.is_some());

    let request = h.launcher.requests.lock().unwrap()[0].clone();
    assert_eq!(request.git_ref.as_str(), "feature");
    assert_eq!(request.project, ExternalProjectId::new(GITLAB_PROJECT));
    assert!(request
        .variables()
        .contains(&("HOOKLINE_SKILLS", "frontend-review,backend-review".to_string())));
}

#[tokio::test]
async fn security_sensitive_paths_select_security_audit() {
    let h = Harness::new().await;
    h.source_control.set_changed(&["config/auth.php", "src/app.php"]);

    let task = running_review(&h, 4, "sha1").await;
    assert_eq!(task.result_str("strategy"), Some("security-audit"));
}

#[tokio::test]
async fn changed_path_lookup_failure_falls_back_to_mixed_review() {
    let h = Harness::new().await;
    h.source_control
        .fail_changed(ExternalError::transient("changed_paths", "HTTP 502").with_status(502));

    let task = running_review(&h, 4, "sha1").await;
    assert_eq!(task.result_str("strategy"), Some("mixed-review"));
    assert!(task.pipeline_id.is_some());
}

#[tokio::test]
async fn duplicate_launch_job_does_not_relaunch() {
    let h = Harness::new().await;
    let task = running_review(&h, 4, "sha1").await;

    h.queue
        .enqueue(Envelope::new(Job::ProcessTask { task_id: task.id }), Lane::Normal, None)
        .await
        .unwrap();
    assert_eq!(h.step().await, Some(JobOutcome::Completed));
    assert_eq!(h.launcher.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn redelivered_launch_job_waits_for_the_claim_holder() {
    let h = Harness::new().await;
    *h.launcher.latency.lock().unwrap() = Some(Duration::from_millis(50));
    let task = open_review(&h, 4, "sha1").await;
    let (first, lane, _) = h.queue.pop().unwrap();
    let redelivered = first.clone();

    // While the first launch call is in flight, a sweep runs and the same
    // job is delivered again.
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let recovered = h.pipeline.sweeper.recover(Timestamp::now()).await.unwrap();
        (recovered, h.pipeline.runner.run(lane, redelivered).await)
    };
    let (a, (recovered, b)) = tokio::join!(h.pipeline.runner.run(lane, first), second);

    assert_eq!(a, JobOutcome::Completed);
    assert_eq!(b, JobOutcome::Completed);
    assert_eq!(recovered, 0);
    assert_eq!(h.queue.len(), 0);
    assert_eq!(h.launcher.requests.lock().unwrap().len(), 1);
    assert!(h.source_control.cancelled.lock().unwrap().is_empty());
    assert_eq!(h.task(task.id).await.pipeline_id, Some(orchestration::PipelineId::new(500)));
}

#[tokio::test]
async fn launch_waiting_out_a_backoff_is_recovered_only_after_its_claim_lapses() {
    let h = Harness::with_config(OrchestratorConfig {
        bot_account_id: Some(ExternalUserId::new(BOT)),
        backoff: BackoffSchedule::new(vec![Duration::from_millis(5)]),
        launch_timeout: Duration::from_millis(20),
        ..OrchestratorConfig::default()
    })
    .await;
    h.launcher
        .fail_next([ExternalError::transient("trigger_pipeline", "HTTP 503").with_status(503)]);
    let task = open_review(&h, 4, "sha1").await;
    assert_eq!(
        h.step().await,
        Some(JobOutcome::Retried { attempt: 2, delay: Duration::from_millis(5) })
    );
    let (retry, lane, _) = h.queue.pop().unwrap();

    let claim = h.task(task.id).await.launch_claim.unwrap();
    assert_eq!(claim.attempt, 1);
    assert_eq!(h.pipeline.sweeper.recover(Timestamp::now()).await.unwrap(), 0);

    // The holder's retry is held back; recovery takes over once the claim
    // lapses.
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(h.pipeline.sweeper.recover(Timestamp::now()).await.unwrap(), 1);
    let (recovered, recovered_lane, _) = h.queue.pop().unwrap();
    assert_eq!(recovered.attempt, Envelope::FIRST_ATTEMPT);
    assert_eq!(h.pipeline.runner.run(recovered_lane, recovered).await, JobOutcome::Completed);

    // The late retry finds the pipeline and stands down.
    assert_eq!(h.pipeline.runner.run(lane, retry).await, JobOutcome::Completed);
    assert_eq!(h.launcher.requests.lock().unwrap().len(), 2);
    assert!(h.source_control.cancelled.lock().unwrap().is_empty());
    assert_eq!(h.task(task.id).await.pipeline_id, Some(orchestration::PipelineId::new(500)));
}

// ---------------------------------------------------------------------------
// Retry and failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_launch_failures_back_off_then_dead_letter() {
    let h = Harness::new().await;
    h.launcher.fail_next(
        (0..4).map(|_| ExternalError::transient("trigger_pipeline", "HTTP 503").with_status(503)),
    );
    let task = open_review(&h, 4, "sha1").await;

    assert_eq!(h.step().await, Some(JobOutcome::Retried { attempt: 2, delay: secs(30) }));
    assert_eq!(h.step().await, Some(JobOutcome::Retried { attempt: 3, delay: secs(120) }));
    assert_eq!(h.step().await, Some(JobOutcome::Retried { attempt: 4, delay: secs(480) }));
    assert_eq!(
        h.step().await,
        Some(JobOutcome::Failed(FailureReason::MaxRetriesExceeded))
    );
    assert_eq!(h.launcher.requests.lock().unwrap().len(), 4);

    let failed = h.task(task.id).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error_reason.as_deref(), Some("max_retries_exceeded"));

    let entries = h.pipeline.dead_letters.list(false).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].task_id, task.id);
    assert_eq!(entries[0].failure_reason, FailureReason::MaxRetriesExceeded);
    let attempts: Vec<u32> = entries[0].attempts.iter().map(|a| a.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3, 4]);
    assert!(entries[0].attempts[0].error.contains("503"));

    // The failure notice goes out on the server lane.
    assert_eq!(h.queue.lanes(), vec![Lane::Server]);
    assert_eq!(h.step().await, Some(JobOutcome::Completed));
    let notices = h.notifier.notices.lock().unwrap().clone();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].0.mr_iid, Some(MergeRequestIid::new(4)));
    assert_eq!(notices[0].1, FailureReason::MaxRetriesExceeded);
}

#[tokio::test]
async fn rejected_credentials_alert_and_fail_without_retry() {
    let h = Harness::new().await;
    h.launcher.fail_next([
        ExternalError::new(ErrorClass::Authentication, "trigger_pipeline", "401 Unauthorized")
            .with_status(401),
    ]);
    let task = open_review(&h, 4, "sha1").await;

    assert_eq!(
        h.step().await,
        Some(JobOutcome::Failed(FailureReason::PipelineTriggerFailed))
    );
    assert_eq!(h.launcher.requests.lock().unwrap().len(), 1);

    let alerts = h.notifier.alerts.lock().unwrap().clone();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    assert_eq!(alerts[0].kind, "authentication_failure");

    assert_eq!(
        h.task(task.id).await.error_reason.as_deref(),
        Some("pipeline_trigger_failed")
    );
}

#[tokio::test]
async fn invalid_request_fails_immediately() {
    let h = Harness::new().await;
    h.launcher.fail_next([
        ExternalError::new(ErrorClass::InvalidRequest, "trigger_pipeline", "bad ref").with_status(400),
    ]);
    let task = open_review(&h, 4, "sha1").await;

    assert_eq!(h.step().await, Some(JobOutcome::Failed(FailureReason::InvalidRequest)));
    assert_eq!(h.task(task.id).await.error_reason.as_deref(), Some("invalid_request"));
    assert_eq!(h.pipeline.dead_letters.list(false).await.unwrap().len(), 1);
}

#[tokio::test]
async fn undeliverable_notice_does_not_refail_the_task() {
    let h = Harness::new().await;
    h.notifier.fail.store(true, Ordering::SeqCst);
    h.launcher.fail_next([
        ExternalError::new(ErrorClass::Forbidden, "trigger_pipeline", "403").with_status(403),
    ]);
    let task = open_review(&h, 4, "sha1").await;

    assert_eq!(
        h.step().await,
        Some(JobOutcome::Failed(FailureReason::PipelineTriggerFailed))
    );
    assert!(matches!(h.step().await, Some(JobOutcome::Failed(_))));
    assert_eq!(h.queue.len(), 0);

    let failed = h.task(task.id).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error_reason.as_deref(), Some("pipeline_trigger_failed"));
    assert_eq!(h.pipeline.dead_letters.list(false).await.unwrap().len(), 1);
}

#[tokio::test]
async fn executor_reported_failure_dead_letters_once() {
    let h = Harness::new().await;
    let task = running_review(&h, 4, "sha1").await;

    let first = h
        .pipeline
        .results
        .report_failure(task.id, FailureReason::SchedulingTimeout, "runner never picked up")
        .await
        .unwrap();
    assert!(matches!(first, FailureOutcome::DeadLettered(_)));

    let second = h
        .pipeline
        .results
        .report_failure(task.id, FailureReason::SchedulingTimeout, "runner never picked up")
        .await
        .unwrap();
    assert_eq!(second, FailureOutcome::AlreadyTerminal(TaskStatus::Failed));
    assert_eq!(h.pipeline.dead_letters.list(true).await.unwrap().len(), 1);
}

#[tokio::test]
async fn archive_outage_leaves_the_task_for_a_rerun() {
    let h = Harness::new().await;
    let task = running_review(&h, 4, "sha1").await;
    let failures = FailureHandler::new(h.store.clone(), h.archive.clone(), h.queue.clone());

    h.archive.fail_writes(1);
    let outage = failures
        .fail(task.id, FailureReason::SchedulingTimeout, "runner never picked up", Vec::new())
        .await;
    assert!(outage.is_err());
    let untouched = h.task(task.id).await;
    assert_eq!(untouched.status, TaskStatus::Running);
    assert_eq!(untouched.error_reason, None);
    assert!(h.pipeline.dead_letters.list(true).await.unwrap().is_empty());
    assert_eq!(h.queue.len(), 0);

    let rerun = failures
        .fail(task.id, FailureReason::SchedulingTimeout, "runner never picked up", Vec::new())
        .await
        .unwrap();
    let FailureOutcome::DeadLettered(id) = rerun else {
        panic!("expected the rerun to archive the task, got {rerun:?}");
    };
    let entry = h.pipeline.dead_letters.get(id).await.unwrap();
    assert_eq!(entry.task_id, task.id);
    assert_eq!(entry.task.status, TaskStatus::Failed);
    assert_eq!(h.task(task.id).await.status, TaskStatus::Failed);
    assert_eq!(h.queue.lanes(), vec![Lane::Server]);
}

// ---------------------------------------------------------------------------
// Dead-letter operations
// ---------------------------------------------------------------------------

async fn dead_lettered(h: &Harness) -> (Task, orchestration::DeadLetterEntry) {
    h.launcher.fail_next([
        ExternalError::new(ErrorClass::Forbidden, "trigger_pipeline", "403").with_status(403),
    ]);
    let task = open_review(h, 4, "sha1").await;
    h.step().await;
    // Drop the failure notice.
    h.queue.pop();
    let entry = h.pipeline.dead_letters.list(false).await.unwrap().remove(0);
    (task, entry)
}

#[tokio::test]
async fn retry_spawns_a_fresh_task_once() {
    let h = Harness::new().await;
    let (original, entry) = dead_lettered(&h).await;
    let actor = UserId::new(5);

    let retried = h.pipeline.dead_letters.retry(entry.id, actor).await.unwrap();
    assert_ne!(retried.id, original.id);
    assert_eq!(retried.status, TaskStatus::Queued);
    assert_eq!(retried.mr_iid, original.mr_iid);
    assert_eq!(h.queue.lanes(), vec![Lane::Normal]);

    let entry = h.pipeline.dead_letters.get(entry.id).await.unwrap();
    assert!(entry.retried);
    assert_eq!(entry.retried_by, Some(actor));
    assert_eq!(entry.retried_task_id, Some(retried.id));

    let again = h.pipeline.dead_letters.retry(entry.id, actor).await;
    assert!(matches!(again, Err(DeadLetterError::AlreadyRetried(_))));
    let dismiss = h.pipeline.dead_letters.dismiss(entry.id, actor).await;
    assert!(matches!(dismiss, Err(DeadLetterError::AlreadyRetried(_))));

    assert_eq!(h.store.tasks().await.len(), 2);
    assert!(h.pipeline.dead_letters.list(false).await.unwrap().is_empty());
    assert_eq!(h.pipeline.dead_letters.list(true).await.unwrap().len(), 1);

    // The retried task runs like any other.
    assert_eq!(h.step().await, Some(JobOutcome::Completed));
    assert_eq!(h.task(retried.id).await.status, TaskStatus::Running);
}

#[tokio::test]
async fn failed_retry_leaves_the_entry_retryable() {
    let h = Harness::new().await;
    let (_, entry) = dead_lettered(&h).await;
    let actor = UserId::new(5);

    h.archive.fail_writes(1);
    let outage = h.pipeline.dead_letters.retry(entry.id, actor).await;
    assert!(matches!(outage, Err(DeadLetterError::Store(_))));
    let unchanged = h.pipeline.dead_letters.get(entry.id).await.unwrap();
    assert!(unchanged.is_active());
    assert_eq!(unchanged.retried_task_id, None);
    assert_eq!(h.store.tasks().await.len(), 1);
    assert_eq!(h.queue.len(), 0);

    let retried = h.pipeline.dead_letters.retry(entry.id, actor).await.unwrap();
    assert_eq!(retried.status, TaskStatus::Queued);
    assert_eq!(
        h.pipeline.dead_letters.get(entry.id).await.unwrap().retried_task_id,
        Some(retried.id)
    );
    assert_eq!(h.queue.lanes(), vec![Lane::Normal]);
}

#[tokio::test]
async fn retry_links_an_active_task_for_the_same_commit() {
    let h = Harness::new().await;
    let (_, entry) = dead_lettered(&h).await;
    let active = open_review(&h, 4, "sha1").await;
    h.queue.pop();

    let linked = h.pipeline.dead_letters.retry(entry.id, UserId::new(5)).await.unwrap();
    assert_eq!(linked.id, active.id);
    assert_eq!(h.queue.len(), 0);
    let entry = h.pipeline.dead_letters.get(entry.id).await.unwrap();
    assert!(entry.retried);
    assert_eq!(entry.retried_task_id, Some(active.id));
}

#[tokio::test]
async fn dismissed_entries_cannot_be_retried() {
    let h = Harness::new().await;
    let (_, entry) = dead_lettered(&h).await;
    let actor = UserId::new(5);

    let dismissed = h.pipeline.dead_letters.dismiss(entry.id, actor).await.unwrap();
    assert!(dismissed.dismissed);
    assert_eq!(dismissed.dismissed_by, Some(actor));

    let retry = h.pipeline.dead_letters.retry(entry.id, actor).await;
    assert!(matches!(retry, Err(DeadLetterError::AlreadyDismissed(_))));
    assert_eq!(h.store.tasks().await.len(), 1);
}

#[tokio::test]
async fn unknown_dead_letter_is_not_found() {
    let h = Harness::new().await;
    let (_, entry) = dead_lettered(&h).await;
    let missing = orchestration::DeadLetterId::new(entry.id.as_u64() + 100);
    assert!(matches!(
        h.pipeline.dead_letters.retry(missing, UserId::new(5)).await,
        Err(DeadLetterError::NotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[tokio::test]
async fn valid_result_completes_with_unknown_keys_stripped() {
    let h = Harness::new().await;
    let task = running_review(&h, 4, "sha1").await;

    let mut payload = valid_review();
    payload["debug"] = json!({"tokens": 1234});
    payload["summary"]["internal"] = json!(true);
    assert_eq!(
        h.pipeline.results.submit(task.id, payload).await.unwrap(),
        SubmitOutcome::Accepted
    );
    assert_eq!(h.drain().await, vec![JobOutcome::Completed]);

    let done = h.task(task.id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result, Some(valid_review()));
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn invalid_result_fails_with_schema_reason() {
    let h = Harness::new().await;
    let task = running_review(&h, 4, "sha1").await;

    let mut payload = valid_review();
    payload["commit_status"] = json!("pending");
    h.pipeline.results.submit(task.id, payload).await.unwrap();
    h.drain().await;

    let failed = h.task(task.id).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    let reason = failed.error_reason.unwrap();
    assert!(reason.starts_with("Schema validation failed:"), "{reason}");
    assert!(reason.contains("commit_status"), "{reason}");
    // Result rejections are not dead-lettered.
    assert!(h.pipeline.dead_letters.list(true).await.unwrap().is_empty());
}

#[tokio::test]
async fn null_result_fails() {
    let h = Harness::new().await;
    let task = running_review(&h, 4, "sha1").await;

    h.pipeline.results.submit(task.id, serde_json::Value::Null).await.unwrap();
    h.drain().await;

    let failed = h.task(task.id).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error_reason.as_deref(), Some("Result payload is null"));
}

#[tokio::test]
async fn processing_a_superseded_task_writes_nothing() {
    let h = Harness::new().await;
    let task = running_review(&h, 4, "sha1").await;
    h.pipeline.results.submit(task.id, valid_review()).await.unwrap();
    let snapshot = h.task(task.id).await;

    h.force(&snapshot, TaskStatus::Running, TaskStatus::Superseded).await;

    let processor = ResultProcessor::new(h.store.clone());
    let outcome = processor.process(&snapshot).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(
        outcome.errors,
        vec!["task is no longer running (status: superseded)".to_string()]
    );
    let after = h.task(task.id).await;
    assert_eq!(after.status, TaskStatus::Superseded);
    assert_eq!(after.completed_at, None);
}

#[tokio::test]
async fn server_mode_task_completes_once() {
    let h = Harness::new().await;
    let CreateTask::Created(task) = h
        .store
        .create(NewTask {
            task_type: TaskType::PrdCreation,
            origin: TaskOrigin::Conversation,
            user_id: Some(UserId::new(USER)),
            project_id: ProjectId::new(PROJECT),
            priority: TaskPriority::Normal,
            mr_iid: None,
            issue_iid: None,
            commit_sha: None,
            result: None,
        })
        .await
        .unwrap()
    else {
        panic!("expected a new task");
    };
    let task = h.force(&task, TaskStatus::Received, TaskStatus::Queued).await;
    assert_eq!(task.lane(), Lane::Server);

    let outcome = h
        .pipeline
        .runner
        .run(Lane::Server, Envelope::new(Job::ProcessTask { task_id: task.id }))
        .await;
    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(h.task(task.id).await.status, TaskStatus::Running);
    assert!(h.launcher.requests.lock().unwrap().is_empty());

    h.pipeline
        .results
        .submit(task.id, json!({"title": "Checkout PRD"}))
        .await
        .unwrap();
    // One processing job from dispatch, one from the submitted result.
    assert_eq!(h.queue.lanes(), vec![Lane::Server, Lane::Server]);
    assert_eq!(h.drain().await, vec![JobOutcome::Completed, JobOutcome::Completed]);

    let done = h.task(task.id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result, Some(json!({"title": "Checkout PRD"})));
}

// ---------------------------------------------------------------------------
// Sweeps
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_queued_tasks_expire() {
    let h = Harness::new().await;
    let task = h.queued_review(4, "sha1").await;

    assert_eq!(h.pipeline.sweeper.expire_queued(Timestamp::now()).await.unwrap(), 0);

    let later = Timestamp::from_utc(chrono::Utc::now() + chrono::Duration::hours(3));
    assert_eq!(h.pipeline.sweeper.expire_queued(later).await.unwrap(), 1);
    assert_eq!(h.pipeline.sweeper.expire_queued(later).await.unwrap(), 0);

    let expired = h.task(task.id).await;
    assert_eq!(expired.status, TaskStatus::Failed);
    assert_eq!(expired.error_reason.as_deref(), Some("expired"));

    let entries = h.pipeline.dead_letters.list(false).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].failure_reason, FailureReason::Expired);
    assert_eq!(h.queue.lanes(), vec![Lane::Server]);
}

#[tokio::test]
async fn recovery_requeues_unlaunched_work() {
    let h = Harness::new().await;
    let queued = h.queued_review(4, "sha-a").await;
    let orphan = h.queued_review(5, "sha-b").await;
    h.force(&orphan, TaskStatus::Queued, TaskStatus::Running).await;
    let launched = h.queued_review(6, "sha-c").await;
    let launched = h.force(&launched, TaskStatus::Queued, TaskStatus::Running).await;
    h.store
        .record_pipeline(launched.id, orchestration::PipelineId::new(9))
        .await
        .unwrap();

    // The orphan has no claim; it waits out one claim period from its last
    // update before recovery treats it as stalled.
    assert_eq!(h.pipeline.sweeper.recover(Timestamp::now()).await.unwrap(), 1);
    h.queue.pop();
    let later = Timestamp::now().plus(secs(3600));
    assert_eq!(h.pipeline.sweeper.recover(later).await.unwrap(), 2);
    assert_eq!(h.queue.lanes(), vec![Lane::Normal, Lane::Normal]);

    assert_eq!(h.drain().await, vec![JobOutcome::Completed, JobOutcome::Completed]);
    assert!(h.task(queued.id).await.pipeline_id.is_some());
    assert!(h.task(orphan.id).await.pipeline_id.is_some());
    assert_eq!(h.launcher.requests.lock().unwrap().len(), 2);
}
