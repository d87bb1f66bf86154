//! SQLite store.
//!
//! One connection behind a mutex; every call runs on the blocking pool.
//! The schema's unique indexes are the cross-process locks:
//!
//! - `webhook_events (project_id, event_uuid)`: the dedup gate.
//! - `tasks_active_commit`: a partial index over non-terminal tasks keyed on
//!   (project_id, mr_iid, commit_sha).
//! - `dead_letters (task_id)`: one archive entry per task.
//!
//! Status changes are `UPDATE ... WHERE status = <observed>`; zero changed
//! rows means another writer got there first. Writes that read before they
//! decide (launch claims, fail-and-archive, dead-letter retry) run in an
//! `IMMEDIATE` transaction, which takes the database write lock up front.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};

use orchestration::{
    AppendOutcome, AttemptRecord, CommentId, CommitSha, CreateTask, DeadLetterClaim, DeadLetterEntry,
    DeadLetterId, DeadLetterInsert, DeadLetterRepository, DeadLetterRetry, Directory,
    EventLogEntry, EventLogRepository, EventUuid, ExternalProjectId, ExternalUserId,
    FailureReason, IssueIid, LaunchClaim, MergeRequestIid, NewDeadLetter, NewTask, PipelineId,
    ProjectId, StoreError, Task, TaskId,
    TaskOrigin, TaskPriority, TaskRepository, TaskStatus, TaskType, Timestamp, TransitionPatch,
    UpdateOutcome, UserId,
};

/// Schema migrations, applied in order. `PRAGMA user_version` records how
/// many have run.
const MIGRATIONS: &[&str] = &[
    "CREATE TABLE tasks (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        task_type     TEXT NOT NULL,
        origin        TEXT NOT NULL,
        user_id       INTEGER,
        project_id    INTEGER NOT NULL,
        priority      TEXT NOT NULL,
        status        TEXT NOT NULL,
        mr_iid        INTEGER,
        issue_iid     INTEGER,
        commit_sha    TEXT,
        pipeline_id   INTEGER,
        comment_id    INTEGER,
        result        TEXT,
        error_reason  TEXT,
        created_at    TEXT NOT NULL,
        updated_at    TEXT NOT NULL,
        started_at    TEXT,
        completed_at  TEXT
    );
    CREATE INDEX tasks_status ON tasks(status);
    CREATE INDEX tasks_project_mr ON tasks(project_id, mr_iid);
    CREATE UNIQUE INDEX tasks_active_commit ON tasks(project_id, mr_iid, commit_sha)
        WHERE status IN ('received', 'queued', 'running')
          AND mr_iid IS NOT NULL
          AND commit_sha IS NOT NULL;

    CREATE TABLE webhook_events (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id  INTEGER NOT NULL,
        event_uuid  TEXT NOT NULL,
        event_type  TEXT NOT NULL,
        intent      TEXT,
        mr_iid      INTEGER,
        commit_sha  TEXT,
        created_at  TEXT NOT NULL,
        UNIQUE (project_id, event_uuid)
    );

    CREATE TABLE dead_letters (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id          INTEGER NOT NULL UNIQUE,
        task_record      TEXT NOT NULL,
        failure_reason   TEXT NOT NULL,
        error_details    TEXT NOT NULL,
        attempts         TEXT NOT NULL,
        dead_lettered_at TEXT NOT NULL,
        retried          INTEGER NOT NULL DEFAULT 0,
        retried_at       TEXT,
        retried_by       INTEGER,
        retried_task_id  INTEGER,
        dismissed        INTEGER NOT NULL DEFAULT 0,
        dismissed_at     TEXT,
        dismissed_by     INTEGER
    );",
    "CREATE TABLE directory_users (
        external_user_id INTEGER PRIMARY KEY,
        user_id          INTEGER NOT NULL
    );
    CREATE TABLE directory_projects (
        project_id          INTEGER PRIMARY KEY,
        external_project_id INTEGER NOT NULL
    );",
    "ALTER TABLE tasks ADD COLUMN launch_attempt INTEGER;
    ALTER TABLE tasks ADD COLUMN launch_claimed_until TEXT;",
];

const TASK_COLUMNS: &str = "id, task_type, origin, user_id, project_id, priority, status, \
     mr_iid, issue_iid, commit_sha, pipeline_id, comment_id, result, error_reason, \
     created_at, updated_at, started_at, completed_at, launch_attempt, launch_claimed_until";

const DEAD_LETTER_COLUMNS: &str = "id, task_id, task_record, failure_reason, error_details, \
     attempts, dead_lettered_at, retried, retried_at, retried_by, retried_task_id, dismissed, \
     dismissed_at, dismissed_by";

/// A SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies pending
    /// migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(db("open database"))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(db("configure database"))?;
        Self::from_connection(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db("open database"))?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, StoreError> {
        migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Maps a provider account to an internal user.
    pub async fn register_user(
        &self,
        external: ExternalUserId,
        user: UserId,
    ) -> Result<(), StoreError> {
        self.call("register user", move |conn| {
            conn.execute(
                "INSERT INTO directory_users (external_user_id, user_id) VALUES (?1, ?2)
                 ON CONFLICT (external_user_id) DO UPDATE SET user_id = excluded.user_id",
                params![int("external_user_id", external.as_u64())?, int("user_id", user.as_u64())?],
            )
            .map_err(db("register user"))?;
            Ok(())
        })
        .await
    }

    /// Maps an internal project to its provider project id.
    pub async fn register_project(
        &self,
        project: ProjectId,
        external: ExternalProjectId,
    ) -> Result<(), StoreError> {
        self.call("register project", move |conn| {
            conn.execute(
                "INSERT INTO directory_projects (project_id, external_project_id) VALUES (?1, ?2)
                 ON CONFLICT (project_id) DO UPDATE SET external_project_id = excluded.external_project_id",
                params![
                    int("project_id", project.as_u64())?,
                    int("external_project_id", external.as_u64())?
                ],
            )
            .map_err(db("register project"))?;
            Ok(())
        })
        .await
    }

    /// Number of event log rows for a (project, UUID).
    pub async fn event_log_count(
        &self,
        project: ProjectId,
        uuid: &EventUuid,
    ) -> Result<u64, StoreError> {
        let uuid = uuid.as_str().to_string();
        self.call("count events", move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM webhook_events WHERE project_id = ?1 AND event_uuid = ?2",
                    params![int("project_id", project.as_u64())?, uuid],
                    |row| row.get(0),
                )
                .map_err(db("count events"))?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn call<T, F>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::backend(operation, "connection mutex poisoned"))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::backend(operation, e.to_string()))?
    }
}

fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    let applied: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(db("read schema version"))?;
    let applied = usize::try_from(applied).unwrap_or(0);

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(applied) {
        let version = index + 1;
        let tx = conn.transaction().map_err(db("migrate"))?;
        tx.execute_batch(sql).map_err(db("migrate"))?;
        tx.pragma_update(None, "user_version", version as i64)
            .map_err(db("migrate"))?;
        tx.commit().map_err(db("migrate"))?;
        info!(version, "applied schema migration");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn db(operation: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::backend(operation, e.to_string())
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(error, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

// SQLite integers are signed; ids past `i64::MAX` are refused, not wrapped.
fn int(field: &'static str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange { field, value })
}

fn opt_int(field: &'static str, value: Option<u64>) -> Result<Option<i64>, StoreError> {
    value.map(|v| int(field, v)).transpose()
}

fn uint(entity: &'static str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::corrupt(entity, format!("negative id {value}")))
}

fn opt_uint(entity: &'static str, value: Option<i64>) -> Result<Option<u64>, StoreError> {
    value.map(|v| uint(entity, v)).transpose()
}

fn status_list(statuses: &[TaskStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn corrupt(entity: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::corrupt(entity, e.to_string())
}

fn parse_time(entity: &'static str, value: &str) -> Result<Timestamp, StoreError> {
    Timestamp::parse_rfc3339(value)
        .ok_or_else(|| StoreError::corrupt(entity, format!("bad timestamp '{value}'")))
}

fn parse_opt_time(entity: &'static str, value: Option<String>) -> Result<Option<Timestamp>, StoreError> {
    value.map(|v| parse_time(entity, &v)).transpose()
}

fn parse_enum<T>(entity: &'static str, field: &str, value: &str, parse: fn(&str) -> Option<T>) -> Result<T, StoreError> {
    parse(value).ok_or_else(|| StoreError::corrupt(entity, format!("unknown {field} '{value}'")))
}

fn read_task(row: &Row<'_>) -> Result<Task, StoreError> {
    let get_err = corrupt("task");
    let id: i64 = row.get(0).map_err(&get_err)?;
    let task_type: String = row.get(1).map_err(&get_err)?;
    let origin: String = row.get(2).map_err(&get_err)?;
    let user_id: Option<i64> = row.get(3).map_err(&get_err)?;
    let project_id: i64 = row.get(4).map_err(&get_err)?;
    let priority: String = row.get(5).map_err(&get_err)?;
    let status: String = row.get(6).map_err(&get_err)?;
    let mr_iid: Option<i64> = row.get(7).map_err(&get_err)?;
    let issue_iid: Option<i64> = row.get(8).map_err(&get_err)?;
    let commit_sha: Option<String> = row.get(9).map_err(&get_err)?;
    let pipeline_id: Option<i64> = row.get(10).map_err(&get_err)?;
    let comment_id: Option<i64> = row.get(11).map_err(&get_err)?;
    let result: Option<String> = row.get(12).map_err(&get_err)?;
    let error_reason: Option<String> = row.get(13).map_err(&get_err)?;
    let created_at: String = row.get(14).map_err(&get_err)?;
    let updated_at: String = row.get(15).map_err(&get_err)?;
    let started_at: Option<String> = row.get(16).map_err(&get_err)?;
    let completed_at: Option<String> = row.get(17).map_err(&get_err)?;
    let launch_attempt: Option<u32> = row.get(18).map_err(&get_err)?;
    let launch_claimed_until: Option<String> = row.get(19).map_err(&get_err)?;

    let result = result
        .map(|r| serde_json::from_str(&r))
        .transpose()
        .map_err(|e| StoreError::corrupt("task", e.to_string()))?;
    let launch_claim = match (launch_attempt, parse_opt_time("task", launch_claimed_until)?) {
        (Some(attempt), Some(until)) => Some(LaunchClaim { attempt, until }),
        _ => None,
    };

    Ok(Task {
        id: TaskId::new(uint("task", id)?),
        task_type: parse_enum("task", "type", &task_type, TaskType::parse)?,
        origin: parse_enum("task", "origin", &origin, TaskOrigin::parse)?,
        user_id: opt_uint("task", user_id)?.map(UserId::new),
        project_id: ProjectId::new(uint("task", project_id)?),
        priority: parse_enum("task", "priority", &priority, TaskPriority::parse)?,
        status: parse_enum("task", "status", &status, TaskStatus::parse)?,
        mr_iid: opt_uint("task", mr_iid)?.map(MergeRequestIid::new),
        issue_iid: opt_uint("task", issue_iid)?.map(IssueIid::new),
        commit_sha: commit_sha.and_then(CommitSha::new),
        pipeline_id: opt_uint("task", pipeline_id)?.map(PipelineId::new),
        comment_id: opt_uint("task", comment_id)?.map(CommentId::new),
        result,
        error_reason,
        created_at: parse_time("task", &created_at)?,
        updated_at: parse_time("task", &updated_at)?,
        started_at: parse_opt_time("task", started_at)?,
        completed_at: parse_opt_time("task", completed_at)?,
        launch_claim,
    })
}

fn read_dead_letter(row: &Row<'_>) -> Result<DeadLetterEntry, StoreError> {
    let get_err = corrupt("dead letter");
    let id: i64 = row.get(0).map_err(&get_err)?;
    let task_id: i64 = row.get(1).map_err(&get_err)?;
    let task_record: String = row.get(2).map_err(&get_err)?;
    let failure_reason: String = row.get(3).map_err(&get_err)?;
    let error_details: String = row.get(4).map_err(&get_err)?;
    let attempts: String = row.get(5).map_err(&get_err)?;
    let dead_lettered_at: String = row.get(6).map_err(&get_err)?;
    let retried: bool = row.get(7).map_err(&get_err)?;
    let retried_at: Option<String> = row.get(8).map_err(&get_err)?;
    let retried_by: Option<i64> = row.get(9).map_err(&get_err)?;
    let retried_task_id: Option<i64> = row.get(10).map_err(&get_err)?;
    let dismissed: bool = row.get(11).map_err(&get_err)?;
    let dismissed_at: Option<String> = row.get(12).map_err(&get_err)?;
    let dismissed_by: Option<i64> = row.get(13).map_err(&get_err)?;

    let task: Task = serde_json::from_str(&task_record)
        .map_err(|e| StoreError::corrupt("dead letter", e.to_string()))?;
    let attempts: Vec<AttemptRecord> = serde_json::from_str(&attempts)
        .map_err(|e| StoreError::corrupt("dead letter", e.to_string()))?;

    Ok(DeadLetterEntry {
        id: DeadLetterId::new(uint("dead letter", id)?),
        task_id: TaskId::new(uint("dead letter", task_id)?),
        task,
        failure_reason: parse_enum(
            "dead letter",
            "failure reason",
            &failure_reason,
            FailureReason::parse,
        )?,
        error_details,
        attempts,
        dead_lettered_at: parse_time("dead letter", &dead_lettered_at)?,
        retried,
        retried_at: parse_opt_time("dead letter", retried_at)?,
        retried_by: opt_uint("dead letter", retried_by)?.map(UserId::new),
        retried_task_id: opt_uint("dead letter", retried_task_id)?.map(TaskId::new),
        dismissed,
        dismissed_at: parse_opt_time("dead letter", dismissed_at)?,
        dismissed_by: opt_uint("dead letter", dismissed_by)?.map(UserId::new),
    })
}

fn select_task(conn: &Connection, id: TaskId) -> Result<Option<Task>, StoreError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    let mut stmt = conn.prepare_cached(&sql).map_err(db("get task"))?;
    let mut rows = stmt
        .query(params![int("task_id", id.as_u64())?])
        .map_err(db("get task"))?;
    match rows.next().map_err(db("get task"))? {
        Some(row) => read_task(row).map(Some),
        None => Ok(None),
    }
}

fn select_tasks(
    conn: &Connection,
    operation: &'static str,
    where_clause: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Task>, StoreError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE {where_clause} ORDER BY id");
    let mut stmt = conn.prepare(&sql).map_err(db(operation))?;
    let mut rows = stmt.query(params).map_err(db(operation))?;
    let mut tasks = Vec::new();
    while let Some(row) = rows.next().map_err(db(operation))? {
        tasks.push(read_task(row)?);
    }
    Ok(tasks)
}

fn select_dead_letter(conn: &Connection, id: DeadLetterId) -> Result<Option<DeadLetterEntry>, StoreError> {
    let sql = format!("SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters WHERE id = ?1");
    let mut stmt = conn.prepare_cached(&sql).map_err(db("get dead letter"))?;
    let mut rows = stmt
        .query(params![int("dead_letter_id", id.as_u64())?])
        .map_err(db("get dead letter"))?;
    match rows.next().map_err(db("get dead letter"))? {
        Some(row) => read_dead_letter(row).map(Some),
        None => Ok(None),
    }
}

fn active_for_commit(
    conn: &Connection,
    project: ProjectId,
    mr: MergeRequestIid,
    commit: &str,
) -> Result<Option<TaskId>, StoreError> {
    let id = conn
        .query_row(
            "SELECT id FROM tasks
             WHERE project_id = ?1 AND mr_iid = ?2 AND commit_sha = ?3
               AND status IN ('received', 'queued', 'running')",
            params![int("project_id", project.as_u64())?, int("mr_iid", mr.as_u64())?, commit],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map_err(db("find active task"))?;
    Ok(opt_uint("task", id)?.map(TaskId::new))
}

// Inserts a task in `status`. A clash on the active-commit index reports the
// task holding the slot.
fn insert_task(
    conn: &Connection,
    new: &NewTask,
    status: TaskStatus,
    now: Timestamp,
) -> Result<CreateTask, StoreError> {
    let result = new
        .result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StoreError::backend("insert task", e.to_string()))?;
    let inserted = conn.execute(
        "INSERT INTO tasks (task_type, origin, user_id, project_id, priority, status,
                            mr_iid, issue_iid, commit_sha, result, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            new.task_type.as_str(),
            new.origin.as_str(),
            opt_int("user_id", new.user_id.map(UserId::as_u64))?,
            int("project_id", new.project_id.as_u64())?,
            new.priority.as_str(),
            status.as_str(),
            opt_int("mr_iid", new.mr_iid.map(MergeRequestIid::as_u64))?,
            opt_int("issue_iid", new.issue_iid.map(IssueIid::as_u64))?,
            new.commit_sha.as_ref().map(CommitSha::as_str),
            result,
            now.to_string(),
        ],
    );

    match inserted {
        Ok(_) => {
            let id = TaskId::new(uint("task", conn.last_insert_rowid())?);
            let task = select_task(conn, id)?
                .ok_or_else(|| StoreError::backend("insert task", "inserted row vanished"))?;
            Ok(CreateTask::Created(task))
        }
        Err(e) if is_unique_violation(&e) => {
            let (Some(mr), Some(commit)) = (new.mr_iid, new.commit_sha.as_ref()) else {
                return Err(StoreError::backend("insert task", e.to_string()));
            };
            match active_for_commit(conn, new.project_id, mr, commit.as_str())? {
                Some(existing) => Ok(CreateTask::ActiveDuplicate(existing)),
                None => Err(StoreError::backend("insert task", e.to_string())),
            }
        }
        Err(e) => Err(StoreError::backend("insert task", e.to_string())),
    }
}

// Re-reads the row after a conditional update touched nothing.
fn stale_or_missing(conn: &Connection, id: TaskId) -> Result<UpdateOutcome, StoreError> {
    Ok(match select_task(conn, id)? {
        Some(task) => UpdateOutcome::Stale {
            actual: task.status,
        },
        None => UpdateOutcome::NotFound,
    })
}

fn applied(conn: &Connection, id: TaskId) -> Result<UpdateOutcome, StoreError> {
    Ok(match select_task(conn, id)? {
        Some(task) => UpdateOutcome::Applied(task),
        None => UpdateOutcome::NotFound,
    })
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

#[async_trait]
impl TaskRepository for SqliteStore {
    async fn create(&self, new: NewTask) -> Result<CreateTask, StoreError> {
        self.call("insert task", move |conn| {
            insert_task(conn, &new, TaskStatus::Received, Timestamp::now())
        })
        .await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.call("get task", move |conn| select_task(conn, id)).await
    }

    async fn transition(
        &self,
        id: TaskId,
        from: &[TaskStatus],
        to: TaskStatus,
        patch: TransitionPatch,
    ) -> Result<UpdateOutcome, StoreError> {
        let allowed = status_list(from);
        self.call("transition task", move |conn| {
            let now = Timestamp::now().to_string();
            let result = patch
                .result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| StoreError::backend("transition task", e.to_string()))?;
            let sql = format!(
                "UPDATE tasks SET
                    status = ?1,
                    updated_at = ?2,
                    started_at = CASE WHEN ?1 = 'running' THEN ?2 ELSE started_at END,
                    completed_at = CASE WHEN ?1 = 'completed' THEN ?2 ELSE completed_at END,
                    error_reason = COALESCE(?3, error_reason),
                    result = COALESCE(?4, result)
                 WHERE id = ?5 AND status IN ({allowed})"
            );
            let changed = conn
                .execute(
                    &sql,
                    params![to.as_str(), now, patch.error_reason, result, int("task_id", id.as_u64())?],
                )
                .map_err(db("transition task"))?;
            if changed == 0 {
                return stale_or_missing(conn, id);
            }
            debug!(task_id = %id, to = %to, "task transitioned");
            applied(conn, id)
        })
        .await
    }

    async fn replace_result(
        &self,
        id: TaskId,
        expected: TaskStatus,
        result: serde_json::Value,
    ) -> Result<UpdateOutcome, StoreError> {
        self.call("replace result", move |conn| {
            let body = serde_json::to_string(&result)
                .map_err(|e| StoreError::backend("replace result", e.to_string()))?;
            let changed = conn
                .execute(
                    "UPDATE tasks SET result = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                    params![
                        body,
                        Timestamp::now().to_string(),
                        int("task_id", id.as_u64())?,
                        expected.as_str()
                    ],
                )
                .map_err(db("replace result"))?;
            if changed == 0 {
                return stale_or_missing(conn, id);
            }
            applied(conn, id)
        })
        .await
    }

    async fn claim_launch(
        &self,
        id: TaskId,
        attempt: u32,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<UpdateOutcome, StoreError> {
        self.call("claim launch", move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db("claim launch"))?;
            let Some(task) = select_task(&tx, id)? else {
                return Ok(UpdateOutcome::NotFound);
            };
            if !task.launch_open_to(attempt, now) {
                return Ok(UpdateOutcome::Stale {
                    actual: task.status,
                });
            }
            tx.execute(
                "UPDATE tasks SET launch_attempt = ?1, launch_claimed_until = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![attempt, until.to_string(), now.to_string(), int("task_id", id.as_u64())?],
            )
            .map_err(db("claim launch"))?;
            let outcome = applied(&tx, id)?;
            tx.commit().map_err(db("claim launch"))?;
            Ok(outcome)
        })
        .await
    }

    async fn record_pipeline(
        &self,
        id: TaskId,
        pipeline: PipelineId,
    ) -> Result<UpdateOutcome, StoreError> {
        self.call("record pipeline", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tasks SET pipeline_id = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = 'running' AND pipeline_id IS NULL",
                    params![
                        int("pipeline_id", pipeline.as_u64())?,
                        Timestamp::now().to_string(),
                        int("task_id", id.as_u64())?
                    ],
                )
                .map_err(db("record pipeline"))?;
            if changed == 0 {
                return stale_or_missing(conn, id);
            }
            applied(conn, id)
        })
        .await
    }

    async fn find_active_for_commit(
        &self,
        project: ProjectId,
        mr: MergeRequestIid,
        commit: &CommitSha,
    ) -> Result<Option<TaskId>, StoreError> {
        let commit = commit.as_str().to_string();
        self.call("find active task", move |conn| {
            active_for_commit(conn, project, mr, &commit)
        })
        .await
    }

    async fn supersede_for_merge_request(
        &self,
        project: ProjectId,
        mr: MergeRequestIid,
    ) -> Result<Vec<Task>, StoreError> {
        self.call("supersede tasks", move |conn| {
            let project = int("project_id", project.as_u64())?;
            let mr = int("mr_iid", mr.as_u64())?;
            let tx = conn.transaction().map_err(db("supersede tasks"))?;
            let candidates = select_tasks(
                &tx,
                "supersede tasks",
                "project_id = ?1 AND mr_iid = ?2 AND status IN ('queued', 'running')",
                params![project, mr],
            )?;
            tx.execute(
                "UPDATE tasks SET status = 'superseded', updated_at = ?3
                 WHERE project_id = ?1 AND mr_iid = ?2 AND status IN ('queued', 'running')",
                params![project, mr, Timestamp::now().to_string()],
            )
            .map_err(db("supersede tasks"))?;
            tx.commit().map_err(db("supersede tasks"))?;
            Ok(candidates)
        })
        .await
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        self.call("list tasks", move |conn| {
            select_tasks(conn, "list tasks", "status = ?1", params![status.as_str()])
        })
        .await
    }
}

#[async_trait]
impl EventLogRepository for SqliteStore {
    async fn contains(&self, project: ProjectId, uuid: &EventUuid) -> Result<bool, StoreError> {
        let uuid = uuid.as_str().to_string();
        self.call("check event log", move |conn| {
            conn.query_row(
                "SELECT 1 FROM webhook_events WHERE project_id = ?1 AND event_uuid = ?2",
                params![int("project_id", project.as_u64())?, uuid],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(db("check event log"))
        })
        .await
    }

    async fn append(&self, entry: EventLogEntry) -> Result<AppendOutcome, StoreError> {
        self.call("append event log", move |conn| {
            let inserted = conn.execute(
                "INSERT INTO webhook_events
                    (project_id, event_uuid, event_type, intent, mr_iid, commit_sha, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    int("project_id", entry.project_id.as_u64())?,
                    entry.event_uuid.as_str(),
                    entry.event_type,
                    entry.intent.map(|i| i.as_str()),
                    opt_int("mr_iid", entry.mr_iid.map(MergeRequestIid::as_u64))?,
                    entry.commit_sha.as_ref().map(CommitSha::as_str),
                    entry.created_at.to_string(),
                ],
            );
            match inserted {
                Ok(_) => Ok(AppendOutcome::Inserted),
                Err(e) if is_unique_violation(&e) => Ok(AppendOutcome::AlreadyLogged),
                Err(e) => Err(StoreError::backend("append event log", e.to_string())),
            }
        })
        .await
    }
}

#[async_trait]
impl DeadLetterRepository for SqliteStore {
    async fn fail_and_archive(
        &self,
        task_id: TaskId,
        from: &[TaskStatus],
        failure: NewDeadLetter,
        at: Timestamp,
    ) -> Result<DeadLetterInsert, StoreError> {
        let from = from.to_vec();
        self.call("archive failed task", move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db("archive failed task"))?;
            let Some(task) = select_task(&tx, task_id)? else {
                return Ok(DeadLetterInsert::NotFound);
            };
            if !from.contains(&task.status) {
                return Ok(DeadLetterInsert::Stale {
                    actual: task.status,
                });
            }

            let row_id = int("task_id", task_id.as_u64())?;
            tx.execute(
                "UPDATE tasks SET status = 'failed', updated_at = ?1, error_reason = ?2 WHERE id = ?3",
                params![at.to_string(), failure.failure_reason.as_str(), row_id],
            )
            .map_err(db("archive failed task"))?;
            let failed = select_task(&tx, task_id)?
                .ok_or_else(|| StoreError::backend("archive failed task", "failed row vanished"))?;

            let encode = |e: serde_json::Error| StoreError::backend("archive failed task", e.to_string());
            let task_record = serde_json::to_string(&failed).map_err(encode)?;
            let attempts = serde_json::to_string(&failure.attempts).map_err(encode)?;
            tx.execute(
                "INSERT INTO dead_letters
                    (task_id, task_record, failure_reason, error_details, attempts, dead_lettered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row_id,
                    task_record,
                    failure.failure_reason.as_str(),
                    failure.error_details,
                    attempts,
                    at.to_string(),
                ],
            )
            .map_err(db("archive failed task"))?;
            let id = DeadLetterId::new(uint("dead letter", tx.last_insert_rowid())?);
            let entry = select_dead_letter(&tx, id)?
                .ok_or_else(|| StoreError::backend("archive failed task", "inserted row vanished"))?;
            tx.commit().map_err(db("archive failed task"))?;
            Ok(DeadLetterInsert::Archived(entry))
        })
        .await
    }

    async fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterEntry>, StoreError> {
        self.call("get dead letter", move |conn| select_dead_letter(conn, id))
            .await
    }

    async fn list(&self, include_inactive: bool) -> Result<Vec<DeadLetterEntry>, StoreError> {
        self.call("list dead letters", move |conn| {
            let filter = if include_inactive {
                ""
            } else {
                "WHERE retried = 0 AND dismissed = 0"
            };
            let sql = format!("SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters {filter} ORDER BY id DESC");
            let mut stmt = conn.prepare(&sql).map_err(db("list dead letters"))?;
            let mut rows = stmt.query([]).map_err(db("list dead letters"))?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next().map_err(db("list dead letters"))? {
                entries.push(read_dead_letter(row)?);
            }
            Ok(entries)
        })
        .await
    }

    async fn retry(
        &self,
        id: DeadLetterId,
        new: NewTask,
        actor: UserId,
        at: Timestamp,
    ) -> Result<DeadLetterRetry, StoreError> {
        self.call("retry dead letter", move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db("retry dead letter"))?;
            match select_dead_letter(&tx, id)? {
                None => return Ok(DeadLetterRetry::NotFound),
                Some(entry) if entry.retried => return Ok(DeadLetterRetry::AlreadyRetried),
                Some(entry) if entry.dismissed => return Ok(DeadLetterRetry::AlreadyDismissed),
                Some(_) => {}
            }

            let (task, spawned) = match insert_task(&tx, &new, TaskStatus::Queued, at)? {
                CreateTask::Created(task) => (task, true),
                CreateTask::ActiveDuplicate(existing) => {
                    let task = select_task(&tx, existing)?.ok_or_else(|| {
                        StoreError::backend("retry dead letter", "active task vanished")
                    })?;
                    (task, false)
                }
            };

            tx.execute(
                "UPDATE dead_letters
                 SET retried = 1, retried_at = ?1, retried_by = ?2, retried_task_id = ?3
                 WHERE id = ?4",
                params![
                    at.to_string(),
                    int("user_id", actor.as_u64())?,
                    int("task_id", task.id.as_u64())?,
                    int("dead_letter_id", id.as_u64())?
                ],
            )
            .map_err(db("retry dead letter"))?;
            let entry = select_dead_letter(&tx, id)?
                .ok_or_else(|| StoreError::backend("retry dead letter", "entry vanished"))?;
            tx.commit().map_err(db("retry dead letter"))?;

            Ok(if spawned {
                DeadLetterRetry::Spawned { entry, task }
            } else {
                DeadLetterRetry::Linked { entry, task }
            })
        })
        .await
    }

    async fn dismiss(
        &self,
        id: DeadLetterId,
        actor: UserId,
        at: Timestamp,
    ) -> Result<DeadLetterClaim, StoreError> {
        self.call("dismiss dead letter", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE dead_letters SET dismissed = 1, dismissed_at = ?1, dismissed_by = ?2
                     WHERE id = ?3 AND retried = 0 AND dismissed = 0",
                    params![
                        at.to_string(),
                        int("user_id", actor.as_u64())?,
                        int("dead_letter_id", id.as_u64())?
                    ],
                )
                .map_err(db("dismiss dead letter"))?;
            claim_outcome(conn, id, changed)
        })
        .await
    }
}

fn claim_outcome(
    conn: &Connection,
    id: DeadLetterId,
    changed: usize,
) -> Result<DeadLetterClaim, StoreError> {
    let Some(entry) = select_dead_letter(conn, id)? else {
        return Ok(DeadLetterClaim::NotFound);
    };
    Ok(if changed == 1 {
        DeadLetterClaim::Claimed(entry)
    } else if entry.retried {
        DeadLetterClaim::AlreadyRetried
    } else {
        DeadLetterClaim::AlreadyDismissed
    })
}

#[async_trait]
impl Directory for SqliteStore {
    async fn resolve_user(&self, external: ExternalUserId) -> Result<Option<UserId>, StoreError> {
        self.call("resolve user", move |conn| {
            let id = conn
                .query_row(
                    "SELECT user_id FROM directory_users WHERE external_user_id = ?1",
                    params![int("external_user_id", external.as_u64())?],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
                .map_err(db("resolve user"))?;
            Ok(opt_uint("directory user", id)?.map(UserId::new))
        })
        .await
    }

    async fn external_project(
        &self,
        project: ProjectId,
    ) -> Result<Option<ExternalProjectId>, StoreError> {
        self.call("resolve project", move |conn| {
            let id = conn
                .query_row(
                    "SELECT external_project_id FROM directory_projects WHERE project_id = ?1",
                    params![int("project_id", project.as_u64())?],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
                .map_err(db("resolve project"))?;
            Ok(opt_uint("directory project", id)?.map(ExternalProjectId::new))
        })
        .await
    }
}
