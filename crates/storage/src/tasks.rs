use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use crate::StorageError;
use tidepool_types::task::{Task, TaskStatus};

const MIGRATIONS: &[&str] = &[
    // v1: base schema
    "CREATE TABLE IF NOT EXISTS tasks (
        id              TEXT PRIMARY KEY,
        definition_name TEXT NOT NULL,
        started_at      INTEGER NOT NULL,
        last_updated_at INTEGER NOT NULL,
        finished_at     INTEGER,
        status          TEXT NOT NULL,
        status_message  TEXT NOT NULL DEFAULT '',
        resources_taken TEXT NOT NULL DEFAULT '[]',
        task_data       TEXT NOT NULL DEFAULT '{}'
    );
    CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
    CREATE INDEX IF NOT EXISTS idx_tasks_started_at ON tasks(started_at);"
];

/// Persistence for scheduler tasks. Written by the action loop only; safe
/// for a single writer per file.
pub struct TaskStore {
    conn: Mutex<Connection>
}

impl TaskStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Ok(Self { conn: crate::open_database(path, MIGRATIONS)? })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(Self { conn: crate::open_in_memory(MIGRATIONS)? })
    }

    /// Inserts a new task. A colliding id is an error: ids are globally
    /// unique and never reused.
    pub fn add_task(&self, task: &Task) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO tasks (id, definition_name, started_at, last_updated_at, finished_at, \
             status, status_message, resources_taken, task_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.id,
                task.definition_name,
                task.started_at,
                task.last_updated_at,
                task.finished_at,
                task.status.as_str(),
                task.status_message,
                serde_json::to_string(&task.resources_taken)?,
                serde_json::to_string(&task.task_data)?
            ]
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::DuplicateTask { id: task.id.clone() })
            }
            Err(e) => Err(e.into())
        }
    }

    /// Updates a task by id. A missing row is logged, not raised: the task
    /// may have been pruned while an update was in flight.
    pub fn update_task(&self, task: &Task) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE tasks SET last_updated_at = ?2, finished_at = ?3, status = ?4, \
             status_message = ?5, resources_taken = ?6, task_data = ?7 WHERE id = ?1",
            params![
                task.id,
                task.last_updated_at,
                task.finished_at,
                task.status.as_str(),
                task.status_message,
                serde_json::to_string(&task.resources_taken)?,
                serde_json::to_string(&task.task_data)?
            ]
        )?;
        if changed == 0 {
            warn!(task = %task.id, "update for a task that is not in the store");
        }
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>, StorageError> {
        let conn = self.conn.lock();
        conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![id], task_from_row)
            .optional()?
            .transpose()
    }

    /// Tasks still holding resources, oldest first so earlier work keeps
    /// priority on its locks.
    pub fn get_active_tasks(&self) -> Result<Vec<Task>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE status IN ('pre-start', 'running') ORDER BY started_at ASC"
        )?;
        let rows = stmt.query_map([], task_from_row)?;
        collect_tasks(rows)
    }

    /// Tasks started inside `[from, to]`, newest first.
    pub fn get_all_tasks(&self, from: i64, to: Option<i64>) -> Result<Vec<Task>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE started_at >= ?1 AND started_at <= ?2 \
             ORDER BY started_at DESC"
        )?;
        let rows = stmt.query_map(params![from, to.unwrap_or(i64::MAX)], task_from_row)?;
        collect_tasks(rows)
    }
}

type RowResult = Result<Result<Task, StorageError>, rusqlite::Error>;

fn collect_tasks(rows: impl Iterator<Item = RowResult>) -> Result<Vec<Task>, StorageError> {
    rows.map(|row| row?).collect()
}

fn task_from_row(row: &Row<'_>) -> Result<Result<Task, StorageError>, rusqlite::Error> {
    let status_raw: String = row.get("status")?;
    let resources_raw: String = row.get("resources_taken")?;
    let data_raw: String = row.get("task_data")?;

    let Some(status) = TaskStatus::parse(&status_raw) else {
        return Ok(Err(StorageError::UnknownStatus(status_raw)))
    };

    Ok((|| {
        Ok(Task {
            id: row.get("id")?,
            definition_name: row.get("definition_name")?,
            started_at: row.get("started_at")?,
            last_updated_at: row.get("last_updated_at")?,
            finished_at: row.get("finished_at")?,
            status,
            status_message: row.get("status_message")?,
            resources_taken: serde_json::from_str(&resources_raw)?,
            task_data: serde_json::from_str(&data_raw)?
        })
    })())
}
