//! Durable single-process stores: one SQLite file for tasks, one for the
//! pool time series. Both open in WAL mode and only ever grow columns.

pub mod tasks;
pub mod timeseries;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;
use thiserror::Error;

pub use tasks::TaskStore;
pub use timeseries::TimeSeriesStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("bad row payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("task {id} already exists")]
    DuplicateTask { id: String },
    #[error("unknown task status {0:?}")]
    UnknownStatus(String),
    #[error("bad stored value: {0}")]
    Corrupt(String)
}

/// Opens (or creates) a database file with WAL journaling and runs the
/// store's migrations, which must be strictly additive.
pub(crate) fn open_database(
    path: &Path,
    migrations: &[&str]
) -> Result<Mutex<Connection>, StorageError> {
    let conn = Connection::open(path)?;
    init_connection(conn, migrations)
}

/// In-memory variant for tests.
pub(crate) fn open_in_memory(migrations: &[&str]) -> Result<Mutex<Connection>, StorageError> {
    let conn = Connection::open_in_memory()?;
    init_connection(conn, migrations)
}

fn init_connection(
    conn: Connection,
    migrations: &[&str]
) -> Result<Mutex<Connection>, StorageError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    let mut version: i64 =
        conn.query_row("SELECT user_version FROM pragma_user_version", [], |row| row.get(0))?;
    for (idx, migration) in migrations.iter().enumerate() {
        let target = idx as i64 + 1;
        if version < target {
            conn.execute_batch(migration)?;
            conn.pragma_update(None, "user_version", target)?;
            version = target;
        }
    }

    Ok(Mutex::new(conn))
}
