use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use stepwise_common::{Error, Result};
use tracing::info;

/// How long to wait for another process holding the write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the database a run works against. The connection is dropped (and
/// closed) when the caller's scope ends, on success or error.
pub fn open(db_path: &Path) -> Result<Connection> {
    info!("opening database at {}", db_path.display());
    let conn = Connection::open(db_path)
        .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
    configure(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()
        .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
    configure(conn)
}

/// Only the busy timeout is set. Pragmas such as `foreign_keys` stay at
/// SQLite's defaults: they cannot be changed inside the step transaction, so
/// scripts get the connection exactly as a plain `sqlite3` session would.
fn configure(conn: Connection) -> Result<Connection> {
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
    Ok(conn)
}
