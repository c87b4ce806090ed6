//! Connection setup for the `SQLite` backend.

use crate::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

/// Opens a key database read-only.
///
/// The file must already exist; lookups never create databases.
///
/// # Errors
///
/// Returns [`Error::Connection`] if the file cannot be opened.
pub fn open_read_only(path: &Path) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_NO_MUTEX
        | OpenFlags::SQLITE_OPEN_URI;

    Connection::open_with_flags(path, flags).map_err(|e| Error::Connection {
        operation: "open_sqlite_db".to_string(),
        cause: format!("{}: {e}", path.display()),
    })
}

/// Configures a lookup connection.
///
/// # Configuration Applied
///
/// - **`busy_timeout`**: waits up to `busy_timeout` for a writer to release its
///   lock, mirroring the network backends' connect timeout
/// - **`query_only`**: refuses any statement that would modify the database
///
/// # Errors
///
/// Returns [`Error::Connection`] if the busy timeout cannot be set.
pub fn configure_connection(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.busy_timeout(busy_timeout)
        .map_err(|e| Error::Connection {
            operation: "configure_sqlite_db".to_string(),
            cause: e.to_string(),
        })?;
    // query_only is advisory on a read-only handle; ignore failures
    let _ = conn.pragma_update(None, "query_only", "ON");

    Ok(())
}
