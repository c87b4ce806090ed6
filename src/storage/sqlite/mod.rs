//! `SQLite` key backend.
//!
//! The database file is named by [`ConnectionConfig::database`]; host, port and
//! credentials are ignored. `SQLite` has no network connection to lose, so its
//! transient class is lock contention (`SQLITE_BUSY` / `SQLITE_LOCKED`) that
//! outlasted the busy timeout.

mod connection;

pub use connection::{configure_connection, open_read_only};

use crate::config::ConnectionConfig;
use crate::storage::escape::EscapeStyle;
use crate::storage::traits::reject_nul;
use crate::storage::{BackendType, KeyBackend, KeyRow};
use crate::{Error, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, Row};
use std::path::{Path, PathBuf};

/// `SQLite`-based key backend.
#[derive(Debug, Default)]
pub struct SqliteBackend {
    /// Open connection, if any.
    conn: Option<Connection>,
    /// Path of the open database.
    db_path: Option<PathBuf>,
}

impl SqliteBackend {
    /// Creates a backend with no open connection.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            conn: None,
            db_path: None,
        }
    }

    /// Returns the path of the open database.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(Error::NotConnected)
    }

    fn query_rows(conn: &Connection, query: &str) -> Result<Vec<KeyRow>> {
        let mut stmt = conn.prepare(query).map_err(classify_error)?;
        if stmt.column_count() < 2 {
            return Err(Error::ResultSet(format!(
                "expected 2 columns, query returned {}",
                stmt.column_count()
            )));
        }

        let mut rows = stmt.query([]).map_err(classify_error)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(classify_error)? {
            out.push(KeyRow {
                key: text_column(row, 0)?,
                options: text_column(row, 1)?,
            });
        }
        Ok(out)
    }
}

impl KeyBackend for SqliteBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Sqlite
    }

    fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        self.close();

        if config.database.trim().is_empty() {
            return Err(Error::Connection {
                operation: "open_sqlite_db".to_string(),
                cause: "no database path configured".to_string(),
            });
        }

        let path = PathBuf::from(&config.database);
        tracing::debug!(path = %path.display(), "Opening SQLite key database");
        let conn = open_read_only(&path)?;
        configure_connection(&conn, config.connect_timeout)?;

        self.conn = Some(conn);
        self.db_path = Some(path);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn is_healthy(&mut self) -> bool {
        self.conn.as_ref().is_some_and(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok()
        })
    }

    fn escape(&self, input: &str) -> Result<String> {
        self.conn()?;
        reject_nul(input)?;
        Ok(EscapeStyle::SqlStandard.escape(input))
    }

    fn execute(&mut self, query: &str) -> Result<Vec<KeyRow>> {
        let conn = self.conn()?;
        Self::query_rows(conn, query)
    }

    fn close(&mut self) {
        self.db_path = None;
        if let Some(conn) = self.conn.take() {
            tracing::debug!("Closing SQLite key database");
            if let Err((_, e)) = conn.close() {
                tracing::warn!(error = %e, "SQLite connection did not close cleanly");
            }
        }
    }
}

/// Reads a text column, accepting UTF-8 blobs.
fn text_column(row: &Row<'_>, idx: usize) -> Result<Option<String>> {
    let value = row
        .get_ref(idx)
        .map_err(|e| Error::ResultSet(e.to_string()))?;
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|_| Error::ResultSet(format!("column {idx} is not valid UTF-8"))),
        ValueRef::Integer(_) | ValueRef::Real(_) => Err(Error::ResultSet(format!(
            "column {idx} is not a text column"
        ))),
    }
}

/// Maps a `rusqlite` error onto the lookup error classes.
#[allow(clippy::needless_pass_by_value)]
fn classify_error(e: rusqlite::Error) -> Error {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Error::ConnectionLost {
            cause: e.to_string(),
        },
        _ => Error::OperationFailed {
            operation: "sqlite_query".to_string(),
            cause: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::create_sqlite_key_store;
    use tempfile::TempDir;

    fn connected(dir: &TempDir, rows: &[(&str, &str, &str, Option<&str>)]) -> SqliteBackend {
        let path = dir.path().join("keys.db");
        create_sqlite_key_store(&path, rows).unwrap();

        let mut backend = SqliteBackend::new();
        backend
            .connect(&ConnectionConfig::sqlite(path.to_string_lossy()))
            .unwrap();
        backend
    }

    #[test]
    fn test_connect_and_probe() {
        let dir = TempDir::new().unwrap();
        let mut backend = connected(&dir, &[]);
        assert!(backend.is_connected());
        assert!(backend.is_healthy());
        assert!(backend.db_path().is_some());

        backend.close();
        assert!(!backend.is_connected());
        assert!(!backend.is_healthy());
        assert!(backend.db_path().is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut backend = SqliteBackend::new();
        backend.close();
        backend.close();
        assert!(!backend.is_connected());
    }

    #[test]
    fn test_connect_requires_path() {
        let mut backend = SqliteBackend::new();
        let result = backend.connect(&ConnectionConfig::sqlite(""));
        assert!(matches!(result, Err(Error::Connection { .. })));
        assert!(!backend.is_connected());
    }

    #[test]
    fn test_escape_requires_connection() {
        let backend = SqliteBackend::new();
        assert!(matches!(backend.escape("alice"), Err(Error::NotConnected)));
    }

    #[test]
    fn test_escape_rejects_nul() {
        let dir = TempDir::new().unwrap();
        let backend = connected(&dir, &[]);
        assert!(matches!(backend.escape("a\0b"), Err(Error::InvalidInput(_))));
        assert_eq!(backend.escape("o'brien").unwrap(), "o''brien");
    }

    #[test]
    fn test_execute_returns_rows_in_order() {
        let dir = TempDir::new().unwrap();
        let mut backend = connected(
            &dir,
            &[
                ("alice", "fp1", "ssh-rsa AAAA1", None),
                ("alice", "fp1", "ssh-rsa AAAA2", Some("no-pty")),
                ("bob", "fp1", "ssh-rsa BBBB", None),
            ],
        );

        let rows = backend
            .execute(
                "SELECT public_keys.key,public_keys.options FROM public_keys \
                 WHERE username='alice' AND fingerprint='fp1'",
            )
            .unwrap();

        assert_eq!(
            rows,
            vec![
                KeyRow::new("ssh-rsa AAAA1", None),
                KeyRow::new("ssh-rsa AAAA2", Some("no-pty")),
            ]
        );
    }

    #[test]
    fn test_execute_invalid_sql_is_not_transient() {
        let dir = TempDir::new().unwrap();
        let mut backend = connected(&dir, &[]);
        let err = backend.execute("SELECT nope FROM nowhere").unwrap_err();
        assert!(!err.is_transient());
        assert!(matches!(err, Error::OperationFailed { .. }));
    }

    #[test]
    fn test_execute_rejects_single_column() {
        let dir = TempDir::new().unwrap();
        let mut backend = connected(&dir, &[]);
        let err = backend.execute("SELECT key FROM public_keys").unwrap_err();
        assert!(matches!(err, Error::ResultSet(_)));
    }

    #[test]
    fn test_connection_is_read_only() {
        let dir = TempDir::new().unwrap();
        let mut backend = connected(&dir, &[]);
        let result = backend.execute("DELETE FROM public_keys");
        assert!(result.is_err());
    }
}
