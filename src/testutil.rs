//! Test support: a scriptable in-memory backend and `SQLite` fixtures.
//!
//! [`ScriptedBackend`] plays back scripted connect, health and execute
//! outcomes and counts every call, so lifecycle behavior (reconnects,
//! retries, teardown) can be asserted without a database server.

use crate::config::ConnectionConfig;
use crate::storage::escape::EscapeStyle;
use crate::storage::{BackendType, KeyBackend, KeyRow};
use crate::{Error, Result};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Call counters shared between a [`ScriptedBackend`] and the test holding it.
#[derive(Debug, Clone, Default)]
pub struct ScriptStats {
    inner: Arc<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    connects: AtomicUsize,
    health_checks: AtomicUsize,
    executes: AtomicUsize,
    closes_while_connected: AtomicUsize,
    open_handles: AtomicUsize,
    max_open_handles: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl ScriptStats {
    /// Number of connect attempts.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Number of liveness probes against a live handle.
    #[must_use]
    pub fn health_checks(&self) -> usize {
        self.inner.health_checks.load(Ordering::SeqCst)
    }

    /// Number of execute calls against a live handle.
    #[must_use]
    pub fn executes(&self) -> usize {
        self.inner.executes.load(Ordering::SeqCst)
    }

    /// Number of closes that actually tore down a handle.
    #[must_use]
    pub fn closes_while_connected(&self) -> usize {
        self.inner.closes_while_connected.load(Ordering::SeqCst)
    }

    /// Number of handles currently open.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.inner.open_handles.load(Ordering::SeqCst)
    }

    /// Highest number of handles ever open at once.
    #[must_use]
    pub fn max_open_handles(&self) -> usize {
        self.inner.max_open_handles.load(Ordering::SeqCst)
    }

    /// Executed query texts, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.inner
            .queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn handle_opened(&self) {
        let open = self.inner.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_open_handles.fetch_max(open, Ordering::SeqCst);
    }

    fn handle_closed(&self) {
        self.inner.open_handles.fetch_sub(1, Ordering::SeqCst);
        self.inner
            .closes_while_connected
            .fetch_add(1, Ordering::SeqCst);
    }
}

/// A [`KeyBackend`] that plays back scripted outcomes.
///
/// Exhausted scripts fall back to success: connects succeed, probes report
/// healthy, and executes return the configured rows.
#[derive(Debug)]
pub struct ScriptedBackend {
    connected: bool,
    escape_style: EscapeStyle,
    rows: Vec<KeyRow>,
    connect_results: VecDeque<Result<()>>,
    health: VecDeque<bool>,
    execute_results: VecDeque<Result<Vec<KeyRow>>>,
    execute_delay: Option<Duration>,
    panic_on_execute: bool,
    stats: ScriptStats,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    /// Creates a backend that always succeeds and returns no rows.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: false,
            escape_style: EscapeStyle::SqlStandard,
            rows: Vec::new(),
            connect_results: VecDeque::new(),
            health: VecDeque::new(),
            execute_results: VecDeque::new(),
            execute_delay: None,
            panic_on_execute: false,
            stats: ScriptStats::default(),
        }
    }

    /// Sets the rows returned once execute scripts are exhausted.
    #[must_use]
    pub fn with_rows(mut self, rows: Vec<KeyRow>) -> Self {
        self.rows = rows;
        self
    }

    /// Scripts connect outcomes, consumed one per connect.
    #[must_use]
    pub fn with_connect_results(mut self, results: Vec<Result<()>>) -> Self {
        self.connect_results = results.into();
        self
    }

    /// Scripts probe outcomes, consumed one per probe of a live handle.
    #[must_use]
    pub fn with_health(mut self, health: Vec<bool>) -> Self {
        self.health = health.into();
        self
    }

    /// Scripts execute outcomes, consumed one per execute.
    #[must_use]
    pub fn with_execute_results(mut self, results: Vec<Result<Vec<KeyRow>>>) -> Self {
        self.execute_results = results.into();
        self
    }

    /// Sleeps inside every execute, widening race windows.
    #[must_use]
    pub const fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = Some(delay);
        self
    }

    /// Panics inside the next execute.
    #[must_use]
    pub const fn with_panic_on_execute(mut self) -> Self {
        self.panic_on_execute = true;
        self
    }

    /// Sets the escaping style.
    #[must_use]
    pub const fn with_escape_style(mut self, style: EscapeStyle) -> Self {
        self.escape_style = style;
        self
    }

    /// Marks the backend connected without consuming a connect script.
    pub fn force_connected(&mut self) {
        if !self.connected {
            self.connected = true;
            self.stats.handle_opened();
        }
    }

    /// Returns the shared call counters.
    #[must_use]
    pub fn stats(&self) -> ScriptStats {
        self.stats.clone()
    }
}

impl KeyBackend for ScriptedBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Sqlite
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn connect(&mut self, _config: &ConnectionConfig) -> Result<()> {
        self.close();
        self.stats.inner.connects.fetch_add(1, Ordering::SeqCst);
        self.connect_results.pop_front().unwrap_or(Ok(()))?;
        self.force_connected();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_healthy(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        self.stats.inner.health_checks.fetch_add(1, Ordering::SeqCst);
        self.health.pop_front().unwrap_or(true)
    }

    fn escape(&self, input: &str) -> Result<String> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        crate::storage::traits::reject_nul(input)?;
        Ok(self.escape_style.escape(input))
    }

    #[allow(clippy::panic)]
    fn execute(&mut self, query: &str) -> Result<Vec<KeyRow>> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.stats.inner.executes.fetch_add(1, Ordering::SeqCst);
        self.stats
            .inner
            .queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.to_string());

        if let Some(delay) = self.execute_delay {
            std::thread::sleep(delay);
        }
        if self.panic_on_execute {
            self.panic_on_execute = false;
            panic!("scripted execute panic");
        }
        self.execute_results
            .pop_front()
            .unwrap_or_else(|| Ok(self.rows.clone()))
    }

    fn close(&mut self) {
        if self.connected {
            self.connected = false;
            self.stats.handle_closed();
        }
    }
}

/// Creates a `SQLite` key store at `path` holding `rows` of
/// `(username, fingerprint, key, options)`.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the database cannot be written.
pub fn create_sqlite_key_store(
    path: &Path,
    rows: &[(&str, &str, &str, Option<&str>)],
) -> Result<()> {
    let to_err = |e: rusqlite::Error| Error::OperationFailed {
        operation: "create_sqlite_key_store".to_string(),
        cause: e.to_string(),
    };

    let mut conn = rusqlite::Connection::open(path).map_err(to_err)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS public_keys (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            key TEXT,
            options TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_public_keys_lookup
            ON public_keys (username, fingerprint);",
    )
    .map_err(to_err)?;

    let tx = conn.transaction().map_err(to_err)?;
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO public_keys (username, fingerprint, key, options)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(to_err)?;
        for (username, fingerprint, key, options) in rows {
            stmt.execute(rusqlite::params![username, fingerprint, key, options])
                .map_err(to_err)?;
        }
    }
    tx.commit().map_err(to_err)
}
