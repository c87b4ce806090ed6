//! Connection lifecycle management.
//!
//! ```text
//! NO_CONNECTION -> CONNECTING -> { CONNECTED | FAILED }
//! CONNECTED -> EXECUTING -> { RESULTS_MAPPED | EXEC_FAILED }
//! every terminal state -> TORN_DOWN
//! ```

use crate::config::ConnectionConfig;
use crate::storage::KeyBackend;
use crate::{Error, Result};
use std::ops::{Deref, DerefMut};

/// Owns one backend and the configuration it connects with.
///
/// At most one live handle exists at a time, and it lives inside the backend.
#[derive(Debug)]
pub struct ConnectionManager<B: KeyBackend> {
    backend: B,
    config: ConnectionConfig,
    last_error: Option<String>,
}

impl<B: KeyBackend> ConnectionManager<B> {
    /// Creates a manager with no open connection.
    #[must_use]
    pub const fn new(backend: B, config: ConnectionConfig) -> Self {
        Self {
            backend,
            config,
            last_error: None,
        }
    }

    /// Returns the backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the backend mutably.
    pub const fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Returns the connection configuration.
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns `true` if a connection handle exists.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.backend.is_connected()
    }

    /// Drops any existing handle and opens a new one.
    ///
    /// Failures are logged and leave the manager disconnected; callers find
    /// out through [`Self::healthy`].
    pub fn init(&mut self) {
        self.shutdown();

        match self.backend.connect(&self.config) {
            Ok(()) => {
                tracing::debug!(backend = self.backend.name(), "Connected");
                self.last_error = None;
            },
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    host = %self.config.host,
                    database = %self.config.database,
                    error = %e,
                    "Could not connect to key database"
                );
                self.last_error = Some(e.to_string());
                // Connect may leave a half-open handle behind
                self.backend.close();
            },
        }
    }

    /// Performs a liveness probe. `false` without a handle.
    pub fn healthy(&mut self) -> bool {
        self.backend.is_healthy()
    }

    /// Makes sure a healthy connection exists, reconnecting at most once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the connection is still unusable after
    /// the reconnect.
    pub fn ensure_connected(&mut self) -> Result<()> {
        if !self.backend.is_connected() {
            self.init();
        }
        if self.healthy() {
            return Ok(());
        }

        tracing::info!(backend = self.backend.name(), "Connection unhealthy, reconnecting");
        metrics::counter!("dbkeys_reconnects_total", "backend" => self.backend.name())
            .increment(1);
        self.init();
        if self.healthy() {
            return Ok(());
        }

        let cause = self
            .last_error
            .take()
            .unwrap_or_else(|| "connection unhealthy after reconnect".to_string());
        tracing::warn!(backend = self.backend.name(), cause = %cause, "Giving up on connection");
        self.shutdown();
        Err(Error::Connection {
            operation: "reconnect".to_string(),
            cause,
        })
    }

    /// Closes the handle. No-op without one.
    pub fn shutdown(&mut self) {
        if self.backend.is_connected() {
            tracing::debug!(backend = self.backend.name(), "Tearing down connection");
        }
        self.backend.close();
    }

    /// Returns a guard that shuts the connection down when dropped.
    pub fn session(&mut self) -> Session<'_, B> {
        Session { manager: self }
    }
}

/// Scope of one lookup. Dropping it tears the connection down, including
/// during unwinding.
#[derive(Debug)]
pub struct Session<'a, B: KeyBackend> {
    manager: &'a mut ConnectionManager<B>,
}

impl<B: KeyBackend> Deref for Session<'_, B> {
    type Target = ConnectionManager<B>;

    fn deref(&self) -> &Self::Target {
        self.manager
    }
}

impl<B: KeyBackend> DerefMut for Session<'_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.manager
    }
}

impl<B: KeyBackend> Drop for Session<'_, B> {
    fn drop(&mut self) {
        self.manager.shutdown();
    }
}
