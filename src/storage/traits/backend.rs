//! Key backend trait.

use crate::config::ConnectionConfig;
use crate::storage::BackendType;
use crate::{Error, Result};

/// One raw row of the key query: `(key, options)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyRow {
    /// Key material column; `None` if the database returned NULL.
    pub key: Option<String>,
    /// Options column; `None` if the database returned NULL.
    pub options: Option<String>,
}

impl KeyRow {
    /// Creates a row.
    #[must_use]
    pub fn new(key: impl Into<String>, options: Option<&str>) -> Self {
        Self {
            key: Some(key.into()),
            options: options.map(str::to_string),
        }
    }
}

/// Trait for key lookup database backends.
///
/// A backend owns at most one live connection handle. All methods block.
/// Callers serialize access; the trait itself provides no locking.
pub trait KeyBackend: Send {
    /// Returns the engine this backend talks to.
    fn backend_type(&self) -> BackendType;

    /// Returns the engine name used in logs and metrics.
    fn name(&self) -> &'static str {
        self.backend_type().as_str()
    }

    /// Opens a connection, replacing any existing one.
    ///
    /// Out-of-range ports are replaced with the engine default through
    /// [`ConnectionConfig::effective_port`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the connection cannot be established.
    fn connect(&mut self, config: &ConnectionConfig) -> Result<()>;

    /// Returns `true` if a connection handle exists (healthy or not).
    fn is_connected(&self) -> bool;

    /// Performs an engine-native liveness round trip.
    ///
    /// Returns `false` when there is no handle.
    fn is_healthy(&mut self) -> bool;

    /// Escapes `input` for use inside a single-quoted SQL literal.
    ///
    /// Escaping depends on connection state (character set, quoting mode), so
    /// it requires a live connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a connection, or
    /// [`Error::InvalidInput`] for input the engine cannot represent.
    fn escape(&self, input: &str) -> Result<String>;

    /// Executes the key query and returns its rows in engine order.
    ///
    /// The native result set is released before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] for connection-loss failures,
    /// [`Error::ResultSet`] when no result set can be retrieved, and
    /// [`Error::OperationFailed`] otherwise.
    fn execute(&mut self, query: &str) -> Result<Vec<KeyRow>>;

    /// Closes the connection. No-op without one.
    fn close(&mut self);
}

impl<B: KeyBackend + ?Sized> KeyBackend for Box<B> {
    fn backend_type(&self) -> BackendType {
        (**self).backend_type()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        (**self).connect(config)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn is_healthy(&mut self) -> bool {
        (**self).is_healthy()
    }

    fn escape(&self, input: &str) -> Result<String> {
        (**self).escape(input)
    }

    fn execute(&mut self, query: &str) -> Result<Vec<KeyRow>> {
        (**self).execute(query)
    }

    fn close(&mut self) {
        (**self).close();
    }
}

/// Rejects input containing NUL, which no supported engine accepts inside a
/// text literal.
pub(crate) fn reject_nul(input: &str) -> Result<()> {
    if input.contains('\0') {
        return Err(Error::InvalidInput(
            "input contains a NUL byte".to_string(),
        ));
    }
    Ok(())
}
