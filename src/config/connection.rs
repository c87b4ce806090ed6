//! Database connection parameters.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::Duration;

/// Default connection-establishment timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Highest valid TCP port.
const MAX_PORT: i64 = 65_535;

/// Connection parameters for one database.
///
/// `port` is signed so configuration can carry out-of-range values; they are
/// replaced by the engine default in [`ConnectionConfig::effective_port`].
/// For `SQLite`, `database` is the path of the database file and the network
/// fields are ignored.
pub struct ConnectionConfig {
    /// Database server host name or address.
    pub host: String,
    /// Server port; `<= 0` or `> 65535` selects the engine default.
    pub port: i64,
    /// Database user.
    pub user: String,
    /// Database password.
    pub password: SecretString,
    /// Database (schema) name, or file path for `SQLite`.
    pub database: String,
    /// Connection-establishment timeout.
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    /// Creates a configuration using the engine default port.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: 0,
            user: user.into(),
            password: SecretString::from(password.into()),
            database: database.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Creates a `SQLite` configuration for the given database file.
    #[must_use]
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self::new("", "", "", path)
    }

    /// Sets the port.
    #[must_use]
    pub const fn with_port(mut self, port: i64) -> Self {
        self.port = port;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns the port to connect to, substituting `default` when the
    /// configured port is outside `1..=65535`.
    #[must_use]
    pub fn effective_port(&self, default: u16) -> u16 {
        if self.port <= 0 || self.port > MAX_PORT {
            return default;
        }
        u16::try_from(self.port).unwrap_or(default)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("localhost", "", "", "")
    }
}

impl Clone for ConnectionConfig {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: SecretString::from(self.password.expose_secret().to_owned()),
            database: self.database.clone(),
            connect_timeout: self.connect_timeout,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 5432 ; "zero uses default")]
    #[test_case(-1, 5432 ; "negative uses default")]
    #[test_case(65_536, 5432 ; "above range uses default")]
    #[test_case(i64::MAX, 5432 ; "huge uses default")]
    #[test_case(1, 1 ; "lowest valid port")]
    #[test_case(6543, 6543 ; "custom port kept")]
    #[test_case(65_535, 65_535 ; "highest valid port")]
    fn test_effective_port(configured: i64, expected: u16) {
        let config = ConnectionConfig::new("db1", "svc", "x", "keys").with_port(configured);
        assert_eq!(config.effective_port(5432), expected);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ConnectionConfig::new("db1", "svc", "hunter2", "keys");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_clone_keeps_password() {
        let config = ConnectionConfig::new("db1", "svc", "hunter2", "keys");
        let cloned = config.clone();
        assert_eq!(cloned.password.expose_secret(), "hunter2");
        assert_eq!(cloned.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }
}
