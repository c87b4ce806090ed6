//! Configuration management.
//!
//! Configuration is read from a TOML file and then overridden by `DBKEYS_*`
//! environment variables:
//!
//! ```toml
//! backend = "postgresql"
//!
//! [database]
//! host = "db1"
//! port = 5432
//! user = "svc"
//! password = "secret"
//! database = "keys"
//! connect_timeout_secs = 10
//!
//! [lookup]
//! max_input_len = 256
//! abort_on_overflow = false
//!
//! [breaker]
//! failure_threshold = 5
//! reset_timeout_ms = 30000
//!
//! [logging]
//! level = "info"
//! format = "json"
//! file = "/var/log/dbkeys.log"
//! ```

mod connection;

pub use connection::{ConnectionConfig, DEFAULT_CONNECT_TIMEOUT};

use crate::services::{MAX_INPUT_LEN, OverflowPolicy, QUERY_BUFFER_SIZE};
use crate::storage::{BackendType, StorageResilienceConfig};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for dbkeys.
#[derive(Debug, Clone, Default)]
pub struct DbKeysConfig {
    /// Database engine to use.
    pub backend: BackendType,
    /// Connection parameters.
    pub connection: ConnectionConfig,
    /// Lookup bounds.
    pub lookup: LookupSettings,
    /// Circuit breaker settings.
    pub breaker: StorageResilienceConfig,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Bounds applied to each lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupSettings {
    /// Maximum accepted length of the username and the fingerprint, in bytes.
    pub max_input_len: usize,
    /// Size of the query buffer; rendered queries must be shorter than this.
    pub query_buffer_size: usize,
    /// What to do when a query does not fit the buffer.
    pub overflow: OverflowPolicy,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            max_input_len: MAX_INPUT_LEN,
            query_buffer_size: QUERY_BUFFER_SIZE,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Logging section, resolved by [`crate::observability::LoggingConfig`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `info` or `dbkeys=debug`.
    pub level: Option<String>,
    /// Output format: `pretty` or `json`.
    pub format: Option<String>,
    /// Log file path; stderr when unset.
    pub file: Option<String>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Backend name.
    pub backend: Option<String>,
    /// Database section.
    pub database: Option<ConfigFileDatabase>,
    /// Lookup section.
    pub lookup: Option<ConfigFileLookup>,
    /// Breaker section.
    pub breaker: Option<ConfigFileBreaker>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
}

/// Database section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileDatabase {
    /// Host.
    pub host: Option<String>,
    /// Port.
    pub port: Option<i64>,
    /// User.
    pub user: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Database name or `SQLite` path.
    pub database: Option<String>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
}

/// Lookup section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLookup {
    /// Maximum input length.
    pub max_input_len: Option<usize>,
    /// Exit the process when a query overflows the buffer.
    pub abort_on_overflow: Option<bool>,
}

/// Breaker section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileBreaker {
    /// Consecutive failures before opening.
    pub failure_threshold: Option<u32>,
    /// Open duration in milliseconds.
    pub reset_timeout_ms: Option<u64>,
    /// Trial lookups while half-open.
    pub half_open_max_calls: Option<u32>,
}

impl DbKeysConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;

        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or names an unknown
    /// backend.
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Self::from_config_file(file)
    }

    /// Loads configuration from the default locations.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/.config/dbkeys/config.toml` on Linux)
    /// 2. `/etc/dbkeys/config.toml`
    ///
    /// Returns default configuration if no config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        Self::default_paths()
            .into_iter()
            .filter(|path| path.exists())
            .find_map(|path| match Self::load_from_file(&path) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable config file");
                    None
                },
            })
            .unwrap_or_default()
    }

    /// Candidate config file locations, most specific first.
    #[must_use]
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(base_dirs) = directories::BaseDirs::new() {
            paths.push(base_dirs.config_dir().join("dbkeys").join("config.toml"));
        }
        paths.push(PathBuf::from("/etc/dbkeys/config.toml"));
        paths
    }

    /// Applies `DBKEYS_*` environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an invalid value.
    pub fn with_env_overrides(self) -> crate::Result<Self> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides read through `lookup`, keyed by environment variable
    /// name.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an invalid value.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("DBKEYS_BACKEND") {
            self.backend = BackendType::parse(&v)?;
        }
        if let Some(v) = var("DBKEYS_HOST") {
            self.connection.host = v;
        }
        if let Some(v) = var("DBKEYS_PORT") {
            self.connection.port = v.trim().parse().map_err(|_| {
                crate::Error::InvalidInput(format!("DBKEYS_PORT is not an integer: {v}"))
            })?;
        }
        if let Some(v) = var("DBKEYS_USER") {
            self.connection.user = v;
        }
        if let Some(v) = var("DBKEYS_PASSWORD") {
            self.connection.password = SecretString::from(v);
        }
        if let Some(v) = var("DBKEYS_DATABASE") {
            self.connection.database = v;
        }
        if let Some(v) = var("DBKEYS_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = v.trim().parse().map_err(|_| {
                crate::Error::InvalidInput(format!(
                    "DBKEYS_CONNECT_TIMEOUT_SECS is not an integer: {v}"
                ))
            })?;
            self.connection.connect_timeout =
                connect_timeout(secs, "DBKEYS_CONNECT_TIMEOUT_SECS")?;
        }
        if let Some(v) = var("DBKEYS_LOG") {
            self.logging.level = Some(v);
        }
        if let Some(v) = var("DBKEYS_LOG_FORMAT") {
            self.logging.format = Some(v);
        }
        self.breaker = self.breaker.with_overrides_from(&lookup);

        Ok(self)
    }

    /// Converts a `ConfigFile` to `DbKeysConfig`.
    fn from_config_file(file: ConfigFile) -> crate::Result<Self> {
        let mut config = Self::default();

        if let Some(backend) = file.backend {
            config.backend = BackendType::parse(&backend)?;
        }
        if let Some(db) = file.database {
            if let Some(host) = db.host {
                config.connection.host = host;
            }
            if let Some(port) = db.port {
                config.connection.port = port;
            }
            if let Some(user) = db.user {
                config.connection.user = user;
            }
            if let Some(password) = db.password {
                config.connection.password = SecretString::from(password);
            }
            if let Some(database) = db.database {
                config.connection.database = database;
            }
            if let Some(secs) = db.connect_timeout_secs {
                config.connection.connect_timeout =
                    connect_timeout(secs, "database.connect_timeout_secs")?;
            }
        }
        if let Some(lookup) = file.lookup {
            if let Some(max) = lookup.max_input_len {
                config.lookup.max_input_len = max;
            }
            if lookup.abort_on_overflow == Some(true) {
                config.lookup.overflow = OverflowPolicy::Abort;
            }
        }
        if let Some(breaker) = file.breaker {
            if let Some(v) = breaker.failure_threshold {
                config.breaker = config.breaker.with_failure_threshold(v);
            }
            if let Some(v) = breaker.reset_timeout_ms {
                config.breaker = config.breaker.with_reset_timeout_ms(v);
            }
            if let Some(v) = breaker.half_open_max_calls {
                config.breaker = config.breaker.with_half_open_max_calls(v);
            }
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }

        Ok(config)
    }

    /// Sets the backend.
    #[must_use]
    pub const fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the connection parameters.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Returns a printable view of the effective configuration with the
    /// password redacted.
    #[must_use]
    pub fn report(&self) -> ConfigReport {
        let password_set = !self.connection.password.expose_secret().is_empty();
        ConfigReport {
            backend: self.backend,
            database: DatabaseReport {
                host: self.connection.host.clone(),
                port: self.connection.effective_port(self.backend.default_port()),
                user: self.connection.user.clone(),
                password: if password_set { REDACTED } else { "" },
                database: self.connection.database.clone(),
                connect_timeout_secs: self.connection.connect_timeout.as_secs(),
            },
            lookup: LookupReport {
                max_input_len: self.lookup.max_input_len,
                query_buffer_size: self.lookup.query_buffer_size,
                overflow: self.lookup.overflow,
            },
            breaker: BreakerReport {
                failure_threshold: self.breaker.breaker_failure_threshold,
                reset_timeout_ms: self.breaker.breaker_reset_timeout_ms,
                half_open_max_calls: self.breaker.breaker_half_open_max_calls,
            },
        }
    }
}

const REDACTED: &str = "[REDACTED]";

/// Effective configuration, safe to print.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigReport {
    /// Database engine.
    pub backend: BackendType,
    /// Connection parameters.
    pub database: DatabaseReport,
    /// Lookup bounds.
    pub lookup: LookupReport,
    /// Circuit breaker settings.
    pub breaker: BreakerReport,
}

/// Connection parameters in a [`ConfigReport`].
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseReport {
    /// Host.
    pub host: String,
    /// Port after default substitution.
    pub port: u16,
    /// User.
    pub user: String,
    /// `[REDACTED]` when a password is set, empty otherwise.
    pub password: &'static str,
    /// Database name or `SQLite` path.
    pub database: String,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

/// Lookup bounds in a [`ConfigReport`].
#[derive(Debug, Clone, Serialize)]
pub struct LookupReport {
    /// Maximum input length.
    pub max_input_len: usize,
    /// Query buffer size.
    pub query_buffer_size: usize,
    /// Overflow policy.
    pub overflow: OverflowPolicy,
}

/// Breaker settings in a [`ConfigReport`].
#[derive(Debug, Clone, Serialize)]
pub struct BreakerReport {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// Open duration in milliseconds.
    pub reset_timeout_ms: u64,
    /// Trial lookups while half-open.
    pub half_open_max_calls: u32,
}

/// A zero timeout would fail every connect before it starts.
fn connect_timeout(secs: u64, source: &str) -> crate::Result<Duration> {
    if secs == 0 {
        return Err(crate::Error::InvalidInput(format!(
            "{source} must be at least 1 second"
        )));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = DbKeysConfig::default();
        assert_eq!(config.backend, BackendType::Sqlite);
        assert_eq!(config.connection.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.lookup.max_input_len, MAX_INPUT_LEN);
        assert_eq!(config.lookup.query_buffer_size, QUERY_BUFFER_SIZE);
        assert_eq!(config.lookup.overflow, OverflowPolicy::Reject);
    }

    #[test]
    fn test_from_toml_full() {
        let config = DbKeysConfig::from_toml(
            r#"
            backend = "postgresql"

            [database]
            host = "db1"
            port = 0
            user = "svc"
            password = "x"
            database = "keys"
            connect_timeout_secs = 3

            [lookup]
            max_input_len = 128
            abort_on_overflow = true

            [breaker]
            failure_threshold = 2
            reset_timeout_ms = 1000

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendType::PostgreSQL);
        assert_eq!(config.connection.host, "db1");
        assert_eq!(config.connection.port, 0);
        assert_eq!(config.connection.user, "svc");
        assert_eq!(config.connection.password.expose_secret(), "x");
        assert_eq!(config.connection.database, "keys");
        assert_eq!(config.connection.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.lookup.max_input_len, 128);
        assert_eq!(config.lookup.overflow, OverflowPolicy::Abort);
        assert_eq!(config.breaker.breaker_failure_threshold, 2);
        assert_eq!(config.breaker.breaker_reset_timeout_ms, 1000);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        assert_eq!(config.logging.format.as_deref(), Some("json"));
    }

    #[test]
    fn test_from_toml_unknown_backend() {
        let result = DbKeysConfig::from_toml(r#"backend = "oracle""#);
        assert!(matches!(result, Err(crate::Error::InvalidInput(_))));
    }

    #[test]
    fn test_from_toml_malformed() {
        let result = DbKeysConfig::from_toml("backend = ");
        assert!(matches!(
            result,
            Err(crate::Error::OperationFailed { ref operation, .. }) if operation == "parse_config_file"
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DBKEYS_BACKEND", "mysql"),
            ("DBKEYS_HOST", "db2"),
            ("DBKEYS_PORT", "3307"),
            ("DBKEYS_PASSWORD", "from-env"),
            ("DBKEYS_USER", "   "),
            ("DBKEYS_BREAKER_FAILURE_THRESHOLD", "9"),
        ]
        .into_iter()
        .collect();

        let config = DbKeysConfig::default()
            .with_overrides_from(|name| vars.get(name).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.backend, BackendType::MySql);
        assert_eq!(config.connection.host, "db2");
        assert_eq!(config.connection.port, 3307);
        assert_eq!(config.connection.password.expose_secret(), "from-env");
        // Blank values are ignored
        assert_eq!(config.connection.user, "");
        assert_eq!(config.breaker.breaker_failure_threshold, 9);
    }

    #[test]
    fn test_zero_connect_timeout_rejected() {
        let result = DbKeysConfig::from_toml("[database]\nconnect_timeout_secs = 0\n");
        assert!(matches!(
            result,
            Err(crate::Error::InvalidInput(msg)) if msg.contains("connect_timeout_secs")
        ));

        let result = DbKeysConfig::default().with_overrides_from(|name| {
            (name == "DBKEYS_CONNECT_TIMEOUT_SECS").then(|| "0".to_string())
        });
        assert!(matches!(
            result,
            Err(crate::Error::InvalidInput(msg)) if msg.contains("DBKEYS_CONNECT_TIMEOUT_SECS")
        ));
    }

    #[test]
    fn test_env_override_bad_port() {
        let result = DbKeysConfig::default()
            .with_overrides_from(|name| (name == "DBKEYS_PORT").then(|| "abc".to_string()));
        assert!(matches!(result, Err(crate::Error::InvalidInput(msg)) if msg.contains("DBKEYS_PORT")));
    }

    #[test]
    fn test_report_redacts_password() {
        let config = DbKeysConfig::default()
            .with_backend(BackendType::PostgreSQL)
            .with_connection(ConnectionConfig::new("db1", "svc", "hunter2", "keys"));

        let report = config.report();
        assert_eq!(report.database.password, "[REDACTED]");
        assert_eq!(report.database.port, 5432);

        let rendered = toml::to_string(&report).unwrap();
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("backend = \"postgresql\""));
        assert!(rendered.contains("overflow = \"reject\""));
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = DbKeysConfig::load_from_file(Path::new("/nonexistent/dbkeys.toml"));
        assert!(matches!(
            result,
            Err(crate::Error::OperationFailed { ref operation, .. }) if operation == "read_config_file"
        ));
    }
}
