//! Storage layer.
//!
//! One [`KeyBackend`] trait with an adapter per database engine:
//! - **MySQL / MariaDB** via `sqlx` (feature `mysql`)
//! - **PostgreSQL** via `tokio-postgres` (feature `postgres`)
//! - **`SQLite`** via `rusqlite` (always available)
//!
//! Backends that were not compiled in still exist as types, but every
//! connection attempt fails with [`Error::FeatureNotEnabled`].

// Allow significant_drop_tightening - guards live for the whole lookup on purpose.
#![allow(clippy::significant_drop_tightening)]
// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]

pub mod escape;
pub mod lock;
pub mod mysql;
pub mod postgresql;
pub mod resilience;
pub mod sqlite;
pub mod traits;

pub use escape::EscapeStyle;
pub use lock::acquire_lock;
pub use mysql::MysqlBackend;
pub use postgresql::PostgresBackend;
pub use resilience::{CircuitBreaker, StorageResilienceConfig};
pub use sqlite::SqliteBackend;
pub use traits::{KeyBackend, KeyRow};

use crate::{Error, Result};
use serde::Serialize;
use std::fmt;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// MySQL or MariaDB.
    MySql,
    /// PostgreSQL.
    #[serde(rename = "postgresql")]
    PostgreSQL,
    /// `SQLite` database file.
    #[default]
    Sqlite,
}

impl BackendType {
    /// Parses a backend name.
    ///
    /// Accepts `mysql`/`mariadb`, `postgresql`/`postgres`/`pg` and `sqlite`,
    /// case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unknown names.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgresql" | "postgres" | "pg" => Ok(Self::PostgreSQL),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(Error::InvalidInput(format!("unknown backend: {other}"))),
        }
    }

    /// Returns the canonical backend name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::PostgreSQL => "postgresql",
            Self::Sqlite => "sqlite",
        }
    }

    /// Returns the port used when the configured port is unset.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::MySql => 3306,
            Self::PostgreSQL => 5432,
            Self::Sqlite => 0,
        }
    }

    /// Returns `true` if support for this engine was compiled in.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        match self {
            Self::MySql => cfg!(feature = "mysql"),
            Self::PostgreSQL => cfg!(feature = "postgres"),
            Self::Sqlite => true,
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates an unconnected backend for `backend_type`.
///
/// # Errors
///
/// Returns [`Error::FeatureNotEnabled`] if the engine was not compiled in.
pub fn create_backend(backend_type: BackendType) -> Result<Box<dyn KeyBackend>> {
    if !backend_type.is_enabled() {
        return Err(Error::FeatureNotEnabled(
            feature_name(backend_type).to_string(),
        ));
    }
    Ok(match backend_type {
        BackendType::MySql => Box::new(MysqlBackend::new()),
        BackendType::PostgreSQL => Box::new(PostgresBackend::new()),
        BackendType::Sqlite => Box::new(SqliteBackend::new()),
    })
}

const fn feature_name(backend_type: BackendType) -> &'static str {
    match backend_type {
        BackendType::MySql => "mysql",
        BackendType::PostgreSQL => "postgres",
        BackendType::Sqlite => "sqlite",
    }
}
