//! # dbkeys
//!
//! Database-backed SSH public key lookup.
//!
//! Given a username and a public key fingerprint, dbkeys fetches the matching
//! key records (and their optional `authorized_keys` restriction options) from
//! a relational database, so an SSH server can authorize connections against
//! managed key records instead of flat files.
//!
//! ## Features
//!
//! - One `KeyBackend` trait with MySQL, PostgreSQL and `SQLite` adapters
//! - Lazy connect, liveness probe, a single reconnect per lookup
//! - Connection-aware escaping into a bounded query buffer
//! - One transparent retry on connection loss
//! - Fail-closed results: infrastructure failures surface as "no keys"
//! - Connection torn down after every lookup
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbkeys::{BackendType, ConnectionConfig, search};
//!
//! let config = ConnectionConfig::new("db1", "svc", "secret", "keys");
//! let keys = search(BackendType::PostgreSQL, config, "SHA256:abc", "alice");
//! for record in keys.matches() {
//!     println!("{}", record.to_authorized_keys_line());
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;
#[cfg(any(test, feature = "test-support"))]
pub mod testutil;

// Re-exports for convenience
pub use config::{ConnectionConfig, DbKeysConfig, LookupSettings};
pub use models::{FingerprintSource, KeyRecord, KeyRecordList, OpenSshPublicKey};
pub use services::{KeyResolver, OverflowPolicy, search};
pub use storage::{BackendType, KeyBackend, KeyRow};

/// Error type for dbkeys operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Oversized or NUL-bearing lookup input, bad config values |
/// | `Connection` | Connecting fails, or the handle is unhealthy after a reconnect |
/// | `ConnectionLost` | The server went away while a query was running |
/// | `OperationFailed` | Any other query or driver failure |
/// | `ResultSet` | No usable result set, NULL key column, undecodable column |
/// | `QueryTooLong` | The rendered query does not fit the query buffer |
/// | `NotConnected` | Escaping or executing without a live connection |
/// | `CircuitOpen` | Too many consecutive failures; lookups are short-circuited |
/// | `FeatureNotEnabled` | The configured backend was not compiled in |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A connection could not be established or is unusable.
    #[error("connection '{operation}' failed: {cause}")]
    Connection {
        /// The connection step that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The connection was lost while executing a query.
    ///
    /// This is the only transient error class; the executor retries it once.
    #[error("connection lost: {cause}")]
    ConnectionLost {
        /// The underlying cause.
        cause: String,
    },

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The result set could not be retrieved or contained an invalid row.
    #[error("result set error: {0}")]
    ResultSet(String),

    /// The rendered query exceeds the query buffer.
    #[error("query of {length} bytes exceeds the {limit}-byte query buffer")]
    QueryTooLong {
        /// Length of the rendered query in bytes.
        length: usize,
        /// The buffer size the query must fit in.
        limit: usize,
    },

    /// No live connection is available.
    #[error("no active database connection")]
    NotConnected,

    /// The circuit breaker is open for the backend.
    #[error("circuit breaker open for backend '{backend}'")]
    CircuitOpen {
        /// The backend name.
        backend: &'static str,
    },

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),
}

impl Error {
    /// Returns `true` for the connection-loss class that warrants one retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }
}

/// Result type alias for dbkeys operations.
pub type Result<T> = std::result::Result<T, Error>;
