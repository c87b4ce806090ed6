//! The key resolver: connect, query, map, tear down.

use super::connection::ConnectionManager;
use super::query::{OverflowPolicy, QueryBuilder};
use super::{executor, mapper};
use crate::config::{ConnectionConfig, DbKeysConfig, LookupSettings};
use crate::models::{FingerprintSource, KeyRecordList};
use crate::storage::{
    BackendType, CircuitBreaker, KeyBackend, StorageResilienceConfig, acquire_lock, create_backend,
};
use crate::{Error, Result};
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

/// Exit status used when a query overflows under [`OverflowPolicy::Abort`].
pub const OVERFLOW_EXIT_CODE: i32 = 255;

/// Resolves `(fingerprint, username)` pairs to key records.
///
/// The connection manager sits behind a mutex held for the whole
/// connect, query and teardown sequence, so a resolver can be shared across
/// threads and its lookups run one at a time. No connection survives a
/// lookup.
pub struct KeyResolver<B: KeyBackend> {
    manager: Mutex<ConnectionManager<B>>,
    breaker: Mutex<CircuitBreaker>,
    settings: LookupSettings,
    backend_name: &'static str,
}

impl<B: KeyBackend> KeyResolver<B> {
    /// Creates a resolver with default lookup bounds and breaker settings.
    #[must_use]
    pub fn new(backend: B, config: ConnectionConfig) -> Self {
        let backend_name = backend.name();
        Self {
            manager: Mutex::new(ConnectionManager::new(backend, config)),
            breaker: Mutex::new(CircuitBreaker::new(
                &StorageResilienceConfig::default(),
                backend_name,
            )),
            settings: LookupSettings::default(),
            backend_name,
        }
    }

    /// Sets the lookup bounds.
    #[must_use]
    pub const fn with_settings(mut self, settings: LookupSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the circuit breaker configuration.
    #[must_use]
    pub fn with_resilience(mut self, config: &StorageResilienceConfig) -> Self {
        self.breaker = Mutex::new(CircuitBreaker::new(config, self.backend_name));
        self
    }

    /// Returns the lookup bounds.
    #[must_use]
    pub const fn settings(&self) -> LookupSettings {
        self.settings
    }

    /// Returns the backend name.
    #[must_use]
    pub const fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    /// Returns `true` if a connection is open. Outside a lookup this is
    /// always `false`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        acquire_lock(&self.manager).is_connected()
    }

    /// Looks up the keys for `username` whose fingerprint matches
    /// `fingerprint_source`.
    ///
    /// Zero matches is `Ok` with a list of length 1 (the sentinel alone).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for out-of-bounds input, before any database work
    /// - [`Error::CircuitOpen`] while the breaker is open
    /// - [`Error::Connection`] if no healthy connection could be made
    /// - [`Error::QueryTooLong`] if the rendered query does not fit
    /// - [`Error::ConnectionLost`], [`Error::OperationFailed`] or
    ///   [`Error::ResultSet`] if the query fails
    #[instrument(skip_all, fields(backend = self.backend_name, username = %username))]
    pub fn lookup<F>(&self, fingerprint_source: &F, username: &str) -> Result<KeyRecordList>
    where
        F: FingerprintSource + ?Sized,
    {
        let start = Instant::now();
        let fingerprint = fingerprint_source.fingerprint();
        let builder = QueryBuilder::from_settings(&self.settings);

        let result = builder
            .validate(&fingerprint, username)
            .and_then(|()| self.admit())
            .and_then(|permit| {
                let outcome = {
                    let mut manager = acquire_lock(&self.manager);
                    let mut session = manager.session();
                    self.run(&mut session, &builder, &fingerprint, username)
                };
                permit.settle(&outcome);
                outcome
            });

        let status = match &result {
            Ok(list) if list.has_matches() => "found",
            Ok(_) => "not_found",
            Err(Error::InvalidInput(_)) => "invalid_input",
            Err(Error::CircuitOpen { .. }) => "circuit_open",
            Err(_) => "error",
        };
        metrics::counter!(
            "dbkeys_lookups_total",
            "backend" => self.backend_name,
            "status" => status
        )
        .increment(1);
        metrics::histogram!("dbkeys_lookup_duration_seconds", "backend" => self.backend_name)
            .record(start.elapsed().as_secs_f64());

        match &result {
            Ok(list) => tracing::debug!(matches = list.match_count(), "Key lookup complete"),
            Err(e @ (Error::InvalidInput(_) | Error::CircuitOpen { .. })) => {
                tracing::warn!(error = %e, "Key lookup rejected");
            },
            Err(e) => tracing::error!(error = %e, "Key lookup failed"),
        }

        result
    }

    /// Fail-closed lookup: every failure becomes the empty, sentinel-only
    /// list.
    pub fn search<F>(&self, fingerprint_source: &F, username: &str) -> KeyRecordList
    where
        F: FingerprintSource + ?Sized,
    {
        self.lookup(fingerprint_source, username)
            .unwrap_or_else(|_| KeyRecordList::empty())
    }

    /// Connects, probes and tears down.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if no healthy connection could be made.
    pub fn check(&self) -> Result<()> {
        let mut manager = acquire_lock(&self.manager);
        let mut session = manager.session();
        session.ensure_connected()
    }

    fn admit(&self) -> Result<Permit<'_>> {
        let mut breaker = acquire_lock(&self.breaker);
        if breaker.allow() {
            return Ok(Permit {
                breaker: &self.breaker,
                settled: false,
            });
        }
        Err(Error::CircuitOpen {
            backend: self.backend_name,
        })
    }

    fn run(
        &self,
        manager: &mut ConnectionManager<B>,
        builder: &QueryBuilder,
        fingerprint: &str,
        username: &str,
    ) -> Result<KeyRecordList> {
        manager.ensure_connected()?;

        let query = match builder.build(manager.backend(), fingerprint, username) {
            Err(Error::QueryTooLong { length, limit })
                if self.settings.overflow == OverflowPolicy::Abort =>
            {
                tracing::error!(length, limit, "Key query does not fit the query buffer, aborting");
                manager.shutdown();
                std::process::exit(OVERFLOW_EXIT_CODE);
            },
            other => other?,
        };

        tracing::debug!(query = %query, "Executing key query");
        let rows = executor::execute(manager.backend_mut(), &query)?;
        mapper::map(rows)
    }
}

impl KeyResolver<Box<dyn KeyBackend>> {
    /// Creates a resolver for the configured engine, with the configured
    /// bounds and breaker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FeatureNotEnabled`] if the engine was not compiled in.
    pub fn from_config(config: &DbKeysConfig) -> Result<Self> {
        let backend = create_backend(config.backend)?;
        Ok(Self::new(backend, config.connection.clone())
            .with_settings(config.lookup)
            .with_resilience(&config.breaker))
    }
}

impl<B: KeyBackend> std::fmt::Debug for KeyResolver<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyResolver")
            .field("backend", &self.backend_name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// A lookup admitted by the breaker. It must report back: an outcome that
/// says nothing about the database, or a panic, releases the admission.
struct Permit<'a> {
    breaker: &'a Mutex<CircuitBreaker>,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, outcome: &Result<KeyRecordList>) {
        let mut breaker = acquire_lock(self.breaker);
        match outcome {
            Ok(_) => breaker.on_success(),
            Err(e) if counts_against_breaker(e) => {
                breaker.on_failure();
            },
            Err(_) => breaker.release(),
        }
        self.settled = true;
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            acquire_lock(self.breaker).release();
        }
    }
}

/// Infrastructure failures count toward opening the breaker; bad input and
/// oversized queries do not.
const fn counts_against_breaker(e: &Error) -> bool {
    matches!(
        e,
        Error::Connection { .. }
            | Error::ConnectionLost { .. }
            | Error::OperationFailed { .. }
            | Error::ResultSet(_)
    )
}

/// Fail-closed one-shot lookup against `backend`.
///
/// Builds a private resolver, so concurrent callers never share a
/// connection. Every failure, including an engine that was not compiled in,
/// yields the empty sentinel-only list.
pub fn search<F>(
    backend: BackendType,
    config: ConnectionConfig,
    fingerprint_source: &F,
    username: &str,
) -> KeyRecordList
where
    F: FingerprintSource + ?Sized,
{
    match create_backend(backend) {
        Ok(backend) => KeyResolver::new(backend, config).search(fingerprint_source, username),
        Err(e) => {
            tracing::error!(backend = %backend, error = %e, "Key backend unavailable");
            KeyRecordList::empty()
        },
    }
}
