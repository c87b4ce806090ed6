//! PostgreSQL key backend.
//!
//! Uses `tokio-postgres` driven by a backend-owned current-thread runtime, so
//! every trait method blocks. Do not call it from inside another runtime.

#[cfg(feature = "postgres")]
mod implementation {
    use crate::config::ConnectionConfig;
    use crate::storage::escape::EscapeStyle;
    use crate::storage::traits::reject_nul;
    use crate::storage::{BackendType, KeyBackend, KeyRow};
    use crate::{Error, Result};
    use secrecy::ExposeSecret;
    use std::time::Duration;
    use tokio::runtime::{Builder, Runtime};
    use tokio::task::JoinHandle;
    #[cfg(not(feature = "postgres-tls"))]
    use tokio_postgres::NoTls;
    use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
    use tokio_postgres::{Client, SimpleQueryMessage, Socket};

    /// Grace period for the connection task to flush its terminate message.
    const CLOSE_GRACE: Duration = Duration::from_secs(1);

    /// A live client and the task driving its socket.
    struct Session {
        client: Client,
        driver: JoinHandle<()>,
    }

    /// PostgreSQL-based key backend.
    pub struct PostgresBackend {
        /// Runtime for blocking operations, created on first connect.
        runtime: Option<Runtime>,
        /// Open session, if any.
        session: Option<Session>,
        /// Literal escaping chosen from `standard_conforming_strings`.
        escape_style: EscapeStyle,
    }

    impl std::fmt::Debug for PostgresBackend {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("PostgresBackend")
                .field("connected", &self.session.is_some())
                .field("escape_style", &self.escape_style)
                .finish_non_exhaustive()
        }
    }

    impl Default for PostgresBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PostgresBackend {
        /// Creates a backend with no open connection.
        #[must_use]
        pub const fn new() -> Self {
            Self {
                runtime: None,
                session: None,
                escape_style: EscapeStyle::SqlStandard,
            }
        }

        /// Returns the escaping style negotiated for the open connection.
        #[must_use]
        pub const fn escape_style(&self) -> EscapeStyle {
            self.escape_style
        }

        fn runtime(&mut self) -> Result<&Runtime> {
            if self.runtime.is_none() {
                let runtime = Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| Error::OperationFailed {
                        operation: "create_tokio_runtime".to_string(),
                        cause: e.to_string(),
                    })?;
                self.runtime = Some(runtime);
            }
            self.runtime.as_ref().ok_or_else(|| Error::OperationFailed {
                operation: "create_tokio_runtime".to_string(),
                cause: "runtime unavailable".to_string(),
            })
        }

        fn pg_config(config: &ConnectionConfig) -> tokio_postgres::Config {
            let mut pg = tokio_postgres::Config::new();
            let host = if config.host.trim().is_empty() {
                "localhost"
            } else {
                config.host.as_str()
            };
            pg.host(host)
                .port(config.effective_port(BackendType::PostgreSQL.default_port()))
                .connect_timeout(config.connect_timeout)
                .application_name("dbkeys");
            if !config.user.is_empty() {
                pg.user(&config.user);
            }
            let password = config.password.expose_secret();
            if !password.is_empty() {
                pg.password(password);
            }
            if !config.database.is_empty() {
                pg.dbname(&config.database);
            }
            pg
        }
    }

    impl KeyBackend for PostgresBackend {
        fn backend_type(&self) -> BackendType {
            BackendType::PostgreSQL
        }

        fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
            self.close();

            let pg = Self::pg_config(config);
            let timeout = config.connect_timeout;
            tracing::debug!(
                host = %config.host,
                port = config.effective_port(BackendType::PostgreSQL.default_port()),
                database = %config.database,
                "Connecting to PostgreSQL"
            );

            let runtime = self.runtime()?;
            let (session, style) = runtime.block_on(async {
                let (client, driver) = open(&pg, timeout).await?;

                let style = match client.simple_query("SHOW standard_conforming_strings").await {
                    Ok(messages) => style_from_setting(first_value(&messages).as_deref()),
                    Err(e) => Err(Error::Connection {
                        operation: "read_standard_conforming_strings".to_string(),
                        cause: e.to_string(),
                    }),
                };

                match style {
                    Ok(style) => Ok((Session { client, driver }, style)),
                    Err(e) => {
                        drop(client);
                        let _ = tokio::time::timeout(CLOSE_GRACE, driver).await;
                        Err(e)
                    },
                }
            })?;

            self.session = Some(session);
            self.escape_style = style;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.session.is_some()
        }

        fn is_healthy(&mut self) -> bool {
            let (Some(runtime), Some(session)) = (&self.runtime, &self.session) else {
                return false;
            };
            if session.client.is_closed() {
                return false;
            }
            runtime
                .block_on(session.client.simple_query("SELECT 1"))
                .is_ok()
        }

        fn escape(&self, input: &str) -> Result<String> {
            if self.session.is_none() {
                return Err(Error::NotConnected);
            }
            reject_nul(input)?;
            Ok(self.escape_style.escape(input))
        }

        fn execute(&mut self, query: &str) -> Result<Vec<KeyRow>> {
            let (Some(runtime), Some(session)) = (&self.runtime, &self.session) else {
                return Err(Error::NotConnected);
            };

            let messages = runtime
                .block_on(session.client.simple_query(query))
                .map_err(|e| classify_error(&e))?;

            let mut rows = Vec::new();
            for message in messages {
                if let SimpleQueryMessage::Row(row) = message {
                    if row.len() < 2 {
                        return Err(Error::ResultSet(format!(
                            "expected 2 columns, query returned {}",
                            row.len()
                        )));
                    }
                    let column = |idx: usize| {
                        row.try_get(idx)
                            .map(|v| v.map(str::to_string))
                            .map_err(|e| Error::ResultSet(e.to_string()))
                    };
                    rows.push(KeyRow {
                        key: column(0)?,
                        options: column(1)?,
                    });
                }
            }
            Ok(rows)
        }

        fn close(&mut self) {
            let Some(Session { client, driver }) = self.session.take() else {
                return;
            };
            tracing::debug!("Closing PostgreSQL connection");
            drop(client);
            if let Some(runtime) = &self.runtime {
                runtime.block_on(async {
                    if tokio::time::timeout(CLOSE_GRACE, driver).await.is_err() {
                        tracing::debug!("PostgreSQL connection task did not finish in time");
                    }
                });
            }
        }
    }

    impl Drop for PostgresBackend {
        fn drop(&mut self) {
            self.close();
        }
    }

    fn first_value(messages: &[SimpleQueryMessage]) -> Option<String> {
        messages.iter().find_map(|message| match message {
            SimpleQueryMessage::Row(row) => row.get(0).map(str::to_string),
            _ => None,
        })
    }

    /// Maps `standard_conforming_strings` onto an escaping style.
    ///
    /// Anything but `on` or `off` fails the connect: with the wrong style a
    /// backslash in the input can end the literal.
    pub(super) fn style_from_setting(value: Option<&str>) -> Result<EscapeStyle> {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("on") => Ok(EscapeStyle::SqlStandard),
            Some(v) if v.eq_ignore_ascii_case("off") => Ok(EscapeStyle::PostgresLegacy),
            other => Err(Error::Connection {
                operation: "read_standard_conforming_strings".to_string(),
                cause: format!("cannot choose literal escaping from {other:?}"),
            }),
        }
    }

    #[cfg(feature = "postgres-tls")]
    async fn open(
        pg: &tokio_postgres::Config,
        timeout: Duration,
    ) -> Result<(Client, JoinHandle<()>)> {
        start(pg, tls_connector(), timeout).await
    }

    #[cfg(not(feature = "postgres-tls"))]
    async fn open(
        pg: &tokio_postgres::Config,
        timeout: Duration,
    ) -> Result<(Client, JoinHandle<()>)> {
        start(pg, NoTls, timeout).await
    }

    /// TLS with the webpki roots, negotiated under `sslmode=prefer`.
    #[cfg(feature = "postgres-tls")]
    pub(super) fn tls_connector() -> tokio_postgres_rustls::MakeRustlsConnect {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        tokio_postgres_rustls::MakeRustlsConnect::new(config)
    }

    /// Connects and spawns the task driving the socket.
    async fn start<T>(
        pg: &tokio_postgres::Config,
        tls: T,
        timeout: Duration,
    ) -> Result<(Client, JoinHandle<()>)>
    where
        T: MakeTlsConnect<Socket>,
        T::Stream: Send + 'static,
        T::TlsConnect: Send,
        <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
    {
        let (client, connection) = tokio::time::timeout(timeout, pg.connect(tls))
            .await
            .map_err(|_| Error::Connection {
                operation: "connect_postgres".to_string(),
                cause: format!("timed out after {}s", timeout.as_secs()),
            })?
            .map_err(|e| Error::Connection {
                operation: "connect_postgres".to_string(),
                cause: e.to_string(),
            })?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "PostgreSQL connection task ended");
            }
        });
        Ok((client, driver))
    }

    /// Returns `true` if the SQLSTATE means the session is gone.
    ///
    /// Class 08 (connection exception) and the admin/crash shutdown codes.
    pub(super) fn is_connection_loss_state(code: &str) -> bool {
        code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
    }

    fn classify_error(e: &tokio_postgres::Error) -> Error {
        let io_failure = std::error::Error::source(e).is_some_and(|s| s.is::<std::io::Error>());
        let lost = e.is_closed()
            || io_failure
            || e.code().is_some_and(|c| is_connection_loss_state(c.code()));
        if lost {
            Error::ConnectionLost {
                cause: e.to_string(),
            }
        } else {
            Error::OperationFailed {
                operation: "postgres_query".to_string(),
                cause: e.to_string(),
            }
        }
    }
}

#[cfg(feature = "postgres")]
pub use implementation::PostgresBackend;

#[cfg(not(feature = "postgres"))]
mod stub {
    use crate::config::ConnectionConfig;
    use crate::storage::{BackendType, KeyBackend, KeyRow};
    use crate::{Error, Result};

    /// Stub PostgreSQL backend when the feature is not enabled.
    #[derive(Debug, Default)]
    pub struct PostgresBackend;

    impl PostgresBackend {
        /// Creates a stub backend.
        #[must_use]
        pub const fn new() -> Self {
            Self
        }
    }

    impl KeyBackend for PostgresBackend {
        fn backend_type(&self) -> BackendType {
            BackendType::PostgreSQL
        }

        fn connect(&mut self, _config: &ConnectionConfig) -> Result<()> {
            Err(Error::FeatureNotEnabled("postgres".to_string()))
        }

        fn is_connected(&self) -> bool {
            false
        }

        fn is_healthy(&mut self) -> bool {
            false
        }

        fn escape(&self, _input: &str) -> Result<String> {
            Err(Error::NotConnected)
        }

        fn execute(&mut self, _query: &str) -> Result<Vec<KeyRow>> {
            Err(Error::NotConnected)
        }

        fn close(&mut self) {}
    }
}

#[cfg(not(feature = "postgres"))]
pub use stub::PostgresBackend;


#[cfg(all(test, not(feature = "postgres")))]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::storage::KeyBackend;
    use crate::Error;

    #[test]
    fn test_stub_reports_feature_not_enabled() {
        let mut backend = PostgresBackend::new();
        let result = backend.connect(&ConnectionConfig::default());
        assert!(matches!(result, Err(Error::FeatureNotEnabled(_))));
        assert!(!backend.is_connected());
        assert!(!backend.is_healthy());
    }
}
