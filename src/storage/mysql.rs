//! MySQL / MariaDB key backend.
//!
//! Uses `sqlx` on a backend-owned current-thread runtime, so every trait method
//! blocks. Queries go over the text protocol (`raw_sql`), which is what the key
//! query needs: one rendered statement, no prepared statement round trips.

#[cfg(feature = "mysql")]
mod implementation {
    use crate::config::ConnectionConfig;
    use crate::storage::escape::EscapeStyle;
    use crate::storage::traits::reject_nul;
    use crate::storage::{BackendType, KeyBackend, KeyRow};
    use crate::{Error, Result};
    use secrecy::ExposeSecret;
    use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlRow};
    use sqlx::{ConnectOptions, Connection, Row};
    use tokio::runtime::{Builder, Runtime};

    /// Client error codes for a vanished server (`CR_SERVER_GONE_ERROR`,
    /// `CR_SERVER_LOST`) plus server-side shutdown and kill notices.
    const CONNECTION_LOSS_CODES: &[u16] = &[2006, 2013, 1053, 1927, 4031];

    /// MySQL-based key backend.
    pub struct MysqlBackend {
        /// Runtime for blocking operations, created on first connect.
        runtime: Option<Runtime>,
        /// Open connection, if any.
        conn: Option<MySqlConnection>,
        /// Literal escaping chosen from the session `sql_mode`.
        escape_style: EscapeStyle,
    }

    impl std::fmt::Debug for MysqlBackend {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MysqlBackend")
                .field("connected", &self.conn.is_some())
                .field("escape_style", &self.escape_style)
                .finish_non_exhaustive()
        }
    }

    impl Default for MysqlBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MysqlBackend {
        /// Creates a backend with no open connection.
        #[must_use]
        pub const fn new() -> Self {
            Self {
                runtime: None,
                conn: None,
                escape_style: EscapeStyle::MySql,
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

        fn connect_options(config: &ConnectionConfig) -> MySqlConnectOptions {
            let mut options = MySqlConnectOptions::new()
                .port(config.effective_port(BackendType::MySql.default_port()))
                .charset("utf8mb4");

            let host = config.host.trim();
            options = if host.starts_with('/') {
                options.socket(host)
            } else if host.is_empty() {
                options.host("localhost")
            } else {
                options.host(host)
            };
            if !config.user.is_empty() {
                options = options.username(&config.user);
            }
            let password = config.password.expose_secret();
            if !password.is_empty() {
                options = options.password(password);
            }
            if !config.database.is_empty() {
                options = options.database(&config.database);
            }
            // Rendered queries carry usernames and fingerprints
            options.disable_statement_logging()
        }
    }

    impl KeyBackend for MysqlBackend {
        fn backend_type(&self) -> BackendType {
            BackendType::MySql
        }

        fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
            self.close();

            let options = Self::connect_options(config);
            let timeout = config.connect_timeout;
            tracing::debug!(
                host = %config.host,
                port = config.effective_port(BackendType::MySql.default_port()),
                database = %config.database,
                "Connecting to MySQL"
            );

            let runtime = self.runtime()?;
            let (conn, style) = runtime.block_on(async {
                let mut conn = tokio::time::timeout(timeout, options.connect())
                    .await
                    .map_err(|_| Error::Connection {
                        operation: "connect_mysql".to_string(),
                        cause: format!("timed out after {}s", timeout.as_secs()),
                    })?
                    .map_err(|e| Error::Connection {
                        operation: "connect_mysql".to_string(),
                        cause: e.to_string(),
                    })?;

                let style = match sqlx::raw_sql("SELECT @@SESSION.sql_mode")
                    .fetch_all(&mut conn)
                    .await
                {
                    Ok(rows) => rows
                        .first()
                        .map(|row| text_column(row, 0))
                        .transpose()
                        .and_then(|mode| style_from_sql_mode(mode.flatten().as_deref())),
                    Err(e) => Err(Error::Connection {
                        operation: "read_sql_mode".to_string(),
                        cause: e.to_string(),
                    }),
                };

                match style {
                    Ok(style) => Ok((conn, style)),
                    Err(e) => {
                        if let Err(close_err) = conn.close().await {
                            tracing::debug!(error = %close_err, "MySQL connection did not close cleanly");
                        }
                        Err(e)
                    },
                }
            })?;

            self.conn = Some(conn);
            self.escape_style = style;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.conn.is_some()
        }

        fn is_healthy(&mut self) -> bool {
            let (Some(runtime), Some(conn)) = (&self.runtime, &mut self.conn) else {
                return false;
            };
            runtime.block_on(conn.ping()).is_ok()
        }

        fn escape(&self, input: &str) -> Result<String> {
            if self.conn.is_none() {
                return Err(Error::NotConnected);
            }
            reject_nul(input)?;
            Ok(self.escape_style.escape(input))
        }

        fn execute(&mut self, query: &str) -> Result<Vec<KeyRow>> {
            let (Some(runtime), Some(conn)) = (&self.runtime, &mut self.conn) else {
                return Err(Error::NotConnected);
            };

            let rows = runtime
                .block_on(sqlx::raw_sql(query).fetch_all(&mut *conn))
                .map_err(|e| classify_error(&e))?;

            rows.iter()
                .map(|row| {
                    if row.len() < 2 {
                        return Err(Error::ResultSet(format!(
                            "expected 2 columns, query returned {}",
                            row.len()
                        )));
                    }
                    Ok(KeyRow {
                        key: text_column(row, 0)?,
                        options: text_column(row, 1)?,
                    })
                })
                .collect()
        }

        fn close(&mut self) {
            let Some(conn) = self.conn.take() else {
                return;
            };
            tracing::debug!("Closing MySQL connection");
            if let Some(runtime) = &self.runtime {
                if let Err(e) = runtime.block_on(conn.close()) {
                    tracing::debug!(error = %e, "MySQL connection did not close cleanly");
                }
            }
        }
    }

    impl Drop for MysqlBackend {
        fn drop(&mut self) {
            self.close();
        }
    }

    /// Reads a text column; binary columns are decoded lossily.
    fn text_column(row: &MySqlRow, idx: usize) -> Result<Option<String>> {
        if let Ok(value) = row.try_get::<Option<String>, _>(idx) {
            return Ok(value);
        }
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .map(|v| v.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
            .map_err(|e| Error::ResultSet(e.to_string()))
    }

    /// Maps the session `sql_mode` onto an escaping style.
    ///
    /// A mode that cannot be read fails the connect: under the wrong style
    /// `\'` or `''` can end the literal.
    pub(super) fn style_from_sql_mode(sql_mode: Option<&str>) -> Result<EscapeStyle> {
        let mode = sql_mode.ok_or_else(|| Error::Connection {
            operation: "read_sql_mode".to_string(),
            cause: "server returned no sql_mode".to_string(),
        })?;
        let no_backslash = mode
            .split(',')
            .any(|flag| flag.trim().eq_ignore_ascii_case("NO_BACKSLASH_ESCAPES"));
        Ok(if no_backslash {
            EscapeStyle::SqlStandard
        } else {
            EscapeStyle::MySql
        })
    }

    /// Returns `true` if a MySQL error number means the session is gone.
    pub(super) fn is_connection_loss_code(number: u16) -> bool {
        CONNECTION_LOSS_CODES.contains(&number)
    }

    fn classify_error(e: &sqlx::Error) -> Error {
        let lost = match e {
            sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db) => db
                .try_downcast_ref::<MySqlDatabaseError>()
                .is_some_and(|my| is_connection_loss_code(my.number())),
            _ => false,
        };
        if lost {
            Error::ConnectionLost {
                cause: e.to_string(),
            }
        } else {
            Error::OperationFailed {
                operation: "mysql_query".to_string(),
                cause: e.to_string(),
            }
        }
    }
}

#[cfg(feature = "mysql")]
pub use implementation::MysqlBackend;

#[cfg(not(feature = "mysql"))]
mod stub {
    use crate::config::ConnectionConfig;
    use crate::storage::{BackendType, KeyBackend, KeyRow};
    use crate::{Error, Result};

    /// Stub MySQL backend when the feature is not enabled.
    #[derive(Debug, Default)]
    pub struct MysqlBackend;

    impl MysqlBackend {
        /// Creates a stub backend.
        #[must_use]
        pub const fn new() -> Self {
            Self
        }
    }

    impl KeyBackend for MysqlBackend {
        fn backend_type(&self) -> BackendType {
            BackendType::MySql
        }

        fn connect(&mut self, _config: &ConnectionConfig) -> Result<()> {
            Err(Error::FeatureNotEnabled("mysql".to_string()))
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

#[cfg(not(feature = "mysql"))]
pub use stub::MysqlBackend;
