//! Key query rendering.
//!
//! Untrusted inputs are escaped through the connected backend and rendered
//! into a fixed template. The rendered statement must fit the query buffer.

use crate::config::LookupSettings;
use crate::storage::KeyBackend;
use crate::{Error, Result};
use serde::Serialize;

/// Maximum accepted length of each lookup input, in bytes.
pub const MAX_INPUT_LEN: usize = 256;

/// Size of the query buffer, in bytes. Rendered queries must be shorter.
pub const QUERY_BUFFER_SIZE: usize = 1024;

/// What happens when a rendered query does not fit the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Return [`Error::QueryTooLong`]; the lookup fails closed.
    #[default]
    Reject,
    /// Log at error severity, tear down, and exit the process with status 255.
    Abort,
}

/// Renders the key query for one lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryBuilder {
    max_input_len: usize,
    buffer_size: usize,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryBuilder {
    /// Creates a builder with the default bounds.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_input_len: MAX_INPUT_LEN,
            buffer_size: QUERY_BUFFER_SIZE,
        }
    }

    /// Sets the per-input length bound.
    #[must_use]
    pub const fn with_max_input_len(mut self, max_input_len: usize) -> Self {
        self.max_input_len = max_input_len;
        self
    }

    /// Creates a builder from lookup settings.
    #[must_use]
    pub const fn from_settings(settings: &LookupSettings) -> Self {
        Self {
            max_input_len: settings.max_input_len,
            buffer_size: settings.query_buffer_size,
        }
    }

    /// Sets the query buffer size.
    #[must_use]
    pub const fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Validates the inputs, escapes them through `backend` and renders the
    /// query.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if an input is too long or contains NUL
    /// - [`Error::NotConnected`] if the backend has no live connection
    /// - [`Error::QueryTooLong`] if the rendered query does not fit
    pub fn build<B>(&self, backend: &B, fingerprint: &str, username: &str) -> Result<String>
    where
        B: KeyBackend + ?Sized,
    {
        self.validate(fingerprint, username)?;

        let username = backend.escape(username)?;
        let fingerprint = backend.escape(fingerprint)?;
        let query = render(&username, &fingerprint);

        if query.len() >= self.buffer_size {
            return Err(Error::QueryTooLong {
                length: query.len(),
                limit: self.buffer_size,
            });
        }
        Ok(query)
    }

    /// Checks the input bounds without touching the database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if an input is too long or contains NUL.
    pub fn validate(&self, fingerprint: &str, username: &str) -> Result<()> {
        self.check_input("username", username)?;
        self.check_input("fingerprint", fingerprint)
    }

    fn check_input(&self, field: &str, value: &str) -> Result<()> {
        if value.len() > self.max_input_len {
            return Err(Error::InvalidInput(format!(
                "{field} is {} bytes, limit is {}",
                value.len(),
                self.max_input_len
            )));
        }
        if value.contains('\0') {
            return Err(Error::InvalidInput(format!("{field} contains a NUL byte")));
        }
        Ok(())
    }
}

/// Renders the key query with the default bounds.
///
/// # Errors
///
/// See [`QueryBuilder::build`].
pub fn build<B>(backend: &B, fingerprint: &str, username: &str) -> Result<String>
where
    B: KeyBackend + ?Sized,
{
    QueryBuilder::new().build(backend, fingerprint, username)
}

/// Substitutes already-escaped values into the key query.
#[must_use]
pub fn render(escaped_username: &str, escaped_fingerprint: &str) -> String {
    format!(
        "SELECT public_keys.key,public_keys.options FROM public_keys \
         WHERE username='{escaped_username}' AND fingerprint='{escaped_fingerprint}'"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedBackend;

    fn connected() -> ScriptedBackend {
        let mut backend = ScriptedBackend::new();
        backend.force_connected();
        backend
    }

    #[test]
    fn test_render_template() {
        assert_eq!(
            render("alice", "SHA256:abc"),
            "SELECT public_keys.key,public_keys.options FROM public_keys \
             WHERE username='alice' AND fingerprint='SHA256:abc'"
        );
    }

    #[test]
    fn test_render_does_not_reinterpret_placeholders() {
        let query = render("{fingerprint}", "fp");
        assert!(query.contains("username='{fingerprint}'"));
        assert!(query.contains("fingerprint='fp'"));
    }

    #[test]
    fn test_build_escapes_inputs() {
        let backend = connected();
        let query = build(&backend, "fp'1", "o'brien").unwrap();
        assert!(query.contains("username='o''brien'"));
        assert!(query.contains("fingerprint='fp''1'"));
    }

    #[test]
    fn test_build_requires_connection() {
        let backend = ScriptedBackend::new();
        assert!(matches!(
            build(&backend, "fp", "alice"),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn test_build_rejects_long_input() {
        let backend = connected();
        let long = "a".repeat(MAX_INPUT_LEN + 1);
        assert!(matches!(
            build(&backend, "fp", &long),
            Err(Error::InvalidInput(msg)) if msg.contains("username")
        ));
        assert!(matches!(
            build(&backend, &long, "alice"),
            Err(Error::InvalidInput(msg)) if msg.contains("fingerprint")
        ));
    }

    #[test]
    fn test_build_accepts_input_at_limit() {
        let backend = connected();
        let max = "a".repeat(MAX_INPUT_LEN);
        assert!(build(&backend, &max, &max).is_ok());
    }

    #[test]
    fn test_build_rejects_nul() {
        let backend = connected();
        assert!(matches!(
            build(&backend, "fp", "ali\0ce"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_build_overflow() {
        let backend = connected();
        // 256 quotes double to 512 escaped bytes per input
        let quotes = "'".repeat(MAX_INPUT_LEN);
        let result = build(&backend, &quotes, &quotes);
        assert!(matches!(
            result,
            Err(Error::QueryTooLong { length, limit })
                if length >= limit && limit == QUERY_BUFFER_SIZE
        ));
    }

    #[test]
    fn test_build_length_boundary() {
        let backend = connected();
        let base = render("", "").len();
        let builder = QueryBuilder::new()
            .with_buffer_size(base + 11)
            .with_max_input_len(64);

        // base + 10 < base + 11 fits
        assert!(builder.build(&backend, "fffff", "uuuuu").is_ok());
        // base + 11 does not
        assert!(matches!(
            builder.build(&backend, "ffffff", "uuuuu"),
            Err(Error::QueryTooLong { .. })
        ));
    }
}
