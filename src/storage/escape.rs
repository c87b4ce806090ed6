//! String literal escaping.
//!
//! Lookup inputs are rendered into single-quoted SQL literals. How a literal
//! must be escaped depends on the engine and on session state, so each backend
//! picks an [`EscapeStyle`] when its connection is established.

/// Literal escaping rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EscapeStyle {
    /// ANSI SQL: quotes are doubled, backslashes are ordinary characters.
    ///
    /// `SQLite`, PostgreSQL with `standard_conforming_strings = on`, and MySQL
    /// in `NO_BACKSLASH_ESCAPES` mode.
    #[default]
    SqlStandard,
    /// PostgreSQL with `standard_conforming_strings = off`: quotes and
    /// backslashes are both doubled.
    PostgresLegacy,
    /// MySQL default mode: special characters are backslash-escaped, matching
    /// `mysql_real_escape_string`.
    MySql,
}

impl EscapeStyle {
    /// Escapes `input` for placement between single quotes.
    #[must_use]
    pub fn escape(self, input: &str) -> String {
        let mut out = String::with_capacity(input.len() * 2);
        for ch in input.chars() {
            match self {
                Self::SqlStandard => {
                    if ch == '\'' {
                        out.push('\'');
                    }
                    out.push(ch);
                },
                Self::PostgresLegacy => {
                    if ch == '\'' || ch == '\\' {
                        out.push(ch);
                    }
                    out.push(ch);
                },
                Self::MySql => match ch {
                    '\0' => out.push_str("\\0"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\\' => out.push_str("\\\\"),
                    '\'' => out.push_str("\\'"),
                    '"' => out.push_str("\\\""),
                    '\x1a' => out.push_str("\\Z"),
                    _ => out.push(ch),
                },
            }
        }
        out
    }
}
