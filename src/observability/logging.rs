//! Logging configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Filter applied when nothing else is configured. Kept quiet because sshd
/// forwards a key command's stderr into its own log.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Filter applied with `--verbose`.
pub const VERBOSE_LOG_FILTER: &str = "dbkeys=debug,info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, falling back to [`LogFormat::Pretty`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Event filter.
    pub filter: EnvFilter,
    /// The directive `filter` was built from.
    pub directive: String,
    /// Output format.
    pub format: LogFormat,
    /// Append-only log file; stderr when `None`.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: EnvFilter::new(DEFAULT_LOG_FILTER),
            directive: DEFAULT_LOG_FILTER.to_string(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Builds logging configuration from the `[logging]` settings.
    ///
    /// `verbose` takes precedence over the configured level. An unparseable
    /// level falls back to the default filter.
    #[must_use]
    pub fn from_settings(settings: &LoggingSettings, verbose: bool) -> Self {
        let requested = if verbose {
            Some(VERBOSE_LOG_FILTER.to_string())
        } else {
            settings
                .level
                .as_deref()
                .map(str::trim)
                .filter(|level| !level.is_empty())
                .map(str::to_string)
        };

        let (filter, directive) = requested
            .and_then(|directive| {
                EnvFilter::try_new(&directive)
                    .ok()
                    .map(|filter| (filter, directive))
            })
            .unwrap_or_else(|| {
                (
                    EnvFilter::new(DEFAULT_LOG_FILTER),
                    DEFAULT_LOG_FILTER.to_string(),
                )
            });

        Self {
            filter,
            directive,
            format: settings
                .format
                .as_deref()
                .map(LogFormat::parse)
                .unwrap_or_default(),
            file: settings
                .file
                .as_deref()
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::from_settings(&LoggingSettings::default(), false);
        assert_eq!(config.directive, DEFAULT_LOG_FILTER);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_settings_applied() {
        let settings = LoggingSettings {
            level: Some("dbkeys=trace".to_string()),
            format: Some("JSON".to_string()),
            file: Some("/var/log/dbkeys.log".to_string()),
        };
        let config = LoggingConfig::from_settings(&settings, false);
        assert_eq!(config.directive, "dbkeys=trace");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file, Some(PathBuf::from("/var/log/dbkeys.log")));
    }

    #[test]
    fn test_verbose_wins() {
        let settings = LoggingSettings {
            level: Some("error".to_string()),
            ..LoggingSettings::default()
        };
        let config = LoggingConfig::from_settings(&settings, true);
        assert_eq!(config.directive, VERBOSE_LOG_FILTER);
    }

    #[test]
    fn test_bad_level_falls_back() {
        let settings = LoggingSettings {
            level: Some("dbkeys=[".to_string()),
            ..LoggingSettings::default()
        };
        let config = LoggingConfig::from_settings(&settings, false);
        assert_eq!(config.directive, DEFAULT_LOG_FILTER);
    }
}
