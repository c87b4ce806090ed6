//! Query execution with a single retry on connection loss.

use crate::storage::{KeyBackend, KeyRow};
use crate::Result;

/// Executes `query`, retrying it once on the same handle if the first attempt
/// fails with a transient connection-loss error.
///
/// # Errors
///
/// Returns the first non-transient error, or the second attempt's error.
pub fn execute<B>(backend: &mut B, query: &str) -> Result<Vec<KeyRow>>
where
    B: KeyBackend + ?Sized,
{
    match backend.execute(query) {
        Err(e) if e.is_transient() => {
            tracing::warn!(
                backend = backend.name(),
                error = %e,
                "Connection lost during query, retrying once"
            );
            metrics::counter!("dbkeys_query_retries_total", "backend" => backend.name())
                .increment(1);
            backend.execute(query)
        },
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedBackend;
    use crate::Error;

    fn lost() -> Error {
        Error::ConnectionLost {
            cause: "server has gone away".to_string(),
        }
    }

    #[test]
    fn test_success_is_not_retried() {
        let mut backend = ScriptedBackend::new().with_rows(vec![KeyRow::new("k1", None)]);
        backend.force_connected();

        let rows = execute(&mut backend, "SELECT 1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(backend.stats().executes(), 1);
    }

    #[test]
    fn test_transient_error_retried_once() {
        let mut backend = ScriptedBackend::new()
            .with_rows(vec![KeyRow::new("k1", None)])
            .with_execute_results(vec![Err(lost())]);
        backend.force_connected();

        let rows = execute(&mut backend, "SELECT 1").unwrap();
        assert_eq!(rows, vec![KeyRow::new("k1", None)]);
        assert_eq!(backend.stats().executes(), 2);
        assert_eq!(
            backend.stats().queries(),
            vec!["SELECT 1".to_string(), "SELECT 1".to_string()]
        );
    }

    #[test]
    fn test_second_transient_error_is_returned() {
        let mut backend =
            ScriptedBackend::new().with_execute_results(vec![Err(lost()), Err(lost())]);
        backend.force_connected();

        let result = execute(&mut backend, "SELECT 1");
        assert!(matches!(result, Err(Error::ConnectionLost { .. })));
        assert_eq!(backend.stats().executes(), 2);
    }

    #[test]
    fn test_non_transient_error_not_retried() {
        let mut backend = ScriptedBackend::new().with_execute_results(vec![Err(
            Error::OperationFailed {
                operation: "query".to_string(),
                cause: "syntax error".to_string(),
            },
        )]);
        backend.force_connected();

        let result = execute(&mut backend, "SELECT 1");
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
        assert_eq!(backend.stats().executes(), 1);
    }
}
