//! Mutex acquisition with poison recovery.

use std::sync::{Mutex, MutexGuard};

/// Acquires a mutex lock, recovering from poison.
///
/// A lookup that panics while holding the connection lock leaves the mutex
/// poisoned. The guarded connection manager tears its connection down at the
/// end of every lookup (including on unwind), so the state behind a poisoned
/// lock is a disconnected manager and safe to reuse.
///
/// # Examples
///
/// ```ignore
/// use std::sync::Mutex;
/// use dbkeys::storage::acquire_lock;
///
/// let mutex = Mutex::new(manager);
/// let guard = acquire_lock(&mutex);
/// ```
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Connection mutex was poisoned, recovering");
            metrics::counter!("dbkeys_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}
