//! Result row mapping.

use crate::models::{KeyRecord, KeyRecordList};
use crate::storage::KeyRow;
use crate::{Error, Result};

/// Maps raw rows into a sentinel-terminated list, preserving row order.
///
/// NULL options become absent options. Rows with an empty key are skipped
/// because they would read as the terminator.
///
/// # Errors
///
/// Returns [`Error::ResultSet`] if any row has a NULL key.
pub fn map(rows: Vec<KeyRow>) -> Result<KeyRecordList> {
    let mut records = Vec::with_capacity(rows.len());
    for (index, row) in rows.into_iter().enumerate() {
        let Some(key) = row.key else {
            return Err(Error::ResultSet(format!("row {index} has a NULL key")));
        };
        if key.is_empty() {
            tracing::warn!(row = index, "Skipping key row with an empty key");
            continue;
        }
        records.push(KeyRecord::new(key, row.options));
    }
    Ok(KeyRecordList::from_matches(records))
}
