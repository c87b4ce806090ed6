//! Key records and sentinel-terminated key lists.

use serde::Serialize;
use std::fmt;

/// One matched public key.
///
/// A record with an empty `key` is the list terminator (sentinel), not a real
/// credential.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct KeyRecord {
    /// Public key material as stored, e.g. `ssh-ed25519 AAAA... comment`.
    pub key: String,
    /// Per-key restriction clause (`command="..."`, `from="..."`), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
}

impl KeyRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(key: impl Into<String>, options: Option<String>) -> Self {
        Self {
            key: key.into(),
            options,
        }
    }

    /// Creates the sentinel record.
    #[must_use]
    pub const fn sentinel() -> Self {
        Self {
            key: String::new(),
            options: None,
        }
    }

    /// Returns `true` if this record is the list terminator.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        self.key.is_empty()
    }

    /// Renders the record as an `authorized_keys` line.
    #[must_use]
    pub fn to_authorized_keys_line(&self) -> String {
        match self.options.as_deref() {
            Some(options) if !options.is_empty() => format!("{options} {}", self.key),
            _ => self.key.clone(),
        }
    }
}

/// Ordered key records, always terminated by exactly one sentinel.
///
/// Records keep the row order returned by the database. A list with zero
/// matches still holds the sentinel, so `len()` is never zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecordList {
    records: Vec<KeyRecord>,
}

impl KeyRecordList {
    /// Creates a list holding only the sentinel.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            records: vec![KeyRecord::sentinel()],
        }
    }

    /// Creates a list from matched records, appending the sentinel.
    ///
    /// Sentinel-shaped records in the input are dropped so the terminator
    /// stays unique.
    #[must_use]
    pub fn from_matches(matches: impl IntoIterator<Item = KeyRecord>) -> Self {
        let mut records: Vec<KeyRecord> = matches
            .into_iter()
            .filter(|record| !record.is_sentinel())
            .collect();
        records.push(KeyRecord::sentinel());
        Self { records }
    }

    /// Number of records including the sentinel.
    #[must_use]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Number of real records.
    #[must_use]
    pub fn match_count(&self) -> usize {
        self.records.len() - 1
    }

    /// Returns `true` if at least one key matched.
    #[must_use]
    pub fn has_matches(&self) -> bool {
        self.match_count() > 0
    }

    /// The real records, without the sentinel.
    #[must_use]
    pub fn matches(&self) -> &[KeyRecord] {
        &self.records[..self.match_count()]
    }

    /// All records including the trailing sentinel.
    #[must_use]
    pub fn as_terminated(&self) -> &[KeyRecord] {
        &self.records
    }

    /// Iterates over the real records.
    pub fn iter(&self) -> std::slice::Iter<'_, KeyRecord> {
        self.matches().iter()
    }

    /// Renders every match as an `authorized_keys` file body.
    #[must_use]
    pub fn to_authorized_keys(&self) -> String {
        self.iter().fold(String::new(), |mut out, record| {
            out.push_str(&record.to_authorized_keys_line());
            out.push('\n');
            out
        })
    }
}

impl Default for KeyRecordList {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a> IntoIterator for &'a KeyRecordList {
    type Item = &'a KeyRecord;
    type IntoIter = std::slice::Iter<'a, KeyRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for KeyRecordList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_authorized_keys())
    }
}

impl Serialize for KeyRecordList {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.matches())
    }
}
