//! Data models for key lookups.

mod fingerprint;
mod key;

pub use fingerprint::{FingerprintFormat, FingerprintSource, OpenSshPublicKey};
pub use key::{KeyRecord, KeyRecordList};
