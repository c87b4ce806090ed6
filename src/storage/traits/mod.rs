//! Storage backend traits.

mod backend;

pub(crate) use backend::reject_nul;
pub use backend::{KeyBackend, KeyRow};
