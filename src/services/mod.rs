//! Lookup services.
//!
//! The resolver drives one lookup through the connection manager, query
//! builder, executor and result mapper, then tears the connection down.

pub mod connection;
pub mod executor;
pub mod mapper;
pub mod query;
mod resolver;

pub use connection::{ConnectionManager, Session};
pub use query::{MAX_INPUT_LEN, OverflowPolicy, QUERY_BUFFER_SIZE, QueryBuilder};
pub use resolver::{KeyResolver, OVERFLOW_EXIT_CODE, search};
