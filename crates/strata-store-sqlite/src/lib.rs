//! SQLite backend for Strata.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. The catalog lives in `strata_*` tables;
//! every user-defined table is a plain SQLite table created on demand.

mod catalog;
mod ddl;
mod encode;
mod keys;
mod records;
mod registry;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use keys::hash_token;
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
