//! Core types and trait definitions for Strata, a runtime-defined table store.
//!
//! This crate is deliberately free of HTTP and database dependencies. All
//! other crates depend on it.

// Native `async fn` in traits; the `Send` bounds are spelled out on the
// returned futures instead.
#![allow(async_fn_in_trait)]

pub mod access;
pub mod error;
pub mod event;
pub mod naming;
pub mod query;
pub mod record;
pub mod rules;
pub mod schema;
pub mod store;

pub use error::{DomainError, Error, ErrorKind, Result};
