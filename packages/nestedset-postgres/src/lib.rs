#![forbid(unsafe_code)]
//! Postgres persistence for `nestedset-core`.
//!
//! Tree semantics stay in `nestedset-core`; this crate stores rows in vanilla PostgreSQL and
//! serializes structural writers per scope with transaction-scoped advisory locks.

mod schema;
mod sql;
mod store;

pub use schema::{ensure_schema, load_config, reset_scope_for_tests, save_config};
pub use store::PgStore;
