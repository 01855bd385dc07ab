#![forbid(unsafe_code)]
//! SQLite persistence for `nestedset-core`.
//!
//! All tree semantics stay in the core crate; this crate only compiles its row filters and bound
//! patches into SQL against a single `nestedset_nodes` table.

mod sql;
mod store;

pub use store::SqliteStore;
