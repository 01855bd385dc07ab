#![forbid(unsafe_code)]
//! Nested-set (modified preorder tree traversal) maintenance over pluggable storage.
//! The engine plans every structural change as a storage-agnostic bound patch, so the same
//! logic drives the in-memory store and the SQL backends built on the [`NodeStore`] trait.

pub mod audit;
pub mod config;
pub mod error;
pub mod filter;
pub mod hierarchy;
pub mod ids;
pub mod node;
pub mod ops;
pub mod patch;
pub mod query;
pub mod rebuild;
pub mod traits;
pub mod tree;

pub use audit::{count_all, count_violations, ErrorCounts, Violation};
pub use config::{DeletePolicy, NestedSetConfig};
pub use error::{Error, Result};
pub use filter::RowFilter;
pub use hierarchy::{link_nodes, to_flat_tree, to_tree, Forest, TreeNode, TreeRoot};
pub use ids::{NodeKey, ScopeFilter, ScopeKey};
pub use node::{Bounds, InsertRow, NewNode, NodeRow};
pub use patch::{gap_patch, move_patch, plan_move, BoundPatch, GapPatch, MovePatch};
pub use query::Query;
pub use rebuild::{fix_nodes, Dictionary, Renumbering};
pub use traits::{MemoryStore, NodeStore, StoreStats};
pub use tree::{Deletion, NestedSet, Placement, RebuildItem};
