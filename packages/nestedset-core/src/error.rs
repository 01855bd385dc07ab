use thiserror::Error;

use crate::audit::ErrorCounts;
use crate::ids::{NodeKey, ScopeKey};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("node not found: {0}")]
    NotFound(NodeKey),
    #[error("invalid move: {0}")]
    InvalidMove(String),
    #[error("cross-scope violation: node {node} lives in scope {actual:?}, expected {expected:?}")]
    CrossScopeViolation {
        node: NodeKey,
        expected: ScopeKey,
        actual: ScopeKey,
    },
    #[error("structural corruption: {0}")]
    StructuralCorruption(ErrorCounts),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("storage error: {0}")]
    Storage(String),
}
