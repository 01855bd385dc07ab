#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ids::{NodeKey, ScopeKey};

/// Left/right/depth triple of a node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bounds {
    pub left: i64,
    pub right: i64,
    pub depth: i64,
}

impl Bounds {
    pub fn new(left: i64, right: i64, depth: i64) -> Self {
        Self { left, right, depth }
    }

    /// Number of bound units the interval occupies.
    pub fn width(&self) -> i64 {
        self.right - self.left + 1
    }

    /// Strict interval containment.
    pub fn contains(&self, other: &Bounds) -> bool {
        self.left < other.left && other.right < self.right
    }
}

/// One persisted row of a nested-set table.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeRow {
    pub key: NodeKey,
    pub scope: ScopeKey,
    pub parent: Option<NodeKey>,
    pub left: i64,
    pub right: i64,
    pub depth: i64,
    pub trashed: bool,
    pub payload: Option<Vec<u8>>,
}

impl NodeRow {
    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.left, self.right, self.depth)
    }

    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.left = bounds.left;
        self.right = bounds.right;
        self.depth = bounds.depth;
    }

    pub fn width(&self) -> i64 {
        self.bounds().width()
    }

    pub fn is_leaf(&self) -> bool {
        self.right == self.left + 1
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn contains(&self, other: &NodeRow) -> bool {
        self.scope == other.scope && self.bounds().contains(&other.bounds())
    }

    pub fn is_ancestor_of(&self, other: &NodeRow) -> bool {
        self.contains(other)
    }

    pub fn is_descendant_of(&self, other: &NodeRow) -> bool {
        other.contains(self)
    }
}

/// Row to create. Bounds are assigned by the engine, the key by the caller or the store.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NewNode {
    pub key: Option<NodeKey>,
    pub payload: Option<Vec<u8>>,
}

impl NewNode {
    pub fn with_key(key: NodeKey) -> Self {
        Self {
            key: Some(key),
            payload: None,
        }
    }

    pub fn with_payload(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: None,
            payload: Some(payload.into()),
        }
    }
}

/// Fully resolved row handed to `NodeStore::insert`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InsertRow {
    pub key: Option<NodeKey>,
    pub parent: Option<NodeKey>,
    pub bounds: Bounds,
    pub payload: Option<Vec<u8>>,
}
