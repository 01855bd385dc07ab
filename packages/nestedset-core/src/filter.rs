use crate::ids::NodeKey;
use crate::node::NodeRow;

/// Storage-agnostic row predicate. Every populated field must hold (logical AND); the scope
/// and trashed visibility travel separately in [`crate::ScopeFilter`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct RowFilter {
    pub key: Option<NodeKey>,
    pub exclude: Option<NodeKey>,
    /// `Some(None)` selects roots.
    pub parent: Option<Option<NodeKey>>,
    /// Inclusive range on the left bound.
    pub left_between: Option<(i64, i64)>,
    /// Rows whose interval strictly encloses `(left, right)`: `row.left < left && row.right > right`.
    pub encloses: Option<(i64, i64)>,
    pub left_before: Option<i64>,
    pub left_after: Option<i64>,
    pub leaves_only: bool,
    pub trashed_only: bool,
}

impl RowFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn key(key: NodeKey) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    pub fn children_of(parent: Option<NodeKey>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub fn roots() -> Self {
        Self::children_of(None)
    }

    pub fn left_between(from: i64, to: i64) -> Self {
        Self {
            left_between: Some((from, to)),
            ..Self::default()
        }
    }

    /// Rows nested inside `[left, right]`, optionally including the row that owns it.
    pub fn subtree(left: i64, right: i64, and_self: bool) -> Self {
        let from = if and_self { left } else { left + 1 };
        Self::left_between(from, right)
    }

    pub fn enclosing(left: i64, right: i64) -> Self {
        Self {
            encloses: Some((left, right)),
            ..Self::default()
        }
    }

    /// Rows containing a bound slot: `row.left < position <= row.right`.
    pub fn enclosing_position(position: i64) -> Self {
        Self::enclosing(position, position - 1)
    }

    pub fn leaves() -> Self {
        Self {
            leaves_only: true,
            ..Self::default()
        }
    }

    pub fn excluding(mut self, key: NodeKey) -> Self {
        self.exclude = Some(key);
        self
    }

    pub fn before(mut self, left: i64) -> Self {
        self.left_before = Some(left);
        self
    }

    pub fn after(mut self, left: i64) -> Self {
        self.left_after = Some(left);
        self
    }

    pub fn trashed(mut self) -> Self {
        self.trashed_only = true;
        self
    }

    pub fn with_parent(mut self, parent: Option<NodeKey>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// In-memory evaluation. SQL stores compile the same fields into a `WHERE` clause.
    pub fn matches(&self, row: &NodeRow) -> bool {
        if self.key.is_some_and(|key| row.key != key) {
            return false;
        }
        if self.exclude.is_some_and(|key| row.key == key) {
            return false;
        }
        if let Some(parent) = self.parent {
            if row.parent != parent {
                return false;
            }
        }
        if let Some((from, to)) = self.left_between {
            if row.left < from || row.left > to {
                return false;
            }
        }
        if let Some((left, right)) = self.encloses {
            if !(row.left < left && row.right > right) {
                return false;
            }
        }
        if self.left_before.is_some_and(|left| row.left >= left) {
            return false;
        }
        if self.left_after.is_some_and(|left| row.left <= left) {
            return false;
        }
        if self.leaves_only && row.right != row.left + 1 {
            return false;
        }
        if self.trashed_only && !row.trashed {
            return false;
        }
        true
    }
}
