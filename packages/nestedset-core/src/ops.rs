//! Gap and move operators: each one plans a [`BoundPatch`] and hands it to the store as a
//! single bounded update.

use crate::error::{Error, Result};
use crate::ids::{NodeKey, ScopeFilter};
use crate::node::NodeRow;
use crate::patch::{gap_patch, plan_move, BoundPatch};
use crate::traits::NodeStore;

/// Open (`height > 0`) or close (`height < 0`) a gap at `cut`. Returns the rows updated.
pub fn make_gap<S: NodeStore>(store: &mut S, scope: &ScopeFilter, cut: i64, height: i64) -> Result<u64> {
    if height == 0 {
        return Ok(0);
    }
    let patch = gap_patch(cut, height);
    tracing::trace!(scope = %scope.scope, ?patch, "make gap");
    store.apply_patch(scope, &patch)
}

/// Move the subtree rooted at `key` so that its left bound becomes `position`.
///
/// Parent references are left untouched; callers that change the logical parent update it
/// separately within the same transaction.
pub fn move_node<S: NodeStore>(store: &mut S, scope: &ScopeFilter, key: NodeKey, position: i64) -> Result<u64> {
    let node = require(store, scope, key)?;
    let target_depth = store
        .depth_at(scope, position)?
        .map(|depth| depth + 1)
        .unwrap_or(0);

    let Some(plan) = plan_move(node.bounds(), position, target_depth)? else {
        return Ok(0);
    };
    let patch = BoundPatch::Move(plan);
    tracing::trace!(scope = %scope.scope, %key, ?patch, "move node");
    store.apply_patch(scope, &patch)
}

/// Load a row of the scope, telling a missing key apart from one that lives elsewhere.
pub(crate) fn require<S: NodeStore>(store: &S, scope: &ScopeFilter, key: NodeKey) -> Result<NodeRow> {
    if let Some(row) = store.get(scope, key)? {
        return Ok(row);
    }
    match store.locate(key)? {
        Some(actual) if actual != scope.scope => Err(Error::CrossScopeViolation {
            node: key,
            expected: scope.scope.clone(),
            actual,
        }),
        _ => Err(Error::NotFound(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ScopeKey;
    use crate::node::{Bounds, InsertRow};
    use crate::traits::MemoryStore;

    /// root(1,8) > A(2,3), B(4,7) > C(5,6)
    fn fixture() -> (MemoryStore, ScopeFilter) {
        let scope = ScopeKey::from("menu");
        let mut store = MemoryStore::new();
        for (key, parent, left, right, depth) in [
            (1, None, 1, 8, 0),
            (2, Some(1), 2, 3, 1),
            (3, Some(1), 4, 7, 1),
            (4, Some(3), 5, 6, 2),
        ] {
            store
                .insert(
                    &scope,
                    InsertRow {
                        key: Some(NodeKey(key)),
                        parent: parent.map(NodeKey),
                        bounds: Bounds::new(left, right, depth),
                        payload: None,
                    },
                )
                .unwrap();
        }
        (store, ScopeFilter::live(&scope))
    }

    fn bounds(store: &MemoryStore, scope: &ScopeFilter, key: u128) -> (i64, i64, i64) {
        let row = store.get(scope, NodeKey(key)).unwrap().unwrap();
        (row.left, row.right, row.depth)
    }

    #[test]
    fn moving_leaf_after_sibling_uses_one_update() {
        let (mut store, scope) = fixture();
        store.reset_stats();
        let updated = move_node(&mut store, &scope, NodeKey(2), 8).unwrap();
        assert_eq!(updated, 3);
        assert_eq!(store.stats().patches, 1);
        assert_eq!(bounds(&store, &scope, 2), (6, 7, 1));
        assert_eq!(bounds(&store, &scope, 3), (2, 5, 1));
        assert_eq!(bounds(&store, &scope, 4), (3, 4, 2));
        assert_eq!(bounds(&store, &scope, 1), (1, 8, 0));
    }

    #[test]
    fn moving_into_sibling_adjusts_depth() {
        let (mut store, scope) = fixture();
        move_node(&mut store, &scope, NodeKey(2), 7).unwrap();
        assert_eq!(bounds(&store, &scope, 2), (5, 6, 2));
        assert_eq!(bounds(&store, &scope, 3), (2, 7, 1));
        assert_eq!(bounds(&store, &scope, 4), (3, 4, 2));
    }

    #[test]
    fn moving_to_scope_end_makes_a_root_level_subtree() {
        let (mut store, scope) = fixture();
        move_node(&mut store, &scope, NodeKey(3), 9).unwrap();
        assert_eq!(bounds(&store, &scope, 1), (1, 4, 0));
        assert_eq!(bounds(&store, &scope, 3), (5, 8, 0));
        assert_eq!(bounds(&store, &scope, 4), (6, 7, 1));
    }

    #[test]
    fn no_op_move_touches_nothing() {
        let (mut store, scope) = fixture();
        store.reset_stats();
        assert_eq!(move_node(&mut store, &scope, NodeKey(3), 4).unwrap(), 0);
        assert_eq!(move_node(&mut store, &scope, NodeKey(3), 8).unwrap(), 0);
        assert_eq!(store.stats().patches, 0);
    }

    #[test]
    fn missing_and_self_nesting_moves_fail() {
        let (mut store, scope) = fixture();
        assert!(matches!(
            move_node(&mut store, &scope, NodeKey(9), 2),
            Err(Error::NotFound(NodeKey(9)))
        ));
        assert!(matches!(
            move_node(&mut store, &scope, NodeKey(3), 6),
            Err(Error::InvalidMove(_))
        ));
    }

    #[test]
    fn moving_a_key_of_another_scope_is_a_cross_scope_violation() {
        let (mut store, scope) = fixture();
        let other = ScopeFilter::live(&ScopeKey::from("other"));
        let err = move_node(&mut store, &other, NodeKey(2), 1).unwrap_err();
        assert!(matches!(
            err,
            Error::CrossScopeViolation { node: NodeKey(2), ref actual, .. } if *actual == scope.scope
        ));
    }

    #[test]
    fn gap_round_trip_restores_bounds() {
        let (mut store, scope) = fixture();
        assert_eq!(make_gap(&mut store, &scope, 4, 2).unwrap(), 3);
        assert_eq!(bounds(&store, &scope, 3), (6, 9, 1));
        assert_eq!(bounds(&store, &scope, 1), (1, 10, 0));
        make_gap(&mut store, &scope, 4, -2).unwrap();
        assert_eq!(bounds(&store, &scope, 3), (4, 7, 1));
        assert_eq!(bounds(&store, &scope, 1), (1, 8, 0));
        assert_eq!(make_gap(&mut store, &scope, 4, 0).unwrap(), 0);
    }
}
