use std::collections::HashSet;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use nestedset_core::{
    to_tree, DeletePolicy, Error, MemoryStore, NestedSet, NestedSetConfig, NewNode, NodeKey,
    NodeRow, Placement, RebuildItem, ScopeKey, TreeNode, TreeRoot,
};

#[derive(Clone, Debug)]
enum Step {
    Insert { anchor: usize, how: u8 },
    Move { node: usize, anchor: usize, how: u8 },
    Delete { node: usize },
    Up { node: usize },
    Down { node: usize },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (any::<usize>(), 0u8..5).prop_map(|(anchor, how)| Step::Insert { anchor, how }),
        3 => (any::<usize>(), any::<usize>(), 0u8..5)
            .prop_map(|(node, anchor, how)| Step::Move { node, anchor, how }),
        1 => any::<usize>().prop_map(|node| Step::Delete { node }),
        1 => any::<usize>().prop_map(|node| Step::Up { node }),
        1 => any::<usize>().prop_map(|node| Step::Down { node }),
    ]
}

fn policy() -> impl Strategy<Value = DeletePolicy> {
    prop_oneof![
        Just(DeletePolicy::Hard),
        Just(DeletePolicy::SoftRetainBounds),
        Just(DeletePolicy::SoftCloseGap),
    ]
}

fn placement(how: u8, anchor: NodeKey) -> Placement {
    match how {
        0 => Placement::Root,
        1 => Placement::AppendTo(anchor),
        2 => Placement::PrependTo(anchor),
        3 => Placement::Before(anchor),
        _ => Placement::After(anchor),
    }
}

fn pick(live: &[NodeRow], idx: usize) -> NodeKey {
    live[idx % live.len()].key
}

fn run(tree: &mut NestedSet<MemoryStore>, scope: &ScopeKey, steps: &[Step]) -> Result<(), TestCaseError> {
    for step in steps {
        let live = tree.query(scope).tree().unwrap();
        if live.is_empty() {
            tree.insert(scope, Placement::Root, NewNode::default()).unwrap();
            continue;
        }
        match *step {
            Step::Insert { anchor, how } => {
                let anchor = pick(&live, anchor);
                tree.insert(scope, placement(how, anchor), NewNode::default()).unwrap();
            }
            Step::Move { node, anchor, how } => {
                let (node, anchor) = (pick(&live, node), pick(&live, anchor));
                match tree.move_to(scope, node, placement(how, anchor)) {
                    Ok(_) | Err(Error::InvalidMove(_)) => {}
                    Err(e) => return Err(TestCaseError::fail(format!("move failed: {e}"))),
                }
            }
            Step::Delete { node } => {
                tree.delete_subtree(scope, pick(&live, node)).unwrap();
            }
            Step::Up { node } => {
                tree.up(scope, pick(&live, node)).unwrap();
            }
            Step::Down { node } => {
                tree.down(scope, pick(&live, node)).unwrap();
            }
        }
        check_encoding(tree, scope)?;
    }
    Ok(())
}

/// Valid, gap-free, and with stored depths matching interval containment.
fn check_encoding(tree: &NestedSet<MemoryStore>, scope: &ScopeKey) -> Result<(), TestCaseError> {
    let counts = tree.count_errors(scope).unwrap();
    prop_assert!(!counts.is_broken(), "broken encoding: {}", counts);

    let mut query = tree.query(scope);
    if tree.config().delete_policy.trashed_in_encoding() {
        query = query.with_trashed();
    }
    let rows = query.tree().unwrap();
    let mut bounds: Vec<i64> = rows.iter().flat_map(|row| [row.left, row.right]).collect();
    bounds.sort_unstable();
    let expected: Vec<i64> = (1..=2 * rows.len() as i64).collect();
    prop_assert_eq!(bounds, expected);

    let recomputed = query.with_depth().unwrap();
    for (stored, computed) in rows.iter().zip(&recomputed) {
        prop_assert_eq!(stored.depth, computed.depth);
    }
    Ok(())
}

fn to_items(nodes: &[TreeNode]) -> Vec<RebuildItem> {
    nodes
        .iter()
        .map(|node| RebuildItem::existing(node.row.key).with_children(to_items(&node.children)))
        .collect()
}

fn build(policy: DeletePolicy, steps: &[Step]) -> Result<(NestedSet<MemoryStore>, ScopeKey), TestCaseError> {
    let scope = ScopeKey::from("prop");
    let config = NestedSetConfig::default().with_delete_policy(policy);
    let mut tree = NestedSet::with_config(MemoryStore::new(), config);
    run(&mut tree, &scope, steps)?;
    Ok((tree, scope))
}

proptest! {
    #[test]
    fn operations_preserve_the_encoding(
        policy in policy(),
        steps in prop::collection::vec(step(), 1..40),
    ) {
        build(policy, &steps)?;
    }

    #[test]
    fn descendants_and_ancestors_follow_interval_containment(
        policy in policy(),
        steps in prop::collection::vec(step(), 1..30),
    ) {
        let (tree, scope) = build(policy, &steps)?;
        let query = tree.query(&scope);
        let rows = query.tree().unwrap();
        for a in &rows {
            let descendants: HashSet<NodeKey> =
                query.descendants_of(a.key, false).unwrap().iter().map(|row| row.key).collect();
            let ancestors: HashSet<NodeKey> =
                query.ancestors_of(a.key, false).unwrap().iter().map(|row| row.key).collect();
            for b in &rows {
                let inside = a.left < b.left && b.right < a.right;
                let around = b.left < a.left && a.right < b.right;
                prop_assert_eq!(descendants.contains(&b.key), inside);
                prop_assert_eq!(ancestors.contains(&b.key), around);
                prop_assert_eq!(query.is_descendant_of(b.key, a.key).unwrap(), inside);
            }
        }
    }

    #[test]
    fn up_then_down_restores_the_encoding(
        steps in prop::collection::vec(step(), 1..30),
        node in any::<usize>(),
    ) {
        let (mut tree, scope) = build(DeletePolicy::Hard, &steps)?;
        let before = tree.query(&scope).tree().unwrap();
        if before.is_empty() {
            return Ok(());
        }
        let key = pick(&before, node);
        if tree.up(&scope, key).unwrap() {
            prop_assert!(tree.down(&scope, key).unwrap());
        }
        prop_assert_eq!(tree.query(&scope).tree().unwrap(), before);
    }

    #[test]
    fn gap_round_trip(
        steps in prop::collection::vec(step(), 1..30),
        cut in 1i64..80,
        height in 1i64..10,
    ) {
        let (mut tree, scope) = build(DeletePolicy::Hard, &steps)?;
        let before = tree.query(&scope).tree().unwrap();
        tree.make_gap(&scope, cut, height).unwrap();
        tree.make_gap(&scope, cut + height, -height).unwrap();
        prop_assert_eq!(tree.query(&scope).tree().unwrap(), before);
    }

    #[test]
    fn rebuild_of_a_valid_tree_changes_nothing(
        policy in policy(),
        steps in prop::collection::vec(step(), 1..30),
    ) {
        let (mut tree, scope) = build(policy, &steps)?;
        prop_assert_eq!(tree.fix_tree(&scope, None).unwrap(), 0);

        if policy == DeletePolicy::Hard {
            let rows = tree.query(&scope).tree().unwrap();
            let items = to_items(&to_tree(rows.clone(), TreeRoot::Parent(None)));
            prop_assert_eq!(tree.rebuild_tree(&scope, &items, true, None).unwrap(), 0);
            prop_assert_eq!(tree.query(&scope).tree().unwrap(), rows);
        }
    }

    #[test]
    fn fix_restores_depth_and_bounds_from_parents(
        steps in prop::collection::vec(step(), 1..30),
        victim in any::<usize>(),
    ) {
        let (mut tree, scope) = build(DeletePolicy::Hard, &steps)?;
        let before = tree.query(&scope).tree().unwrap();
        if before.is_empty() {
            return Ok(());
        }
        let key = pick(&before, victim);
        if let Some(row) = tree.store_mut().row_mut(key) {
            row.depth += 3;
            row.right = row.left;
        }
        tree.fix_tree(&scope, None).unwrap();
        check_encoding(&tree, &scope)?;
        prop_assert_eq!(tree.query(&scope).tree().unwrap(), before);
    }
}
