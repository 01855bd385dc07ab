//! Backend conformance scenarios shared by the memory, SQLite and Postgres test suites.
//!
//! Every scenario receives an `open` callback returning a fresh store plus a scope that no
//! other test uses, and panics on the first mismatch.

use nestedset_core::{
    DeletePolicy, Deletion, Error, NestedSet, NestedSetConfig, NewNode, NodeKey, NodeRow,
    NodeStore, Placement, RebuildItem, ScopeFilter, ScopeKey, Violation,
};

/// Keys of the fixture built by [`menu`].
#[derive(Clone, Copy, Debug)]
pub struct Menu {
    pub food: NodeKey,
    pub fruit: NodeKey,
    pub veg: NodeKey,
    pub apple: NodeKey,
    pub pear: NodeKey,
}

/// food(1,10) > fruit(2,7) > apple(3,4), pear(5,6); food > veg(8,9)
pub fn menu<S: NodeStore>(tree: &mut NestedSet<S>, scope: &ScopeKey) -> Menu {
    let mut add = |placement, name: &str| {
        tree.insert(scope, placement, NewNode::with_payload(name))
            .unwrap()
            .key
    };
    let food = add(Placement::Root, "food");
    let fruit = add(Placement::AppendTo(food), "fruit");
    let veg = add(Placement::AppendTo(food), "veg");
    let apple = add(Placement::AppendTo(fruit), "apple");
    let pear = add(Placement::AppendTo(fruit), "pear");
    Menu {
        food,
        fruit,
        veg,
        apple,
        pear,
    }
}

/// Keys mapped to their `(left, right, depth)`, including trashed rows.
pub fn bounds_of<S: NodeStore>(tree: &NestedSet<S>, scope: &ScopeKey, key: NodeKey) -> (i64, i64, i64) {
    let row = tree.query(scope).with_trashed().get(key).unwrap();
    (row.left, row.right, row.depth)
}

pub fn keys(rows: &[NodeRow]) -> Vec<NodeKey> {
    rows.iter().map(|row| row.key).collect()
}

fn children<S: NodeStore>(tree: &NestedSet<S>, scope: &ScopeKey, key: NodeKey) -> Vec<NodeKey> {
    keys(&tree.query(scope).children_of(key).unwrap())
}

fn open_tree<S, F>(open: &mut F, policy: DeletePolicy) -> (NestedSet<S>, ScopeKey)
where
    S: NodeStore,
    F: FnMut() -> (S, ScopeKey),
{
    let (store, scope) = open();
    let config = NestedSetConfig::default().with_delete_policy(policy);
    (NestedSet::with_config(store, config), scope)
}

pub fn inserts_and_queries<S, F>(mut open: F)
where
    S: NodeStore,
    F: FnMut() -> (S, ScopeKey),
{
    let (mut tree, scope) = open_tree(&mut open, DeletePolicy::Hard);
    let m = menu(&mut tree, &scope);

    assert_eq!(bounds_of(&tree, &scope, m.food), (1, 10, 0));
    assert_eq!(bounds_of(&tree, &scope, m.fruit), (2, 7, 1));
    assert_eq!(bounds_of(&tree, &scope, m.apple), (3, 4, 2));
    assert_eq!(bounds_of(&tree, &scope, m.pear), (5, 6, 2));
    assert_eq!(bounds_of(&tree, &scope, m.veg), (8, 9, 1));

    let query = tree.query(&scope);
    assert_eq!(
        keys(&query.descendants_of(m.food, false).unwrap()),
        vec![m.fruit, m.apple, m.pear, m.veg]
    );
    assert_eq!(keys(&query.ancestors_of(m.pear, false).unwrap()), vec![m.food, m.fruit]);
    assert_eq!(keys(&query.siblings_of(m.pear, false).unwrap()), vec![m.apple]);
    assert_eq!(keys(&query.leaves().unwrap()), vec![m.apple, m.pear, m.veg]);
    assert_eq!(query.lower_bound().unwrap(), Some(10));
    assert_eq!(
        query.get(m.apple).unwrap().payload.as_deref(),
        Some(b"apple".as_slice())
    );
    tree.ensure_valid(&scope).unwrap();
}

/// root(1,8) > A(2,3), B(4,7) > C(5,6); moving A to 8 is one bounded update of three rows.
pub fn moves_subtree_forward<S, F>(mut open: F)
where
    S: NodeStore,
    F: FnMut() -> (S, ScopeKey),
{
    let (mut tree, scope) = open_tree(&mut open, DeletePolicy::Hard);
    let root = tree.insert(&scope, Placement::Root, NewNode::default()).unwrap().key;
    let a = tree.insert(&scope, Placement::AppendTo(root), NewNode::default()).unwrap().key;
    let b = tree.insert(&scope, Placement::AppendTo(root), NewNode::default()).unwrap().key;
    let c = tree.insert(&scope, Placement::AppendTo(b), NewNode::default()).unwrap().key;
    assert_eq!(bounds_of(&tree, &scope, b), (4, 7, 1));

    assert_eq!(tree.move_node(&scope, a, 8).unwrap(), 3);
    assert_eq!(bounds_of(&tree, &scope, a), (6, 7, 1));
    assert_eq!(bounds_of(&tree, &scope, b), (2, 5, 1));
    assert_eq!(bounds_of(&tree, &scope, c), (3, 4, 2));
    assert_eq!(bounds_of(&tree, &scope, root), (1, 8, 0));
    tree.ensure_valid(&scope).unwrap();

    assert_eq!(tree.move_node(&scope, a, 6).unwrap(), 0);
    assert!(matches!(tree.move_node(&scope, b, 3), Err(Error::InvalidMove(_))));
    assert_eq!(bounds_of(&tree, &scope, b), (2, 5, 1));
}

pub fn reparents_and_reorders<S, F>(mut open: F)
where
    S: NodeStore,
    F: FnMut() -> (S, ScopeKey),
{
    let (mut tree, scope) = open_tree(&mut open, DeletePolicy::Hard);
    let m = menu(&mut tree, &scope);

    tree.move_to(&scope, m.veg, Placement::PrependTo(m.fruit)).unwrap();
    assert_eq!(children(&tree, &scope, m.fruit), vec![m.veg, m.apple, m.pear]);
    assert_eq!(bounds_of(&tree, &scope, m.veg), (3, 4, 2));
    tree.ensure_valid(&scope).unwrap();

    assert!(tree.down(&scope, m.veg).unwrap());
    assert_eq!(children(&tree, &scope, m.fruit), vec![m.apple, m.veg, m.pear]);
    assert!(tree.up(&scope, m.apple).is_ok_and(|moved| !moved));

    tree.move_to(&scope, m.fruit, Placement::Root).unwrap();
    let roots = keys(&tree.query(&scope).roots().unwrap());
    assert_eq!(roots, vec![m.food, m.fruit]);
    assert_eq!(bounds_of(&tree, &scope, m.fruit), (3, 10, 0));
    assert_eq!(bounds_of(&tree, &scope, m.pear), (8, 9, 1));
    tree.ensure_valid(&scope).unwrap();
}

pub fn failed_mutation_rolls_back<S, F>(mut open: F)
where
    S: NodeStore,
    F: FnMut() -> (S, ScopeKey),
{
    let (mut tree, scope) = open_tree(&mut open, DeletePolicy::Hard);
    let m = menu(&mut tree, &scope);
    let before = tree.query(&scope).tree().unwrap();

    let items = vec![
        RebuildItem::new_node("created before the failure"),
        RebuildItem::existing(NodeKey(u128::MAX)),
    ];
    assert!(matches!(
        tree.rebuild_tree(&scope, &items, true, None),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        tree.move_to(&scope, m.food, Placement::AppendTo(m.apple)),
        Err(Error::InvalidMove(_))
    ));
    assert_eq!(tree.query(&scope).tree().unwrap(), before);
}

pub fn deletes_per_policy<S, F>(mut open: F)
where
    S: NodeStore,
    F: FnMut() -> (S, ScopeKey),
{
    let (mut tree, scope) = open_tree(&mut open, DeletePolicy::Hard);
    let m = menu(&mut tree, &scope);
    let deletion = tree.delete_subtree(&scope, m.fruit).unwrap();
    assert_eq!(deletion, Deletion { removed: 3, shifted: 2 });
    assert!(tree.query(&scope).with_trashed().find(m.apple).unwrap().is_none());
    assert_eq!(bounds_of(&tree, &scope, m.food), (1, 4, 0));
    tree.ensure_valid(&scope).unwrap();

    let (mut tree, scope) = open_tree(&mut open, DeletePolicy::SoftRetainBounds);
    let m = menu(&mut tree, &scope);
    let deletion = tree.delete_subtree(&scope, m.fruit).unwrap();
    assert_eq!(deletion, Deletion { removed: 3, shifted: 0 });
    assert_eq!(bounds_of(&tree, &scope, m.food), (1, 10, 0));
    assert_eq!(bounds_of(&tree, &scope, m.apple), (3, 4, 2));
    assert_eq!(tree.query(&scope).count().unwrap(), 2);
    tree.ensure_valid(&scope).unwrap();
    assert_eq!(tree.restore(&scope, m.fruit).unwrap(), 3);
    assert_eq!(tree.query(&scope).count().unwrap(), 5);

    let (mut tree, scope) = open_tree(&mut open, DeletePolicy::SoftCloseGap);
    let m = menu(&mut tree, &scope);
    let deletion = tree.delete_subtree(&scope, m.fruit).unwrap();
    assert_eq!(deletion, Deletion { removed: 3, shifted: 2 });
    assert_eq!(bounds_of(&tree, &scope, m.veg), (2, 3, 1));
    tree.ensure_valid(&scope).unwrap();
    tree.restore(&scope, m.fruit).unwrap();
    assert_eq!(bounds_of(&tree, &scope, m.fruit), (2, 7, 1));
    assert_eq!(bounds_of(&tree, &scope, m.veg), (8, 9, 1));
    tree.ensure_valid(&scope).unwrap();
}

/// root(1,8) > A(2,3), B(4,7) > C(5,6); deleting the leaf C shrinks B and leaves A alone.
pub fn deletes_a_leaf<S, F>(mut open: F)
where
    S: NodeStore,
    F: FnMut() -> (S, ScopeKey),
{
    let (mut tree, scope) = open_tree(&mut open, DeletePolicy::Hard);
    let root = tree.insert(&scope, Placement::Root, NewNode::default()).unwrap().key;
    let a = tree.insert(&scope, Placement::AppendTo(root), NewNode::default()).unwrap().key;
    let b = tree.insert(&scope, Placement::AppendTo(root), NewNode::default()).unwrap().key;
    let c = tree.insert(&scope, Placement::AppendTo(b), NewNode::default()).unwrap().key;
    assert_eq!(bounds_of(&tree, &scope, c), (5, 6, 2));

    let deletion = tree.delete_subtree(&scope, c).unwrap();
    assert_eq!(deletion, Deletion { removed: 1, shifted: 2 });
    assert_eq!(bounds_of(&tree, &scope, a), (2, 3, 1));
    assert_eq!(bounds_of(&tree, &scope, b), (4, 5, 1));
    assert_eq!(bounds_of(&tree, &scope, root), (1, 6, 0));
    assert!(tree.query(&scope).get(b).unwrap().is_leaf());
    tree.ensure_valid(&scope).unwrap();
}

/// Corrupt bounds through the store and let the auditor and `fix_tree` find them.
pub fn audits_and_repairs<S, F>(mut open: F)
where
    S: NodeStore,
    F: FnMut() -> (S, ScopeKey),
{
    let (mut tree, scope) = open_tree(&mut open, DeletePolicy::Hard);
    let m = menu(&mut tree, &scope);

    let mut veg = tree.query(&scope).get(m.veg).unwrap();
    veg.left = 9;
    veg.right = 11;
    veg.depth = 4;
    tree.store_mut().write(&veg).unwrap();
    let mut pear = tree.query(&scope).get(m.pear).unwrap();
    pear.left = 1;
    tree.store_mut().write(&pear).unwrap();

    let counts = tree.count_errors(&scope).unwrap();
    assert_eq!(counts.oddness, 1);
    assert_eq!(counts.get(Violation::MissingParent), 0);
    assert!(counts.duplicates > 0);
    assert!(counts.wrong_parent > 0);
    assert!(matches!(
        tree.ensure_valid(&scope),
        Err(Error::StructuralCorruption(_))
    ));

    assert!(tree.fix_tree(&scope, None).unwrap() > 0);
    assert!(!tree.is_broken(&scope).unwrap());
    assert_eq!(tree.fix_tree(&scope, None).unwrap(), 0);
    assert_eq!(children(&tree, &scope, m.food), vec![m.fruit, m.veg]);
}

pub fn fixes_a_subtree_and_resizes_its_root<S, F>(mut open: F)
where
    S: NodeStore,
    F: FnMut() -> (S, ScopeKey),
{
    let (mut tree, scope) = open_tree(&mut open, DeletePolicy::Hard);
    let m = menu(&mut tree, &scope);

    // A row stranded inside fruit's interval is adopted by fruit, which grows by two.
    let mut veg = tree.query(&scope).get(m.veg).unwrap();
    veg.left = 4;
    veg.right = 5;
    tree.store_mut().write(&veg).unwrap();
    assert!(tree.is_broken(&scope).unwrap());

    assert_eq!(tree.fix_subtree(&scope, m.fruit).unwrap(), 3);
    assert_eq!(bounds_of(&tree, &scope, m.fruit), (2, 9, 1));
    assert_eq!(bounds_of(&tree, &scope, m.veg), (7, 8, 2));
    assert_eq!(bounds_of(&tree, &scope, m.food), (1, 12, 0));
    assert_eq!(tree.query(&scope).get(m.veg).unwrap().parent, Some(m.fruit));
    assert!(!tree.is_broken(&scope).unwrap());
}

pub fn rebuilds_from_items<S, F>(mut open: F)
where
    S: NodeStore,
    F: FnMut() -> (S, ScopeKey),
{
    let (mut tree, scope) = open_tree(&mut open, DeletePolicy::Hard);
    let m = menu(&mut tree, &scope);
    let items = vec![RebuildItem::existing(m.food).with_children(vec![
        RebuildItem::existing(m.veg),
        RebuildItem::existing(m.fruit).with_children(vec![RebuildItem::existing(m.pear)]),
        RebuildItem::new_node("nuts"),
    ])];

    assert_eq!(tree.rebuild_tree(&scope, &items, true, None).unwrap(), 3);
    assert!(tree.query(&scope).find(m.apple).unwrap().is_none());
    let flat = tree.query(&scope).tree().unwrap();
    assert_eq!(flat.len(), 4 + 1);
    assert_eq!(flat[4].payload.as_deref(), Some(b"nuts".as_slice()));
    assert_eq!(bounds_of(&tree, &scope, m.veg), (2, 3, 1));
    assert_eq!(bounds_of(&tree, &scope, m.fruit), (4, 7, 1));
    tree.ensure_valid(&scope).unwrap();

    // Rows left out without `delete_missing` stay under their parent, after the listed ones.
    let nuts = flat[4].key;
    let nested = vec![
        RebuildItem::existing(nuts),
        RebuildItem::existing(m.fruit).with_children(vec![RebuildItem::existing(m.pear)]),
    ];
    tree.rebuild_subtree(&scope, m.food, &nested, false).unwrap();
    assert_eq!(children(&tree, &scope, m.food), vec![nuts, m.fruit, m.veg]);
    assert_eq!(bounds_of(&tree, &scope, m.veg), (8, 9, 1));
    tree.ensure_valid(&scope).unwrap();
}

pub fn scopes_are_isolated<S, F>(mut open: F)
where
    S: NodeStore,
    F: FnMut() -> (S, ScopeKey),
{
    let (mut tree, scope) = open_tree(&mut open, DeletePolicy::Hard);
    let other = ScopeKey::new(format!("{scope}-other"));
    let m = menu(&mut tree, &scope);
    let o = menu(&mut tree, &other);

    tree.delete_subtree(&scope, m.fruit).unwrap();
    tree.move_node(&scope, m.veg, 1).unwrap();
    assert_eq!(bounds_of(&tree, &other, o.veg), (8, 9, 1));
    assert_eq!(bounds_of(&tree, &other, o.food), (1, 10, 0));
    tree.ensure_valid(&other).unwrap();

    assert!(matches!(
        tree.move_to(&scope, m.food, Placement::AppendTo(o.fruit)),
        Err(Error::CrossScopeViolation { .. })
    ));
    assert!(matches!(
        tree.query(&other).get(m.food),
        Err(Error::CrossScopeViolation { .. })
    ));
    let live = ScopeFilter::live(&other);
    assert_eq!(tree.store().max_right(&live).unwrap(), Some(10));
}

/// Run every scenario against one backend.
pub fn conformance<S, F>(mut open: F)
where
    S: NodeStore,
    F: FnMut() -> (S, ScopeKey),
{
    inserts_and_queries(&mut open);
    moves_subtree_forward(&mut open);
    reparents_and_reorders(&mut open);
    failed_mutation_rolls_back(&mut open);
    deletes_per_policy(&mut open);
    deletes_a_leaf(&mut open);
    audits_and_repairs(&mut open);
    fixes_a_subtree_and_resizes_its_root(&mut open);
    rebuilds_from_items(&mut open);
    scopes_are_isolated(&mut open);
}
