//! Read side of the engine. Every query is a single filtered select ordered by left bound.

use crate::error::Result;
use crate::filter::RowFilter;
use crate::ids::{NodeKey, ScopeFilter, ScopeKey};
use crate::node::NodeRow;
use crate::traits::NodeStore;
use crate::ops::require;
use crate::tree::NestedSet;

impl<S: NodeStore> NestedSet<S> {
    /// Read handle over the live rows of `scope`.
    pub fn query(&self, scope: &ScopeKey) -> Query<'_, S> {
        Query {
            store: self.store(),
            scope: ScopeFilter::live(scope),
        }
    }
}

pub struct Query<'a, S: NodeStore> {
    store: &'a S,
    scope: ScopeFilter,
}

impl<'a, S: NodeStore> Query<'a, S> {
    /// Include soft-deleted rows in every result.
    pub fn with_trashed(mut self) -> Self {
        self.scope.with_trashed = true;
        self
    }

    pub fn scope(&self) -> &ScopeFilter {
        &self.scope
    }

    pub fn get(&self, key: NodeKey) -> Result<NodeRow> {
        require(self.store, &self.scope, key)
    }

    pub fn find(&self, key: NodeKey) -> Result<Option<NodeRow>> {
        self.store.get(&self.scope, key)
    }

    /// Every row of the scope in document order.
    pub fn tree(&self) -> Result<Vec<NodeRow>> {
        self.select(&RowFilter::all())
    }

    pub fn roots(&self) -> Result<Vec<NodeRow>> {
        self.select(&RowFilter::roots())
    }

    pub fn root(&self) -> Result<Option<NodeRow>> {
        Ok(self.roots()?.into_iter().next())
    }

    /// Ancestors from the outermost down to the direct parent (then the node itself).
    pub fn ancestors_of(&self, key: NodeKey, and_self: bool) -> Result<Vec<NodeRow>> {
        let node = self.get(key)?;
        let mut rows = self.select(&RowFilter::enclosing(node.left, node.right))?;
        if and_self {
            rows.push(node);
        }
        Ok(rows)
    }

    pub fn descendants_of(&self, key: NodeKey, and_self: bool) -> Result<Vec<NodeRow>> {
        let node = self.get(key)?;
        self.select(&RowFilter::subtree(node.left, node.right, and_self))
    }

    pub fn children_of(&self, key: NodeKey) -> Result<Vec<NodeRow>> {
        let node = self.get(key)?;
        self.select(&RowFilter::children_of(Some(node.key)))
    }

    pub fn siblings_of(&self, key: NodeKey, and_self: bool) -> Result<Vec<NodeRow>> {
        let node = self.get(key)?;
        let mut filter = RowFilter::children_of(node.parent);
        if !and_self {
            filter = filter.excluding(node.key);
        }
        self.select(&filter)
    }

    pub fn next_siblings(&self, key: NodeKey) -> Result<Vec<NodeRow>> {
        let node = self.get(key)?;
        self.select(&RowFilter::children_of(node.parent).after(node.left))
    }

    pub fn prev_siblings(&self, key: NodeKey) -> Result<Vec<NodeRow>> {
        let node = self.get(key)?;
        self.select(&RowFilter::children_of(node.parent).before(node.left))
    }

    pub fn leaves(&self) -> Result<Vec<NodeRow>> {
        self.select(&RowFilter::leaves())
    }

    /// Rows whose left bound lies in `[left, right]`.
    pub fn between(&self, left: i64, right: i64) -> Result<Vec<NodeRow>> {
        self.select(&RowFilter::left_between(left, right))
    }

    /// Rows that come before the node in document order.
    pub fn before(&self, key: NodeKey) -> Result<Vec<NodeRow>> {
        let node = self.get(key)?;
        self.select(&RowFilter::all().before(node.left))
    }

    pub fn after(&self, key: NodeKey) -> Result<Vec<NodeRow>> {
        let node = self.get(key)?;
        self.select(&RowFilter::all().after(node.left))
    }

    /// All rows with `depth` recomputed from interval containment instead of the stored column.
    pub fn with_depth(&self) -> Result<Vec<NodeRow>> {
        let mut rows = self.tree()?;
        let mut open: Vec<i64> = Vec::new();
        for row in &mut rows {
            while open.last().is_some_and(|&right| right < row.left) {
                open.pop();
            }
            row.depth = open.len() as i64;
            open.push(row.right);
        }
        Ok(rows)
    }

    /// Largest right bound of the scope, if it has any rows.
    pub fn lower_bound(&self) -> Result<Option<i64>> {
        self.store.max_right(&self.scope)
    }

    /// Whether `key` lies strictly inside `other`.
    pub fn is_descendant_of(&self, key: NodeKey, other: NodeKey) -> Result<bool> {
        Ok(self.get(key)?.is_descendant_of(&self.get(other)?))
    }

    pub fn is_ancestor_of(&self, key: NodeKey, other: NodeKey) -> Result<bool> {
        Ok(self.get(key)?.is_ancestor_of(&self.get(other)?))
    }

    pub fn count(&self) -> Result<u64> {
        self.store.count(&self.scope, &RowFilter::all())
    }

    fn select(&self, filter: &RowFilter) -> Result<Vec<NodeRow>> {
        self.store.select(&self.scope, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NewNode;
    use crate::traits::MemoryStore;
    use crate::tree::Placement;
    use crate::Error;

    /// food > (fruit > (apple, pear), veg)
    fn menu() -> (NestedSet<MemoryStore>, ScopeKey, [NodeKey; 5]) {
        let scope = ScopeKey::from("menu");
        let mut tree = NestedSet::new(MemoryStore::new());
        let food = tree
            .insert(&scope, Placement::Root, NewNode::with_payload("food"))
            .unwrap()
            .key;
        let fruit = tree
            .insert(&scope, Placement::AppendTo(food), NewNode::with_payload("fruit"))
            .unwrap()
            .key;
        let veg = tree
            .insert(&scope, Placement::AppendTo(food), NewNode::with_payload("veg"))
            .unwrap()
            .key;
        let apple = tree
            .insert(&scope, Placement::AppendTo(fruit), NewNode::with_payload("apple"))
            .unwrap()
            .key;
        let pear = tree
            .insert(&scope, Placement::AppendTo(fruit), NewNode::with_payload("pear"))
            .unwrap()
            .key;
        (tree, scope, [food, fruit, veg, apple, pear])
    }

    fn keys(rows: &[NodeRow]) -> Vec<NodeKey> {
        rows.iter().map(|row| row.key).collect()
    }

    #[test]
    fn ancestors_and_descendants() {
        let (tree, scope, [food, fruit, veg, apple, pear]) = menu();
        let query = tree.query(&scope);

        assert_eq!(keys(&query.ancestors_of(apple, false).unwrap()), vec![food, fruit]);
        assert_eq!(
            keys(&query.ancestors_of(apple, true).unwrap()),
            vec![food, fruit, apple]
        );
        assert_eq!(
            keys(&query.descendants_of(food, false).unwrap()),
            vec![fruit, apple, pear, veg]
        );
        assert_eq!(keys(&query.children_of(food).unwrap()), vec![fruit, veg]);
        assert!(query.is_descendant_of(pear, food).unwrap());
        assert!(!query.is_ancestor_of(veg, pear).unwrap());
    }

    #[test]
    fn siblings_and_document_order() {
        let (tree, scope, [food, fruit, veg, apple, pear]) = menu();
        let query = tree.query(&scope);

        assert_eq!(keys(&query.siblings_of(apple, false).unwrap()), vec![pear]);
        assert_eq!(keys(&query.siblings_of(apple, true).unwrap()), vec![apple, pear]);
        assert_eq!(keys(&query.next_siblings(fruit).unwrap()), vec![veg]);
        assert_eq!(keys(&query.prev_siblings(veg).unwrap()), vec![fruit]);
        assert_eq!(keys(&query.before(apple).unwrap()), vec![food, fruit]);
        assert_eq!(keys(&query.after(pear).unwrap()), vec![veg]);
        assert_eq!(keys(&query.leaves().unwrap()), vec![apple, pear, veg]);
        assert_eq!(query.root().unwrap().map(|row| row.key), Some(food));
        assert_eq!(query.lower_bound().unwrap(), Some(10));
        assert_eq!(query.count().unwrap(), 5);
    }

    #[test]
    fn depth_from_containment_ignores_stored_column() {
        let (mut tree, scope, [_, _, _, apple, _]) = menu();
        tree.store_mut().row_mut(apple).unwrap().depth = 7;

        let rows = tree.query(&scope).with_depth().unwrap();
        let depths: Vec<i64> = rows.iter().map(|row| row.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 2, 1]);
    }

    #[test]
    fn trashed_rows_need_with_trashed() {
        let (mut tree, scope, [_, fruit, ..]) = menu();
        tree.store_mut().row_mut(fruit).unwrap().trashed = true;

        assert!(matches!(tree.query(&scope).get(fruit), Err(Error::NotFound(_))));
        assert_eq!(tree.query(&scope).with_trashed().get(fruit).unwrap().key, fruit);
    }

    #[test]
    fn foreign_scope_key_is_reported() {
        let (tree, _, [food, ..]) = menu();
        let other = ScopeKey::from("other");
        assert!(matches!(
            tree.query(&other).get(food),
            Err(Error::CrossScopeViolation { .. })
        ));
    }
}
