//! Assemble flat row lists into parent-linked views.
//!
//! These helpers follow parent references only and never look at stored bounds, so they also
//! work on the output of a broken encoding.

use std::collections::{HashMap, HashSet};

use crate::ids::NodeKey;
use crate::node::NodeRow;

/// Arena over a row list with parent and child links resolved to indices.
#[derive(Clone, Debug, Default)]
pub struct Forest {
    pub rows: Vec<NodeRow>,
    pub parents: Vec<Option<usize>>,
    pub children: Vec<Vec<usize>>,
    /// Rows whose parent is absent from the list.
    pub roots: Vec<usize>,
    index: HashMap<NodeKey, usize>,
}

impl Forest {
    pub fn index_of(&self, key: NodeKey) -> Option<usize> {
        self.index.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Indices reachable from `top` in depth-first pre-order. A row is visited at most once.
    fn preorder(&self, top: &[usize]) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.rows.len());
        let mut seen = HashSet::new();
        let mut stack: Vec<usize> = top.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            if !seen.insert(idx) {
                continue;
            }
            out.push(idx);
            stack.extend(self.children[idx].iter().rev().copied());
        }
        out
    }

    fn top_level(&self, root: TreeRoot) -> Vec<usize> {
        let parent = match root {
            TreeRoot::Parent(parent) => parent,
            TreeRoot::Auto => match self.rows.iter().min_by_key(|row| row.left) {
                Some(row) => row.parent,
                None => return Vec::new(),
            },
        };
        match parent.and_then(|key| self.index_of(key)) {
            Some(idx) => self.children[idx].clone(),
            None => (0..self.rows.len())
                .filter(|&idx| self.rows[idx].parent == parent)
                .collect(),
        }
    }
}

/// Link every row to its parent and children, keeping the input order among siblings.
pub fn link_nodes(rows: Vec<NodeRow>) -> Forest {
    let index: HashMap<NodeKey, usize> = rows
        .iter()
        .enumerate()
        .map(|(idx, row)| (row.key, idx))
        .collect();
    let mut parents = vec![None; rows.len()];
    let mut children = vec![Vec::new(); rows.len()];
    let mut roots = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        match row.parent.and_then(|key| index.get(&key).copied()) {
            Some(parent) => {
                parents[idx] = Some(parent);
                children[parent].push(idx);
            }
            None => roots.push(idx),
        }
    }
    Forest {
        rows,
        parents,
        children,
        roots,
        index,
    }
}

/// Which rows become the top level of an assembled tree.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TreeRoot {
    /// The parent of the row with the smallest left bound.
    #[default]
    Auto,
    /// Children of the given parent; `None` means scope roots.
    Parent(Option<NodeKey>),
}

/// Owned nested view of a row and its descendants.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TreeNode {
    pub row: NodeRow,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of nodes in this subtree, itself included.
    pub fn size(&self) -> usize {
        let mut size = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            size += 1;
            stack.extend(node.children.iter());
        }
        size
    }
}

/// Nest `rows` under the rows selected by `root`. Rows not reachable from there are dropped.
pub fn to_tree(rows: Vec<NodeRow>, root: TreeRoot) -> Vec<TreeNode> {
    let forest = link_nodes(rows);
    let top = forest.top_level(root);
    let order = forest.preorder(&top);

    let mut built: Vec<Option<TreeNode>> = vec![None; forest.len()];
    let mut rows: Vec<Option<NodeRow>> = forest.rows.iter().cloned().map(Some).collect();
    // Reverse pre-order finishes every child before its parent.
    for &idx in order.iter().rev() {
        let children = forest.children[idx]
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        if let Some(row) = rows[idx].take() {
            built[idx] = Some(TreeNode { row, children });
        }
    }
    top.iter().filter_map(|&idx| built[idx].take()).collect()
}

/// Rows in depth-first order following parent links, starting at the rows selected by `root`.
pub fn to_flat_tree(rows: Vec<NodeRow>, root: TreeRoot) -> Vec<NodeRow> {
    let forest = link_nodes(rows);
    let top = forest.top_level(root);
    let order = forest.preorder(&top);
    let mut rows: Vec<Option<NodeRow>> = forest.rows.into_iter().map(Some).collect();
    order.into_iter().filter_map(|idx| rows[idx].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ScopeKey;

    fn row(key: u128, parent: Option<u128>, left: i64) -> NodeRow {
        NodeRow {
            key: NodeKey(key),
            scope: ScopeKey::from("s"),
            parent: parent.map(NodeKey),
            left,
            right: left + 1,
            depth: 0,
            trashed: false,
            payload: None,
        }
    }

    fn flat_keys(rows: Vec<NodeRow>, root: TreeRoot) -> Vec<u128> {
        to_flat_tree(rows, root).iter().map(|row| row.key.0).collect()
    }

    #[test]
    fn links_parents_and_children() {
        let forest = link_nodes(vec![row(1, None, 1), row(2, Some(1), 2), row(3, Some(9), 3)]);
        assert_eq!(forest.roots, vec![0, 2]);
        assert_eq!(forest.children[0], vec![1]);
        assert_eq!(forest.parents[1], Some(0));
        assert_eq!(forest.index_of(NodeKey(3)), Some(2));
    }

    #[test]
    fn nests_rows_by_parent_links() {
        let rows = vec![
            row(1, None, 1),
            row(2, Some(1), 2),
            row(3, Some(2), 3),
            row(4, Some(1), 5),
            row(5, None, 9),
        ];
        let tree = to_tree(rows, TreeRoot::Auto);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].size(), 4);
        assert_eq!(tree[0].children[0].children[0].row.key, NodeKey(3));
        assert_eq!(tree[1].row.key, NodeKey(5));
    }

    #[test]
    fn auto_root_uses_parent_of_leftmost_row() {
        let rows = vec![row(3, Some(2), 4), row(2, Some(1), 3), row(4, Some(1), 6)];
        assert_eq!(flat_keys(rows, TreeRoot::Auto), vec![2, 3, 4]);
    }

    #[test]
    fn flat_order_ignores_bounds() {
        let rows = vec![row(1, None, 9), row(2, Some(1), 1), row(3, Some(1), 5), row(4, Some(2), 3)];
        assert_eq!(flat_keys(rows, TreeRoot::Parent(None)), vec![1, 2, 4, 3]);
    }

    #[test]
    fn cycles_do_not_loop() {
        let rows = vec![row(1, None, 1), row(2, Some(3), 2), row(3, Some(2), 3)];
        assert_eq!(flat_keys(rows, TreeRoot::Parent(None)), vec![1]);
        let cycle = vec![row(2, Some(3), 2), row(3, Some(2), 3)];
        assert_eq!(flat_keys(cycle, TreeRoot::Parent(Some(NodeKey(2)))), vec![3, 2]);
    }

    #[test]
    fn deep_chain_assembles_without_recursion() {
        let rows: Vec<NodeRow> = (1..=2_000u128)
            .map(|key| row(key, (key > 1).then(|| key - 1), key as i64))
            .collect();
        let tree = to_tree(rows, TreeRoot::Parent(None));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].size(), 2_000);
    }
}
