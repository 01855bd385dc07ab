//! Depth-first renumbering of a parent-linked forest.
//!
//! The walk runs over an arena with an explicit stack, so deep trees cannot exhaust the call
//! stack. Rows whose parent is not part of the dictionary are reattached under the anchor (the
//! scope itself for a full fix): a dangling parent reference never drops a row.

use std::collections::HashMap;

use crate::error::Result;
use crate::ids::{NodeKey, ScopeFilter};
use crate::node::NodeRow;
use crate::ops::make_gap;
use crate::patch::{gap_patch, BoundPatch};
use crate::traits::NodeStore;

struct Entry {
    stored: NodeRow,
    row: NodeRow,
}

/// Parent key → children, in the order rows were pushed.
#[derive(Default)]
pub struct Dictionary {
    entries: Vec<Entry>,
    groups: HashMap<Option<NodeKey>, Vec<usize>>,
    order: Vec<Option<NodeKey>>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group stored rows by their parent reference, keeping the given order among siblings.
    pub fn from_rows(rows: impl IntoIterator<Item = NodeRow>) -> Self {
        let mut dictionary = Self::new();
        for row in rows {
            dictionary.push(row.clone(), row);
        }
        dictionary
    }

    /// Add `row` under `row.parent`. `stored` is what the store currently holds for it, used to
    /// decide whether the row needs writing once renumbered.
    pub fn push(&mut self, stored: NodeRow, row: NodeRow) {
        let parent = row.parent;
        let idx = self.entries.len();
        self.entries.push(Entry { stored, row });
        self.groups
            .entry(parent)
            .or_insert_with(|| {
                self.order.push(parent);
                Vec::new()
            })
            .push(idx);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Assign fresh bounds depth-first, starting inside `anchor` or at 1 for a whole scope.
    pub fn renumber(mut self, anchor: Option<&NodeRow>) -> Renumbering {
        let base_parent = anchor.map(|row| row.key);
        let base_depth = anchor.map(|row| row.depth + 1).unwrap_or(0);
        let mut cut = anchor.map(|row| row.left + 1).unwrap_or(1);
        let mut reattached = Vec::new();

        let top = self.groups.remove(&base_parent).unwrap_or_default();
        cut = self.walk(top, base_parent, base_depth, cut);

        let mut cursor = 0;
        while cursor < self.order.len() {
            let key = self.order[cursor];
            cursor += 1;
            let Some(orphans) = self.groups.remove(&key) else {
                continue;
            };
            reattached.extend(orphans.iter().map(|&idx| self.entries[idx].row.key));
            cut = self.walk(orphans, base_parent, base_depth, cut);
        }

        Renumbering {
            rows: self
                .entries
                .into_iter()
                .map(|entry| (entry.stored, entry.row))
                .collect(),
            cut,
            reattached,
        }
    }

    fn walk(&mut self, top: Vec<usize>, parent: Option<NodeKey>, depth: i64, mut cut: i64) -> i64 {
        struct Frame {
            children: Vec<usize>,
            next: usize,
            parent: Option<NodeKey>,
            depth: i64,
            owner: Option<usize>,
        }

        let mut stack = vec![Frame {
            children: top,
            next: 0,
            parent,
            depth,
            owner: None,
        }];

        while let Some(frame) = stack.last_mut() {
            if let Some(&idx) = frame.children.get(frame.next) {
                frame.next += 1;
                let (parent, depth) = (frame.parent, frame.depth);

                let row = &mut self.entries[idx].row;
                row.left = cut;
                row.parent = parent;
                row.depth = depth;
                cut += 1;

                let key = row.key;
                let children = self.groups.remove(&Some(key)).unwrap_or_default();
                stack.push(Frame {
                    children,
                    next: 0,
                    parent: Some(key),
                    depth: depth + 1,
                    owner: Some(idx),
                });
            } else {
                let owner = frame.owner;
                stack.pop();
                if let Some(idx) = owner {
                    self.entries[idx].row.right = cut;
                    cut += 1;
                }
            }
        }
        cut
    }
}

/// Outcome of [`Dictionary::renumber`].
pub struct Renumbering {
    /// `(stored, computed)` pairs.
    pub rows: Vec<(NodeRow, NodeRow)>,
    /// First free bound after the numbered rows.
    pub cut: i64,
    /// Rows moved under the anchor because their parent was unreachable.
    pub reattached: Vec<NodeKey>,
}

impl Renumbering {
    /// Rows whose computed state differs from what the store holds once `gap` (if any) has
    /// been applied to it.
    pub fn changed(&self, gap: Option<&BoundPatch>) -> Vec<NodeRow> {
        self.rows
            .iter()
            .filter(|(stored, computed)| {
                let mut current = stored.clone();
                if let Some(gap) = gap {
                    if gap.selects(stored.left, stored.right) {
                        current.set_bounds(gap.apply(stored.bounds()));
                    }
                }
                current != *computed
            })
            .map(|(_, computed)| computed.clone())
            .collect()
    }
}

/// Renumber `dictionary` and persist the difference. When `anchor` is a subtree root whose
/// width changes, the rest of the scope is widened or narrowed first.
///
/// Returns rows written plus rows shifted by the gap.
pub fn fix_nodes<S: NodeStore>(
    store: &mut S,
    scope: &ScopeFilter,
    dictionary: Dictionary,
    anchor: Option<&NodeRow>,
) -> Result<u64> {
    let plan = dictionary.renumber(anchor);
    if !plan.reattached.is_empty() {
        tracing::warn!(
            scope = %scope.scope,
            count = plan.reattached.len(),
            "reattaching rows with unreachable parents"
        );
    }

    let mut moved = 0;
    let mut gap = None;
    let mut resized_anchor = None;
    if let Some(root) = anchor {
        let grown = plan.cut - root.right;
        if grown != 0 {
            moved = make_gap(store, scope, root.right + 1, grown)?;
            gap = Some(gap_patch(root.right + 1, grown));
            let mut root = root.clone();
            root.right = plan.cut;
            resized_anchor = Some(root);
        }
    }

    let mut changed = plan.changed(gap.as_ref());
    changed.extend(resized_anchor);
    for row in &changed {
        store.write(row)?;
    }

    tracing::debug!(
        scope = %scope.scope,
        written = changed.len(),
        moved,
        "fixed nested set bounds"
    );
    Ok(changed.len() as u64 + moved)
}
