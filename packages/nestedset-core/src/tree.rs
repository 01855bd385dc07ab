use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::audit::{ErrorCounts, Violation};
use crate::config::{DeletePolicy, NestedSetConfig};
use crate::error::{Error, Result};
use crate::filter::RowFilter;
use crate::hierarchy::{to_flat_tree, TreeRoot};
use crate::ids::{NodeKey, ScopeFilter, ScopeKey};
use crate::node::{Bounds, InsertRow, NewNode, NodeRow};
use crate::ops::{self, require};
use crate::rebuild::{fix_nodes, Dictionary};
use crate::traits::NodeStore;

/// Where a node is inserted or moved to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Placement {
    /// After the last root of the scope.
    Root,
    /// Last child of the given node.
    AppendTo(NodeKey),
    /// First child of the given node.
    PrependTo(NodeKey),
    /// Previous sibling of the given node.
    Before(NodeKey),
    /// Next sibling of the given node.
    After(NodeKey),
}

/// Resolved destination of a placement.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Target {
    position: i64,
    parent: Option<NodeKey>,
    depth: i64,
}

/// Rows affected by [`NestedSet::delete_subtree`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Deletion {
    /// Rows removed, or marked trashed under a soft policy.
    pub removed: u64,
    /// Rows whose bounds moved to close the gap.
    pub shifted: u64,
}

/// Caller-supplied shape for [`NestedSet::rebuild_tree`]. Items without a key are created.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RebuildItem {
    pub key: Option<NodeKey>,
    /// Replaces the stored payload when present.
    pub payload: Option<Vec<u8>>,
    pub children: Vec<RebuildItem>,
}

impl RebuildItem {
    pub fn existing(key: NodeKey) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    pub fn new_node(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Some(payload.into()),
            ..Self::default()
        }
    }

    pub fn with_children(mut self, children: Vec<RebuildItem>) -> Self {
        self.children = children;
        self
    }
}

/// Nested-set engine over a storage collaborator.
///
/// Every mutation runs inside one store transaction; reads need no exclusive access.
pub struct NestedSet<S: NodeStore> {
    store: S,
    config: NestedSetConfig,
}

impl<S: NodeStore> NestedSet<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, NestedSetConfig::default())
    }

    pub fn with_config(store: S, config: NestedSetConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &NestedSetConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Insert a new node at `placement`, opening a gap of two units for it.
    pub fn insert(&mut self, scope: &ScopeKey, placement: Placement, node: NewNode) -> Result<NodeRow> {
        let encoding = self.config.encoding_filter(scope);
        let row = self.store.transaction(|store| {
            let target = resolve(store, &encoding, placement)?;
            ops::make_gap(store, &encoding, target.position, 2)?;
            store.insert(
                scope,
                InsertRow {
                    key: node.key,
                    parent: target.parent,
                    bounds: Bounds::new(target.position, target.position + 1, target.depth),
                    payload: node.payload,
                },
            )
        })?;
        tracing::debug!(%scope, key = %row.key, left = row.left, "inserted node");
        Ok(row)
    }

    /// Move an existing subtree to `placement` and point it at its new parent.
    ///
    /// Returns the number of rows updated.
    pub fn move_to(&mut self, scope: &ScopeKey, key: NodeKey, placement: Placement) -> Result<u64> {
        let encoding = self.config.encoding_filter(scope);
        let updated = self.store.transaction(|store| {
            let node = require(store, &live(&encoding), key)?;
            let target = resolve(store, &encoding, placement)?;
            if target.parent == Some(key) {
                return Err(Error::InvalidMove(format!("node {key} cannot be moved into itself")));
            }
            let mut updated = ops::move_node(store, &encoding, key, target.position)?;
            if node.parent != target.parent {
                let mut moved = require(store, &encoding, key)?;
                moved.parent = target.parent;
                store.write(&moved)?;
                updated = updated.max(1);
            }
            Ok(updated)
        })?;
        tracing::debug!(%scope, %key, ?placement, updated, "moved node");
        Ok(updated)
    }

    /// Low level move: relocate the subtree so its left bound becomes `position`.
    pub fn move_node(&mut self, scope: &ScopeKey, key: NodeKey, position: i64) -> Result<u64> {
        let encoding = self.config.encoding_filter(scope);
        let updated = self
            .store
            .transaction(|store| ops::move_node(store, &encoding, key, position))?;
        tracing::debug!(%scope, %key, position, updated, "moved subtree");
        Ok(updated)
    }

    /// Swap the node with its previous sibling. Returns whether anything moved.
    pub fn up(&mut self, scope: &ScopeKey, key: NodeKey) -> Result<bool> {
        let encoding = self.config.encoding_filter(scope);
        self.store.transaction(|store| {
            let node = require(store, &live(&encoding), key)?;
            let siblings = store.select(
                &live(&encoding),
                &RowFilter::children_of(node.parent).before(node.left),
            )?;
            let Some(previous) = siblings.last() else {
                return Ok(false);
            };
            ops::move_node(store, &encoding, key, previous.left)?;
            Ok(true)
        })
    }

    /// Swap the node with its next sibling. Returns whether anything moved.
    pub fn down(&mut self, scope: &ScopeKey, key: NodeKey) -> Result<bool> {
        let encoding = self.config.encoding_filter(scope);
        self.store.transaction(|store| {
            let node = require(store, &live(&encoding), key)?;
            let siblings = store.select(
                &live(&encoding),
                &RowFilter::children_of(node.parent).after(node.left),
            )?;
            let Some(next) = siblings.first() else {
                return Ok(false);
            };
            ops::move_node(store, &encoding, key, next.right + 1)?;
            Ok(true)
        })
    }

    /// Delete a node with all of its descendants according to the configured policy.
    pub fn delete_subtree(&mut self, scope: &ScopeKey, key: NodeKey) -> Result<Deletion> {
        let encoding = self.config.encoding_filter(scope);
        let policy = self.config.delete_policy;
        let deletion = self.store.transaction(|store| {
            let node = require(store, &live(&encoding), key)?;
            let subtree = RowFilter::subtree(node.left, node.right, true);
            let mut deletion = Deletion::default();
            match policy {
                DeletePolicy::Hard => {
                    deletion.removed = store.delete(&encoding, &subtree)?;
                    deletion.shifted =
                        ops::make_gap(store, &encoding, node.right + 1, -node.width())?;
                }
                DeletePolicy::SoftRetainBounds => {
                    deletion.removed = store.set_trashed(&live(&encoding), &subtree, true)?;
                }
                DeletePolicy::SoftCloseGap => {
                    deletion.removed = store.set_trashed(&encoding, &subtree, true)?;
                    deletion.shifted =
                        ops::make_gap(store, &encoding, node.right + 1, -node.width())?;
                }
            }
            Ok(deletion)
        })?;
        tracing::debug!(
            %scope,
            %key,
            ?policy,
            removed = deletion.removed,
            shifted = deletion.shifted,
            "deleted subtree"
        );
        Ok(deletion)
    }

    /// Bring a soft-deleted subtree back. Under [`DeletePolicy::SoftCloseGap`] the restored
    /// rows are re-placed by their parent links with a full `fix_tree` pass.
    pub fn restore(&mut self, scope: &ScopeKey, key: NodeKey) -> Result<u64> {
        let policy = self.config.delete_policy;
        if !policy.is_soft() {
            return Err(Error::InvalidOperation(
                "restore requires a soft delete policy".into(),
            ));
        }
        let everything = ScopeFilter::with_trashed(scope);
        let encoding = self.config.encoding_filter(scope);
        let restored = self.store.transaction(|store| {
            let node = require(store, &everything, key)?;
            if !node.trashed {
                return Ok(0);
            }
            if policy == DeletePolicy::SoftRetainBounds {
                let subtree = RowFilter::subtree(node.left, node.right, true).trashed();
                return store.set_trashed(&everything, &subtree, false);
            }
            // Closed-gap rows keep stale bounds, so the subtree is found by parent links.
            let trashed = store.select(&everything, &RowFilter::all().trashed())?;
            let mut restored = store.set_trashed(&everything, &RowFilter::key(key), false)?;
            for row in to_flat_tree(trashed, TreeRoot::Parent(Some(key))) {
                restored += store.set_trashed(&everything, &RowFilter::key(row.key), false)?;
            }
            let rows = store.select(&encoding, &RowFilter::all())?;
            fix_nodes(store, &encoding, Dictionary::from_rows(rows), None)?;
            Ok(restored)
        })?;
        tracing::debug!(%scope, %key, restored, "restored subtree");
        Ok(restored)
    }

    /// Open or close a gap at `cut` across the whole scope.
    pub fn make_gap(&mut self, scope: &ScopeKey, cut: i64, height: i64) -> Result<u64> {
        let encoding = self.config.encoding_filter(scope);
        self.store
            .transaction(|store| ops::make_gap(store, &encoding, cut, height))
    }

    /// Recompute bounds and depth from parent links, for the whole scope or below `root`.
    ///
    /// Only rows whose values change are written. Rows whose parent cannot be reached are
    /// reattached as roots (or directly under `root`). Returns rows written plus rows shifted
    /// when a subtree's width had to change.
    pub fn fix_tree(&mut self, scope: &ScopeKey, root: Option<NodeKey>) -> Result<u64> {
        let encoding = self.config.encoding_filter(scope);
        let fixed = self.store.transaction(|store| {
            let anchor = root.map(|key| require(store, &encoding, key)).transpose()?;
            let filter = match &anchor {
                Some(root) => RowFilter::subtree(root.left, root.right, false),
                None => RowFilter::all(),
            };
            let rows = store.select(&encoding, &filter)?;
            fix_nodes(store, &encoding, Dictionary::from_rows(rows), anchor.as_ref())
        })?;
        tracing::debug!(%scope, ?root, fixed, "fix tree");
        Ok(fixed)
    }

    pub fn fix_subtree(&mut self, scope: &ScopeKey, root: NodeKey) -> Result<u64> {
        self.fix_tree(scope, Some(root))
    }

    /// Replace the shape of the scope (or of the subtree below `root`) with `items`.
    ///
    /// Items with a key must name an existing row of that range; items without one are
    /// created. Rows of the range missing from `items` are deleted (hard or soft, following
    /// the delete policy) when `delete_missing` is set, and otherwise kept under their current
    /// parent. Returns the number of rows whose stored values changed.
    pub fn rebuild_tree(
        &mut self,
        scope: &ScopeKey,
        items: &[RebuildItem],
        delete_missing: bool,
        root: Option<NodeKey>,
    ) -> Result<u64> {
        let encoding = self.config.encoding_filter(scope);
        let policy = self.config.delete_policy;
        let changed = self.store.transaction(|store| {
            let anchor = root.map(|key| require(store, &encoding, key)).transpose()?;
            let filter = match &anchor {
                Some(root) => RowFilter::subtree(root.left, root.right, false),
                None => RowFilter::all(),
            };
            let existing_rows = store.select(&encoding, &filter)?;
            let order: Vec<NodeKey> = existing_rows.iter().map(|row| row.key).collect();
            let mut existing: HashMap<NodeKey, NodeRow> =
                existing_rows.into_iter().map(|row| (row.key, row)).collect();

            let mut dictionary = Dictionary::new();
            let mut stack: Vec<(Option<NodeKey>, &[RebuildItem])> =
                vec![(anchor.as_ref().map(|row| row.key), items)];
            while let Some((parent, level)) = stack.pop() {
                // Siblings are pushed in order; nested levels are expanded afterwards.
                for item in level {
                    let (stored, row) = match item.key {
                        None => {
                            let created = store.insert(
                                scope,
                                InsertRow {
                                    key: None,
                                    parent,
                                    bounds: Bounds::default(),
                                    payload: item.payload.clone(),
                                },
                            )?;
                            (created.clone(), created)
                        }
                        Some(key) => {
                            let stored = match existing.remove(&key) {
                                Some(stored) => stored,
                                None => return Err(missing(store, &encoding, key)),
                            };
                            let mut row = stored.clone();
                            row.parent = parent;
                            if let Some(payload) = &item.payload {
                                row.payload = Some(payload.clone());
                            }
                            if row != stored {
                                // Persist the new parent before any missing row is deleted, so
                                // cascading deletes cannot take re-parented rows with them.
                                store.write(&row)?;
                            }
                            (stored, row)
                        }
                    };
                    let key = row.key;
                    dictionary.push(stored, row);
                    if !item.children.is_empty() {
                        stack.push((Some(key), item.children.as_slice()));
                    }
                }
            }

            for key in order {
                let Some(stored) = existing.remove(&key) else {
                    continue;
                };
                match (delete_missing, policy) {
                    (false, _) => dictionary.push(stored.clone(), stored),
                    (true, DeletePolicy::Hard) => {
                        store.delete(&encoding, &RowFilter::key(key))?;
                    }
                    (true, DeletePolicy::SoftRetainBounds) => {
                        let mut row = stored.clone();
                        row.trashed = true;
                        dictionary.push(stored, row);
                    }
                    (true, DeletePolicy::SoftCloseGap) => {
                        store.set_trashed(&encoding, &RowFilter::key(key), true)?;
                    }
                }
            }

            fix_nodes(store, &encoding, dictionary, anchor.as_ref())
        })?;
        tracing::debug!(%scope, ?root, delete_missing, changed, "rebuilt tree");
        Ok(changed)
    }

    pub fn rebuild_subtree(
        &mut self,
        scope: &ScopeKey,
        root: NodeKey,
        items: &[RebuildItem],
        delete_missing: bool,
    ) -> Result<u64> {
        self.rebuild_tree(scope, items, delete_missing, Some(root))
    }

    /// Run the four integrity checks over the scope's encoding.
    pub fn count_errors(&self, scope: &ScopeKey) -> Result<ErrorCounts> {
        let encoding = self.config.encoding_filter(scope);
        let mut counts = ErrorCounts::default();
        for violation in Violation::ALL {
            counts.set(violation, self.store.count_violations(&encoding, violation)?);
        }
        if counts.is_broken() {
            tracing::warn!(%scope, %counts, "nested set is broken");
        }
        Ok(counts)
    }

    pub fn total_errors(&self, scope: &ScopeKey) -> Result<u64> {
        Ok(self.count_errors(scope)?.total())
    }

    pub fn is_broken(&self, scope: &ScopeKey) -> Result<bool> {
        Ok(self.count_errors(scope)?.is_broken())
    }

    /// Fail with [`Error::StructuralCorruption`] when any check reports a violation.
    pub fn ensure_valid(&self, scope: &ScopeKey) -> Result<()> {
        let counts = self.count_errors(scope)?;
        if counts.is_broken() {
            return Err(Error::StructuralCorruption(counts));
        }
        Ok(())
    }
}

fn live(filter: &ScopeFilter) -> ScopeFilter {
    ScopeFilter::live(&filter.scope)
}

/// Error for a rebuild item whose key is not part of the rebuilt range.
fn missing<S: NodeStore>(store: &S, scope: &ScopeFilter, key: NodeKey) -> Error {
    match require(store, scope, key) {
        Ok(_) => Error::NotFound(key),
        Err(e) => e,
    }
}

fn resolve<S: NodeStore>(store: &S, scope: &ScopeFilter, placement: Placement) -> Result<Target> {
    let live = live(scope);
    let target = match placement {
        Placement::Root => Target {
            position: store.max_right(scope)?.map(|right| right + 1).unwrap_or(1),
            parent: None,
            depth: 0,
        },
        Placement::AppendTo(key) => {
            let parent = require(store, &live, key)?;
            Target {
                position: parent.right,
                parent: Some(parent.key),
                depth: parent.depth + 1,
            }
        }
        Placement::PrependTo(key) => {
            let parent = require(store, &live, key)?;
            Target {
                position: parent.left + 1,
                parent: Some(parent.key),
                depth: parent.depth + 1,
            }
        }
        Placement::Before(key) => {
            let sibling = require(store, &live, key)?;
            Target {
                position: sibling.left,
                parent: sibling.parent,
                depth: sibling.depth,
            }
        }
        Placement::After(key) => {
            let sibling = require(store, &live, key)?;
            Target {
                position: sibling.right + 1,
                parent: sibling.parent,
                depth: sibling.depth,
            }
        }
    };
    Ok(target)
}
