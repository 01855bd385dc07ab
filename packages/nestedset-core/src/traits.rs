use std::collections::BTreeMap;

use crate::audit::{self, Violation};
use crate::error::{Error, Result};
use crate::filter::RowFilter;
use crate::ids::{NodeKey, ScopeFilter, ScopeKey};
use crate::node::{InsertRow, NodeRow};
use crate::patch::BoundPatch;

/// Storage collaborator of the engine.
///
/// Every call is confined to the scope carried by its [`ScopeFilter`]. Implementations must
/// apply a [`BoundPatch`] as one bounded update and must make [`NodeStore::transaction`]
/// all-or-nothing. The engine takes no locks of its own: two structural mutations on
/// overlapping ranges of one scope are only safe if the backing store serializes them
/// (repeatable-read isolation or row-range locks).
pub trait NodeStore {
    fn get(&self, scope: &ScopeFilter, key: NodeKey) -> Result<Option<NodeRow>> {
        Ok(self.select(scope, &RowFilter::key(key))?.into_iter().next())
    }

    /// Scope a key lives in, ignoring scopes and trashed state.
    fn locate(&self, key: NodeKey) -> Result<Option<ScopeKey>>;

    /// Matching rows ordered by `(left, key)`.
    fn select(&self, scope: &ScopeFilter, filter: &RowFilter) -> Result<Vec<NodeRow>>;

    fn count(&self, scope: &ScopeFilter, filter: &RowFilter) -> Result<u64> {
        Ok(self.select(scope, filter)?.len() as u64)
    }

    fn max_right(&self, scope: &ScopeFilter) -> Result<Option<i64>>;

    /// Depth of the deepest row with `left < position <= right`.
    fn depth_at(&self, scope: &ScopeFilter, position: i64) -> Result<Option<i64>> {
        Ok(self
            .select(scope, &RowFilter::enclosing_position(position))?
            .last()
            .map(|row| row.depth))
    }

    /// Apply the patch to every selected row in one update. Returns the number of rows touched.
    fn apply_patch(&mut self, scope: &ScopeFilter, patch: &BoundPatch) -> Result<u64>;

    /// Create a row, allocating a key when the caller did not supply one.
    fn insert(&mut self, scope: &ScopeKey, row: InsertRow) -> Result<NodeRow>;

    /// Overwrite parent, bounds, depth, trashed flag and payload of an existing row.
    fn write(&mut self, row: &NodeRow) -> Result<()>;

    /// Remove the rows matching `filter`. Returns how many matched, whether they were removed
    /// directly or through a cascade from a removed parent.
    fn delete(&mut self, scope: &ScopeFilter, filter: &RowFilter) -> Result<u64>;

    fn set_trashed(&mut self, scope: &ScopeFilter, filter: &RowFilter, trashed: bool) -> Result<u64>;

    fn count_violations(&self, scope: &ScopeFilter, violation: Violation) -> Result<u64> {
        let rows = self.select(scope, &RowFilter::all())?;
        Ok(audit::count_violations(&rows, violation))
    }

    /// Run `f` atomically. Nested calls join the outer transaction.
    fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T>;
}

/// Counters exposed by [`MemoryStore`] so tests can assert how many statements an
/// operation issued.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StoreStats {
    pub patches: u64,
    pub writes: u64,
}

/// In-memory store for tests, prototyping and benchmarks.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    rows: BTreeMap<NodeKey, NodeRow>,
    stats: StoreStats,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = StoreStats::default();
    }

    /// Every row of every scope, trashed ones included.
    pub fn rows(&self) -> impl Iterator<Item = &NodeRow> {
        self.rows.values()
    }

    /// Raw access used by tests to corrupt an encoding on purpose.
    pub fn row_mut(&mut self, key: NodeKey) -> Option<&mut NodeRow> {
        self.rows.get_mut(&key)
    }

    fn visible<'a>(&'a self, scope: &'a ScopeFilter) -> impl Iterator<Item = &'a NodeRow> + 'a {
        self.rows
            .values()
            .filter(move |row| row.scope == scope.scope && (scope.with_trashed || !row.trashed))
    }

    fn next_key(&self) -> NodeKey {
        self.rows
            .keys()
            .next_back()
            .map(|key| key.next())
            .unwrap_or(NodeKey(1))
    }
}

impl NodeStore for MemoryStore {
    fn locate(&self, key: NodeKey) -> Result<Option<ScopeKey>> {
        Ok(self.rows.get(&key).map(|row| row.scope.clone()))
    }

    fn select(&self, scope: &ScopeFilter, filter: &RowFilter) -> Result<Vec<NodeRow>> {
        let mut out: Vec<NodeRow> = self
            .visible(scope)
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        out.sort_by_key(|row| (row.left, row.key));
        Ok(out)
    }

    fn max_right(&self, scope: &ScopeFilter) -> Result<Option<i64>> {
        Ok(self.visible(scope).map(|row| row.right).max())
    }

    fn apply_patch(&mut self, scope: &ScopeFilter, patch: &BoundPatch) -> Result<u64> {
        self.stats.patches += 1;
        let mut touched = 0;
        for row in self.rows.values_mut() {
            if row.scope != scope.scope || (row.trashed && !scope.with_trashed) {
                continue;
            }
            if !patch.selects(row.left, row.right) {
                continue;
            }
            let bounds = patch.apply(row.bounds());
            row.set_bounds(bounds);
            touched += 1;
        }
        Ok(touched)
    }

    fn insert(&mut self, scope: &ScopeKey, row: InsertRow) -> Result<NodeRow> {
        let key = row.key.unwrap_or_else(|| self.next_key());
        if self.rows.contains_key(&key) {
            return Err(Error::InvalidOperation(format!("duplicate node key {key}")));
        }
        let stored = NodeRow {
            key,
            scope: scope.clone(),
            parent: row.parent,
            left: row.bounds.left,
            right: row.bounds.right,
            depth: row.bounds.depth,
            trashed: false,
            payload: row.payload,
        };
        self.stats.writes += 1;
        self.rows.insert(key, stored.clone());
        Ok(stored)
    }

    fn write(&mut self, row: &NodeRow) -> Result<()> {
        let stored = self
            .rows
            .get_mut(&row.key)
            .filter(|stored| stored.scope == row.scope)
            .ok_or(Error::NotFound(row.key))?;
        *stored = row.clone();
        self.stats.writes += 1;
        Ok(())
    }

    fn delete(&mut self, scope: &ScopeFilter, filter: &RowFilter) -> Result<u64> {
        let doomed: Vec<NodeKey> = self
            .visible(scope)
            .filter(|row| filter.matches(row))
            .map(|row| row.key)
            .collect();
        for key in &doomed {
            self.rows.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    fn set_trashed(&mut self, scope: &ScopeFilter, filter: &RowFilter, trashed: bool) -> Result<u64> {
        let mut touched = 0;
        for row in self.rows.values_mut() {
            if row.scope != scope.scope || (row.trashed && !scope.with_trashed) {
                continue;
            }
            if filter.matches(row) && row.trashed != trashed {
                row.trashed = trashed;
                touched += 1;
            }
        }
        Ok(touched)
    }

    fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let snapshot = self.rows.clone();
        let result = f(self);
        if result.is_err() {
            self.rows = snapshot;
        }
        result
    }
}
