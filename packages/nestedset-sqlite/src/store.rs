use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use nestedset_core::{
    BoundPatch, Error, InsertRow, NodeKey, NodeRow, NodeStore, Result, RowFilter, ScopeFilter,
    ScopeKey, Violation,
};

use crate::sql::{
    filter_clause, node_to_blob, patch_update, scope_clause, violation_query, Params, COLUMNS,
    SCHEMA_SQL, TABLE,
};

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

fn blob_to_node(data: Vec<u8>, idx: usize) -> rusqlite::Result<NodeKey> {
    let bytes: [u8; 16] = data.try_into().map_err(|_| {
        rusqlite::Error::InvalidColumnType(idx, "node".to_string(), rusqlite::types::Type::Blob)
    })?;
    Ok(NodeKey::from_be_bytes(bytes))
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<NodeRow> {
    let scope: String = row.get(0)?;
    let parent: Option<Vec<u8>> = row.get(2)?;
    Ok(NodeRow {
        scope: ScopeKey::new(scope),
        key: blob_to_node(row.get(1)?, 1)?,
        parent: parent.map(|data| blob_to_node(data, 2)).transpose()?,
        left: row.get(3)?,
        right: row.get(4)?,
        depth: row.get(5)?,
        trashed: row.get(6)?,
        payload: row.get(7)?,
    })
}

/// SQLite-backed [`NodeStore`] keeping every scope in one `nestedset_nodes` table.
///
/// Transactions are savepoints, so nested calls join the outer one and an error rolls back
/// only the innermost level.
pub struct SqliteStore {
    conn: Connection,
    depth: u32,
}

impl SqliteStore {
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::with_connection(conn)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::with_connection(conn)
    }

    /// Wrap an existing connection, enabling foreign keys and creating the schema if needed.
    pub fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(storage_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(storage_err)?;
        Ok(Self { conn, depth: 0 })
    }

    /// Raw connection, e.g. for maintenance statements outside the engine.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn count_sql(&self, sql: &str, params: Params) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(sql, params_from_iter(params.values.iter()), |row| row.get(0))
            .map_err(storage_err)?;
        Ok(count as u64)
    }

    fn execute(&self, sql: &str, params: Params) -> Result<u64> {
        let changed = self
            .conn
            .execute(sql, params_from_iter(params.values.iter()))
            .map_err(storage_err)?;
        Ok(changed as u64)
    }

    fn next_key(&self) -> Result<NodeKey> {
        let last: Option<Vec<u8>> = self
            .conn
            .query_row(
                &format!("SELECT node FROM {TABLE} ORDER BY node DESC LIMIT 1"),
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        match last {
            Some(data) => Ok(blob_to_node(data, 0).map_err(storage_err)?.next()),
            None => Ok(NodeKey(1)),
        }
    }
}

impl NodeStore for SqliteStore {
    fn locate(&self, key: NodeKey) -> Result<Option<ScopeKey>> {
        let scope: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT scope FROM {TABLE} WHERE node = ?1"),
                [node_to_blob(key)],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        Ok(scope.map(ScopeKey::new))
    }

    fn select(&self, scope: &ScopeFilter, filter: &RowFilter) -> Result<Vec<NodeRow>> {
        let mut params = Params::default();
        let sql = format!(
            "SELECT {COLUMNS} FROM {TABLE} WHERE {} ORDER BY lft, node",
            filter_clause("", scope, filter, &mut params)
        );
        let mut stmt = self.conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(params_from_iter(params.values.iter()), read_row)
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    fn count(&self, scope: &ScopeFilter, filter: &RowFilter) -> Result<u64> {
        let mut params = Params::default();
        let sql = format!(
            "SELECT COUNT(*) FROM {TABLE} WHERE {}",
            filter_clause("", scope, filter, &mut params)
        );
        self.count_sql(&sql, params)
    }

    fn max_right(&self, scope: &ScopeFilter) -> Result<Option<i64>> {
        let mut params = Params::default();
        let sql = format!(
            "SELECT MAX(rgt) FROM {TABLE} WHERE {}",
            scope_clause("", scope, &mut params)
        );
        self.conn
            .query_row(&sql, params_from_iter(params.values.iter()), |row| row.get(0))
            .map_err(storage_err)
    }

    fn depth_at(&self, scope: &ScopeFilter, position: i64) -> Result<Option<i64>> {
        let mut params = Params::default();
        let visible = scope_clause("", scope, &mut params);
        let position = params.int(position);
        let sql = format!(
            "SELECT depth FROM {TABLE} WHERE {visible} AND lft < {position} AND rgt >= {position} \
             ORDER BY lft DESC LIMIT 1"
        );
        self.conn
            .query_row(&sql, params_from_iter(params.values.iter()), |row| row.get(0))
            .optional()
            .map_err(storage_err)
    }

    fn apply_patch(&mut self, scope: &ScopeFilter, patch: &BoundPatch) -> Result<u64> {
        let mut params = Params::default();
        let sql = patch_update(scope, patch, &mut params);
        self.execute(&sql, params)
    }

    fn insert(&mut self, scope: &ScopeKey, row: InsertRow) -> Result<NodeRow> {
        let key = match row.key {
            Some(key) => key,
            None => self.next_key()?,
        };
        if self.locate(key)?.is_some() {
            return Err(Error::InvalidOperation(format!("duplicate node key {key}")));
        }
        self.conn
            .execute(
                &format!("INSERT INTO {TABLE} ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)"),
                params![
                    scope.as_str(),
                    node_to_blob(key),
                    row.parent.map(node_to_blob),
                    row.bounds.left,
                    row.bounds.right,
                    row.bounds.depth,
                    row.payload,
                ],
            )
            .map_err(storage_err)?;
        Ok(NodeRow {
            key,
            scope: scope.clone(),
            parent: row.parent,
            left: row.bounds.left,
            right: row.bounds.right,
            depth: row.bounds.depth,
            trashed: false,
            payload: row.payload,
        })
    }

    fn write(&mut self, row: &NodeRow) -> Result<()> {
        let changed = self
            .conn
            .execute(
                &format!(
                    "UPDATE {TABLE} SET parent = ?1, lft = ?2, rgt = ?3, depth = ?4, trashed = ?5, \
                     payload = ?6 WHERE scope = ?7 AND node = ?8"
                ),
                params![
                    row.parent.map(node_to_blob),
                    row.left,
                    row.right,
                    row.depth,
                    row.trashed,
                    row.payload,
                    row.scope.as_str(),
                    node_to_blob(row.key),
                ],
            )
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(Error::NotFound(row.key));
        }
        Ok(())
    }

    fn delete(&mut self, scope: &ScopeFilter, filter: &RowFilter) -> Result<u64> {
        // Cascaded deletes run row by row, so rows reached through a deleted parent are
        // never counted by `changes()`. Count the matching rows up front instead.
        self.transaction(|store| {
            let matching = store.count(scope, filter)?;
            let mut params = Params::default();
            let sql = format!(
                "DELETE FROM {TABLE} WHERE {}",
                filter_clause("", scope, filter, &mut params)
            );
            store.execute(&sql, params)?;
            Ok(matching)
        })
    }

    fn set_trashed(&mut self, scope: &ScopeFilter, filter: &RowFilter, trashed: bool) -> Result<u64> {
        let mut params = Params::default();
        let clause = filter_clause("", scope, filter, &mut params);
        let flag = params.int(i64::from(trashed));
        let sql = format!("UPDATE {TABLE} SET trashed = {flag} WHERE {clause} AND trashed <> {flag}");
        self.execute(&sql, params)
    }

    fn count_violations(&self, scope: &ScopeFilter, violation: Violation) -> Result<u64> {
        let mut params = Params::default();
        let sql = violation_query(scope, violation, &mut params);
        self.count_sql(&sql, params)
    }

    fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let savepoint = format!("nestedset_{}", self.depth);
        self.conn
            .execute_batch(&format!("SAVEPOINT {savepoint}"))
            .map_err(storage_err)?;
        self.depth += 1;
        let res = f(self);
        self.depth -= 1;

        match res {
            Ok(v) => {
                self.conn
                    .execute_batch(&format!("RELEASE {savepoint}"))
                    .map_err(storage_err)?;
                Ok(v)
            }
            Err(e) => {
                tracing::debug!(error = %e, %savepoint, "rolling back");
                let _ = self
                    .conn
                    .execute_batch(&format!("ROLLBACK TO {savepoint}; RELEASE {savepoint}"));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestedset_core::{gap_patch, Bounds};

    fn add(store: &mut SqliteStore, scope: &ScopeKey, parent: Option<NodeKey>, b: (i64, i64, i64)) -> NodeKey {
        store
            .insert(
                scope,
                InsertRow {
                    key: None,
                    parent,
                    bounds: Bounds::new(b.0, b.1, b.2),
                    payload: None,
                },
            )
            .unwrap()
            .key
    }

    #[test]
    fn keys_round_trip_through_blobs() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        let scope = ScopeKey::from("s");
        let row = store
            .insert(
                &scope,
                InsertRow {
                    key: Some(NodeKey(u128::MAX - 1)),
                    parent: None,
                    bounds: Bounds::new(1, 2, 0),
                    payload: Some(vec![7]),
                },
            )
            .unwrap();
        let loaded = store.get(&ScopeFilter::live(&scope), row.key).unwrap();
        assert_eq!(loaded, Some(row));
        assert_eq!(store.next_key().unwrap(), NodeKey(u128::MAX));
    }

    #[test]
    fn patch_is_one_statement_over_selected_rows() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        let scope = ScopeKey::from("s");
        let root = add(&mut store, &scope, None, (1, 4, 0));
        add(&mut store, &scope, Some(root), (2, 3, 1));
        let live = ScopeFilter::live(&scope);

        assert_eq!(store.apply_patch(&live, &gap_patch(3, 2)).unwrap(), 2);
        assert_eq!(store.max_right(&live).unwrap(), Some(6));
        assert_eq!(store.depth_at(&live, 3).unwrap(), Some(1));
        assert_eq!(store.depth_at(&live, 7).unwrap(), None);
    }

    #[test]
    fn nested_transaction_rolls_back_inner_level_only() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        let scope = ScopeKey::from("s");
        let live = ScopeFilter::live(&scope);
        store
            .transaction(|store| {
                add(store, &scope, None, (1, 2, 0));
                let inner: Result<()> = store.transaction(|store| {
                    add(store, &scope, None, (3, 4, 0));
                    Err(Error::InvalidOperation("abort".into()))
                });
                assert!(inner.is_err());
                Ok(())
            })
            .unwrap();
        assert_eq!(store.count(&live, &RowFilter::all()).unwrap(), 1);
    }

    #[test]
    fn delete_counts_rows_removed_through_the_cascade() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        let scope = ScopeKey::from("s");
        let root = add(&mut store, &scope, None, (1, 6, 0));
        let child = add(&mut store, &scope, Some(root), (2, 5, 1));
        add(&mut store, &scope, Some(child), (3, 4, 2));
        let live = ScopeFilter::live(&scope);

        let removed = store.delete(&live, &RowFilter::subtree(1, 6, true)).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.count(&live, &RowFilter::all()).unwrap(), 0);
    }

    #[test]
    fn trashed_rows_need_with_trashed_visibility() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        let scope = ScopeKey::from("s");
        let key = add(&mut store, &scope, None, (1, 2, 0));
        let live = ScopeFilter::live(&scope);
        assert_eq!(store.set_trashed(&live, &RowFilter::key(key), true).unwrap(), 1);
        assert!(store.get(&live, key).unwrap().is_none());

        let all = ScopeFilter::with_trashed(&scope);
        assert_eq!(store.count(&all, &RowFilter::all().trashed()).unwrap(), 1);
        assert_eq!(store.set_trashed(&all, &RowFilter::key(key), true).unwrap(), 0);
    }
}
