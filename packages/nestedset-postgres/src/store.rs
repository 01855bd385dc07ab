use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use postgres::{Client, Row};

use nestedset_core::{
    BoundPatch, Error, InsertRow, NodeKey, NodeRow, NodeStore, Result, RowFilter, ScopeFilter,
    ScopeKey, Violation,
};

use crate::sql::{
    filter_clause, node_to_bytes, patch_update, scope_clause, violation_query, Params, COLUMNS,
    TABLE,
};

const KEY_LOCK_KEY: i64 = 0x6e6f64656b657973; // "nodekeys"

fn storage_debug<E: std::fmt::Debug>(e: E) -> Error {
    Error::Storage(format!("{e:?}"))
}

fn bytes_to_node(bytes: &[u8]) -> Result<NodeKey> {
    let arr: [u8; 16] = bytes
        .try_into()
        .map_err(|_| Error::Storage("expected 16-byte node key".into()))?;
    Ok(NodeKey::from_be_bytes(arr))
}

fn read_row(row: &Row) -> Result<NodeRow> {
    let scope: String = row.get(0);
    let node: Vec<u8> = row.get(1);
    let parent: Option<Vec<u8>> = row.get(2);
    Ok(NodeRow {
        key: bytes_to_node(&node)?,
        scope: ScopeKey::new(scope),
        parent: parent.as_deref().map(bytes_to_node).transpose()?,
        left: row.get(3),
        right: row.get(4),
        depth: row.get(5),
        trashed: row.get(6),
        payload: row.get(7),
    })
}

/// Postgres-backed [`NodeStore`].
///
/// The outermost [`NodeStore::transaction`] is a `BEGIN`/`COMMIT` block, nested ones are
/// savepoints. Inside a transaction the first statement touching a scope takes a
/// transaction-scoped advisory lock on it, so structural writers of one scope run one at a
/// time across all connections.
pub struct PgStore {
    client: Rc<RefCell<Client>>,
    depth: u32,
    locked_scopes: RefCell<HashSet<ScopeKey>>,
    keys_locked: Cell<bool>,
}

impl PgStore {
    pub fn new(client: Rc<RefCell<Client>>) -> Self {
        Self {
            client,
            depth: 0,
            locked_scopes: RefCell::new(HashSet::new()),
            keys_locked: Cell::new(false),
        }
    }

    pub fn client(&self) -> &Rc<RefCell<Client>> {
        &self.client
    }

    fn guard(&self, scope: &ScopeKey) -> Result<()> {
        if self.depth == 0 || self.locked_scopes.borrow().contains(scope) {
            return Ok(());
        }
        let mut c = self.client.borrow_mut();
        c.query_one("SELECT pg_advisory_xact_lock(hashtext($1))", &[&scope.as_str()])
            .map_err(storage_debug)?;
        drop(c);
        tracing::trace!(%scope, "locked scope");
        self.locked_scopes.borrow_mut().insert(scope.clone());
        Ok(())
    }

    fn query(&self, scope: &ScopeKey, sql: &str, params: &Params) -> Result<Vec<Row>> {
        self.guard(scope)?;
        let mut c = self.client.borrow_mut();
        c.query(sql, &params.as_refs()).map_err(storage_debug)
    }

    fn execute(&self, scope: &ScopeKey, sql: &str, params: &Params) -> Result<u64> {
        self.guard(scope)?;
        let mut c = self.client.borrow_mut();
        c.execute(sql, &params.as_refs()).map_err(storage_debug)
    }

    fn count_sql(&self, scope: &ScopeKey, sql: &str, params: &Params) -> Result<u64> {
        let rows = self.query(scope, sql, params)?;
        let count: i64 = rows.first().map(|row| row.get(0)).unwrap_or(0);
        Ok(count as u64)
    }

    fn next_key(&self) -> Result<NodeKey> {
        let mut c = self.client.borrow_mut();
        if self.depth > 0 && !self.keys_locked.get() {
            c.query_one("SELECT pg_advisory_xact_lock($1)", &[&KEY_LOCK_KEY])
                .map_err(storage_debug)?;
            self.keys_locked.set(true);
        }
        let row = c
            .query_opt(
                &format!("SELECT node FROM {TABLE} ORDER BY node DESC LIMIT 1"),
                &[],
            )
            .map_err(storage_debug)?;
        match row {
            Some(row) => {
                let bytes: Vec<u8> = row.get(0);
                Ok(bytes_to_node(&bytes)?.next())
            }
            None => Ok(NodeKey(1)),
        }
    }

    fn batch(&self, sql: &str) -> Result<()> {
        let mut c = self.client.borrow_mut();
        c.batch_execute(sql).map_err(|e| Error::Storage(e.to_string()))
    }
}

impl NodeStore for PgStore {
    fn locate(&self, key: NodeKey) -> Result<Option<ScopeKey>> {
        let mut c = self.client.borrow_mut();
        let row = c
            .query_opt(
                &format!("SELECT scope FROM {TABLE} WHERE node = $1"),
                &[&node_to_bytes(key)],
            )
            .map_err(storage_debug)?;
        Ok(row.map(|row| ScopeKey::new(row.get::<_, String>(0))))
    }

    fn select(&self, scope: &ScopeFilter, filter: &RowFilter) -> Result<Vec<NodeRow>> {
        let mut params = Params::default();
        let sql = format!(
            "SELECT {COLUMNS} FROM {TABLE} WHERE {} ORDER BY lft, node",
            filter_clause("", scope, filter, &mut params)
        );
        self.query(&scope.scope, &sql, &params)?
            .iter()
            .map(read_row)
            .collect()
    }

    fn count(&self, scope: &ScopeFilter, filter: &RowFilter) -> Result<u64> {
        let mut params = Params::default();
        let sql = format!(
            "SELECT COUNT(*) FROM {TABLE} WHERE {}",
            filter_clause("", scope, filter, &mut params)
        );
        self.count_sql(&scope.scope, &sql, &params)
    }

    fn max_right(&self, scope: &ScopeFilter) -> Result<Option<i64>> {
        let mut params = Params::default();
        let sql = format!(
            "SELECT MAX(rgt) FROM {TABLE} WHERE {}",
            scope_clause("", scope, &mut params)
        );
        let rows = self.query(&scope.scope, &sql, &params)?;
        Ok(rows.first().and_then(|row| row.get(0)))
    }

    fn depth_at(&self, scope: &ScopeFilter, position: i64) -> Result<Option<i64>> {
        let mut params = Params::default();
        let visible = scope_clause("", scope, &mut params);
        let position = params.int(position);
        let sql = format!(
            "SELECT depth FROM {TABLE} WHERE {visible} AND lft < {position} AND rgt >= {position} \
             ORDER BY lft DESC LIMIT 1"
        );
        let rows = self.query(&scope.scope, &sql, &params)?;
        Ok(rows.first().map(|row| row.get(0)))
    }

    fn apply_patch(&mut self, scope: &ScopeFilter, patch: &BoundPatch) -> Result<u64> {
        let mut params = Params::default();
        let sql = patch_update(scope, patch, &mut params);
        self.execute(&scope.scope, &sql, &params)
    }

    fn insert(&mut self, scope: &ScopeKey, row: InsertRow) -> Result<NodeRow> {
        self.guard(scope)?;
        let key = match row.key {
            Some(key) => key,
            None => self.next_key()?,
        };
        if self.locate(key)?.is_some() {
            return Err(Error::InvalidOperation(format!("duplicate node key {key}")));
        }
        {
            let mut c = self.client.borrow_mut();
            c.execute(
                &format!(
                    "INSERT INTO {TABLE} ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7)"
                ),
                &[
                    &scope.as_str(),
                    &node_to_bytes(key),
                    &row.parent.map(node_to_bytes),
                    &row.bounds.left,
                    &row.bounds.right,
                    &row.bounds.depth,
                    &row.payload,
                ],
            )
            .map_err(storage_debug)?;
        }
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
        self.guard(&row.scope)?;
        let changed = {
            let mut c = self.client.borrow_mut();
            c.execute(
                &format!(
                    "UPDATE {TABLE} SET parent = $1, lft = $2, rgt = $3, depth = $4, trashed = $5, \
                     payload = $6 WHERE scope = $7 AND node = $8"
                ),
                &[
                    &row.parent.map(node_to_bytes),
                    &row.left,
                    &row.right,
                    &row.depth,
                    &row.trashed,
                    &row.payload,
                    &row.scope.as_str(),
                    &node_to_bytes(row.key),
                ],
            )
            .map_err(storage_debug)?
        };
        if changed == 0 {
            return Err(Error::NotFound(row.key));
        }
        Ok(())
    }

    fn delete(&mut self, scope: &ScopeFilter, filter: &RowFilter) -> Result<u64> {
        let mut params = Params::default();
        let sql = format!(
            "DELETE FROM {TABLE} WHERE {}",
            filter_clause("", scope, filter, &mut params)
        );
        self.execute(&scope.scope, &sql, &params)
    }

    fn set_trashed(&mut self, scope: &ScopeFilter, filter: &RowFilter, trashed: bool) -> Result<u64> {
        let mut params = Params::default();
        let clause = filter_clause("", scope, filter, &mut params);
        let flag = params.bind(trashed);
        let sql = format!("UPDATE {TABLE} SET trashed = {flag} WHERE {clause} AND trashed <> {flag}");
        self.execute(&scope.scope, &sql, &params)
    }

    fn count_violations(&self, scope: &ScopeFilter, violation: Violation) -> Result<u64> {
        let mut params = Params::default();
        let sql = violation_query(scope, violation, &mut params);
        self.count_sql(&scope.scope, &sql, &params)
    }

    fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let (begin, commit, rollback) = if self.depth == 0 {
            ("BEGIN".to_string(), "COMMIT".to_string(), "ROLLBACK".to_string())
        } else {
            let savepoint = format!("nestedset_{}", self.depth);
            (
                format!("SAVEPOINT {savepoint}"),
                format!("RELEASE SAVEPOINT {savepoint}"),
                format!("ROLLBACK TO SAVEPOINT {savepoint}"),
            )
        };

        self.batch(&begin)?;
        self.depth += 1;
        let res = f(self);
        self.depth -= 1;
        if self.depth == 0 {
            // Advisory xact locks end with the outer transaction either way.
            self.locked_scopes.borrow_mut().clear();
            self.keys_locked.set(false);
        }

        match res {
            Ok(v) => {
                self.batch(&commit)?;
                Ok(v)
            }
            Err(e) => {
                tracing::debug!(error = %e, "rolling back");
                let _ = self.batch(&rollback);
                Err(e)
            }
        }
    }
}
