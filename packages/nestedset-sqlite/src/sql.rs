use nestedset_core::{BoundPatch, NodeKey, RowFilter, ScopeFilter, Violation};
use rusqlite::types::Value;

pub(crate) const TABLE: &str = "nestedset_nodes";
pub(crate) const COLUMNS: &str = "scope, node, parent, lft, rgt, depth, trashed, payload";

pub(crate) const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS nestedset_nodes (
  scope TEXT NOT NULL,
  node BLOB NOT NULL PRIMARY KEY,
  parent BLOB,
  lft INTEGER NOT NULL,
  rgt INTEGER NOT NULL,
  depth INTEGER NOT NULL,
  trashed INTEGER NOT NULL DEFAULT 0,
  payload BLOB,
  UNIQUE (scope, node),
  FOREIGN KEY (scope, parent) REFERENCES nestedset_nodes (scope, node)
    ON DELETE CASCADE ON UPDATE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_nestedset_nodes_scope_bounds
  ON nestedset_nodes (scope, lft, rgt);

CREATE INDEX IF NOT EXISTS idx_nestedset_nodes_scope_parent
  ON nestedset_nodes (scope, parent);
"#;

pub(crate) fn node_to_blob(key: NodeKey) -> Vec<u8> {
    key.to_be_bytes().to_vec()
}

/// Positional parameters collected while a statement is rendered.
#[derive(Default)]
pub(crate) struct Params {
    pub values: Vec<Value>,
}

impl Params {
    pub fn bind(&mut self, value: Value) -> String {
        self.values.push(value);
        format!("?{}", self.values.len())
    }

    pub fn int(&mut self, value: i64) -> String {
        self.bind(Value::Integer(value))
    }

    pub fn key(&mut self, key: NodeKey) -> String {
        self.bind(Value::Blob(node_to_blob(key)))
    }
}

/// Scope and visibility predicate for rows addressed as `{p}column`.
pub(crate) fn scope_clause(p: &str, scope: &ScopeFilter, params: &mut Params) -> String {
    let value = params.bind(Value::Text(scope.scope.as_str().to_owned()));
    if scope.with_trashed {
        format!("{p}scope = {value}")
    } else {
        format!("{p}scope = {value} AND {p}trashed = 0")
    }
}

pub(crate) fn filter_clause(p: &str, scope: &ScopeFilter, filter: &RowFilter, params: &mut Params) -> String {
    let mut clauses = vec![scope_clause(p, scope, params)];
    if let Some(key) = filter.key {
        clauses.push(format!("{p}node = {}", params.key(key)));
    }
    if let Some(key) = filter.exclude {
        clauses.push(format!("{p}node <> {}", params.key(key)));
    }
    match filter.parent {
        Some(Some(parent)) => clauses.push(format!("{p}parent = {}", params.key(parent))),
        Some(None) => clauses.push(format!("{p}parent IS NULL")),
        None => {}
    }
    if let Some((from, to)) = filter.left_between {
        let (from, to) = (params.int(from), params.int(to));
        clauses.push(format!("{p}lft BETWEEN {from} AND {to}"));
    }
    if let Some((left, right)) = filter.encloses {
        let (left, right) = (params.int(left), params.int(right));
        clauses.push(format!("{p}lft < {left} AND {p}rgt > {right}"));
    }
    if let Some(left) = filter.left_before {
        clauses.push(format!("{p}lft < {}", params.int(left)));
    }
    if let Some(left) = filter.left_after {
        clauses.push(format!("{p}lft > {}", params.int(left)));
    }
    if filter.leaves_only {
        clauses.push(format!("{p}rgt = {p}lft + 1"));
    }
    if filter.trashed_only {
        clauses.push(format!("{p}trashed = 1"));
    }
    clauses.join(" AND ")
}

/// `UPDATE` applying a bound patch in one statement. Every `CASE` reads pre-update values.
pub(crate) fn patch_update(scope: &ScopeFilter, patch: &BoundPatch, params: &mut Params) -> String {
    let visible = scope_clause("", scope, params);
    match patch {
        BoundPatch::Gap(gap) => {
            let (cut, height) = (params.int(gap.cut), params.int(gap.height));
            format!(
                "UPDATE {TABLE} SET \
                 lft = CASE WHEN lft >= {cut} THEN lft + {height} ELSE lft END, \
                 rgt = CASE WHEN rgt >= {cut} THEN rgt + {height} ELSE rgt END \
                 WHERE {visible} AND (lft >= {cut} OR rgt >= {cut})"
            )
        }
        BoundPatch::Move(mv) => {
            let (lft, rgt) = (params.int(mv.lft), params.int(mv.rgt));
            let (from, to) = (params.int(mv.from), params.int(mv.to));
            let (height, distance) = (params.int(mv.height), params.int(mv.distance));
            let depth = params.int(mv.depth);
            let bound = |col: &str| {
                format!(
                    "{col} = CASE WHEN {col} BETWEEN {lft} AND {rgt} THEN {col} + {distance} \
                     WHEN {col} BETWEEN {from} AND {to} THEN {col} + {height} ELSE {col} END"
                )
            };
            format!(
                "UPDATE {TABLE} SET {}, {}, \
                 depth = CASE WHEN lft BETWEEN {lft} AND {rgt} THEN depth + {depth} ELSE depth END \
                 WHERE {visible} AND (lft BETWEEN {from} AND {to} OR rgt BETWEEN {from} AND {to})",
                bound("lft"),
                bound("rgt"),
            )
        }
    }
}

/// `SELECT COUNT(*)` for one integrity check.
pub(crate) fn violation_query(scope: &ScopeFilter, violation: Violation, params: &mut Params) -> String {
    let c = scope_clause("c.", scope, params);
    match violation {
        Violation::Oddness => format!(
            "SELECT COUNT(*) FROM {TABLE} c WHERE {c} AND (c.lft >= c.rgt OR (c.rgt - c.lft) % 2 = 0)"
        ),
        Violation::Duplicates => {
            let o = scope_clause("o.", scope, params);
            format!(
                "SELECT COUNT(*) FROM {TABLE} c JOIN {TABLE} o ON c.node < o.node \
                 AND (c.lft = o.lft OR c.lft = o.rgt OR c.rgt = o.lft OR c.rgt = o.rgt) \
                 WHERE {c} AND {o}"
            )
        }
        Violation::WrongParent => {
            let p = scope_clause("p.", scope, params);
            let m = scope_clause("m.", scope, params);
            format!(
                "SELECT COUNT(*) FROM {TABLE} c JOIN {TABLE} p ON p.node = c.parent \
                 WHERE {c} AND {p} AND ( \
                   NOT (p.lft < c.lft AND p.rgt > c.rgt) \
                   OR EXISTS (SELECT 1 FROM {TABLE} m WHERE {m} \
                     AND m.node <> p.node AND m.node <> c.node \
                     AND m.lft < c.lft AND m.rgt > c.rgt \
                     AND p.lft < m.lft AND p.rgt > m.rgt))"
            )
        }
        Violation::MissingParent => {
            let p = scope_clause("p.", scope, params);
            format!(
                "SELECT COUNT(*) FROM {TABLE} c WHERE {c} AND c.parent IS NOT NULL \
                 AND NOT EXISTS (SELECT 1 FROM {TABLE} p WHERE {p} AND p.node = c.parent)"
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestedset_core::{gap_patch, ScopeKey};

    #[test]
    fn live_filter_hides_trashed_rows() {
        let scope = ScopeFilter::live(&ScopeKey::from("s"));
        let mut params = Params::default();
        let sql = filter_clause("", &scope, &RowFilter::roots(), &mut params);
        assert_eq!(sql, "scope = ?1 AND trashed = 0 AND parent IS NULL");
        assert_eq!(params.values, vec![Value::Text("s".into())]);
    }

    #[test]
    fn gap_update_reuses_its_parameters() {
        let scope = ScopeFilter::with_trashed(&ScopeKey::from("s"));
        let mut params = Params::default();
        let sql = patch_update(&scope, &gap_patch(4, 2), &mut params);
        assert!(sql.contains("lft = CASE WHEN lft >= ?2 THEN lft + ?3 ELSE lft END"));
        assert!(sql.ends_with("WHERE scope = ?1 AND (lft >= ?2 OR rgt >= ?2)"));
        assert_eq!(params.values.len(), 3);
    }
}
