use postgres::types::ToSql;

use nestedset_core::{BoundPatch, NodeKey, RowFilter, ScopeFilter, Violation};

pub(crate) const TABLE: &str = "nestedset_nodes";
pub(crate) const COLUMNS: &str = "scope, node, parent, lft, rgt, depth, trashed, payload";

pub(crate) fn node_to_bytes(key: NodeKey) -> Vec<u8> {
    key.to_be_bytes().to_vec()
}

/// Positional `$n` parameters collected while a statement is rendered.
#[derive(Default)]
pub(crate) struct Params {
    values: Vec<Box<dyn ToSql + Sync>>,
}

impl Params {
    pub fn bind<T: ToSql + Sync + 'static>(&mut self, value: T) -> String {
        self.values.push(Box::new(value));
        format!("${}", self.values.len())
    }

    pub fn int(&mut self, value: i64) -> String {
        self.bind(value)
    }

    pub fn key(&mut self, key: NodeKey) -> String {
        self.bind(node_to_bytes(key))
    }

    pub fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.values.iter().map(|value| &**value).collect()
    }
}

pub(crate) fn scope_clause(p: &str, scope: &ScopeFilter, params: &mut Params) -> String {
    let value = params.bind(scope.scope.as_str().to_owned());
    if scope.with_trashed {
        format!("{p}scope = {value}")
    } else {
        format!("{p}scope = {value} AND NOT {p}trashed")
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
        clauses.push(format!("{p}trashed"));
    }
    clauses.join(" AND ")
}

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
    use nestedset_core::{move_patch, ScopeKey};

    #[test]
    fn move_update_binds_each_value_once() {
        let scope = ScopeFilter::live(&ScopeKey::from("s"));
        let mut params = Params::default();
        let sql = patch_update(&scope, &move_patch(2, 3, 2, 7, -2, 4, 0), &mut params);
        assert_eq!(params.as_refs().len(), 8);
        assert!(sql.contains("WHERE scope = $1 AND NOT trashed AND"));
        assert!(sql.contains("lft = CASE WHEN lft BETWEEN $2 AND $3 THEN lft + $7"));
    }

    #[test]
    fn enclosing_filter_uses_strict_bounds() {
        let scope = ScopeFilter::with_trashed(&ScopeKey::from("s"));
        let mut params = Params::default();
        let sql = filter_clause("", &scope, &RowFilter::enclosing(5, 6), &mut params);
        assert_eq!(sql, "scope = $1 AND lft < $2 AND rgt > $3");
    }
}
