//! Integrity audit of a stored encoding.
//!
//! Four independent checks, each a count of offending rows (or row pairs). The auditor only
//! reports; repairing is an explicit `fix_tree` / `rebuild_tree` call.

use std::collections::HashMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ids::NodeKey;
use crate::node::NodeRow;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Violation {
    /// `left >= right` or an even `right - left`.
    Oddness,
    /// Distinct rows sharing a bound value, counted per pair.
    Duplicates,
    /// Parent does not strictly contain the child, or is not the nearest row that does.
    WrongParent,
    /// Parent reference that resolves to no row of the scope.
    MissingParent,
}

impl Violation {
    pub const ALL: [Violation; 4] = [
        Violation::Oddness,
        Violation::Duplicates,
        Violation::WrongParent,
        Violation::MissingParent,
    ];
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ErrorCounts {
    pub oddness: u64,
    pub duplicates: u64,
    pub wrong_parent: u64,
    pub missing_parent: u64,
}

impl ErrorCounts {
    pub fn total(&self) -> u64 {
        self.oddness + self.duplicates + self.wrong_parent + self.missing_parent
    }

    pub fn is_broken(&self) -> bool {
        self.total() > 0
    }

    pub fn get(&self, violation: Violation) -> u64 {
        match violation {
            Violation::Oddness => self.oddness,
            Violation::Duplicates => self.duplicates,
            Violation::WrongParent => self.wrong_parent,
            Violation::MissingParent => self.missing_parent,
        }
    }

    pub fn set(&mut self, violation: Violation, count: u64) {
        match violation {
            Violation::Oddness => self.oddness = count,
            Violation::Duplicates => self.duplicates = count,
            Violation::WrongParent => self.wrong_parent = count,
            Violation::MissingParent => self.missing_parent = count,
        }
    }
}

impl fmt::Display for ErrorCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "oddness={} duplicates={} wrong_parent={} missing_parent={}",
            self.oddness, self.duplicates, self.wrong_parent, self.missing_parent
        )
    }
}

/// Count one class of violation among the rows of a single scope.
pub fn count_violations(rows: &[NodeRow], violation: Violation) -> u64 {
    match violation {
        Violation::Oddness => count_oddness(rows),
        Violation::Duplicates => count_duplicates(rows),
        Violation::WrongParent => count_wrong_parent(rows),
        Violation::MissingParent => count_missing_parent(rows),
    }
}

pub fn count_all(rows: &[NodeRow]) -> ErrorCounts {
    let mut counts = ErrorCounts::default();
    for violation in Violation::ALL {
        counts.set(violation, count_violations(rows, violation));
    }
    counts
}

fn count_oddness(rows: &[NodeRow]) -> u64 {
    rows.iter()
        .filter(|row| row.left >= row.right || (row.right - row.left) % 2 == 0)
        .count() as u64
}

fn count_duplicates(rows: &[NodeRow]) -> u64 {
    // Pairs are counted once each, matching a self-join on `a.key < b.key`.
    let mut owners: HashMap<i64, Vec<NodeKey>> = HashMap::new();
    for row in rows {
        owners.entry(row.left).or_default().push(row.key);
        if row.right != row.left {
            owners.entry(row.right).or_default().push(row.key);
        }
    }

    let mut pairs = std::collections::HashSet::new();
    for keys in owners.values() {
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                if a != b {
                    pairs.insert((*a.min(b), *a.max(b)));
                }
            }
        }
    }
    pairs.len() as u64
}

fn count_wrong_parent(rows: &[NodeRow]) -> u64 {
    let by_key: HashMap<NodeKey, &NodeRow> = rows.iter().map(|row| (row.key, row)).collect();

    rows.iter()
        .filter(|child| {
            let Some(parent) = child.parent.and_then(|key| by_key.get(&key)) else {
                return false;
            };
            let (p, c) = (parent.bounds(), child.bounds());
            if !p.contains(&c) {
                return true;
            }
            rows.iter().any(|interm| {
                interm.key != parent.key
                    && interm.key != child.key
                    && interm.bounds().contains(&c)
                    && p.contains(&interm.bounds())
            })
        })
        .count() as u64
}

fn count_missing_parent(rows: &[NodeRow]) -> u64 {
    let keys: std::collections::HashSet<NodeKey> = rows.iter().map(|row| row.key).collect();
    rows.iter()
        .filter(|row| row.parent.is_some_and(|parent| !keys.contains(&parent)))
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ScopeKey;

    fn row(key: u128, parent: Option<u128>, left: i64, right: i64) -> NodeRow {
        NodeRow {
            key: NodeKey(key),
            scope: ScopeKey::from("s"),
            parent: parent.map(NodeKey),
            left,
            right,
            depth: 0,
            trashed: false,
            payload: None,
        }
    }

    fn valid_tree() -> Vec<NodeRow> {
        vec![
            row(1, None, 1, 8),
            row(2, Some(1), 2, 3),
            row(3, Some(1), 4, 7),
            row(4, Some(3), 5, 6),
        ]
    }

    #[test]
    fn valid_tree_has_no_errors() {
        assert_eq!(count_all(&valid_tree()), ErrorCounts::default());
    }

    #[test]
    fn oddness_flags_inverted_and_even_intervals() {
        let mut rows = valid_tree();
        rows[1].right = 2;
        rows[3].right = 5;
        assert_eq!(count_violations(&rows, Violation::Oddness), 2);
    }

    #[test]
    fn duplicates_are_counted_per_pair() {
        let mut rows = valid_tree();
        rows[1].left = 4;
        rows[1].right = 5;
        // Row 2 now collides with row 3 (left 4) and row 4 (left/right 5).
        assert_eq!(count_violations(&rows, Violation::Duplicates), 2);
    }

    #[test]
    fn parent_must_be_nearest_container() {
        let mut rows = valid_tree();
        // C points at the root although B sits between them.
        rows[3].parent = Some(NodeKey(1));
        assert_eq!(count_violations(&rows, Violation::WrongParent), 1);

        let mut rows = valid_tree();
        // A claims B as parent but lies outside it.
        rows[1].parent = Some(NodeKey(3));
        assert_eq!(count_violations(&rows, Violation::WrongParent), 1);
    }

    #[test]
    fn missing_parent_counts_dangling_references() {
        let mut rows = valid_tree();
        rows[3].parent = Some(NodeKey(99));
        let counts = count_all(&rows);
        assert_eq!(counts.missing_parent, 1);
        assert_eq!(counts.wrong_parent, 0);
        assert!(counts.is_broken());
        assert_eq!(counts.total(), 1);
    }
}
