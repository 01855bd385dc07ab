use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Primary key of a node row. Unique across every scope of a table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeKey(pub u128);

impl NodeKey {
    pub fn to_be_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }

    /// Key that follows this one; used by stores that allocate keys sequentially.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u128> for NodeKey {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

/// Partition key. Range comparisons and mutations never cross two scopes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScopeKey(pub String);

impl ScopeKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScopeKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scope plus trashed-row visibility, passed explicitly to every storage call.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ScopeFilter {
    pub scope: ScopeKey,
    pub with_trashed: bool,
}

impl ScopeFilter {
    pub fn live(scope: &ScopeKey) -> Self {
        Self {
            scope: scope.clone(),
            with_trashed: false,
        }
    }

    pub fn with_trashed(scope: &ScopeKey) -> Self {
        Self {
            scope: scope.clone(),
            with_trashed: true,
        }
    }
}
