#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ids::{ScopeFilter, ScopeKey};

/// What happens to a subtree's rows and bounds when it is deleted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DeletePolicy {
    /// Remove the rows and close the gap they leave behind.
    #[default]
    Hard,
    /// Mark the rows trashed and keep their interval reserved. Trashed rows stay
    /// part of the encoding, so restoring them needs no renumbering.
    SoftRetainBounds,
    /// Mark the rows trashed and close the gap among live rows. Trashed rows keep
    /// stale bounds and are ignored by the encoding until restored.
    SoftCloseGap,
}

impl DeletePolicy {
    pub fn is_soft(self) -> bool {
        !matches!(self, DeletePolicy::Hard)
    }

    /// Whether trashed rows take part in bound patches, audits and rebuilds.
    pub fn trashed_in_encoding(self) -> bool {
        matches!(self, DeletePolicy::SoftRetainBounds)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NestedSetConfig {
    pub delete_policy: DeletePolicy,
}

impl NestedSetConfig {
    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    /// Rows the encoding operates on within `scope`.
    pub fn encoding_filter(&self, scope: &ScopeKey) -> ScopeFilter {
        ScopeFilter {
            scope: scope.clone(),
            with_trashed: self.delete_policy.trashed_in_encoding(),
        }
    }

    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| crate::Error::InvalidOperation(e.to_string()))
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;

    #[test]
    fn parses_policy_from_json() {
        let config = NestedSetConfig::from_json(r#"{"delete_policy":"soft_close_gap"}"#).unwrap();
        assert_eq!(config.delete_policy, DeletePolicy::SoftCloseGap);

        let config = NestedSetConfig::from_json("{}").unwrap();
        assert_eq!(config.delete_policy, DeletePolicy::Hard);
    }
}
