//! Named approval thresholds
//!
//! A threshold is the minimum approved custodian weight an operation needs.
//! Negative values block every operation governed by that name.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::links::ActionLinker;
use crate::types::{validate_identifier, DEFAULT_THRESHOLD};
use crate::{GovernanceError, GovernanceResult};

/// Strict majority of `custodian_count`, saturating at `i8::MAX`
pub fn default_threshold_for(custodian_count: usize) -> i8 {
    let majority = custodian_count / 2 + 1;
    i8::try_from(majority).unwrap_or(i8::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdRegistry {
    thresholds: BTreeMap<String, i8>,
}

impl Default for ThresholdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThresholdRegistry {
    /// A registry holding only the default threshold, sized for one custodian
    pub fn new() -> Self {
        Self {
            thresholds: BTreeMap::from([(DEFAULT_THRESHOLD.to_string(), default_threshold_for(1))]),
        }
    }

    /// Create, update or delete a named threshold.
    ///
    /// Only privileged callers (the recompute policy) may write `"default"`,
    /// and nobody may delete it. Linked thresholds can't be deleted.
    pub fn upsert_or_delete(
        &mut self,
        name: &str,
        value: i8,
        delete: bool,
        privileged: bool,
        links: &ActionLinker,
    ) -> GovernanceResult<()> {
        validate_identifier("threshold name", name)?;

        if name == DEFAULT_THRESHOLD {
            if !privileged {
                return Err(GovernanceError::InvariantViolation(
                    "the default threshold is managed automatically".to_string(),
                ));
            }
            if delete {
                return Err(GovernanceError::InvariantViolation(
                    "the default threshold can't be removed".to_string(),
                ));
            }
        }

        if delete {
            if !self.thresholds.contains_key(name) {
                return Err(GovernanceError::NotFound(format!("threshold '{}' doesn't exist", name)));
            }
            if self.is_linked(name, links) {
                return Err(GovernanceError::InvariantViolation(format!(
                    "threshold '{}' is linked to actions, unlink them first",
                    name
                )));
            }
            self.thresholds.remove(name);
            info!("Removed threshold '{}'", name);
        } else {
            self.thresholds.insert(name.to_string(), value);
            info!("Threshold '{}' set to {}", name, value);
        }
        Ok(())
    }

    /// Re-derive the default threshold from the qualifying custodian count
    pub fn recompute_default(&mut self, custodian_count: usize) {
        let value = default_threshold_for(custodian_count);
        let previous = self.thresholds.insert(DEFAULT_THRESHOLD.to_string(), value);
        if previous != Some(value) {
            info!(
                "Default threshold recomputed to {} for {} qualifying custodians",
                value, custodian_count
            );
        }
    }

    /// Value of a stored threshold. A missing name means the stored state is broken.
    pub fn resolve(&self, name: &str) -> GovernanceResult<i8> {
        self.thresholds.get(name).copied().ok_or_else(|| {
            GovernanceError::StateCorruption(format!("threshold '{}' referenced but not stored", name))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.thresholds.contains_key(name)
    }

    pub fn is_linked(&self, name: &str, links: &ActionLinker) -> bool {
        links.is_linked(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i8)> {
        self.thresholds.iter().map(|(name, value)| (name.as_str(), *value))
    }
}
