//! Links from (target, operation) pairs to the threshold that governs them

use std::collections::{BTreeMap, BTreeSet};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::thresholds::ThresholdRegistry;
use crate::types::{validate_identifier, DEFAULT_THRESHOLD};
use crate::{GovernanceError, GovernanceResult};

/// One explicit link, as listed by [`ActionLinker::links`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLink {
    pub target: String,
    pub operation: String,
    pub threshold_name: String,
}

/// Two-level map target → operation → threshold name, with a reverse index
/// by threshold name so deletion guards don't need a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLinker {
    links: BTreeMap<String, BTreeMap<String, String>>,
    by_threshold: BTreeMap<String, BTreeSet<(String, String)>>,
}

impl ActionLinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, update or remove the link for `(target, operation)`
    pub fn link(
        &mut self,
        target: &str,
        operation: &str,
        threshold_name: &str,
        remove: bool,
        thresholds: &ThresholdRegistry,
    ) -> GovernanceResult<()> {
        validate_identifier("link target", target)?;
        validate_identifier("link operation", operation)?;
        if threshold_name.is_empty() {
            return Err(GovernanceError::InvalidInput("threshold name can't be empty".to_string()));
        }
        if threshold_name == DEFAULT_THRESHOLD {
            return Err(GovernanceError::InvariantViolation(
                "the default threshold can't be assigned".to_string(),
            ));
        }
        if !thresholds.contains(threshold_name) {
            return Err(GovernanceError::NotFound(format!(
                "threshold '{}' doesn't exist, create it first",
                threshold_name
            )));
        }

        match self.get(target, operation).map(str::to_string) {
            Some(current) if remove => {
                self.detach(target, operation, &current);
                info!("Unlinked {}::{} from threshold '{}'", target, operation, current);
            }
            Some(current) => {
                if current == threshold_name {
                    return Err(GovernanceError::AlreadyExists(format!(
                        "{}::{} is already linked with threshold '{}'",
                        target, operation, threshold_name
                    )));
                }
                self.detach(target, operation, &current);
                self.attach(target, operation, threshold_name);
                info!(
                    "Relinked {}::{} from threshold '{}' to '{}'",
                    target, operation, current, threshold_name
                );
            }
            None if remove => {
                return Err(GovernanceError::NotFound(format!(
                    "can't remove a non existing link for {}::{}",
                    target, operation
                )));
            }
            None => {
                self.attach(target, operation, threshold_name);
                info!("Linked {}::{} to threshold '{}'", target, operation, threshold_name);
            }
        }
        Ok(())
    }

    /// Threshold name governing `(target, operation)`
    pub fn resolve(&self, target: &str, operation: &str) -> &str {
        self.get(target, operation).unwrap_or(DEFAULT_THRESHOLD)
    }

    pub fn is_linked(&self, threshold_name: &str) -> bool {
        self.by_threshold
            .get(threshold_name)
            .map_or(false, |pairs| !pairs.is_empty())
    }

    pub fn links(&self) -> Vec<ActionLink> {
        self.links
            .iter()
            .flat_map(|(target, ops)| {
                ops.iter().map(move |(operation, threshold_name)| ActionLink {
                    target: target.clone(),
                    operation: operation.clone(),
                    threshold_name: threshold_name.clone(),
                })
            })
            .collect()
    }

    fn get(&self, target: &str, operation: &str) -> Option<&str> {
        self.links
            .get(target)
            .and_then(|ops| ops.get(operation))
            .map(String::as_str)
    }

    fn attach(&mut self, target: &str, operation: &str, threshold_name: &str) {
        self.links
            .entry(target.to_string())
            .or_default()
            .insert(operation.to_string(), threshold_name.to_string());
        self.by_threshold
            .entry(threshold_name.to_string())
            .or_default()
            .insert((target.to_string(), operation.to_string()));
    }

    fn detach(&mut self, target: &str, operation: &str, threshold_name: &str) {
        if let Some(ops) = self.links.get_mut(target) {
            ops.remove(operation);
            if ops.is_empty() {
                self.links.remove(target);
            }
        }
        if let Some(pairs) = self.by_threshold.get_mut(threshold_name) {
            pairs.remove(&(target.to_string(), operation.to_string()));
            if pairs.is_empty() {
                self.by_threshold.remove(threshold_name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> ThresholdRegistry {
        let mut registry = ThresholdRegistry::new();
        let links = ActionLinker::new();
        registry.upsert_or_delete("treasury", 3, false, false, &links).unwrap();
        registry.upsert_or_delete("ops", 1, false, false, &links).unwrap();
        registry
    }

    #[test]
    fn test_unlinked_operation_falls_back_to_default() {
        let linker = ActionLinker::new();
        assert_eq!(linker.resolve("token", "transfer"), DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_link_update_remove() {
        let thresholds = thresholds();
        let mut linker = ActionLinker::new();

        linker.link("token", "transfer", "treasury", false, &thresholds).unwrap();
        assert_eq!(linker.resolve("token", "transfer"), "treasury");
        assert_eq!(linker.resolve("token", "issue"), DEFAULT_THRESHOLD);
        assert!(linker.is_linked("treasury"));

        assert!(matches!(
            linker.link("token", "transfer", "treasury", false, &thresholds),
            Err(GovernanceError::AlreadyExists(_))
        ));

        linker.link("token", "transfer", "ops", false, &thresholds).unwrap();
        assert_eq!(linker.resolve("token", "transfer"), "ops");
        assert!(!linker.is_linked("treasury"));
        assert!(linker.is_linked("ops"));

        linker.link("token", "transfer", "ops", true, &thresholds).unwrap();
        assert_eq!(linker.resolve("token", "transfer"), DEFAULT_THRESHOLD);
        assert!(!linker.is_linked("ops"));
        assert!(linker.links().is_empty());

        assert!(matches!(
            linker.link("token", "transfer", "ops", true, &thresholds),
            Err(GovernanceError::NotFound(_))
        ));
    }

    #[test]
    fn test_link_validation() {
        let thresholds = thresholds();
        let mut linker = ActionLinker::new();

        assert!(matches!(
            linker.link("", "transfer", "ops", false, &thresholds),
            Err(GovernanceError::InvalidInput(_))
        ));
        assert!(matches!(
            linker.link("token", "", "ops", false, &thresholds),
            Err(GovernanceError::InvalidInput(_))
        ));
        assert!(matches!(
            linker.link("token", "transfer", "", false, &thresholds),
            Err(GovernanceError::InvalidInput(_))
        ));
        assert!(matches!(
            linker.link("token", "transfer", DEFAULT_THRESHOLD, false, &thresholds),
            Err(GovernanceError::InvariantViolation(_))
        ));
        assert!(matches!(
            linker.link("token", "transfer", "missing", false, &thresholds),
            Err(GovernanceError::NotFound(_))
        ));
    }

    #[test]
    fn test_links_listing_is_ordered() {
        let thresholds = thresholds();
        let mut linker = ActionLinker::new();
        linker.link("token", "transfer", "treasury", false, &thresholds).unwrap();
        linker.link("dex", "swap", "ops", false, &thresholds).unwrap();
        linker.link("token", "burn", "treasury", false, &thresholds).unwrap();

        let listed: Vec<String> = linker
            .links()
            .into_iter()
            .map(|l| format!("{}::{}={}", l.target, l.operation, l.threshold_name))
            .collect();
        assert_eq!(
            listed,
            vec!["dex::swap=ops", "token::burn=treasury", "token::transfer=treasury"]
        );
    }
}
