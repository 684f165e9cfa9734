//! Custodian membership, weights and liveness
//!
//! A custodian whose last recorded activity is older than the inactivity
//! window keeps its record but stops qualifying for quorum until it shows
//! signs of life again.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{AccountId, DEFAULT_AUTHORITY};
use crate::{GovernanceError, GovernanceResult};

/// A weighted voting member of the group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Custodian {
    pub account: AccountId,
    pub authority: String,
    pub weight: u8,
    pub joined_at: u64,
    pub last_active: u64,
}

/// The instant and window a liveness decision is made against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    pub now: u64,
    pub window: u64,
}

impl Liveness {
    pub fn new(now: u64, window: u64) -> Self {
        Self { now, window }
    }

    /// `now - last_active < window`
    pub fn alive(&self, last_active: u64) -> bool {
        self.now.saturating_sub(last_active) < self.window
    }
}

/// The set of custodians, keyed by account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodianRegistry {
    custodians: BTreeMap<AccountId, Custodian>,
}

impl CustodianRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enrol `account` with weight 1. It has not been active yet.
    pub fn invite(&mut self, account: &AccountId, now: u64) -> GovernanceResult<()> {
        if self.custodians.contains_key(account) {
            return Err(GovernanceError::AlreadyExists(format!(
                "{} is already a custodian",
                account
            )));
        }

        self.custodians.insert(
            account.clone(),
            Custodian {
                account: account.clone(),
                authority: DEFAULT_AUTHORITY.to_string(),
                weight: 1,
                joined_at: now,
                last_active: 0,
            },
        );
        Ok(())
    }

    /// Drop `account`. The last custodian can never be removed.
    pub fn remove(&mut self, account: &AccountId) -> GovernanceResult<Custodian> {
        if !self.custodians.contains_key(account) {
            return Err(GovernanceError::NotFound(format!("{} is not a custodian", account)));
        }
        if self.custodians.len() == 1 {
            return Err(GovernanceError::InvariantViolation(
                "can't remove the last custodian".to_string(),
            ));
        }

        self.custodians
            .remove(account)
            .ok_or_else(|| GovernanceError::NotFound(format!("{} is not a custodian", account)))
    }

    /// Membership check used by every governance action.
    ///
    /// With `enforce_liveness` a stale custodian does not count. With
    /// `refresh_liveness` a qualifying custodian's activity is stamped `now`.
    pub fn is_custodian(
        &mut self,
        account: &AccountId,
        liveness: &Liveness,
        refresh_liveness: bool,
        enforce_liveness: bool,
    ) -> bool {
        let Some(custodian) = self.custodians.get_mut(account) else {
            return false;
        };

        if enforce_liveness && !liveness.alive(custodian.last_active) {
            debug!("Custodian {} is inactive", account);
            return false;
        }

        if refresh_liveness {
            custodian.last_active = liveness.now;
        }
        true
    }

    /// Read-only form of [`CustodianRegistry::is_custodian`]
    pub fn qualifies(&self, account: &AccountId, liveness: &Liveness, enforce_liveness: bool) -> bool {
        self.custodians
            .get(account)
            .map_or(false, |c| !enforce_liveness || liveness.alive(c.last_active))
    }

    /// Stamp `account` as active. Returns whether it was stale beforehand.
    pub fn heartbeat(&mut self, account: &AccountId, liveness: &Liveness) -> GovernanceResult<bool> {
        let custodian = self.custodians.get_mut(account).ok_or_else(|| {
            GovernanceError::NotFound(format!("{} is not a custodian, no proof of life needed", account))
        })?;

        let was_stale = !liveness.alive(custodian.last_active);
        custodian.last_active = liveness.now;
        Ok(was_stale)
    }

    /// Change a custodian's voting weight
    pub fn set_weight(&mut self, account: &AccountId, weight: u8) -> GovernanceResult<()> {
        if weight == 0 {
            return Err(GovernanceError::InvalidInput("custodian weight must be positive".to_string()));
        }
        let custodian = self
            .custodians
            .get_mut(account)
            .ok_or_else(|| GovernanceError::NotFound(format!("{} is not a custodian", account)))?;
        custodian.weight = weight;
        Ok(())
    }

    /// Custodians that currently count towards quorum
    pub fn qualifying_count(&self, liveness: &Liveness) -> usize {
        self.custodians
            .values()
            .filter(|c| liveness.alive(c.last_active))
            .count()
    }

    pub fn get(&self, account: &AccountId) -> Option<&Custodian> {
        self.custodians.get(account)
    }

    pub fn contains(&self, account: &AccountId) -> bool {
        self.custodians.contains_key(account)
    }

    pub fn len(&self) -> usize {
        self.custodians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.custodians.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Custodian> {
        self.custodians.values()
    }

    /// Custodians ordered from least to most recently active
    pub fn by_last_active(&self) -> Vec<&Custodian> {
        let mut custodians: Vec<&Custodian> = self.custodians.values().collect();
        custodians.sort_by(|a, b| {
            a.last_active
                .cmp(&b.last_active)
                .then_with(|| a.account.cmp(&b.account))
        });
        custodians
    }

    /// Seed a founding custodian that is active from the start
    pub(crate) fn insert_active(&mut self, account: &AccountId, now: u64) {
        self.custodians.insert(
            account.clone(),
            Custodian {
                account: account.clone(),
                authority: DEFAULT_AUTHORITY.to_string(),
                weight: 1,
                joined_at: now,
                last_active: now,
            },
        );
    }
}
