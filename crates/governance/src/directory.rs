//! What the group needs to know about accounts it doesn't own

use std::collections::{BTreeMap, BTreeSet};

use crate::types::AccountId;

/// Account lookups answered by the hosting platform
pub trait AccountDirectory: Send + Sync {
    /// Whether `account` exists at all
    fn exists(&self, account: &str) -> bool;

    /// Whether `account` may join the group as custodian or member
    fn is_eligible(&self, account: &AccountId) -> bool;

    /// Whether `account` still holds funds with the group
    fn has_balance(&self, account: &AccountId) -> bool;
}

/// Every account exists and is eligible, nobody holds a balance
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenDirectory;

impl AccountDirectory for OpenDirectory {
    fn exists(&self, _account: &str) -> bool {
        true
    }

    fn is_eligible(&self, _account: &AccountId) -> bool {
        true
    }

    fn has_balance(&self, _account: &AccountId) -> bool {
        false
    }
}

/// Directory backed by explicit account lists
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    known: BTreeSet<String>,
    ineligible: BTreeSet<String>,
    balances: BTreeMap<String, u64>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add known, eligible accounts
    pub fn with_accounts<I, S>(mut self, accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known.extend(accounts.into_iter().map(Into::into));
        self
    }

    /// Mark a known account as not allowed to join
    pub fn with_ineligible(mut self, account: impl Into<String>) -> Self {
        let account = account.into();
        self.known.insert(account.clone());
        self.ineligible.insert(account);
        self
    }

    pub fn set_balance(&mut self, account: impl Into<String>, amount: u64) {
        let account = account.into();
        if amount == 0 {
            self.balances.remove(&account);
        } else {
            self.balances.insert(account, amount);
        }
    }
}

impl AccountDirectory for StaticDirectory {
    fn exists(&self, account: &str) -> bool {
        self.known.contains(account)
    }

    fn is_eligible(&self, account: &AccountId) -> bool {
        self.known.contains(account.as_str()) && !self.ineligible.contains(account.as_str())
    }

    fn has_balance(&self, account: &AccountId) -> bool {
        self.balances.get(account.as_str()).map_or(false, |amount| *amount > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_directory() {
        let mut directory = StaticDirectory::new()
            .with_accounts(["alice", "token"])
            .with_ineligible("mallory");
        let alice = AccountId::new("alice").unwrap();
        let mallory = AccountId::new("mallory").unwrap();
        let ghost = AccountId::new("ghost").unwrap();

        assert!(directory.exists("token"));
        assert!(directory.exists("mallory"));
        assert!(!directory.exists("ghost"));
        assert!(directory.is_eligible(&alice));
        assert!(!directory.is_eligible(&mallory));
        assert!(!directory.is_eligible(&ghost));

        directory.set_balance("alice", 10);
        assert!(directory.has_balance(&alice));
        directory.set_balance("alice", 0);
        assert!(!directory.has_balance(&alice));
    }

    #[test]
    fn test_open_directory() {
        let alice = AccountId::new("alice").unwrap();
        assert!(OpenDirectory.exists("anything"));
        assert!(OpenDirectory.is_eligible(&alice));
        assert!(!OpenDirectory.has_balance(&alice));
    }
}
