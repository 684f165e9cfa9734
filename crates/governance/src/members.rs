//! Registered members of the group
//!
//! Members hold no voting weight. They are the accounts the group serves.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use crate::types::AccountId;
use crate::{GovernanceError, GovernanceResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub account: AccountId,
    /// When the member accepted the group's terms
    pub agreement_date: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRegistry {
    members: BTreeMap<AccountId, Member>,
}

impl MemberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, account: &AccountId, now: u64) -> GovernanceResult<()> {
        if self.members.contains_key(account) {
            return Err(GovernanceError::AlreadyExists(format!("{} is already a member", account)));
        }
        self.members.insert(
            account.clone(),
            Member {
                account: account.clone(),
                agreement_date: now,
            },
        );
        Ok(())
    }

    pub fn unregister(&mut self, account: &AccountId) -> GovernanceResult<Member> {
        self.members
            .remove(account)
            .ok_or_else(|| GovernanceError::NotFound(format!("{} is not a member", account)))
    }

    pub fn get(&self, account: &AccountId) -> Option<&Member> {
        self.members.get(account)
    }

    pub fn contains(&self, account: &AccountId) -> bool {
        self.members.contains_key(account)
    }

    /// Member count
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }
}
