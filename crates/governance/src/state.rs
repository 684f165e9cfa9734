//! The aggregate every governance transaction commits as a unit

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::custodians::{CustodianRegistry, Liveness};
use crate::links::ActionLinker;
use crate::members::MemberRegistry;
use crate::proposals::ProposalStore;
use crate::thresholds::ThresholdRegistry;
use crate::types::AccountId;
use crate::{GovernanceError, GovernanceResult};

/// Complete state of one governed account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupState {
    pub group: AccountId,
    pub custodians: CustodianRegistry,
    pub thresholds: ThresholdRegistry,
    pub links: ActionLinker,
    pub proposals: ProposalStore,
    pub members: MemberRegistry,
}

impl GroupState {
    /// Create a group controlled by `founders`, all of them active as of `now`
    pub fn bootstrap(group: AccountId, founders: &[AccountId], now: u64) -> GovernanceResult<Self> {
        if founders.is_empty() {
            return Err(GovernanceError::InvalidInput(
                "a group needs at least one founding custodian".to_string(),
            ));
        }
        if founders.contains(&group) {
            return Err(GovernanceError::InvariantViolation(
                "the governed account can't be its own custodian".to_string(),
            ));
        }

        let mut custodians = CustodianRegistry::new();
        for founder in founders {
            if custodians.contains(founder) {
                return Err(GovernanceError::AlreadyExists(format!(
                    "{} listed twice as founder",
                    founder
                )));
            }
            custodians.insert_active(founder, now);
        }

        let mut thresholds = ThresholdRegistry::new();
        thresholds.recompute_default(custodians.len());

        info!("Bootstrapped group {} with {} custodians", group, custodians.len());
        Ok(Self {
            group,
            custodians,
            thresholds,
            links: ActionLinker::new(),
            proposals: ProposalStore::new(),
            members: MemberRegistry::new(),
        })
    }

    /// Run `f` against a staged copy and keep the result only if it succeeds
    pub fn transact<T, F>(&mut self, f: F) -> GovernanceResult<T>
    where
        F: FnOnce(&mut GroupState) -> GovernanceResult<T>,
    {
        let mut staged = self.clone();
        let out = f(&mut staged)?;
        *self = staged;
        Ok(out)
    }

    /// Re-derive the default threshold from custodians alive at `liveness`
    pub fn recompute_default_threshold(&mut self, liveness: &Liveness) {
        let count = self.custodians.qualifying_count(liveness);
        self.thresholds.recompute_default(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_THRESHOLD;

    fn acct(name: &str) -> AccountId {
        AccountId::new(name).unwrap()
    }

    #[test]
    fn test_bootstrap() {
        let state = GroupState::bootstrap(acct("group"), &[acct("a"), acct("b"), acct("c")], 100).unwrap();
        assert_eq!(state.custodians.len(), 3);
        assert_eq!(state.thresholds.resolve(DEFAULT_THRESHOLD).unwrap(), 2);
        assert_eq!(state.custodians.get(&acct("a")).unwrap().last_active, 100);

        assert!(matches!(
            GroupState::bootstrap(acct("group"), &[], 100),
            Err(GovernanceError::InvalidInput(_))
        ));
        assert!(matches!(
            GroupState::bootstrap(acct("group"), &[acct("group")], 100),
            Err(GovernanceError::InvariantViolation(_))
        ));
        assert!(matches!(
            GroupState::bootstrap(acct("group"), &[acct("a"), acct("a")], 100),
            Err(GovernanceError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_transact_discards_on_error() {
        let mut state = GroupState::bootstrap(acct("group"), &[acct("a"), acct("b")], 100).unwrap();
        let before = state.clone();

        let result: GovernanceResult<()> = state.transact(|staged| {
            staged.custodians.remove(&acct("b"))?;
            staged.custodians.remove(&acct("a"))?;
            Ok(())
        });
        assert!(matches!(result, Err(GovernanceError::InvariantViolation(_))));
        assert_eq!(state, before);

        state.transact(|staged| staged.custodians.remove(&acct("b")).map(|_| ())).unwrap();
        assert_eq!(state.custodians.len(), 1);
    }
}
