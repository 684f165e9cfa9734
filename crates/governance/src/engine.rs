//! Governance entry points
//!
//! The engine holds no state of its own. Each call gets the configuration
//! snapshot, the account directory and the current time it should decide
//! against, and mutates the [`GroupState`] it is handed. Callers that need
//! all-or-nothing semantics run it through [`GroupState::transact`].

use std::collections::BTreeSet;
use serde::Serialize;
use tracing::{debug, info};

use covenant_config::GroupConfig;
use covenant_core::crypto::fingerprint;

use crate::custodians::Liveness;
use crate::directory::AccountDirectory;
use crate::proposals::{effective_weight, ArchiveTag, Proposal};
use crate::state::GroupState;
use crate::types::{validate_identifier, AccountId, AuthContext, Operation};
use crate::{GovernanceError, GovernanceResult};

/// Most operations a single proposal may bundle
pub const MAX_OPERATIONS: usize = 7;

/// Shortest lifetime a stored proposal may be given, in seconds
pub const MIN_EXPIRATION_WINDOW: u64 = 3600;

/// Outcome of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Stored under this id, waiting for approvals
    Stored(u64),
    /// Nothing to approve; dispatch these right away
    Immediate(Vec<Operation>),
}

impl Submission {
    pub fn proposal_id(&self) -> Option<u64> {
        match self {
            Submission::Stored(id) => Some(*id),
            Submission::Immediate(_) => None,
        }
    }
}

/// What the fingerprint of a proposal commits to
#[derive(Serialize)]
struct SubmissionDigest<'s> {
    id: u64,
    proposer: &'s AccountId,
    title: &'s str,
    description: &'s str,
    operations: &'s [Operation],
    expiration: u64,
    submitted_at: u64,
}

pub struct GovernanceEngine<'a> {
    config: &'a GroupConfig,
    directory: &'a dyn AccountDirectory,
    now: u64,
}

impl<'a> GovernanceEngine<'a> {
    pub fn new(config: &'a GroupConfig, directory: &'a dyn AccountDirectory, now: u64) -> Self {
        Self { config, directory, now }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn liveness(&self) -> Liveness {
        Liveness::new(self.now, self.config.inactivity_window())
    }

    fn retention(&self) -> usize {
        usize::from(self.config.proposal_archive_size)
    }

    /// Fail unless the governed account itself authorized the call
    pub fn authorize_group(&self, state: &GroupState, auth: &AuthContext) -> GovernanceResult<()> {
        auth.require(&state.group)
    }

    /// Authenticated, enrolled and alive. Stamps the actor's activity on success.
    fn require_live_custodian(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        actor: &AccountId,
    ) -> GovernanceResult<()> {
        auth.require(actor)?;
        let liveness = self.liveness();
        if !state.custodians.is_custodian(actor, &liveness, true, true) {
            return Err(GovernanceError::AuthorizationDenied(format!(
                "{} is not an active custodian",
                actor
            )));
        }
        Ok(())
    }

    pub fn invite_custodian(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        account: &AccountId,
    ) -> GovernanceResult<()> {
        self.authorize_group(state, auth)?;

        if *account == state.group {
            return Err(GovernanceError::InvariantViolation(
                "the governed account can't be its own custodian".to_string(),
            ));
        }
        let max = usize::from(self.config.max_custodians);
        if max > 0 && state.custodians.len() >= max {
            return Err(GovernanceError::InvariantViolation(format!(
                "maximum of {} custodians reached",
                max
            )));
        }
        if !self.directory.is_eligible(account) {
            return Err(GovernanceError::InvalidInput(format!(
                "{} is not eligible to become a custodian",
                account
            )));
        }

        state.custodians.invite(account, self.now)?;
        state.recompute_default_threshold(&self.liveness());
        info!("Invited custodian {} to {}", account, state.group);
        Ok(())
    }

    pub fn remove_custodian(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        account: &AccountId,
    ) -> GovernanceResult<()> {
        self.authorize_group(state, auth)?;
        state.custodians.remove(account)?;
        state.recompute_default_threshold(&self.liveness());
        info!("Removed custodian {} from {}", account, state.group);
        Ok(())
    }

    pub fn set_custodian_weight(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        account: &AccountId,
        weight: u8,
    ) -> GovernanceResult<()> {
        self.authorize_group(state, auth)?;
        state.custodians.set_weight(account, weight)?;
        info!("Custodian {} of {} now weighs {}", account, state.group, weight);
        Ok(())
    }

    /// Proof of life. Returns whether the custodian had gone stale.
    pub fn heartbeat(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        account: &AccountId,
    ) -> GovernanceResult<bool> {
        auth.require(account)?;
        let liveness = self.liveness();
        let was_stale = state.custodians.heartbeat(account, &liveness)?;
        if was_stale {
            state.recompute_default_threshold(&liveness);
            info!("Custodian {} is active again", account);
        } else {
            debug!("Heartbeat from {}", account);
        }
        Ok(was_stale)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn propose(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        proposer: &AccountId,
        title: &str,
        description: &str,
        operations: Vec<Operation>,
        expiration: u64,
    ) -> GovernanceResult<Submission> {
        self.require_live_custodian(state, auth, proposer)?;

        if operations.is_empty() || operations.len() > MAX_OPERATIONS {
            return Err(GovernanceError::InvalidInput(format!(
                "a proposal carries between 1 and {} operations, got {}",
                MAX_OPERATIONS,
                operations.len()
            )));
        }

        // Strictest threshold wins; the first one seen keeps a tie
        let mut required: Option<(String, i8)> = None;
        for operation in &operations {
            let name = state.links.resolve(&operation.target, &operation.operation);
            let value = state.thresholds.resolve(name)?;
            if value < 0 {
                return Err(GovernanceError::PolicyBlocked(format!(
                    "{} is blocked by threshold '{}'",
                    operation, name
                )));
            }
            if required.as_ref().map_or(true, |(_, max)| value > *max) {
                required = Some((name.to_string(), value));
            }
        }
        let (required_threshold, required_value) = required.ok_or_else(|| {
            GovernanceError::InvalidInput("proposal carries no operations".to_string())
        })?;

        if required_value == 0 && self.config.exec_on_threshold_zero {
            info!(
                "{} submitted {} operations needing no approval, dispatching immediately",
                proposer,
                operations.len()
            );
            return Ok(Submission::Immediate(operations));
        }

        if expiration <= self.now {
            return Err(GovernanceError::InvalidInput("expiration must be in the future".to_string()));
        }
        if expiration < self.now.saturating_add(MIN_EXPIRATION_WINDOW) {
            return Err(GovernanceError::InvalidInput(format!(
                "expiration must be at least {} seconds away",
                MIN_EXPIRATION_WINDOW
            )));
        }

        let id = state.proposals.next_id();
        let digest = SubmissionDigest {
            id,
            proposer,
            title,
            description,
            operations: &operations,
            expiration,
            submitted_at: self.now,
        };
        let fingerprint = fingerprint(&digest)
            .map_err(|e| GovernanceError::Serialization(e.to_string()))?
            .to_hex();

        state.proposals.insert(Proposal {
            id,
            proposer: proposer.clone(),
            title: title.to_string(),
            description: description.to_string(),
            operations,
            submitted_at: self.now,
            expiration,
            approvals: BTreeSet::new(),
            required_threshold: required_threshold.clone(),
            last_actor: proposer.clone(),
            fingerprint,
        })?;

        info!(
            "Proposal {} '{}' submitted by {}, needs threshold '{}' ({})",
            id, title, proposer, required_threshold, required_value
        );
        Ok(Submission::Stored(id))
    }

    /// Add `approver`, dropping prior approvers that no longer qualify
    pub fn approve(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        approver: &AccountId,
        proposal_id: u64,
    ) -> GovernanceResult<()> {
        self.require_live_custodian(state, auth, approver)?;
        let liveness = self.liveness();

        let custodians = &state.custodians;
        let proposal = state.proposals.get_mut(proposal_id)?;
        if proposal.approvals.contains(approver) {
            return Err(GovernanceError::DuplicateApproval(format!(
                "{} already approved proposal {}",
                approver, proposal_id
            )));
        }

        let mut approvals: BTreeSet<AccountId> = proposal
            .approvals
            .iter()
            .filter(|prior| custodians.qualifies(prior, &liveness, true))
            .cloned()
            .collect();
        approvals.insert(approver.clone());

        let pruned = proposal.approvals.len() + 1 - approvals.len();
        if pruned > 0 {
            debug!("Pruned {} stale approvals from proposal {}", pruned, proposal_id);
        }
        proposal.approvals = approvals;
        proposal.last_actor = approver.clone();

        info!("{} approved proposal {}", approver, proposal_id);
        Ok(())
    }

    /// Withdraw an approval, dropping prior approvers that no longer qualify
    pub fn unapprove(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        unapprover: &AccountId,
        proposal_id: u64,
    ) -> GovernanceResult<()> {
        self.require_live_custodian(state, auth, unapprover)?;
        let liveness = self.liveness();

        let custodians = &state.custodians;
        let proposal = state.proposals.get_mut(proposal_id)?;
        if !proposal.approvals.contains(unapprover) {
            return Err(GovernanceError::NotFound(format!(
                "{} has not approved proposal {}",
                unapprover, proposal_id
            )));
        }

        proposal.approvals = proposal
            .approvals
            .iter()
            .filter(|prior| *prior != unapprover && custodians.qualifies(prior, &liveness, true))
            .cloned()
            .collect();
        proposal.last_actor = unapprover.clone();

        info!("{} withdrew approval of proposal {}", unapprover, proposal_id);
        Ok(())
    }

    /// Withdraw a proposal. Only its proposer may do so.
    pub fn cancel(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        canceler: &AccountId,
        proposal_id: u64,
    ) -> GovernanceResult<()> {
        auth.require(canceler)?;

        let proposal = state
            .proposals
            .get(proposal_id)
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {} not found", proposal_id)))?;
        if proposal.proposer != *canceler {
            return Err(GovernanceError::AuthorizationDenied(format!(
                "only {} can cancel proposal {}",
                proposal.proposer, proposal_id
            )));
        }

        state
            .proposals
            .archive(ArchiveTag::Cancelled, proposal_id, self.now, self.retention())?;
        state.custodians.is_custodian(canceler, &self.liveness(), true, true);

        info!("{} cancelled proposal {}", canceler, proposal_id);
        Ok(())
    }

    /// Admit a proposal whose qualifying approvals meet its threshold.
    ///
    /// Returns the operations to dispatch, in bundle order.
    pub fn exec(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        executer: &AccountId,
        proposal_id: u64,
    ) -> GovernanceResult<Vec<Operation>> {
        auth.require(executer)?;
        let liveness = self.liveness();

        let proposal = state
            .proposals
            .get(proposal_id)
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {} not found", proposal_id)))?;
        if proposal.is_expired(self.now) {
            return Err(GovernanceError::Expired(format!(
                "proposal {} expired at {}",
                proposal_id, proposal.expiration
            )));
        }

        let required = state.thresholds.resolve(&proposal.required_threshold)?;
        if required < 0 {
            return Err(GovernanceError::PolicyBlocked(format!(
                "threshold '{}' of proposal {} is now blocked",
                proposal.required_threshold, proposal_id
            )));
        }
        let approved = effective_weight(proposal, &state.custodians, &liveness);
        // `required` is non-negative here
        if approved < required as u32 {
            return Err(GovernanceError::QuorumNotMet(format!(
                "proposal {} has {} of {} required weight",
                proposal_id, approved, required
            )));
        }

        let operations = proposal.operations.clone();
        state
            .proposals
            .archive(ArchiveTag::Executed, proposal_id, self.now, self.retention())?;
        state.custodians.is_custodian(executer, &liveness, true, true);

        info!(
            "{} executed proposal {} with weight {}/{}",
            executer, proposal_id, approved, required
        );
        Ok(operations)
    }

    /// Delete up to `batch_size` of the oldest archived records in `scope`
    pub fn archive_batch(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        scope: ArchiveTag,
        batch_size: u32,
    ) -> GovernanceResult<usize> {
        self.authorize_group(state, auth)?;
        state.proposals.batch_truncate(scope, batch_size)
    }

    /// Create, update or delete a named threshold
    pub fn manage_threshold(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        name: &str,
        value: i8,
        delete: bool,
    ) -> GovernanceResult<()> {
        self.authorize_group(state, auth)?;
        if delete && state.proposals.requires_threshold(name) {
            return Err(GovernanceError::InvariantViolation(format!(
                "threshold '{}' is required by a live proposal",
                name
            )));
        }
        state
            .thresholds
            .upsert_or_delete(name, value, delete, false, &state.links)
    }

    /// Point `(target, operation)` at a threshold, or drop the link
    pub fn manage_action_link(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        target: &str,
        operation: &str,
        threshold_name: &str,
        remove: bool,
    ) -> GovernanceResult<()> {
        self.authorize_group(state, auth)?;
        validate_identifier("link target", target)?;
        validate_identifier("link operation", operation)?;
        if !self.directory.exists(target) {
            return Err(GovernanceError::NotFound(format!("account {} doesn't exist", target)));
        }
        state
            .links
            .link(target, operation, threshold_name, remove, &state.thresholds)
    }

    pub fn register_member(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        actor: &AccountId,
    ) -> GovernanceResult<()> {
        auth.require(actor)?;
        if !self.config.member_registration {
            return Err(GovernanceError::PolicyBlocked(
                "member registration is disabled".to_string(),
            ));
        }
        if !self.directory.is_eligible(actor) {
            return Err(GovernanceError::InvalidInput(format!(
                "{} is not eligible for membership",
                actor
            )));
        }
        if *actor == state.group {
            return Err(GovernanceError::InvariantViolation(
                "the governed account can't be its own member".to_string(),
            ));
        }
        state.members.register(actor, self.now)?;
        info!("{} registered as member of {}", actor, state.group);
        Ok(())
    }

    pub fn unregister_member(
        &self,
        state: &mut GroupState,
        auth: &AuthContext,
        actor: &AccountId,
    ) -> GovernanceResult<()> {
        auth.require(actor)?;
        if self.directory.has_balance(actor) {
            return Err(GovernanceError::InvariantViolation(format!(
                "{} must withdraw its balance before leaving",
                actor
            )));
        }
        state.members.unregister(actor)?;
        info!("{} left {}", actor, state.group);
        Ok(())
    }
}
