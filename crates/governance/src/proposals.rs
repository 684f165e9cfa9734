//! Live proposals and their outcome-scoped archive

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::custodians::{CustodianRegistry, Liveness};
use crate::types::{AccountId, Operation};
use crate::{GovernanceError, GovernanceResult};

/// A bundle of operations waiting for enough approved weight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub proposer: AccountId,
    pub title: String,
    pub description: String,
    pub operations: Vec<Operation>,
    pub submitted_at: u64,
    pub expiration: u64,
    /// Raw approvals as last written; may still name removed or stale custodians
    pub approvals: BTreeSet<AccountId>,
    pub required_threshold: String,
    pub last_actor: AccountId,
    /// Hex SHA-256 of the submission, for correlating with the originating call
    pub fingerprint: String,
}

impl Proposal {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiration
    }
}

/// Terminal outcome a proposal is archived under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveTag {
    Cancelled,
    Executed,
}

impl fmt::Display for ArchiveTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveTag::Cancelled => f.write_str("cancelled"),
            ArchiveTag::Executed => f.write_str("executed"),
        }
    }
}

impl FromStr for ArchiveTag {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cancelled" => Ok(ArchiveTag::Cancelled),
            "executed" => Ok(ArchiveTag::Executed),
            other => Err(GovernanceError::InvalidInput(format!(
                "'{}' is not an archive scope",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedProposal {
    pub outcome: ArchiveTag,
    pub archived_at: u64,
    pub proposal: Proposal,
}

/// Sum of weights of approvers that qualify right now.
///
/// Never cached: removals and lapsed liveness are accounted for at the moment
/// of reading.
pub fn effective_weight(proposal: &Proposal, registry: &CustodianRegistry, liveness: &Liveness) -> u32 {
    proposal
        .approvals
        .iter()
        .filter(|approver| registry.qualifies(approver, liveness, true))
        .filter_map(|approver| registry.get(approver))
        .map(|custodian| u32::from(custodian.weight))
        .sum()
}

/// Archive scopes are keyed by archive sequence, so the oldest record is
/// always the one archived first, whatever its proposal id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalStore {
    next_id: u64,
    next_archive_seq: u64,
    live: BTreeMap<u64, Proposal>,
    cancelled: BTreeMap<u64, ArchivedProposal>,
    executed: BTreeMap<u64, ArchivedProposal>,
}

impl Default for ProposalStore {
    fn default() -> Self {
        Self {
            next_id: 1,
            next_archive_seq: 1,
            live: BTreeMap::new(),
            cancelled: BTreeMap::new(),
            executed: BTreeMap::new(),
        }
    }
}

impl ProposalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next inserted proposal must carry. Ids are never reused.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn insert(&mut self, proposal: Proposal) -> GovernanceResult<u64> {
        if proposal.id != self.next_id {
            return Err(GovernanceError::StateCorruption(format!(
                "proposal id {} out of sequence, expected {}",
                proposal.id, self.next_id
            )));
        }
        let id = proposal.id;
        self.live.insert(id, proposal);
        self.next_id += 1;
        debug!("Stored proposal {}", id);
        Ok(id)
    }

    pub fn get(&self, id: u64) -> Option<&Proposal> {
        self.live.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> GovernanceResult<&mut Proposal> {
        self.live
            .get_mut(&id)
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {} not found", id)))
    }

    pub fn live(&self) -> impl Iterator<Item = &Proposal> {
        self.live.values()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Whether any live proposal is bound to `threshold_name`
    pub fn requires_threshold(&self, threshold_name: &str) -> bool {
        self.live.values().any(|p| p.required_threshold == threshold_name)
    }

    /// Records of `tag`, oldest archived first
    pub fn archived(&self, tag: ArchiveTag) -> impl Iterator<Item = &ArchivedProposal> {
        self.scope(tag).values()
    }

    pub fn archived_get(&self, tag: ArchiveTag, id: u64) -> Option<&ArchivedProposal> {
        self.scope(tag).values().find(|record| record.proposal.id == id)
    }

    /// Move a live proposal into the `tag` scope.
    ///
    /// With a non-zero `retention` only the newest `retention` records of the
    /// scope survive.
    pub fn archive(&mut self, tag: ArchiveTag, id: u64, now: u64, retention: usize) -> GovernanceResult<()> {
        let proposal = self
            .live
            .remove(&id)
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {} not found", id)))?;

        let seq = self.next_archive_seq;
        self.next_archive_seq += 1;
        let scope = self.scope_mut(tag);
        scope.insert(
            seq,
            ArchivedProposal {
                outcome: tag,
                archived_at: now,
                proposal,
            },
        );

        if retention > 0 {
            while scope.len() > retention {
                if let Some((_, evicted)) = scope.pop_first() {
                    debug!(
                        "Archive scope {} over retention, dropped proposal {}",
                        tag, evicted.proposal.id
                    );
                }
            }
        }

        info!("Proposal {} archived as {}", id, tag);
        Ok(())
    }

    /// Delete up to `batch_size` of the oldest records in `tag`
    pub fn batch_truncate(&mut self, tag: ArchiveTag, batch_size: u32) -> GovernanceResult<usize> {
        if batch_size == 0 {
            return Err(GovernanceError::InvalidInput("batch size must be positive".to_string()));
        }
        let scope = self.scope_mut(tag);
        if scope.is_empty() {
            return Err(GovernanceError::NotFound(format!("archive scope {} is empty", tag)));
        }

        let mut removed = 0usize;
        while removed < batch_size as usize && scope.pop_first().is_some() {
            removed += 1;
        }
        info!("Truncated {} records from archive scope {}", removed, tag);
        Ok(removed)
    }

    fn scope(&self, tag: ArchiveTag) -> &BTreeMap<u64, ArchivedProposal> {
        match tag {
            ArchiveTag::Cancelled => &self.cancelled,
            ArchiveTag::Executed => &self.executed,
        }
    }

    fn scope_mut(&mut self, tag: ArchiveTag) -> &mut BTreeMap<u64, ArchivedProposal> {
        match tag {
            ArchiveTag::Cancelled => &mut self.cancelled,
            ArchiveTag::Executed => &mut self.executed,
        }
    }
}
