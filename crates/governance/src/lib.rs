//! Governance module for Covenant
//!
//! Weighted multi-party custody of a shared account: custodians with weights
//! and liveness, named approval thresholds linked to the operations they
//! gate, and the proposal lifecycle from submission to execution.

use thiserror::Error;

use covenant_config::ConfigError;
use covenant_core::StorageError;

pub mod types;
pub mod custodians;
pub mod thresholds;
pub mod links;
pub mod proposals;
pub mod members;
pub mod state;
pub mod directory;
pub mod dispatch;
pub mod engine;
pub mod service;

pub use types::{AccountId, AuthContext, Operation, DEFAULT_AUTHORITY, DEFAULT_THRESHOLD};
pub use custodians::{Custodian, CustodianRegistry, Liveness};
pub use thresholds::{default_threshold_for, ThresholdRegistry};
pub use links::{ActionLink, ActionLinker};
pub use proposals::{effective_weight, ArchiveTag, ArchivedProposal, Proposal, ProposalStore};
pub use members::{Member, MemberRegistry};
pub use state::GroupState;
pub use directory::{AccountDirectory, OpenDirectory, StaticDirectory};
pub use dispatch::{DispatchTicket, LoggingDispatcher, OperationDispatcher, RecordingDispatcher};
pub use engine::{GovernanceEngine, Submission, MAX_OPERATIONS, MIN_EXPIRATION_WINDOW};
pub use service::{GroupService, ProposalOutcome};

/// Error types for governance operations
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// The caller lacks the authority the operation needs
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Duplicate approval: {0}")]
    DuplicateApproval(String),

    /// The call would break a structural rule of the group
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A negative threshold or a disabled feature forbids the call
    #[error("Blocked by policy: {0}")]
    PolicyBlocked(String),

    #[error("Quorum not met: {0}")]
    QuorumNotMet(String),

    #[error("Expired: {0}")]
    Expired(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored state references something that isn't there
    #[error("State corruption: {0}")]
    StateCorruption(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for governance operations
pub type GovernanceResult<T> = Result<T, GovernanceError>;

impl From<serde_json::Error> for GovernanceError {
    fn from(err: serde_json::Error) -> Self {
        GovernanceError::Serialization(err.to_string())
    }
}
