//! Covenant
//!
//! Weighted multi-party custody of shared accounts: custodians approve
//! bundles of operations against per-operation thresholds instead of a
//! single owning key.

/// Module version information
pub mod version {
    /// The current version of the Covenant library
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Re-export member crates
pub use covenant_core as common;
pub use covenant_config as config;
pub use covenant_governance as governance;

/// The types most hosts need
pub mod prelude {
    pub use covenant_config::GroupConfig;
    pub use covenant_core::{Clock, FileStorage, ManualClock, MemoryStorage, Storage, SystemClock};
    pub use covenant_governance::{
        AccountDirectory, AccountId, ArchiveTag, AuthContext, DispatchTicket, GovernanceError,
        GovernanceResult, GroupService, LoggingDispatcher, OpenDirectory, Operation,
        OperationDispatcher, ProposalOutcome, StaticDirectory,
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn version_is_available() {
        assert!(!super::version::VERSION.is_empty());
    }
}
