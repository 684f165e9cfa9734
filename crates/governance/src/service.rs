//! Persisted host for one governed group
//!
//! Every entry point is a single serialized transaction: the engine runs
//! against a staged copy of the state, the copy is written to storage, and
//! only then does it replace the in-memory state. Admitted operations are
//! handed to the dispatcher after the commit.

use std::sync::Arc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use covenant_config::GroupConfig;
use covenant_core::{Clock, Storage, StorageError};

use crate::directory::AccountDirectory;
use crate::dispatch::{spawn_dispatch, DispatchTicket, OperationDispatcher};
use crate::engine::{GovernanceEngine, Submission};
use crate::proposals::{ArchiveTag, Proposal};
use crate::state::GroupState;
use crate::types::{AccountId, AuthContext, Operation};
use crate::{GovernanceError, GovernanceResult};

/// Path constants for storage
const STATE_PATH: &str = "governance/state";
const CONFIG_PATH: &str = "governance/config";

/// What became of a submission
#[derive(Debug)]
pub enum ProposalOutcome {
    /// Stored, waiting for approvals
    Stored(u64),
    /// Needed no approval and went straight to the dispatcher
    Dispatched(DispatchTicket),
}

impl ProposalOutcome {
    pub fn proposal_id(&self) -> Option<u64> {
        match self {
            ProposalOutcome::Stored(id) => Some(*id),
            ProposalOutcome::Dispatched(_) => None,
        }
    }
}

pub struct GroupService {
    /// Storage for the group state and configuration
    storage: Arc<dyn Storage>,
    directory: Arc<dyn AccountDirectory>,
    dispatcher: Arc<dyn OperationDispatcher>,
    clock: Arc<dyn Clock>,
    /// Current configuration
    config: Arc<RwLock<GroupConfig>>,
    state: Arc<RwLock<GroupState>>,
}

impl GroupService {
    /// Create a new group and persist it. Fails if storage already holds one.
    pub async fn bootstrap(
        storage: Arc<dyn Storage>,
        directory: Arc<dyn AccountDirectory>,
        dispatcher: Arc<dyn OperationDispatcher>,
        clock: Arc<dyn Clock>,
        group: AccountId,
        founders: &[AccountId],
        config: GroupConfig,
    ) -> GovernanceResult<Self> {
        if storage.exists(STATE_PATH).await? {
            return Err(GovernanceError::AlreadyExists(
                "storage already holds a group".to_string(),
            ));
        }
        config.validate()?;

        let state = GroupState::bootstrap(group, founders, clock.now())?;
        put_json(storage.as_ref(), CONFIG_PATH, &config).await?;
        put_json(storage.as_ref(), STATE_PATH, &state).await?;

        Ok(Self {
            storage,
            directory,
            dispatcher,
            clock,
            config: Arc::new(RwLock::new(config)),
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Open a group previously created with [`GroupService::bootstrap`]
    pub async fn load(
        storage: Arc<dyn Storage>,
        directory: Arc<dyn AccountDirectory>,
        dispatcher: Arc<dyn OperationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> GovernanceResult<Self> {
        let state: GroupState = match get_json(storage.as_ref(), STATE_PATH).await {
            Ok(state) => state,
            Err(GovernanceError::Storage(StorageError::KeyNotFound(_))) => {
                return Err(GovernanceError::NotFound("no group in storage".to_string()));
            }
            Err(e) => return Err(e),
        };

        let config: GroupConfig = match get_json(storage.as_ref(), CONFIG_PATH).await {
            Ok(config) => config,
            Err(GovernanceError::Storage(StorageError::KeyNotFound(_))) => {
                warn!("No stored configuration for {}, using defaults", state.group);
                GroupConfig::default()
            }
            Err(e) => return Err(e),
        };
        config.validate()?;

        info!(
            "Loaded group {} with {} custodians and {} live proposals",
            state.group,
            state.custodians.len(),
            state.proposals.len()
        );
        Ok(Self {
            storage,
            directory,
            dispatcher,
            clock,
            config: Arc::new(RwLock::new(config)),
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Run one engine call as a transaction
    async fn commit<T, F>(&self, f: F) -> GovernanceResult<T>
    where
        F: FnOnce(&GovernanceEngine<'_>, &mut GroupState) -> GovernanceResult<T>,
    {
        let config = self.config.read().await.clone();
        let now = self.clock.now();

        let mut state = self.state.write().await;
        let mut staged = state.clone();
        let engine = GovernanceEngine::new(&config, &*self.directory, now);
        let out = f(&engine, &mut staged)?;

        put_json(self.storage.as_ref(), STATE_PATH, &staged).await?;
        *state = staged;
        Ok(out)
    }

    fn dispatch(&self, group: AccountId, operations: Vec<Operation>) -> DispatchTicket {
        spawn_dispatch(self.dispatcher.clone(), group, operations)
    }

    pub async fn invite_custodian(&self, auth: &AuthContext, account: &AccountId) -> GovernanceResult<()> {
        self.commit(|engine, state| engine.invite_custodian(state, auth, account))
            .await
    }

    pub async fn remove_custodian(&self, auth: &AuthContext, account: &AccountId) -> GovernanceResult<()> {
        self.commit(|engine, state| engine.remove_custodian(state, auth, account))
            .await
    }

    pub async fn set_custodian_weight(
        &self,
        auth: &AuthContext,
        account: &AccountId,
        weight: u8,
    ) -> GovernanceResult<()> {
        self.commit(|engine, state| engine.set_custodian_weight(state, auth, account, weight))
            .await
    }

    pub async fn heartbeat(&self, auth: &AuthContext, account: &AccountId) -> GovernanceResult<bool> {
        self.commit(|engine, state| engine.heartbeat(state, auth, account))
            .await
    }

    pub async fn propose(
        &self,
        auth: &AuthContext,
        proposer: &AccountId,
        title: &str,
        description: &str,
        operations: Vec<Operation>,
        expiration: u64,
    ) -> GovernanceResult<ProposalOutcome> {
        let submission = self
            .commit(|engine, state| {
                engine.propose(state, auth, proposer, title, description, operations, expiration)
            })
            .await?;

        match submission {
            Submission::Stored(id) => Ok(ProposalOutcome::Stored(id)),
            Submission::Immediate(operations) => {
                // No proposal record is kept for these
                for operation in &operations {
                    info!("{} dispatched {} without approval", proposer, operation);
                }
                let group = self.group().await;
                Ok(ProposalOutcome::Dispatched(self.dispatch(group, operations)))
            }
        }
    }

    pub async fn approve(&self, auth: &AuthContext, approver: &AccountId, proposal_id: u64) -> GovernanceResult<()> {
        self.commit(|engine, state| engine.approve(state, auth, approver, proposal_id))
            .await
    }

    pub async fn unapprove(
        &self,
        auth: &AuthContext,
        unapprover: &AccountId,
        proposal_id: u64,
    ) -> GovernanceResult<()> {
        self.commit(|engine, state| engine.unapprove(state, auth, unapprover, proposal_id))
            .await
    }

    pub async fn cancel(&self, auth: &AuthContext, canceler: &AccountId, proposal_id: u64) -> GovernanceResult<()> {
        self.commit(|engine, state| engine.cancel(state, auth, canceler, proposal_id))
            .await
    }

    /// Execute a proposal and hand its operations to the dispatcher
    pub async fn exec(
        &self,
        auth: &AuthContext,
        executer: &AccountId,
        proposal_id: u64,
    ) -> GovernanceResult<DispatchTicket> {
        let (group, operations) = self
            .commit(|engine, state| {
                let operations = engine.exec(state, auth, executer, proposal_id)?;
                Ok((state.group.clone(), operations))
            })
            .await?;
        Ok(self.dispatch(group, operations))
    }

    pub async fn archive_batch(
        &self,
        auth: &AuthContext,
        scope: ArchiveTag,
        batch_size: u32,
    ) -> GovernanceResult<usize> {
        self.commit(|engine, state| engine.archive_batch(state, auth, scope, batch_size))
            .await
    }

    pub async fn manage_threshold(
        &self,
        auth: &AuthContext,
        name: &str,
        value: i8,
        delete: bool,
    ) -> GovernanceResult<()> {
        self.commit(|engine, state| engine.manage_threshold(state, auth, name, value, delete))
            .await
    }

    pub async fn manage_action_link(
        &self,
        auth: &AuthContext,
        target: &str,
        operation: &str,
        threshold_name: &str,
        remove: bool,
    ) -> GovernanceResult<()> {
        self.commit(|engine, state| {
            engine.manage_action_link(state, auth, target, operation, threshold_name, remove)
        })
        .await
    }

    pub async fn register_member(&self, auth: &AuthContext, actor: &AccountId) -> GovernanceResult<()> {
        self.commit(|engine, state| engine.register_member(state, auth, actor))
            .await
    }

    pub async fn unregister_member(&self, auth: &AuthContext, actor: &AccountId) -> GovernanceResult<()> {
        self.commit(|engine, state| engine.unregister_member(state, auth, actor))
            .await
    }

    /// Replace the configuration, or reset it to defaults with `remove`
    pub async fn update_config(
        &self,
        auth: &AuthContext,
        config: GroupConfig,
        remove: bool,
    ) -> GovernanceResult<()> {
        let group = self.group().await;
        auth.require(&group)?;

        let next = if remove { GroupConfig::default() } else { config };
        next.validate()?;

        let mut current = self.config.write().await;
        put_json(self.storage.as_ref(), CONFIG_PATH, &next).await?;

        if current.maintainer_account != next.maintainer_account {
            info!(
                "Maintainer of {} changes from {} to {}",
                group, current.maintainer_account, next.maintainer_account
            );
        }
        *current = next;
        info!("Configuration of {} updated", group);
        Ok(())
    }

    pub async fn group(&self) -> AccountId {
        self.state.read().await.group.clone()
    }

    pub async fn config(&self) -> GroupConfig {
        self.config.read().await.clone()
    }

    /// A copy of the whole state as of the last commit
    pub async fn snapshot(&self) -> GroupState {
        self.state.read().await.clone()
    }

    pub async fn proposal(&self, proposal_id: u64) -> Option<Proposal> {
        self.state.read().await.proposals.get(proposal_id).cloned()
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }
}

/// Helper method to put JSON data
async fn put_json<T: Serialize + Sync>(storage: &dyn Storage, key: &str, value: &T) -> GovernanceResult<()> {
    let data = serde_json::to_vec_pretty(value)?;
    storage.put(key, &data).await?;
    debug!("Persisted {} ({} bytes)", key, data.len());
    Ok(())
}

/// Helper method to get JSON data
async fn get_json<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> GovernanceResult<T> {
    let data = storage.get(key).await?;
    Ok(serde_json::from_slice(&data)?)
}
