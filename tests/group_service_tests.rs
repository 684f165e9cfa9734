use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::tempdir;

use covenant::common::{StorageError, StorageResult};
use covenant::governance::{RecordingDispatcher, DEFAULT_THRESHOLD};
use covenant::prelude::*;

const NOW: u64 = 1_700_000_000;
const HOUR: u64 = 3600;

fn acct(name: &str) -> AccountId {
    AccountId::new(name).unwrap()
}

fn signed(name: &str) -> AuthContext {
    AuthContext::signed_by(&acct(name))
}

fn transfer(amount: u8) -> Operation {
    Operation::new("token", "transfer", vec![amount])
}

/// Memory storage whose writes can be switched off
struct FlakyStorage {
    inner: MemoryStorage,
    fail_puts: AtomicBool,
}

impl FlakyStorage {
    fn new() -> Self {
        Self {
            inner: MemoryStorage::new(),
            fail_puts: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    fn base_path(&self) -> Option<PathBuf> {
        None
    }
}

async fn bootstrap(
    storage: Arc<dyn Storage>,
    dispatcher: RecordingDispatcher,
    clock: Arc<ManualClock>,
    config: GroupConfig,
) -> GroupService {
    GroupService::bootstrap(
        storage,
        Arc::new(OpenDirectory),
        Arc::new(dispatcher),
        clock,
        acct("group"),
        &[acct("a"), acct("b"), acct("c")],
        config,
    )
    .await
    .unwrap()
}

#[test_log::test(tokio::test)]
async fn test_full_lifecycle_on_disk() {
    let dir = tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).await.unwrap());
    let recorder = RecordingDispatcher::new();
    let clock = Arc::new(ManualClock::new(NOW));
    let service = bootstrap(storage.clone(), recorder.clone(), clock.clone(), GroupConfig::default()).await;

    let outcome = service
        .propose(
            &signed("a"),
            &acct("a"),
            "payroll",
            "two payments",
            vec![transfer(1), transfer(2)],
            NOW + 2 * HOUR,
        )
        .await
        .unwrap();
    let id = outcome.proposal_id().unwrap();

    service.approve(&signed("a"), &acct("a"), id).await.unwrap();
    clock.advance(60);
    service.approve(&signed("b"), &acct("b"), id).await.unwrap();

    let ticket = service.exec(&signed("c"), &acct("c"), id).await.unwrap();
    assert_eq!(ticket.settled().await, 2);

    let dispatched = recorder.dispatched();
    assert_eq!(dispatched.len(), 2);
    assert!(dispatched.iter().all(|(group, _)| *group == acct("group")));
    assert_eq!(dispatched[0].1, transfer(1));
    assert_eq!(dispatched[1].1, transfer(2));

    // a fresh service over the same directory sees the archived proposal
    let reopened = GroupService::load(
        Arc::new(FileStorage::new(dir.path()).await.unwrap()),
        Arc::new(OpenDirectory),
        Arc::new(RecordingDispatcher::new()),
        clock,
    )
    .await
    .unwrap();
    let state = reopened.snapshot().await;
    assert!(state.proposals.get(id).is_none());
    let archived = state.proposals.archived_get(ArchiveTag::Executed, id).unwrap();
    assert_eq!(archived.archived_at, NOW + 60);
    assert_eq!(state, service.snapshot().await);
}

#[tokio::test]
async fn test_rejected_call_changes_nothing() {
    let storage = Arc::new(MemoryStorage::new());
    let service = bootstrap(
        storage.clone(),
        RecordingDispatcher::new(),
        Arc::new(ManualClock::new(NOW)),
        GroupConfig::default(),
    )
    .await;
    let id = service
        .propose(&signed("a"), &acct("a"), "t", "", vec![transfer(1)], NOW + 2 * HOUR)
        .await
        .unwrap()
        .proposal_id()
        .unwrap();
    let before = service.snapshot().await;
    let stored_before = storage.get("governance/state").await.unwrap();

    assert!(matches!(
        service.exec(&signed("a"), &acct("a"), id).await,
        Err(GovernanceError::QuorumNotMet(_))
    ));
    assert!(matches!(
        service.invite_custodian(&signed("a"), &acct("d")).await,
        Err(GovernanceError::AuthorizationDenied(_))
    ));
    assert!(matches!(
        service.approve(&AuthContext::anonymous(), &acct("b"), id).await,
        Err(GovernanceError::AuthorizationDenied(_))
    ));

    assert_eq!(service.snapshot().await, before);
    assert_eq!(storage.get("governance/state").await.unwrap(), stored_before);
}

#[tokio::test]
async fn test_failed_persist_is_not_applied() {
    let storage = Arc::new(FlakyStorage::new());
    let service = bootstrap(
        storage.clone(),
        RecordingDispatcher::new(),
        Arc::new(ManualClock::new(NOW)),
        GroupConfig::default(),
    )
    .await;
    let before = service.snapshot().await;

    storage.fail_puts.store(true, Ordering::SeqCst);
    assert!(matches!(
        service.invite_custodian(&signed("group"), &acct("d")).await,
        Err(GovernanceError::Storage(_))
    ));
    assert_eq!(service.snapshot().await, before);

    storage.fail_puts.store(false, Ordering::SeqCst);
    service.invite_custodian(&signed("group"), &acct("d")).await.unwrap();
    assert!(service.snapshot().await.custodians.contains(&acct("d")));
}

#[tokio::test]
async fn test_zero_threshold_dispatches_without_proposal() {
    let recorder = RecordingDispatcher::new();
    let config = GroupConfig {
        exec_on_threshold_zero: true,
        ..GroupConfig::default()
    };
    let service = bootstrap(
        Arc::new(MemoryStorage::new()),
        recorder.clone(),
        Arc::new(ManualClock::new(NOW)),
        config,
    )
    .await;
    let group = signed("group");
    service.manage_threshold(&group, "free", 0, false).await.unwrap();
    service
        .manage_action_link(&group, "oracle", "ping", "free", false)
        .await
        .unwrap();

    let ping = Operation::new("oracle", "ping", vec![7]);
    let outcome = service
        .propose(&signed("b"), &acct("b"), "ping", "", vec![ping.clone()], 0)
        .await
        .unwrap();
    assert!(outcome.proposal_id().is_none());
    match outcome {
        ProposalOutcome::Dispatched(ticket) => assert_eq!(ticket.settled().await, 1),
        ProposalOutcome::Stored(id) => panic!("unexpected proposal {}", id),
    }

    assert_eq!(recorder.dispatched(), vec![(acct("group"), ping)]);
    assert!(service.snapshot().await.proposals.is_empty());
}

#[tokio::test]
async fn test_custodian_churn_adjusts_default() {
    let clock = Arc::new(ManualClock::new(NOW));
    let service = bootstrap(
        Arc::new(MemoryStorage::new()),
        RecordingDispatcher::new(),
        clock.clone(),
        GroupConfig::default(),
    )
    .await;
    let group = signed("group");

    service.invite_custodian(&group, &acct("d")).await.unwrap();
    service.invite_custodian(&group, &acct("e")).await.unwrap();
    assert_eq!(service.snapshot().await.thresholds.resolve(DEFAULT_THRESHOLD).unwrap(), 2);

    service.heartbeat(&signed("d"), &acct("d")).await.unwrap();
    service.heartbeat(&signed("e"), &acct("e")).await.unwrap();
    assert_eq!(service.snapshot().await.thresholds.resolve(DEFAULT_THRESHOLD).unwrap(), 3);

    service.remove_custodian(&group, &acct("e")).await.unwrap();
    assert_eq!(service.snapshot().await.thresholds.resolve(DEFAULT_THRESHOLD).unwrap(), 3);
    service.remove_custodian(&group, &acct("d")).await.unwrap();
    assert_eq!(service.snapshot().await.thresholds.resolve(DEFAULT_THRESHOLD).unwrap(), 2);
}

#[tokio::test]
async fn test_members_follow_configuration() {
    let directory = StaticDirectory::new().with_accounts(["dave"]);
    let service = GroupService::bootstrap(
        Arc::new(MemoryStorage::new()),
        Arc::new(directory),
        Arc::new(LoggingDispatcher::new()),
        Arc::new(ManualClock::new(NOW)),
        acct("group"),
        &[acct("a")],
        GroupConfig::default(),
    )
    .await
    .unwrap();

    assert!(matches!(
        service.register_member(&signed("dave"), &acct("dave")).await,
        Err(GovernanceError::PolicyBlocked(_))
    ));

    let config = GroupConfig {
        member_registration: true,
        ..GroupConfig::default()
    };
    service.update_config(&signed("group"), config, false).await.unwrap();
    service.register_member(&signed("dave"), &acct("dave")).await.unwrap();
    assert_eq!(service.snapshot().await.members.len(), 1);

    service.unregister_member(&signed("dave"), &acct("dave")).await.unwrap();
    assert!(service.snapshot().await.members.is_empty());
}
