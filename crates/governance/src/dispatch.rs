//! Handing admitted operations to whatever actually performs them
//!
//! Dispatch runs after the governance transaction has committed. A failed
//! dispatch is logged and never undoes the commit.

use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::types::{AccountId, Operation};
use crate::GovernanceResult;

/// Performs an operation on behalf of the governed account
#[async_trait]
pub trait OperationDispatcher: Send + Sync {
    async fn dispatch(&self, group: &AccountId, operation: &Operation) -> GovernanceResult<()>;
}

/// A dispatcher that only logs what it would do
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

impl LoggingDispatcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OperationDispatcher for LoggingDispatcher {
    async fn dispatch(&self, group: &AccountId, operation: &Operation) -> GovernanceResult<()> {
        info!(
            "Would dispatch {} as {} ({} payload bytes)",
            operation,
            group,
            operation.payload.len()
        );
        Ok(())
    }
}

/// Keeps every dispatched operation in memory, in arrival order
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    dispatched: Arc<Mutex<Vec<(AccountId, Operation)>>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched(&self) -> Vec<(AccountId, Operation)> {
        match self.dispatched.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl OperationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, group: &AccountId, operation: &Operation) -> GovernanceResult<()> {
        let mut guard = match self.dispatched.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push((group.clone(), operation.clone()));
        Ok(())
    }
}

/// Handle on a dispatch running in the background.
///
/// Dropping it lets the dispatch finish on its own.
#[derive(Debug)]
pub struct DispatchTicket {
    handle: Option<JoinHandle<usize>>,
}

impl DispatchTicket {
    /// A ticket with nothing to dispatch
    pub fn none() -> Self {
        Self { handle: None }
    }

    pub fn is_empty(&self) -> bool {
        self.handle.is_none()
    }

    /// Wait for the dispatch to finish. Returns how many operations succeeded.
    pub async fn settled(self) -> usize {
        match self.handle {
            Some(handle) => match handle.await {
                Ok(count) => count,
                Err(e) => {
                    warn!("Dispatch task failed: {}", e);
                    0
                }
            },
            None => 0,
        }
    }
}

/// Dispatch `operations` in bundle order on a background task
pub fn spawn_dispatch(
    dispatcher: Arc<dyn OperationDispatcher>,
    group: AccountId,
    operations: Vec<Operation>,
) -> DispatchTicket {
    if operations.is_empty() {
        return DispatchTicket::none();
    }

    let handle = tokio::spawn(async move {
        let mut succeeded = 0;
        for operation in &operations {
            match dispatcher.dispatch(&group, operation).await {
                Ok(()) => {
                    debug!("Dispatched {} for {}", operation, group);
                    succeeded += 1;
                }
                Err(e) => warn!("Dispatch of {} for {} failed: {}", operation, group, e),
            }
        }
        succeeded
    });

    DispatchTicket { handle: Some(handle) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GovernanceError;

    struct FailingOn(&'static str);

    #[async_trait]
    impl OperationDispatcher for FailingOn {
        async fn dispatch(&self, _group: &AccountId, operation: &Operation) -> GovernanceResult<()> {
            if operation.operation == self.0 {
                Err(GovernanceError::InvalidInput("rejected downstream".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_dispatch_preserves_bundle_order() {
        let recorder = RecordingDispatcher::new();
        let group = AccountId::new("group").unwrap();
        let ops = vec![
            Operation::new("token", "transfer", vec![1]),
            Operation::new("token", "burn", vec![2]),
            Operation::new("dex", "swap", vec![]),
        ];

        let ticket = spawn_dispatch(Arc::new(recorder.clone()), group.clone(), ops.clone());
        assert_eq!(ticket.settled().await, 3);

        let seen: Vec<Operation> = recorder.dispatched().into_iter().map(|(_, op)| op).collect();
        assert_eq!(seen, ops);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_propagated() {
        let group = AccountId::new("group").unwrap();
        let ops = vec![
            Operation::new("token", "transfer", vec![]),
            Operation::new("token", "burn", vec![]),
        ];
        let ticket = spawn_dispatch(Arc::new(FailingOn("burn")), group, ops);
        assert_eq!(ticket.settled().await, 1);
    }

    #[tokio::test]
    async fn test_empty_bundle_spawns_nothing() {
        let group = AccountId::new("group").unwrap();
        let ticket = spawn_dispatch(Arc::new(LoggingDispatcher::new()), group, Vec::new());
        assert!(ticket.is_empty());
        assert_eq!(ticket.settled().await, 0);
    }
}
