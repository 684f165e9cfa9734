use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{validate_key, Storage, StorageError, StorageResult};

/// In-memory storage, used by tests and ephemeral groups
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether nothing has been stored yet
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let mut store = self.data.write().await;
        store.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let store = self.data.read().await;
        store.get(key)
            .cloned()
            .ok_or_else(|| StorageError::KeyNotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut store = self.data.write().await;
        store.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let store = self.data.read().await;
        Ok(store.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let store = self.data.read().await;
        let keys = store.keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        Ok(keys)
    }

    fn base_path(&self) -> Option<PathBuf> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_basic_operations() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty().await);

        storage.put("governance/state", b"v1").await.unwrap();
        assert_eq!(storage.get("governance/state").await.unwrap(), b"v1");

        storage.put("governance/state", b"v2").await.unwrap();
        assert_eq!(storage.get("governance/state").await.unwrap(), b"v2");

        storage.put("governance/config", b"c").await.unwrap();
        storage.put("other/key", b"o").await.unwrap();

        let keys = storage.list("governance/").await.unwrap();
        assert_eq!(keys, vec!["governance/config".to_string(), "governance/state".to_string()]);

        assert!(storage.exists("other/key").await.unwrap());
        storage.delete("other/key").await.unwrap();
        assert!(!storage.exists("other/key").await.unwrap());
        assert!(matches!(
            storage.get("other/key").await,
            Err(StorageError::KeyNotFound(_))
        ));
        assert_eq!(storage.len().await, 2);
    }

    #[tokio::test]
    async fn test_rejects_invalid_keys() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.put("../escape", b"x").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
