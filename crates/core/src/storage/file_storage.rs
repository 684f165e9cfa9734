use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use async_trait::async_trait;
use tracing::{debug, trace};

use super::{validate_key, Storage, StorageError, StorageOptions, StorageResult};

/// Appended to a key's full file name while its write is in flight
const TEMP_SUFFIX: &str = ".tmp~";

/// A file-based storage implementation.
///
/// Every key maps to one file below `base_path`. Writes go to a sibling
/// temporary file first and are renamed into place, so a reader never sees a
/// half-written document.
pub struct FileStorage {
    base_path: PathBuf,
    options: StorageOptions,
    cache: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl FileStorage {
    /// Create a new file storage instance
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = base_path.into();

        if !path.exists() {
            fs::create_dir_all(&path).await?;
        }

        Ok(Self {
            base_path: path,
            options: StorageOptions::default(),
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Set storage options
    pub fn with_options(mut self, options: StorageOptions) -> Self {
        self.options = options;
        self
    }

    /// Sibling path a write is staged at before being renamed over `path`
    fn staging_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(TEMP_SUFFIX);
        path.with_file_name(name)
    }

    fn get_path(&self, key: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        path
    }

    /// Walk the tree below `root`, collecting file keys as `/`-separated paths
    async fn list_directory(&self, root: &Path) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();

                if path.is_dir() {
                    pending.push(path);
                } else if path.is_file() {
                    if path.to_string_lossy().ends_with(TEMP_SUFFIX) {
                        continue;
                    }
                    if let Ok(rel_path) = path.strip_prefix(&self.base_path) {
                        let key = rel_path
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect::<Vec<_>>()
                            .join("/");
                        keys.push(key);
                    }
                }
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        if key.ends_with(TEMP_SUFFIX) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let path = self.get_path(key);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = Self::staging_path(&path);
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        if self.options.sync_write {
            file.sync_all().await?;
        }
        drop(file);
        fs::rename(&tmp_path, &path).await?;

        if self.options.use_cache {
            let mut cache = self.cache.write().await;
            cache.insert(key.to_string(), data.to_vec());
        }

        debug!("Stored data at key: {}", key);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        validate_key(key)?;
        if self.options.use_cache {
            let cache = self.cache.read().await;
            if let Some(data) = cache.get(key) {
                trace!("Retrieved data from cache for key: {}", key);
                return Ok(data.clone());
            }
        }

        let path = self.get_path(key);
        if !path.is_file() {
            return Err(StorageError::KeyNotFound(key.to_string()));
        }

        let data = fs::read(&path).await?;

        if self.options.use_cache {
            let mut cache = self.cache.write().await;
            cache.insert(key.to_string(), data.clone());
        }

        debug!("Retrieved data for key: {}", key);
        Ok(data)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let path = self.get_path(key);
        if path.is_file() {
            fs::remove_file(path).await?;
            debug!("Deleted key: {}", key);
        }

        if self.options.use_cache {
            let mut cache = self.cache.write().await;
            cache.remove(key);
        }

        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        if self.options.use_cache {
            let cache = self.cache.read().await;
            if cache.contains_key(key) {
                return Ok(true);
            }
        }

        Ok(self.get_path(key).is_file())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        debug!("Listing keys with prefix: {}", prefix);

        if !self.base_path.is_dir() {
            return Err(StorageError::NotADirectory(self.base_path.display().to_string()));
        }

        let mut keys = self.list_directory(&self.base_path).await?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn base_path(&self) -> Option<PathBuf> {
        Some(self.base_path.clone())
    }
}
