use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::KeyValueStore;
use crate::utils::errors::StoreError;

/// Key/value store persisted as a single JSON object on disk.
///
/// Every `set` rewrites the file through a temporary sibling and a rename, so
/// a crash mid-write leaves the previous contents intact.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Load the store at `path`; a missing file starts empty, a corrupt one is
    /// logged and replaced on the next write
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let entries = match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str::<HashMap<String, String>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Store file {} is corrupt ({}), starting empty", path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Store file {} not found, starting empty", path.display());
                HashMap::new()
            }
            Err(e) => {
                return Err(StoreError::Read(format!("Failed to read {}: {}", path.display(), e)));
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    async fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|e| StoreError::Write(format!("Failed to write {}: {}", tmp_path.display(), e)))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| StoreError::Write(format!("Failed to replace {}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(key.to_string(), value);

        if let Err(e) = self.persist(&entries).await {
            // Keep memory consistent with disk
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::open(&path).await.unwrap();
        store.set("alpha", "1".to_string()).await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("alpha").await.unwrap(), Some("1".to_string()));
        assert_eq!(reopened.get("beta").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(store.get("anything").await.unwrap(), None);
        store.set("k", "v".to_string()).await.unwrap();
        assert_eq!(FileStore::open(&path).await.unwrap().get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_write_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("store.json");

        let store = FileStore::open(&path).await.unwrap();
        let result = store.set("k", "v".to_string()).await;
        assert!(matches!(result, Err(StoreError::Write(_))));
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
