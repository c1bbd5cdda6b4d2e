use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::utils::errors::StoreError;

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Persistent string key/value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
}

/// Open the JSON file store at `path`
pub async fn init_store(path: &Path) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    let store = FileStore::open(path).await?;
    Ok(Arc::new(store))
}
