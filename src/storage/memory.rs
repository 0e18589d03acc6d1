//! In-memory storage adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::StorageAdapter;
use crate::error::StorageResult;

/// Values held in a `HashMap` behind a tokio `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn size(&self) -> StorageResult<usize> {
        Ok(self.entries.read().await.len())
    }
}
