//! Redis storage adapter
//!
//! Requires the `redis` feature to be enabled. Every key is namespaced
//! with a prefix so `keys`, `size` and `clear` only see this cache's data.

use ::redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use super::StorageAdapter;
use crate::error::{StorageError, StorageResult};

/// Redis-backed storage over a multiplexed connection.
///
/// After [`close`](StorageAdapter::close) the connection is dropped and
/// every call fails with a backend error.
pub struct RedisStorage {
    conn: RwLock<Option<MultiplexedConnection>>,
    prefix: String,
}

impl RedisStorage {
    /// Connects to `url`, namespacing keys with `prefix`.
    pub async fn connect(url: &str, prefix: String) -> StorageResult<Self> {
        let client = Client::open(url).map_err(|e| backend("client", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| backend("connect", e))?;

        info!(url, prefix = %prefix, "Connected to redis storage");
        Ok(Self {
            conn: RwLock::new(Some(conn)),
            prefix,
        })
    }

    async fn conn(&self) -> StorageResult<MultiplexedConnection> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| StorageError::Backend("redis connection closed".to_string()))
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn prefixed_keys(&self) -> StorageResult<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.keys(format!("{}*", self.prefix))
            .await
            .map_err(|e| backend("KEYS", e))
    }
}

fn backend(op: &str, e: ::redis::RedisError) -> StorageError {
    StorageError::Backend(format!("redis {} error: {}", op, e))
}

#[async_trait]
impl StorageAdapter for RedisStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        conn.get(self.prefixed(key))
            .await
            .map_err(|e| backend("GET", e))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let mut conn = self.conn().await?;
        conn.set(self.prefixed(key), value)
            .await
            .map_err(|e| backend("SET", e))
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut conn = self.conn().await?;
        let deleted: i64 = conn
            .del(self.prefixed(key))
            .await
            .map_err(|e| backend("DEL", e))?;
        Ok(deleted > 0)
    }

    async fn clear(&self) -> StorageResult<()> {
        let keys = self.prefixed_keys().await?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let _: i64 = conn.del(keys).await.map_err(|e| backend("DEL", e))?;
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let keys = self.prefixed_keys().await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    async fn has(&self, key: &str) -> StorageResult<bool> {
        let mut conn = self.conn().await?;
        conn.exists(self.prefixed(key))
            .await
            .map_err(|e| backend("EXISTS", e))
    }

    async fn size(&self) -> StorageResult<usize> {
        Ok(self.prefixed_keys().await?.len())
    }

    async fn close(&self) -> StorageResult<()> {
        if self.conn.write().await.take().is_some() {
            info!(prefix = %self.prefix, "Closed redis storage");
        }
        Ok(())
    }
}
