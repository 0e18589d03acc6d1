//! Storage Module
//!
//! The asynchronous key-value contract every backend satisfies, and the
//! built-in adapters. The engine treats the adapter as the only source of
//! truth for values; it never persists its own metadata.
//!
//! # Backends
//! - `memory` - [`MemoryStorage`]
//! - `file` - [`FileStorage`], one compact flat file
//! - `json` - [`JsonFileStorage`], one pretty-printed JSON file
//! - `redis` - `RedisStorage`, behind the `redis` cargo feature

mod file;
mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{CacheError, Result, StorageResult};

pub use file::{FileBackedStorage, FileFormat, FileStorage, FlatFormat, JsonFileStorage, PrettyJsonFormat};
pub use memory::MemoryStorage;
#[cfg(feature = "redis")]
pub use self::redis::RedisStorage;

/// Default key prefix for the Redis backend.
pub const DEFAULT_REDIS_PREFIX: &str = "tagcache:";

// == Storage Adapter ==
/// Asynchronous key-value contract consumed by the engine.
///
/// Any call may fail; the engine degrades failures to "absent" or "no-op"
/// and reports them on its event stream.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Returns the stored bytes, or None if the key is absent.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores bytes under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Removes `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Removes every key.
    async fn clear(&self) -> StorageResult<()>;

    async fn keys(&self) -> StorageResult<Vec<String>>;

    async fn has(&self, key: &str) -> StorageResult<bool>;

    async fn size(&self) -> StorageResult<usize>;

    /// Releases connections or file handles. Called once on engine shutdown.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

// == Storage Kind ==
/// Backend selection, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StorageKind {
    #[default]
    Memory,
    File { path: PathBuf },
    JsonFile { path: PathBuf },
    Redis { url: String, prefix: String },
}

impl StorageKind {
    /// Resolves a backend name to a kind.
    ///
    /// `path` is required by the file backends; `redis_url` defaults to
    /// a local server.
    pub fn from_name(
        name: &str,
        path: Option<PathBuf>,
        redis_url: Option<String>,
        redis_prefix: Option<String>,
    ) -> Result<Self> {
        let require_path = |path: Option<PathBuf>| {
            path.ok_or_else(|| {
                CacheError::Config(format!("storage '{}' requires a file path", name))
            })
        };

        match name.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "file" => Ok(StorageKind::File {
                path: require_path(path)?,
            }),
            "json" => Ok(StorageKind::JsonFile {
                path: require_path(path)?,
            }),
            "redis" => Ok(StorageKind::Redis {
                url: redis_url.unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
                prefix: redis_prefix.unwrap_or_else(|| DEFAULT_REDIS_PREFIX.to_string()),
            }),
            other => Err(CacheError::UnsupportedStorage(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StorageKind::Memory => "memory",
            StorageKind::File { .. } => "file",
            StorageKind::JsonFile { .. } => "json",
            StorageKind::Redis { .. } => "redis",
        }
    }

    // == Open ==
    /// Opens the selected backend.
    pub async fn open(&self) -> Result<Arc<dyn StorageAdapter>> {
        let storage: Arc<dyn StorageAdapter> = match self {
            StorageKind::Memory => Arc::new(MemoryStorage::new()),
            StorageKind::File { path } => Arc::new(FileStorage::open(path).await?),
            StorageKind::JsonFile { path } => Arc::new(JsonFileStorage::open(path).await?),
            #[cfg(feature = "redis")]
            StorageKind::Redis { url, prefix } => {
                Arc::new(RedisStorage::connect(url, prefix.clone()).await?)
            }
            #[cfg(not(feature = "redis"))]
            StorageKind::Redis { .. } => {
                return Err(CacheError::UnsupportedStorage(
                    "redis (built without the `redis` feature)".to_string(),
                ))
            }
        };
        Ok(storage)
    }
}
