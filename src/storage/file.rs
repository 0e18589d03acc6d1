//! File-backed storage adapters.
//!
//! Both adapters keep the whole key space in memory, load it when opened,
//! and rewrite the file (temp file + rename) after every mutation. They
//! differ only in the on-disk [`FileFormat`].

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::StorageAdapter;
use crate::cache::utf8;
use crate::error::{StorageError, StorageResult};

// == File Format ==
/// On-disk representation of the key space.
pub trait FileFormat: Send + Sync + 'static {
    fn decode(contents: &str) -> StorageResult<HashMap<String, Vec<u8>>>;
    fn encode(entries: &HashMap<String, Vec<u8>>) -> StorageResult<String>;
}

/// One compact JSON object of key -> UTF-8 string.
#[derive(Debug)]
pub struct FlatFormat;

impl FileFormat for FlatFormat {
    fn decode(contents: &str) -> StorageResult<HashMap<String, Vec<u8>>> {
        let map: HashMap<String, String> = serde_json::from_str(contents)?;
        Ok(map.into_iter().map(|(k, v)| (k, v.into_bytes())).collect())
    }

    fn encode(entries: &HashMap<String, Vec<u8>>) -> StorageResult<String> {
        let map = entries
            .iter()
            .map(|(k, v)| Ok((k.as_str(), utf8(v)?)))
            .collect::<StorageResult<BTreeMap<&str, &str>>>()?;
        Ok(serde_json::to_string(&map)?)
    }
}

/// A pretty-printed JSON object of key -> JSON value.
///
/// Stored bytes must themselves be JSON, which holds for the default codec.
#[derive(Debug)]
pub struct PrettyJsonFormat;

impl FileFormat for PrettyJsonFormat {
    fn decode(contents: &str) -> StorageResult<HashMap<String, Vec<u8>>> {
        let map: HashMap<String, Value> = serde_json::from_str(contents)?;
        map.into_iter()
            .map(|(k, v)| Ok((k, serde_json::to_vec(&v)?)))
            .collect()
    }

    fn encode(entries: &HashMap<String, Vec<u8>>) -> StorageResult<String> {
        let map = entries
            .iter()
            .map(|(k, v)| {
                let value: Value = serde_json::from_slice(v).map_err(|e| {
                    StorageError::Encoding(format!("value for '{}' is not JSON: {}", k, e))
                })?;
                Ok((k.as_str(), value))
            })
            .collect::<StorageResult<BTreeMap<&str, Value>>>()?;
        Ok(serde_json::to_string_pretty(&map)?)
    }
}

// == File Backed Storage ==
/// Key space mirrored to a single file.
#[derive(Debug)]
pub struct FileBackedStorage<F> {
    path: PathBuf,
    entries: RwLock<HashMap<String, Vec<u8>>>,
    _format: PhantomData<fn() -> F>,
}

/// Flat-file adapter.
pub type FileStorage = FileBackedStorage<FlatFormat>;

/// Pretty JSON file adapter.
pub type JsonFileStorage = FileBackedStorage<PrettyJsonFormat>;

impl<F: FileFormat> FileBackedStorage<F> {
    /// Opens `path`, loading any existing contents. A missing file starts empty.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => HashMap::new(),
            Ok(contents) => F::decode(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), entries = entries.len(), "Opened file storage");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
            _format: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the file from `entries`.
    async fn persist(&self, entries: &HashMap<String, Vec<u8>>) -> StorageResult<()> {
        let contents = F::encode(entries)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl<F: FileFormat> StorageAdapter for FileBackedStorage<F> {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        let previous = entries.insert(key.to_string(), value);

        if let Err(e) = self.persist(&entries).await {
            // keep memory and disk in agreement
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut entries = self.entries.write().await;
        let Some(old) = entries.remove(key) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&entries).await {
            entries.insert(key.to_string(), old);
            return Err(e);
        }
        Ok(true)
    }

    async fn clear(&self) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        let previous = std::mem::take(&mut *entries);

        if let Err(e) = self.persist(&entries).await {
            *entries = previous;
            return Err(e);
        }
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
