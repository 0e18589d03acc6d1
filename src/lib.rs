//! Tagcache - a tag-aware caching engine
//!
//! Key/value caching with per-entry TTL, LRU eviction, tag groups,
//! lifecycle events and pluggable storage backends, plus an optional
//! HTTP front end.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;
mod tasks;

pub use api::{create_router, AppState};
pub use cache::{
    CacheEngine, CacheEngineBuilder, CacheEvent, EntryInfo, FnCodec, JsonCodec, SetOptions,
    StatsSnapshot, ValueCodec,
};
pub use config::{CacheConfig, Config};
pub use error::{CacheError, Result, StorageError};
pub use storage::{StorageAdapter, StorageKind};
