//! Cache Module
//!
//! Tag-aware caching engine with TTL expiration, LRU eviction and
//! lifecycle events over a pluggable storage adapter.

mod codec;
mod duration;
mod engine;
mod entry;
mod events;
mod lru;
mod options;
mod scheduler;
mod stats;
mod tags;


// Re-export public types
pub use codec::{FnCodec, JsonCodec, ValueCodec};
pub(crate) use codec::utf8;
pub use duration::parse_duration;
pub use engine::{CacheEngine, CacheEngineBuilder};
pub(crate) use engine::WeakEngine;
pub use entry::{CacheEntry, EntryInfo, EntryMetadataStore};
pub use events::{CacheEvent, EventBus};
pub use lru::LruTracker;
pub use options::SetOptions;
pub use scheduler::{ExpirationScheduler, Expiry};
pub use stats::{CacheStats, StatsSnapshot};
pub use tags::TagIndex;
