//! Cache Entry Module
//!
//! Per-key metadata kept by the engine. Values themselves live in the
//! storage adapter; this is only the bookkeeping for TTL, access counting
//! and tags.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

// == Cache Entry ==
/// Metadata for a single cached key.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Wall-clock time of the last write
    pub created_at: DateTime<Utc>,
    /// Expiration instant, None = no expiration
    pub expires_at: Option<Instant>,
    /// TTL the entry was written (or last touched) with
    pub ttl: Option<Duration>,
    /// Number of successful reads
    pub access_count: u64,
    /// Tags attached at write time
    pub tags: BTreeSet<String>,
    /// Write sequence number assigned by the engine
    pub revision: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates metadata for a fresh write.
    ///
    /// A zero TTL is stored as "never expires".
    pub fn new(ttl: Option<Duration>, tags: BTreeSet<String>) -> Self {
        let ttl = ttl.filter(|d| !d.is_zero());
        Self {
            created_at: Utc::now(),
            expires_at: ttl.map(|d| Instant::now() + d),
            ttl,
            access_count: 0,
            tags,
            revision: 0,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current instant reaches `expires_at`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Same as [`is_expired`](Self::is_expired) against a fixed instant.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    // == Time To Live ==
    /// Returns remaining lifetime, or None if no expiration is set.
    ///
    /// Returns `Some(Duration::ZERO)` once expired.
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires| expires.saturating_duration_since(Instant::now()))
    }

    /// Restarts the lifetime from now using the stored TTL.
    ///
    /// Returns the new remaining lifetime, or None for unbounded entries.
    pub fn renew(&mut self) -> Option<Duration> {
        let ttl = self.ttl?;
        self.expires_at = Some(Instant::now() + ttl);
        Some(ttl)
    }

    /// Replaces the TTL and restarts the lifetime from now.
    pub fn reset_ttl(&mut self, ttl: Option<Duration>) {
        self.ttl = ttl.filter(|d| !d.is_zero());
        self.expires_at = self.ttl.map(|d| Instant::now() + d);
    }

    /// Counts one successful read.
    pub fn record_access(&mut self) {
        self.access_count += 1;
    }

    /// Builds the public snapshot for this entry.
    pub fn info(&self, key: &str) -> EntryInfo {
        EntryInfo {
            key: key.to_string(),
            created_at: self.created_at,
            ttl_remaining_ms: self.ttl_remaining().map(|d| d.as_millis() as u64),
            access_count: self.access_count,
            tags: self.tags.iter().cloned().collect(),
        }
    }
}

// == Entry Info ==
/// Read-only view of an entry's metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryInfo {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub ttl_remaining_ms: Option<u64>,
    pub access_count: u64,
    pub tags: Vec<String>,
}

// == Entry Metadata Store ==
/// In-memory index of entry metadata keyed by cache key.
#[derive(Debug, Default)]
pub struct EntryMetadataStore {
    entries: HashMap<String, CacheEntry>,
}

impl EntryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    /// Inserts metadata, returning what it replaced.
    pub fn insert(&mut self, key: String, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(key, entry)
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unexpired keys, sorted.
    pub fn live_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Keys whose expiration instant has passed.
    pub fn expired_keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
