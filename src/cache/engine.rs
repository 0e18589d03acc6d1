//! Cache Engine Module
//!
//! Orchestrates entry metadata, LRU tracking, the tag index and expiration
//! timers around a pluggable storage adapter.
//!
//! # Locking
//! All in-memory structures sit behind one async mutex. It is held only
//! across synchronous bookkeeping, never across storage I/O, so metadata
//! is updated optimistically before the backend confirms a write. A read
//! that later finds the backend disagreeing purges the stale metadata and
//! counts a miss.
//!
//! Writes and removals also take a per-key storage lock, acquired before
//! the engine mutex and held until the backend call returns. Two mutations
//! of the same key therefore reach storage in the order they changed the
//! metadata.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheEntry, CacheEvent, CacheStats, EntryInfo, EntryMetadataStore, EventBus,
    ExpirationScheduler, Expiry, JsonCodec, LruTracker, SetOptions, StatsSnapshot, TagIndex,
    ValueCodec,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result, StorageError};
use crate::storage::StorageAdapter;
use crate::tasks::{spawn_expiry_worker, spawn_sweep_task};

// == Engine State ==
/// Everything guarded by the engine mutex.
struct State {
    entries: EntryMetadataStore,
    lru: LruTracker,
    tags: TagIndex,
    timers: ExpirationScheduler,
    stats: CacheStats,
    stats_enabled: bool,
    /// Per-key gates serializing `get_or_set` loads
    in_flight: KeyLocks,
    /// Per-key locks pairing a metadata change with its storage call
    storage_locks: KeyLocks,
    revision_clock: u64,
    background: Vec<JoinHandle<()>>,
    closed: bool,
}

impl State {
    /// Drops every in-memory trace of `key`: metadata, recency, tag
    /// memberships and timer, in that order.
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(key);
        self.tags.remove(key, &entry.tags);
        self.timers.cancel(key);
        Some(entry)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.tags.clear();
        self.timers.cancel_all();
    }

    fn record(&mut self, counter: fn(&mut CacheStats)) {
        if self.stats_enabled {
            counter(&mut self.stats);
        }
    }

    fn next_revision(&mut self) -> u64 {
        self.revision_clock += 1;
        self.revision_clock
    }

    fn revision_of(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|entry| entry.revision)
    }

    /// Removes `key` if its entry has expired, counting a delete.
    fn remove_if_expired(&mut self, key: &str) -> bool {
        let expired = self.entries.get(key).is_some_and(|entry| entry.is_expired());
        if expired {
            self.remove_entry(key);
            self.record(CacheStats::record_delete);
        }
        expired
    }
}

/// Async mutexes keyed by cache key, created on demand.
#[derive(Default)]
struct KeyLocks(HashMap<String, Arc<Mutex<()>>>);

impl KeyLocks {
    fn handle(&mut self, key: &str) -> Arc<Mutex<()>> {
        self.0.entry(key.to_string()).or_default().clone()
    }

    /// Forgets the lock for `key` once `lock` is its last outside handle.
    fn release(&mut self, key: &str, lock: &Arc<Mutex<()>>) {
        let idle = self
            .0
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, lock) && Arc::strong_count(current) <= 2);
        if idle {
            self.0.remove(key);
        }
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

/// Outcome of a locked removal.
enum Removal {
    /// The entry was left in place
    Kept,
    /// The entry is gone; carries its last stored value when readable
    Removed(Option<Value>),
}

struct Inner {
    config: CacheConfig,
    storage: Arc<dyn StorageAdapter>,
    codec: Arc<dyn ValueCodec>,
    events: EventBus,
    state: Mutex<State>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.timers.cancel_all();
        for handle in state.background.drain(..) {
            handle.abort();
        }
    }
}

/// Whether a read counts as an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    /// `get`: touches LRU, counts stats, may slide the TTL, emits `get`
    Access,
    /// Internal lookups: expiry and self-healing only
    Peek,
}

// == Cache Engine ==
/// Handle to a cache engine. Cloning is cheap and shares the same cache.
///
/// Dropping the last handle cancels every timer and background task.
#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<Inner>,
}

/// Non-owning handle held by background tasks.
#[derive(Clone)]
pub(crate) struct WeakEngine(Weak<Inner>);

impl WeakEngine {
    pub(crate) fn upgrade(&self) -> Option<CacheEngine> {
        self.0.upgrade().map(|inner| CacheEngine { inner })
    }
}

// == Builder ==
/// Assembles a [`CacheEngine`] from configuration plus injected parts.
pub struct CacheEngineBuilder {
    config: CacheConfig,
    codec: Arc<dyn ValueCodec>,
    storage: Option<Arc<dyn StorageAdapter>>,
}

impl CacheEngineBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the JSON codec applied around storage reads and writes.
    pub fn codec(mut self, codec: impl ValueCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Uses a custom adapter instead of the one named by `config.storage`.
    pub fn storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Opens storage and starts the expiry worker and sweep task.
    pub async fn build(self) -> Result<CacheEngine> {
        let storage = match self.storage {
            Some(storage) => storage,
            None => self.config.storage.open().await?,
        };
        let config = self.config;
        let codec = self.codec;

        let (tx, rx) = mpsc::unbounded_channel::<Expiry>();
        let check_interval = config.check_interval;

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let handle = WeakEngine(weak.clone());
            let mut background = vec![spawn_expiry_worker(handle.clone(), rx)];
            if !check_interval.is_zero() {
                background.push(spawn_sweep_task(handle, check_interval));
            }

            Inner {
                events: EventBus::new(config.event_capacity),
                state: Mutex::new(State {
                    entries: EntryMetadataStore::new(),
                    lru: LruTracker::new(),
                    tags: TagIndex::new(),
                    timers: ExpirationScheduler::new(tx),
                    stats: CacheStats::new(),
                    stats_enabled: config.enable_stats,
                    in_flight: KeyLocks::default(),
                    storage_locks: KeyLocks::default(),
                    revision_clock: 0,
                    background,
                    closed: false,
                }),
                config,
                storage,
                codec,
            }
        });

        info!(
            storage = inner.config.storage.name(),
            max_size = inner.config.max_size,
            default_ttl_ms = inner.config.default_ttl.as_millis() as u64,
            sliding_ttl = inner.config.sliding_ttl,
            "Cache engine started"
        );

        Ok(CacheEngine { inner })
    }
}

impl CacheEngine {
    // == Constructors ==
    pub fn builder() -> CacheEngineBuilder {
        CacheEngineBuilder {
            config: CacheConfig::default(),
            codec: Arc::new(JsonCodec),
            storage: None,
        }
    }

    /// Builds an engine with the default codec and the configured backend.
    pub async fn new(config: CacheConfig) -> Result<Self> {
        Self::builder().config(config).build().await
    }

    #[cfg(test)]
    pub(crate) fn downgrade(&self) -> WeakEngine {
        WeakEngine(Arc::downgrade(&self.inner))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Subscribes to lifecycle notifications. Drop the receiver to unsubscribe.
    ///
    /// Events arrive in the order operations complete. Each receiver buffers
    /// up to `event_capacity` unread events; past that it loses the oldest
    /// ones and its next `recv` reports `RecvError::Lagged` with the count.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    // == Set ==
    /// Stores `value` under `key`.
    ///
    /// Returns false when the write condition rejected the value or the
    /// backend failed to store it; neither is an error. Prior tag
    /// memberships are replaced, a new key at capacity evicts exactly one
    /// LRU entry first, and each tag pushed over its cap evicts its own
    /// least recently used member.
    pub async fn set(&self, key: &str, value: Value, options: SetOptions) -> Result<bool> {
        validate_key(key)?;

        if !options.permits(key, &value) {
            debug!(key, "Write condition rejected value");
            return Ok(false);
        }

        let bytes = match self.inner.codec.encode(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.report(Some(key), "serialize", e);
                return Ok(false);
            }
        };
        let ttl = self.resolve_ttl(options.ttl);

        let lock = self.key_lock(key).await?;
        let written = {
            let _held = lock.lock().await;
            self.write_locked(key, value, bytes, ttl, options).await
        };
        self.unlock_key(key, &lock).await;
        let (stored, deferred) = written?;

        for victim in deferred {
            let lock = self.key_lock(&victim).await?;
            {
                let _held = lock.lock().await;
                self.evict_stored(&victim).await;
            }
            self.unlock_key(&victim, &lock).await;
        }
        Ok(stored)
    }

    /// Metadata and storage halves of `set`, under the key's storage lock.
    ///
    /// Returns whether the backend stored the value, plus the victims whose
    /// storage lock was busy and still need their stored value removed.
    async fn write_locked(
        &self,
        key: &str,
        value: Value,
        bytes: Vec<u8>,
        ttl: Option<Duration>,
        options: SetOptions,
    ) -> Result<(bool, Vec<String>)> {
        let victims = {
            let mut state = self.state().await?;
            let mut victims = Vec::new();

            let max_size = self.inner.config.max_size;
            if max_size > 0 && !state.entries.contains(key) && state.entries.len() >= max_size {
                if let Some(victim) = state.lru.peek_oldest().cloned() {
                    state.remove_entry(&victim);
                    state.record(CacheStats::record_eviction);
                    victims.push(victim);
                }
            }

            if let Some(previous) = state.entries.remove(key) {
                state.tags.remove(key, &previous.tags);
            }
            state.timers.cancel(key);

            let mut entry = CacheEntry::new(ttl, options.tags);
            entry.revision = state.next_revision();
            let tags: Vec<String> = entry.tags.iter().cloned().collect();
            state.tags.add(key, &tags);
            state.entries.insert(key.to_string(), entry);
            state.lru.touch(key);

            for tag in &tags {
                let Some(&cap) = self.inner.config.max_entries_per_tag.get(tag) else {
                    continue;
                };
                if state.tags.count(tag) <= cap {
                    continue;
                }
                let victim = state.tags.members(tag).and_then(|members| {
                    state
                        .lru
                        .oldest_of(members.iter().filter(|member| member.as_str() != key))
                        .cloned()
                });
                if let Some(victim) = victim {
                    state.remove_entry(&victim);
                    state.record(CacheStats::record_eviction);
                    victims.push(victim);
                }
            }

            if let Some(ttl) = ttl {
                state.timers.arm(key, ttl);
            }
            state.record(CacheStats::record_set);
            victims
        };

        // blocking on a victim's lock here could deadlock against a write
        // to the victim that is evicting `key`
        let mut deferred = Vec::new();
        for victim in victims {
            let lock = self.state().await?.storage_locks.handle(&victim);
            match lock.try_lock() {
                Ok(_held) => self.evict_stored(&victim).await,
                Err(_) => deferred.push(victim.clone()),
            }
            self.unlock_key(&victim, &lock).await;
        }

        match self.inner.storage.set(key, bytes).await {
            Ok(()) => {
                debug!(key, ttl_ms = ?ttl.map(|d| d.as_millis()), "Set entry");
                self.publish(CacheEvent::Set {
                    key: key.to_string(),
                    value,
                });
                Ok((true, deferred))
            }
            Err(e) => {
                self.report(Some(key), "set", e);
                Ok((false, deferred))
            }
        }
    }

    /// Storage half of an eviction; the caller holds the victim's lock.
    ///
    /// A victim written again since it was evicted keeps its new value.
    async fn evict_stored(&self, victim: &str) {
        let rewritten = match self.state().await {
            Ok(state) => state.entries.contains(victim),
            Err(_) => return,
        };
        let last = if rewritten {
            None
        } else {
            self.remove_stored(victim).await
        };

        debug!(key = %victim, "Evicted entry");
        self.publish(CacheEvent::Evicted {
            key: victim.to_string(),
            value: last,
        });
    }

    /// Serializes `value` with serde and stores it.
    pub async fn set_typed<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Result<bool> {
        let value = serde_json::to_value(value)
            .map_err(|e| CacheError::InvalidRequest(format!("unserializable value: {}", e)))?;
        self.set(key, value, options).await
    }

    // == Get ==
    /// Returns the stored value, or None on a miss.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.read(key, ReadMode::Access).await
    }

    /// Reads a value and deserializes it into `T`.
    pub async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| CacheError::InvalidRequest(format!("type mismatch for '{}': {}", key, e))),
            None => Ok(None),
        }
    }

    async fn read(&self, key: &str, mode: ReadMode) -> Result<Option<Value>> {
        let recording = mode == ReadMode::Access;

        let Some(revision) = self.live_revision(key, recording).await? else {
            return Ok(None);
        };

        let stored = match self.inner.storage.get(key).await {
            Ok(Some(bytes)) => match self.inner.codec.decode(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    self.report(Some(key), "deserialize", e);
                    self.drop_metadata(key, revision).await?;
                    None
                }
            },
            Ok(None) => {
                self.heal(key, revision).await?;
                None
            }
            Err(e) => {
                // the backend is unreachable, which says nothing about the entry
                self.report(Some(key), "get", e);
                None
            }
        };

        let mut state = self.state().await?;
        // a value read while the key was deleted or rewritten is stale
        let current = stored.filter(|_| state.revision_of(key) == Some(revision));
        let Some(value) = current else {
            if recording {
                state.record(CacheStats::record_miss);
            }
            return Ok(None);
        };

        if recording {
            let mut renewed = None;
            if let Some(entry) = state.entries.get_mut(key) {
                entry.record_access();
                if self.inner.config.sliding_ttl {
                    renewed = entry.renew();
                }
            }
            state.lru.touch(key);
            if let Some(ttl) = renewed {
                state.timers.arm(key, ttl);
            }
            state.record(CacheStats::record_hit);
            drop(state);

            debug!(key, "Cache hit");
            self.publish(CacheEvent::Get {
                key: key.to_string(),
                value: value.clone(),
            });
        }

        Ok(Some(value))
    }

    /// Revision of the live entry for `key`.
    ///
    /// Absent keys count a miss when `recording`. Expired keys are deleted
    /// on the spot (lazy expiration) and count a miss the same way.
    async fn live_revision(&self, key: &str, recording: bool) -> Result<Option<u64>> {
        {
            let mut state = self.state().await?;
            if recording {
                state.record(CacheStats::record_access);
            }

            let status = state
                .entries
                .get(key)
                .map(|entry| (entry.is_expired(), entry.revision));

            match status {
                Some((false, revision)) => return Ok(Some(revision)),
                None => {
                    if recording {
                        state.record(CacheStats::record_miss);
                        debug!(key, "Cache miss");
                    }
                    return Ok(None);
                }
                Some((true, _)) => {}
            }
        }

        let removal = self
            .remove_locked(key, |state| state.remove_if_expired(key))
            .await?;
        if matches!(removal, Removal::Removed(_)) {
            debug!(key, "Lazily expired entry");
        }
        if recording {
            self.state().await?.record(CacheStats::record_miss);
        }
        Ok(None)
    }

    // == Has ==
    /// Whether `key` is live and its value is present in storage.
    ///
    /// Applies lazy expiration and self-healing like `get`, without touching
    /// recency or hit/miss counters.
    pub async fn has(&self, key: &str) -> Result<bool> {
        let Some(revision) = self.live_revision(key, false).await? else {
            return Ok(false);
        };

        match self.inner.storage.has(key).await {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.heal(key, revision).await?;
                Ok(false)
            }
            Err(e) => {
                self.report(Some(key), "has", e);
                Ok(false)
            }
        }
    }

    // == Delete ==
    /// Deletes `key`. Returns whether it existed; absent keys are a silent no-op.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let removal = self
            .remove_locked(key, |state| {
                if state.remove_entry(key).is_none() {
                    return false;
                }
                state.record(CacheStats::record_delete);
                true
            })
            .await?;
        Ok(matches!(removal, Removal::Removed(_)))
    }

    /// Storage half of a delete whose metadata is already gone.
    async fn finish_delete(&self, key: &str) -> Option<Value> {
        let last = self.remove_stored(key).await;
        debug!(key, "Deleted entry");
        self.publish(CacheEvent::Delete {
            key: key.to_string(),
            value: last.clone(),
        });
        last
    }

    // == Clear ==
    /// Removes every entry and cancels every timer. Emits a single `clear`.
    pub async fn clear(&self) -> Result<()> {
        let removed = {
            let mut state = self.state().await?;
            let removed = state.entries.len();
            state.clear();
            removed
        };

        if let Err(e) = self.inner.storage.clear().await {
            self.report(None, "clear", e);
        }

        info!(removed, "Cache cleared");
        self.publish(CacheEvent::Clear);
        Ok(())
    }

    // == Get Or Set ==
    /// Returns the cached value, or runs `loader` once and caches its result.
    ///
    /// Concurrent callers missing on the same key wait for the first
    /// caller's load instead of running their own.
    pub async fn get_or_set<F, Fut>(
        &self,
        key: &str,
        loader: F,
        options: SetOptions,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        validate_key(key)?;

        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let gate = self.state().await?.in_flight.handle(key);
        let result = self.load_through(key, &gate, loader, options).await;
        self.inner.state.lock().await.in_flight.release(key, &gate);
        result
    }

    async fn load_through<F, Fut>(
        &self,
        key: &str,
        gate: &Mutex<()>,
        loader: F,
        options: SetOptions,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        let _loading = gate.lock().await;

        if let Some(value) = self.read(key, ReadMode::Peek).await? {
            debug!(key, "Value loaded by a concurrent caller");
            return Ok(value);
        }

        debug!(key, "Running loader");
        let value = loader().await?;
        self.set(key, value.clone(), options).await?;
        Ok(value)
    }

    // == Tag Operations ==
    /// Live key/value pairs indexed under `tag`, in key order.
    pub async fn get_by_tag(&self, tag: &str) -> Result<Vec<(String, Value)>> {
        let keys = self.state().await?.tags.keys_for(tag);

        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.read(&key, ReadMode::Peek).await? {
                found.push((key, value));
            }
        }
        Ok(found)
    }

    /// Deletes every key indexed under `tag`. Returns whether any was removed.
    pub async fn delete_by_tag(&self, tag: &str) -> Result<bool> {
        let keys = self.state().await?.tags.keys_for(tag);

        let mut removed = false;
        for key in keys {
            removed |= self.delete(&key).await?;
        }
        if removed {
            debug!(tag, "Deleted tag group");
        }
        Ok(removed)
    }

    /// Every tag with at least one member.
    pub async fn tags(&self) -> Result<Vec<String>> {
        Ok(self.state().await?.tags.tags())
    }

    // == Touch ==
    /// Restarts the lifetime of a live key.
    ///
    /// `ttl` replaces the entry's TTL; `None` (or zero) keeps the one it was
    /// written with. Returns false if the key is absent or expired.
    pub async fn touch(&self, key: &str, ttl: Option<Duration>) -> Result<bool> {
        validate_key(key)?;

        {
            let mut state = self.state().await?;
            let expired = match state.entries.get(key) {
                None => return Ok(false),
                Some(entry) => entry.is_expired(),
            };

            if !expired {
                let mut rearm = None;
                if let Some(entry) = state.entries.get_mut(key) {
                    let next = ttl.filter(|d| !d.is_zero()).or(entry.ttl);
                    entry.reset_ttl(next);
                    rearm = entry.ttl;
                }
                match rearm {
                    Some(ttl) => {
                        state.timers.arm(key, ttl);
                    }
                    None => {
                        state.timers.cancel(key);
                    }
                }
                debug!(key, ttl_ms = ?rearm.map(|d| d.as_millis()), "Touched entry");
                return Ok(true);
            }
        }

        self.remove_locked(key, |state| state.remove_if_expired(key)).await?;
        Ok(false)
    }

    // == Introspection ==
    /// Metadata of a live key.
    pub async fn metadata(&self, key: &str) -> Result<Option<EntryInfo>> {
        let state = self.state().await?;
        Ok(state
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.info(key)))
    }

    /// Live keys, sorted.
    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.state().await?.entries.live_keys())
    }

    /// Number of indexed entries, including expired ones not yet removed.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.state().await?.entries.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    // == Stats ==
    pub async fn stats(&self) -> Result<StatsSnapshot> {
        let state = self.state().await?;
        Ok(state.stats.snapshot(state.entries.len()))
    }

    /// Zeroes every counter.
    pub async fn reset_stats(&self) -> Result<()> {
        self.state().await?.stats.reset();
        info!("Cache statistics reset");
        Ok(())
    }

    // == Expiration ==
    /// Removes every expired entry. Emits `expired` per entry and one
    /// `cleanup` when anything was removed.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let candidates = self.state().await?.entries.expired_keys();

        let mut count = 0;
        for key in candidates {
            if let Removal::Removed(last) = self.remove_expired(&key).await? {
                count += 1;
                self.publish(CacheEvent::Expired { key, value: last });
            }
        }

        if count > 0 {
            info!(count, "Swept expired entries");
            self.publish(CacheEvent::Cleanup { count });
        } else {
            debug!("Sweep found no expired entries");
        }
        Ok(count)
    }

    /// Acts on an elapsed timer.
    ///
    /// Stale timers (superseded by a later set or touch) and keys already
    /// removed by another path are ignored.
    pub(crate) async fn handle_expiry(&self, expiry: Expiry) {
        {
            let Ok(mut state) = self.state().await else {
                return;
            };
            if !state.timers.release(&expiry) {
                return;
            }

            let remaining = state
                .entries
                .get(&expiry.key)
                .and_then(|entry| entry.ttl_remaining());
            match remaining {
                None => return,
                Some(left) if !left.is_zero() => {
                    state.timers.arm(&expiry.key, left);
                    return;
                }
                Some(_) => {}
            }
        }

        let Ok(Removal::Removed(last)) = self.remove_expired(&expiry.key).await else {
            return;
        };
        debug!(key = %expiry.key, "Entry expired");
        self.publish(CacheEvent::Expired {
            key: expiry.key,
            value: last,
        });
    }

    // == Shutdown ==
    /// Stops background work, drops all in-memory state and closes the
    /// backend. Values already in storage are left alone. Later calls to
    /// any operation return [`CacheError::ShutDown`].
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.clear();
            state.in_flight.clear();
            state.storage_locks.clear();
            for handle in state.background.drain(..) {
                handle.abort();
            }
        }

        if let Err(e) = self.inner.storage.close().await {
            self.report(None, "close", e);
        }
        info!("Cache engine shut down");
        Ok(())
    }

    // == Helpers ==
    async fn state(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.inner.state.lock().await;
        if state.closed {
            return Err(CacheError::ShutDown);
        }
        Ok(state)
    }

    /// Applies the default TTL to unset or zero TTLs; zero after that means
    /// no expiration.
    fn resolve_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        ttl.filter(|d| !d.is_zero())
            .or(Some(self.inner.config.default_ttl))
            .filter(|d| !d.is_zero())
    }

    async fn key_lock(&self, key: &str) -> Result<Arc<Mutex<()>>> {
        Ok(self.state().await?.storage_locks.handle(key))
    }

    async fn unlock_key(&self, key: &str, lock: &Arc<Mutex<()>>) {
        self.inner.state.lock().await.storage_locks.release(key, lock);
    }

    /// Removes `key` when `decide` agrees, under the key's storage lock.
    ///
    /// `decide` runs under the engine mutex and does the metadata work. The
    /// stored value is deleted before the lock opens, so a write queued
    /// behind the removal always lands after it.
    async fn remove_locked<D>(&self, key: &str, decide: D) -> Result<Removal>
    where
        D: FnOnce(&mut State) -> bool,
    {
        let lock = self.key_lock(key).await?;
        let removal = {
            let _held = lock.lock().await;
            let removed = decide(&mut *self.state().await?);
            if removed {
                Removal::Removed(self.finish_delete(key).await)
            } else {
                Removal::Kept
            }
        };
        self.unlock_key(key, &lock).await;
        Ok(removal)
    }

    /// Timer and sweep removal: counts an expiration on top of the delete.
    async fn remove_expired(&self, key: &str) -> Result<Removal> {
        self.remove_locked(key, |state| {
            let removed = state.remove_if_expired(key);
            if removed {
                state.record(CacheStats::record_expiration);
            }
            removed
        })
        .await
    }

    /// Drops the metadata read at `revision` after storage came back empty.
    ///
    /// Rechecks storage under the key's lock first: a write that was still
    /// in flight during the read has landed by then.
    async fn heal(&self, key: &str, revision: u64) -> Result<()> {
        let lock = self.key_lock(key).await?;
        let healed = {
            let _held = lock.lock().await;
            match self.inner.storage.has(key).await {
                Ok(false) => self.drop_metadata(key, revision).await,
                Ok(true) => Ok(()),
                Err(e) => {
                    self.report(Some(key), "has", e);
                    Ok(())
                }
            }
        };
        self.unlock_key(key, &lock).await;
        healed
    }

    /// Purges metadata for `key` unless it was rewritten since `revision`.
    async fn drop_metadata(&self, key: &str, revision: u64) -> Result<()> {
        let mut state = self.state().await?;
        if state.revision_of(key) == Some(revision) {
            state.remove_entry(key);
            warn!(key, "Storage has no readable value for indexed key; dropped metadata");
        }
        Ok(())
    }

    /// Deletes `key` from storage, returning its last value when readable.
    async fn remove_stored(&self, key: &str) -> Option<Value> {
        let last = match self.inner.storage.get(key).await {
            Ok(bytes) => bytes.and_then(|bytes| self.inner.codec.decode(&bytes).ok()),
            Err(e) => {
                self.report(Some(key), "get", e);
                None
            }
        };

        if let Err(e) = self.inner.storage.delete(key).await {
            self.report(Some(key), "delete", e);
        }
        last
    }

    fn publish(&self, event: CacheEvent) {
        self.inner.events.publish(event);
    }

    /// Logs a degraded storage failure and emits it as an `error` event.
    fn report(&self, key: Option<&str>, op: &str, err: StorageError) {
        warn!(key = key.unwrap_or("-"), op, error = %err, "Storage operation failed");
        self.publish(CacheEvent::Error {
            key: key.map(str::to_string),
            message: format!("{}: {}", op, err),
        });
    }
}

impl fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEngine")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("key must not be empty".to_string()));
    }
    Ok(())
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    async fn engine(config: CacheConfig) -> CacheEngine {
        CacheEngine::new(config.with_check_interval(Duration::ZERO))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = engine(CacheConfig::new()).await;

        assert!(cache.set("k", json!("v"), SetOptions::new()).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(json!("v")));
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let cache = engine(CacheConfig::new()).await;
        assert!(matches!(
            cache.set("", json!(1), SetOptions::new()).await,
            Err(CacheError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_condition_false_is_noop() {
        let cache = engine(CacheConfig::new()).await;
        let mut events = cache.subscribe();

        let written = cache
            .set("k", json!(5), SetOptions::new().condition(|_, v| v.as_i64() > Some(10)))
            .await
            .unwrap();

        assert!(!written);
        assert!(!cache.has("k").await.unwrap());
        assert_eq!(cache.stats().await.unwrap().sets, 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_tags() {
        let cache = engine(CacheConfig::new()).await;

        cache
            .set("k", json!(1), SetOptions::new().tags(["a", "b"]))
            .await
            .unwrap();
        cache
            .set("k", json!(2), SetOptions::new().tags(["b", "c"]))
            .await
            .unwrap();

        assert!(cache.get_by_tag("a").await.unwrap().is_empty());
        assert_eq!(
            cache.get_by_tag("c").await.unwrap(),
            vec![("k".to_string(), json!(2))]
        );
        assert_eq!(cache.tags().await.unwrap(), vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_update_at_capacity_does_not_evict() {
        let cache = engine(CacheConfig::new().with_max_size(2)).await;

        cache.set("a", json!(1), SetOptions::new()).await.unwrap();
        cache.set("b", json!(2), SetOptions::new()).await.unwrap();
        cache.set("a", json!(3), SetOptions::new()).await.unwrap();

        assert_eq!(cache.keys().await.unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(cache.stats().await.unwrap().evictions, 0);
    }

    #[tokio::test]
    async fn test_get_touches_lru() {
        let cache = engine(CacheConfig::new().with_max_size(2)).await;

        cache.set("a", json!(1), SetOptions::new()).await.unwrap();
        cache.set("b", json!(2), SetOptions::new()).await.unwrap();
        cache.get("a").await.unwrap();
        cache.set("c", json!(3), SetOptions::new()).await.unwrap();

        assert!(cache.has("a").await.unwrap());
        assert!(!cache.has("b").await.unwrap());
        assert!(cache.has("c").await.unwrap());
    }

    #[tokio::test]
    async fn test_per_tag_cap_evicts_oldest_member() {
        let cache = engine(CacheConfig::new().with_tag_limit("hot", 2)).await;
        let mut events = cache.subscribe();

        for key in ["h1", "h2", "h3"] {
            cache
                .set(key, json!(key), SetOptions::new().tag("hot"))
                .await
                .unwrap();
        }

        let members: Vec<String> = cache
            .get_by_tag("hot")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(members, vec!["h2".to_string(), "h3".to_string()]);
        assert_eq!(cache.stats().await.unwrap().evictions, 1);

        let mut evicted = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let CacheEvent::Evicted { key, value } = event {
                evicted.push((key, value));
            }
        }
        assert_eq!(evicted, vec![("h1".to_string(), Some(json!("h1")))]);
    }

    #[tokio::test]
    async fn test_metadata_tracks_access_count() {
        let cache = engine(CacheConfig::new()).await;
        cache
            .set("k", json!(1), SetOptions::new().tag("t").ttl_ms(10_000))
            .await
            .unwrap();
        cache.get("k").await.unwrap();
        cache.get("k").await.unwrap();

        let info = cache.metadata("k").await.unwrap().unwrap();
        assert_eq!(info.access_count, 2);
        assert_eq!(info.tags, vec!["t".to_string()]);
        assert!(info.ttl_remaining_ms.unwrap() <= 10_000);
        assert!(cache.metadata("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_touch_resets_and_clears_ttl() {
        let cache = engine(CacheConfig::new()).await;
        cache
            .set("k", json!(1), SetOptions::new().ttl_ms(80))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.touch("k", None).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(1)));

        assert!(cache.touch("k", Some(Duration::from_secs(60))).await.unwrap());
        let info = cache.metadata("k").await.unwrap().unwrap();
        assert!(info.ttl_remaining_ms.unwrap() > 50_000);

        assert!(!cache.touch("missing", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_backend_loss_self_heals() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = CacheEngine::builder()
            .config(CacheConfig::new().with_check_interval(Duration::ZERO))
            .storage(storage.clone())
            .build()
            .await
            .unwrap();

        cache.set("k", json!(1), SetOptions::new().tag("t")).await.unwrap();
        storage.delete("k").await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.len().await.unwrap(), 0);
        assert!(cache.tags().await.unwrap().is_empty());
        assert_eq!(cache.stats().await.unwrap().misses, 1);
    }

    #[tokio::test]
    async fn test_stats_disabled() {
        let cache = engine(CacheConfig::new().with_stats(false)).await;
        cache.set("k", json!(1), SetOptions::new()).await.unwrap();
        cache.get("k").await.unwrap();
        cache.get("nope").await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits + stats.misses + stats.sets, 0);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct User {
            id: u32,
            name: String,
        }

        let cache = engine(CacheConfig::new()).await;
        let user = User {
            id: 7,
            name: "ada".to_string(),
        };
        cache.set_typed("user:7", &user, SetOptions::new()).await.unwrap();

        assert_eq!(cache.get_typed::<User>("user:7").await.unwrap(), Some(user));
        assert!(cache.get_typed::<u64>("user:7").await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_further_calls() {
        let cache = engine(CacheConfig::new()).await;
        cache
            .set("k", json!(1), SetOptions::new().ttl_ms(60_000))
            .await
            .unwrap();

        cache.shutdown().await.unwrap();
        cache.shutdown().await.unwrap();

        assert!(matches!(cache.get("k").await, Err(CacheError::ShutDown)));
        assert!(matches!(
            cache.set("k", json!(1), SetOptions::new()).await,
            Err(CacheError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let cache = engine(CacheConfig::new()).await;
        cache.get("nope").await.unwrap();
        cache.reset_stats().await.unwrap();
        assert_eq!(cache.stats().await.unwrap().misses, 0);
    }

    #[tokio::test]
    async fn test_storage_locks_released_after_use() {
        let cache = engine(CacheConfig::new().with_max_size(1)).await;

        cache.set("a", json!(1), SetOptions::new()).await.unwrap();
        cache.set("b", json!(2), SetOptions::new()).await.unwrap();
        cache.get("a").await.unwrap();
        cache.delete("b").await.unwrap();
        cache.delete("missing").await.unwrap();

        let state = cache.inner.state.lock().await;
        assert!(state.storage_locks.0.is_empty());
        assert!(state.in_flight.0.is_empty());
    }

    #[tokio::test]
    async fn test_queued_write_lands_after_removal() {
        let cache = engine(CacheConfig::new()).await;
        cache.set("k", json!("old"), SetOptions::new()).await.unwrap();

        // hold the key's storage lock as an in-progress removal would
        let lock = cache.key_lock("k").await.unwrap();
        let held = lock.lock().await;

        let writer = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.set("k", json!("new"), SetOptions::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        drop(held);
        cache.unlock_key("k", &lock).await;
        assert!(writer.await.unwrap().unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(json!("new")));
    }
}
