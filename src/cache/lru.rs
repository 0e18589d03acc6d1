//! LRU Tracker Module
//!
//! Implements Least Recently Used tracking for cache eviction.

use std::collections::{BTreeMap, HashMap};

// == LRU Tracker ==
/// Tracks access order for LRU eviction strategy.
///
/// Every touch stamps the key with the next value of a logical clock, so
/// two keys never share a stamp and earlier touches always sort first.
/// The ordered `BTreeMap` side gives O(log n) victim selection and touch.
#[derive(Debug, Default)]
pub struct LruTracker {
    /// Last stamp handed out
    clock: u64,
    /// Key -> stamp of its last access
    stamps: HashMap<String, u64>,
    /// Stamp -> key, oldest first
    order: BTreeMap<u64, String>,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used, indexing it if new.
    pub fn touch(&mut self, key: &str) {
        self.clock += 1;
        let stamp = self.clock;

        match self.stamps.get_mut(key) {
            Some(previous) => {
                self.order.remove(previous);
                *previous = stamp;
            }
            None => {
                self.stamps.insert(key.to_string(), stamp);
            }
        }
        self.order.insert(stamp, key.to_string());
    }

    // == Remove ==
    /// Removes a key from the tracker. Returns whether it was tracked.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.stamps.remove(key) {
            Some(stamp) => {
                self.order.remove(&stamp);
                true
            }
            None => false,
        }
    }

    // == Peek Oldest ==
    /// Returns the least recently used key without removing it.
    pub fn peek_oldest(&self) -> Option<&String> {
        self.order.values().next()
    }

    /// Least recently used key among `candidates`, skipping untracked ones.
    pub fn oldest_of<'a, I>(&self, candidates: I) -> Option<&'a String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        candidates
            .into_iter()
            .filter_map(|key| self.stamps.get(key).map(|stamp| (*stamp, key)))
            .min_by_key(|(stamp, _)| *stamp)
            .map(|(_, key)| key)
    }

    // == Length ==
    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn clear(&mut self) {
        self.stamps.clear();
        self.order.clear();
    }
}
