//! Expiration Scheduler
//!
//! One tokio timer task per key with a finite TTL. A timer does not touch
//! the cache itself: when it elapses it posts an [`Expiry`] to the engine's
//! expiry worker, which re-checks the entry before deleting anything.
//!
//! Each armed timer carries a generation number. Re-arming or cancelling a
//! key bumps it, so an [`Expiry`] whose generation no longer matches the
//! armed one is stale and must be ignored.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Notice that a key's timer elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    pub key: String,
    pub generation: u64,
}

#[derive(Debug)]
struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

// == Expiration Scheduler ==
/// At most one armed timer per key.
#[derive(Debug)]
pub struct ExpirationScheduler {
    timers: HashMap<String, Timer>,
    next_generation: u64,
    tx: mpsc::UnboundedSender<Expiry>,
}

impl ExpirationScheduler {
    /// Creates a scheduler that reports elapsed timers on `tx`.
    pub fn new(tx: mpsc::UnboundedSender<Expiry>) -> Self {
        Self {
            timers: HashMap::new(),
            next_generation: 0,
            tx,
        }
    }

    // == Arm ==
    /// Arms a timer for `key`, cancelling any previous one first.
    ///
    /// Must be called from within a tokio runtime. Returns the generation
    /// of the new timer.
    pub fn arm(&mut self, key: &str, delay: Duration) -> u64 {
        self.cancel(key);

        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.tx.clone();
        let expiry = Expiry {
            key: key.to_string(),
            generation,
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // receiver gone means the engine is gone
            let _ = tx.send(expiry);
        });

        self.timers
            .insert(key.to_string(), Timer { generation, handle });
        generation
    }

    // == Cancel ==
    /// Cancels the timer for `key`. Returns whether one was armed.
    pub fn cancel(&mut self, key: &str) -> bool {
        match self.timers.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Releases the slot of an elapsed timer.
    ///
    /// Returns false when `expiry` is stale, i.e. the key was re-armed or
    /// cancelled after this timer was scheduled.
    pub fn release(&mut self, expiry: &Expiry) -> bool {
        match self.timers.get(&expiry.key) {
            Some(timer) if timer.generation == expiry.generation => {
                self.timers.remove(&expiry.key);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, key: &str) -> bool {
        self.timers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Cancels every timer.
    pub fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }
}

impl Drop for ExpirationScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
