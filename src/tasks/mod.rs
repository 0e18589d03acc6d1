//! Background Tasks Module
//!
//! Tasks the engine spawns for itself. Both hold only a weak handle, so
//! they end once the last [`CacheEngine`](crate::CacheEngine) is dropped.
//!
//! # Tasks
//! - Expiry worker: acts on elapsed per-key timers
//! - Sweep: removes expired entries at the configured check interval

mod expiry;
mod sweep;

pub(crate) use expiry::spawn_expiry_worker;
pub(crate) use sweep::spawn_sweep_task;
