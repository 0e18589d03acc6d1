//! Expired-entry Sweep Task
//!
//! Periodically removes entries whose TTL has passed but whose timer has
//! not yet fired (or was never observed by a read).

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::WeakEngine;

/// Spawns a background task that runs `cleanup_expired` every `interval`.
///
/// The task sleeps before its first sweep and stops on its own once the
/// engine is gone or shut down.
///
/// # Arguments
/// * `engine` - weak handle to the engine to sweep
/// * `interval` - time between sweeps; must be non-zero
///
/// # Returns
/// A JoinHandle the engine aborts on shutdown.
pub(crate) fn spawn_sweep_task(engine: WeakEngine, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_ms = interval.as_millis() as u64,
            "Starting expiration sweep task"
        );

        loop {
            tokio::time::sleep(interval).await;

            let Some(engine) = engine.upgrade() else {
                debug!("Engine dropped, stopping sweep task");
                break;
            };

            if let Err(e) = engine.cleanup_expired().await {
                warn!(error = %e, "Stopping sweep task");
                break;
            }
        }
    })
}
