//! Expiry Worker
//!
//! Drains elapsed timers posted by the
//! [`ExpirationScheduler`](crate::cache::ExpirationScheduler) and hands
//! each one to the engine.

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::{Expiry, WeakEngine};

/// Spawns the worker that applies elapsed timers one at a time.
pub(crate) fn spawn_expiry_worker(
    engine: WeakEngine,
    mut rx: UnboundedReceiver<Expiry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(expiry) = rx.recv().await {
            let Some(engine) = engine.upgrade() else {
                break;
            };
            engine.handle_expiry(expiry).await;
        }
        debug!("Expiry worker stopped");
    })
}
