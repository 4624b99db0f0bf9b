//! Periodic Sweep Task
//!
//! Expiry is normally enforced lazily on read. This task additionally
//! purges expired and over-cap entries that nobody reads.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheStore;

/// Spawns a task that calls [`CacheStore::sweep`] every `interval`.
///
/// The returned handle can be used to abort the task during shutdown.
///
/// # Example
/// ```ignore
/// let store = Arc::new(CacheStore::new(backing, StoreConfig::default()));
/// let sweep_handle = spawn_sweep_task(store.clone(), Duration::from_secs(30));
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task(store: Arc<CacheStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_ms = interval.as_millis() as u64,
            "Starting cache sweep task"
        );

        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let removed = store.sweep();
            if removed > 0 {
                info!(removed, "Cache sweep removed entries");
            } else {
                debug!("Cache sweep found nothing to remove");
            }
        }
    })
}
