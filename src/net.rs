//! Network reachability tracking.
//!
//! The host application reports reachability changes via
//! [`NetworkMonitor::set_reachable`]; the monitor persists the flag,
//! triggers a sync drain on the offline-to-online edge, and only then
//! publishes the change to subscribers. A subscriber that wakes on the
//! online edge therefore observes the post-drain queue state.
//!
//! The persisted flag is only a hint for the next start; when no flag is
//! stored the monitor assumes offline, which at worst delays the first
//! drain until the host reports reachability.

use crate::error::Result;
use crate::store::{self, LocalStore, keys};
use crate::sync::SyncQueueManager;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, info};

/// Tracks reachability and gates the sync drain on the online edge.
pub struct NetworkMonitor {
    store: Arc<dyn LocalStore>,
    online: Arc<AtomicBool>,
    sync: Arc<SyncQueueManager>,
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    /// Restore the last known reachability. Missing or corrupt state is
    /// treated as offline.
    pub fn new(
        store: Arc<dyn LocalStore>,
        sync: Arc<SyncQueueManager>,
        online: Arc<AtomicBool>,
    ) -> Self {
        let initial = store::get_json::<bool>(store.as_ref(), keys::NET_STATUS)
            .ok()
            .flatten()
            .unwrap_or(false);
        online.store(initial, Ordering::SeqCst);
        let (tx, _rx) = watch::channel(initial);
        Self {
            store,
            online,
            sync,
            tx,
        }
    }

    /// Current reachability.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Watch reachability changes. The receiver sees the value that was
    /// current at subscription time, then every subsequent transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Record a reachability change reported by the host.
    ///
    /// On the offline-to-online edge the pending sync queue is drained
    /// before subscribers are notified. Repeated reports of the current
    /// state are no-ops.
    pub async fn set_reachable(&self, reachable: bool) -> Result<()> {
        let previous = self.online.swap(reachable, Ordering::SeqCst);
        if previous == reachable {
            debug!("reachability unchanged ({reachable})");
            return Ok(());
        }
        store::set_json(self.store.as_ref(), keys::NET_STATUS, &reachable)?;
        if reachable {
            info!("network restored, draining sync queue");
            self.sync.drain().await;
        } else {
            info!("network lost, queuing mutations locally");
        }
        let _ = self.tx.send(reachable);
        Ok(())
    }
}
