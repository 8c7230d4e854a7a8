//! Durable sync queue for offline mutations.
//!
//! Every local edit becomes a [`SyncQueueItem`] appended to a persistent
//! FIFO, optimistically even while online so a mid-flight disconnect loses
//! nothing. [`SyncQueueManager::drain`] submits items strictly in enqueue
//! order, which preserves causal consistency of edits to the same entity
//! (a `create` always reaches the backend before a later `update`).
//!
//! Items that exhaust their retry budget or are permanently rejected move
//! to a durable failed-mutations list; a user's edit is never silently
//! dropped.

use crate::backend::RemoteBackend;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::store::{self, LocalStore, keys};
use crate::task::{SyncStatus, TaskCache};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Kind of entity a mutation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A scheduled reminder task.
    Task,
    /// A free-form note.
    Note,
}

/// What the mutation does to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    /// Create a new entity.
    Create,
    /// Replace the entity's fields.
    Update,
    /// Delete the entity.
    Delete,
    /// Mark a task completed.
    Complete,
}

/// One pending mutation awaiting remote acknowledgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Unique mutation id; the backend treats submission as idempotent on it.
    pub id: Uuid,
    /// Entity kind.
    pub entity: EntityKind,
    /// Mutation action.
    pub action: MutationAction,
    /// Id of the entity being mutated.
    pub entity_id: String,
    /// Full entity payload as JSON.
    pub payload: serde_json::Value,
    /// When the mutation was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Submission attempts so far. Never exceeds `max_retries`.
    pub retry_count: u32,
    /// Attempt budget before the item moves to the failed list.
    pub max_retries: u32,
}

/// A mutation that could not be synchronized.
///
/// Kept durably so the UI can surface the lost edit and offer recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedMutation {
    /// The abandoned item.
    pub item: SyncQueueItem,
    /// Last error observed.
    pub error: String,
    /// When the item was abandoned.
    pub failed_at: DateTime<Utc>,
}

/// Persisted queue envelope.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueState {
    #[serde(default = "default_queue_version")]
    version: u8,
    #[serde(default)]
    items: VecDeque<SyncQueueItem>,
}

fn default_queue_version() -> u8 {
    1
}

/// Outcome of one [`SyncQueueManager::drain`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Items submitted during this call.
    pub attempted: usize,
    /// Items acknowledged and removed.
    pub synced: usize,
    /// Items moved to the failed-mutations list.
    pub failed: usize,
    /// `true` when another drain was already running and this call was a
    /// no-op; the in-flight drain picks up any newly enqueued items.
    pub already_in_flight: bool,
}

struct SyncState {
    queue: VecDeque<SyncQueueItem>,
    failed: Vec<FailedMutation>,
    last_sync: Option<DateTime<Utc>>,
}

/// Durable, ordered queue of pending mutations with a single-flight drain.
pub struct SyncQueueManager {
    store: Arc<dyn LocalStore>,
    backend: Arc<dyn RemoteBackend>,
    tasks: Arc<TaskCache>,
    online: Arc<AtomicBool>,
    state: Mutex<SyncState>,
    draining: AtomicBool,
    config: SyncConfig,
}

impl SyncQueueManager {
    /// Load persisted queue state. Corrupt state starts empty with a warning.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        backend: Arc<dyn RemoteBackend>,
        tasks: Arc<TaskCache>,
        online: Arc<AtomicBool>,
    ) -> Self {
        let queue = match store::get_json::<QueueState>(store.as_ref(), keys::SYNC_QUEUE) {
            Ok(Some(state)) => state.items,
            Ok(None) => VecDeque::new(),
            Err(e) => {
                warn!("cannot load sync queue, starting empty: {e}");
                VecDeque::new()
            }
        };
        let failed = match store::get_json::<Vec<FailedMutation>>(
            store.as_ref(),
            keys::FAILED_MUTATIONS,
        ) {
            Ok(Some(failed)) => failed,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("cannot load failed mutations, starting empty: {e}");
                Vec::new()
            }
        };
        let last_sync = store::get_json::<DateTime<Utc>>(store.as_ref(), keys::LAST_SYNC)
            .ok()
            .flatten();

        Self {
            store,
            backend,
            tasks,
            online,
            state: Mutex::new(SyncState {
                queue,
                failed,
                last_sync,
            }),
            draining: AtomicBool::new(false),
            config,
        }
    }

    fn persist_queue(&self, state: &SyncState) -> Result<()> {
        store::set_json(
            self.store.as_ref(),
            keys::SYNC_QUEUE,
            &QueueState {
                version: default_queue_version(),
                items: state.queue.clone(),
            },
        )
    }

    fn persist_failed(&self, state: &SyncState) -> Result<()> {
        store::set_json(self.store.as_ref(), keys::FAILED_MUTATIONS, &state.failed)
    }

    fn persist_last_sync(&self, state: &SyncState) -> Result<()> {
        store::set_json(self.store.as_ref(), keys::LAST_SYNC, &state.last_sync)
    }

    /// Append a mutation to the durable queue.
    ///
    /// The updated queue is persisted before this returns. When currently
    /// online and no drain is in flight, a drain is triggered immediately.
    pub async fn enqueue(
        &self,
        entity: EntityKind,
        action: MutationAction,
        entity_id: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid> {
        let item = SyncQueueItem {
            id: Uuid::new_v4(),
            entity,
            action,
            entity_id: entity_id.to_owned(),
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries: self.config.max_retries,
        };
        let id = item.id;

        {
            let mut state = self.state.lock().await;
            state.queue.push_back(item);
            self.persist_queue(&state)?;
            debug!("enqueued {action:?} for {entity:?} '{entity_id}' (depth {})", state.queue.len());
        }

        if self.online.load(Ordering::SeqCst) {
            self.drain().await;
        }
        Ok(id)
    }

    /// Drain the queue toward the backend.
    ///
    /// Single-flight: a concurrent second call is a no-op that relies on
    /// the in-flight drain, which re-checks the queue and therefore picks
    /// up items enqueued while it runs. Each item is attempted at most once
    /// per call, strictly in enqueue order.
    pub async fn drain(&self) -> DrainSummary {
        if self.draining.swap(true, Ordering::SeqCst) {
            debug!("sync drain already in flight");
            return DrainSummary {
                already_in_flight: true,
                ..DrainSummary::default()
            };
        }
        let summary = self.drain_pass().await;
        self.draining.store(false, Ordering::SeqCst);
        summary
    }

    async fn drain_pass(&self) -> DrainSummary {
        {
            let mut state = self.state.lock().await;
            if self.config.consolidate_updates {
                let removed = consolidate_updates(&mut state.queue);
                if removed > 0 {
                    info!("consolidated {removed} superseded update mutations");
                    if let Err(e) = self.persist_queue(&state) {
                        warn!("cannot persist consolidated queue: {e}");
                    }
                }
            }
        }

        let mut summary = DrainSummary::default();
        let mut attempted: HashSet<Uuid> = HashSet::new();

        loop {
            // Re-read the queue each iteration so items enqueued mid-drain
            // are picked up in order.
            let next = {
                let state = self.state.lock().await;
                state
                    .queue
                    .iter()
                    .find(|item| !attempted.contains(&item.id))
                    .cloned()
            };
            let Some(item) = next else { break };

            attempted.insert(item.id);
            summary.attempted += 1;

            let result = self.backend.submit_mutation(&item).await;
            let mut state = self.state.lock().await;
            match result {
                Ok(()) => {
                    state.queue.retain(|i| i.id != item.id);
                    summary.synced += 1;
                    if let Err(e) = self.persist_queue(&state) {
                        warn!("cannot persist queue after sync: {e}");
                    }
                    drop(state);
                    self.mark_projection(&item, SyncStatus::Synced).await;
                    debug!("synced {:?} '{}'", item.action, item.entity_id);
                }
                Err(e) if e.is_transient() => {
                    let exhausted = match state.queue.iter_mut().find(|i| i.id == item.id) {
                        Some(entry) => {
                            entry.retry_count += 1;
                            entry.retry_count >= entry.max_retries
                        }
                        None => false,
                    };
                    if exhausted {
                        self.abandon(&mut state, item.id, &e.to_string());
                        summary.failed += 1;
                        drop(state);
                        self.mark_projection(&item, SyncStatus::Failed).await;
                        warn!(
                            "giving up on {:?} '{}' after {} attempts: {e}",
                            item.action, item.entity_id, item.max_retries
                        );
                    } else {
                        if let Err(e) = self.persist_queue(&state) {
                            warn!("cannot persist queue after failed attempt: {e}");
                        }
                        debug!(
                            "transient sync failure for '{}', will retry next drain: {e}",
                            item.entity_id
                        );
                    }
                }
                Err(e) => {
                    // Permanent rejection: retrying cannot help.
                    self.abandon(&mut state, item.id, &e.to_string());
                    summary.failed += 1;
                    drop(state);
                    self.mark_projection(&item, SyncStatus::Failed).await;
                    warn!("backend rejected {:?} '{}': {e}", item.action, item.entity_id);
                }
            }
        }

        if summary.synced > 0 {
            let mut state = self.state.lock().await;
            state.last_sync = Some(Utc::now());
            if let Err(e) = self.persist_last_sync(&state) {
                warn!("cannot persist last-sync timestamp: {e}");
            }
        }
        if summary.attempted > 0 {
            info!(
                "sync drain complete: {} attempted, {} synced, {} failed",
                summary.attempted, summary.synced, summary.failed
            );
        }
        summary
    }

    fn abandon(&self, state: &mut SyncState, id: Uuid, error: &str) {
        if let Some(pos) = state.queue.iter().position(|i| i.id == id)
            && let Some(item) = state.queue.remove(pos)
        {
            state.failed.push(FailedMutation {
                item,
                error: error.to_owned(),
                failed_at: Utc::now(),
            });
        }
        if let Err(e) = self.persist_queue(state) {
            warn!("cannot persist queue after abandonment: {e}");
        }
        if let Err(e) = self.persist_failed(state) {
            warn!("cannot persist failed mutations: {e}");
        }
    }

    async fn mark_projection(&self, item: &SyncQueueItem, status: SyncStatus) {
        if item.entity != EntityKind::Task {
            return;
        }
        if let Err(e) = self
            .tasks
            .set_sync_status(&item.entity_id, status, Utc::now())
            .await
        {
            warn!("cannot update sync status for task '{}': {e}", item.entity_id);
        }
    }

    /// Number of mutations still awaiting acknowledgment.
    pub async fn queue_depth(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Timestamp of the last drain pass that synchronized at least one item.
    pub async fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_sync
    }

    /// Mutations that exhausted retries or were rejected, oldest first.
    pub async fn failed_mutations(&self) -> Vec<FailedMutation> {
        self.state.lock().await.failed.clone()
    }

    /// Snapshot of the pending queue, in enqueue order.
    pub async fn pending(&self) -> Vec<SyncQueueItem> {
        self.state.lock().await.queue.iter().cloned().collect()
    }
}

/// Collapse runs of consecutive `update` mutations for the same entity,
/// keeping only the newest of each run. Runs broken by any other action
/// are left alone so FIFO causality is preserved.
fn consolidate_updates(queue: &mut VecDeque<SyncQueueItem>) -> usize {
    let mut keep = vec![true; queue.len()];
    // Reverse scan: an update is superseded when the next mutation for the
    // same entity (later in the queue) is also an update.
    let mut later_is_update: HashMap<(EntityKind, String), bool> = HashMap::new();
    for (idx, item) in queue.iter().enumerate().rev() {
        let key = (item.entity, item.entity_id.clone());
        if item.action == MutationAction::Update {
            if later_is_update.get(&key).copied().unwrap_or(false) {
                keep[idx] = false;
            }
            later_is_update.insert(key, true);
        } else {
            later_is_update.insert(key, false);
        }
    }

    let before = queue.len();
    let mut idx = 0;
    queue.retain(|_| {
        let keep_this = keep[idx];
        idx += 1;
        keep_this
    });
    before - queue.len()
}
