//! Top-level facade wiring the subsystems together.
//!
//! [`ChimeCore`] owns one instance of every component and is the only type
//! a host application needs to hold. All services are explicit instances
//! passed by reference; a test can build a fresh core around an in-memory
//! store and a mock backend.

use crate::backend::{HttpBackend, RemoteBackend};
use crate::config::ChimeConfig;
use crate::delivery::log::{ExecutionLog, ExecutionLogEntry};
use crate::delivery::retry::RetryQueue;
use crate::delivery::router::DeliveryRouter;
use crate::delivery::{DeferralStore, DeliveryOutcome, FiringKind};
use crate::error::Result;
use crate::net::NetworkMonitor;
use crate::profile::{ProfilePatch, ProfileStore, UserDeliveryProfile};
use crate::scheduler::{Scheduler, TickSummary};
use crate::store::LocalStore;
use crate::sync::{DrainSummary, EntityKind, FailedMutation, MutationAction, SyncQueueManager};
use crate::task::{Note, SyncStatus, Task, TaskCache, TaskRecord};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Per-task delivery view for sync and notification badges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDeliveryStatus {
    pub sync_status: SyncStatus,
    pub fired: bool,
    pub missed: bool,
    /// A failed firing is waiting in the retry queue.
    pub retry_pending: bool,
    /// Quiet hours pushed the firing to this instant.
    pub deferred_until: Option<DateTime<Utc>>,
}

/// The assembled reminder core.
pub struct ChimeCore {
    tasks: Arc<TaskCache>,
    profiles: Arc<ProfileStore>,
    sync: Arc<SyncQueueManager>,
    network: Arc<NetworkMonitor>,
    router: Arc<DeliveryRouter>,
    retry: Arc<RetryQueue>,
    deferrals: Arc<DeferralStore>,
    log: Arc<ExecutionLog>,
    scheduler: Arc<Scheduler>,
}

impl ChimeCore {
    /// Wire the core around an explicit store and backend.
    pub fn new(
        config: ChimeConfig,
        store: Arc<dyn LocalStore>,
        backend: Arc<dyn RemoteBackend>,
    ) -> Self {
        let online = Arc::new(AtomicBool::new(false));
        let tasks = Arc::new(TaskCache::new(store.clone()));
        let profiles = Arc::new(ProfileStore::new(store.clone()));
        let sync = Arc::new(SyncQueueManager::new(
            config.sync.clone(),
            store.clone(),
            backend.clone(),
            tasks.clone(),
            online.clone(),
        ));
        let network = Arc::new(NetworkMonitor::new(store.clone(), sync.clone(), online));
        let retry = Arc::new(RetryQueue::new(&config.delivery, store.clone()));
        let deferrals = Arc::new(DeferralStore::new(store.clone()));
        let log = Arc::new(ExecutionLog::new(config.delivery.log_capacity, store));
        let router = Arc::new(DeliveryRouter::new(
            tasks.clone(),
            profiles.clone(),
            backend,
            retry.clone(),
            deferrals.clone(),
            log.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler.clone(),
            tasks.clone(),
            router.clone(),
            retry.clone(),
            deferrals.clone(),
        ));
        Self {
            tasks,
            profiles,
            sync,
            network,
            router,
            retry,
            deferrals,
            log,
            scheduler,
        }
    }

    /// Wire the core against the configured HTTP backend.
    pub fn open(config: ChimeConfig, store: Arc<dyn LocalStore>) -> Result<Self> {
        let backend = Arc::new(HttpBackend::new(&config.backend)?);
        Ok(Self::new(config, store, backend))
    }

    /// Create a task locally and queue its mutation for synchronization.
    pub async fn create_task(&self, task: Task) -> Result<()> {
        let now = Utc::now();
        let payload = serde_json::to_value(&task)
            .map_err(|e| crate::error::ChimeError::Storage(format!("cannot encode task: {e}")))?;
        self.tasks
            .upsert_local(task.clone(), !self.network.is_online(), now)
            .await?;
        self.sync
            .enqueue(EntityKind::Task, MutationAction::Create, &task.id, payload)
            .await?;
        Ok(())
    }

    /// Apply a local edit and queue its mutation.
    pub async fn update_task(&self, task: Task) -> Result<()> {
        let now = Utc::now();
        let payload = serde_json::to_value(&task)
            .map_err(|e| crate::error::ChimeError::Storage(format!("cannot encode task: {e}")))?;
        self.tasks.upsert_local(task.clone(), false, now).await?;
        self.sync
            .enqueue(EntityKind::Task, MutationAction::Update, &task.id, payload)
            .await?;
        Ok(())
    }

    /// Mark a task completed and cancel any outstanding firing for it.
    ///
    /// Returns `false` when the id is unknown.
    pub async fn complete_task(&self, task_id: &str) -> Result<bool> {
        let now = Utc::now();
        if !self.tasks.complete(task_id, now).await? {
            return Ok(false);
        }
        self.cancel_pending_firings(task_id).await;
        self.sync
            .enqueue(
                EntityKind::Task,
                MutationAction::Complete,
                task_id,
                json!({ "id": task_id, "completed_at": now }),
            )
            .await?;
        Ok(true)
    }

    /// Mark a task deleted and cancel any outstanding firing for it.
    pub async fn delete_task(&self, task_id: &str) -> Result<bool> {
        let now = Utc::now();
        if !self.tasks.delete(task_id, now).await? {
            return Ok(false);
        }
        self.cancel_pending_firings(task_id).await;
        self.sync
            .enqueue(
                EntityKind::Task,
                MutationAction::Delete,
                task_id,
                json!({ "id": task_id, "deleted_at": now }),
            )
            .await?;
        Ok(true)
    }

    async fn cancel_pending_firings(&self, task_id: &str) {
        if let Err(e) = self.retry.remove(task_id).await {
            warn!("cannot cancel retry entry for '{task_id}': {e}");
        }
        if let Err(e) = self.deferrals.remove(task_id).await {
            warn!("cannot cancel deferral for '{task_id}': {e}");
        }
    }

    /// Queue a note mutation. Notes are write-through; only the backend
    /// stores them durably.
    pub async fn add_note(&self, note: Note) -> Result<()> {
        let payload = serde_json::to_value(&note)
            .map_err(|e| crate::error::ChimeError::Storage(format!("cannot encode note: {e}")))?;
        self.sync
            .enqueue(EntityKind::Note, MutationAction::Create, &note.id, payload)
            .await?;
        Ok(())
    }

    /// Immediate firing entry point for a host that runs its own timers.
    pub async fn fire_task(&self, task_id: &str) -> Result<DeliveryOutcome> {
        self.tasks.mark_fired(task_id).await?;
        Ok(self
            .router
            .deliver(task_id, FiringKind::Scheduled, Utc::now())
            .await)
    }

    /// One scheduler pass; see [`Scheduler::tick`].
    pub async fn tick(&self) -> TickSummary {
        self.scheduler.tick(Utc::now()).await
    }

    /// Process due retry entries outside a full tick.
    pub async fn process_retry_queue(&self) -> usize {
        self.retry.process_due(self.router.as_ref(), Utc::now()).await
    }

    /// Start the background scheduler loop.
    pub fn spawn_scheduler(&self) -> JoinHandle<()> {
        self.scheduler.clone().run()
    }

    /// Report a reachability change from the host platform.
    pub async fn set_reachable(&self, reachable: bool) -> Result<()> {
        self.network.set_reachable(reachable).await
    }

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    /// Watch connectivity transitions.
    pub fn subscribe_connectivity(&self) -> watch::Receiver<bool> {
        self.network.subscribe()
    }

    /// Manually drain the sync queue.
    pub async fn sync_now(&self) -> DrainSummary {
        self.sync.drain().await
    }

    /// Current delivery profile.
    pub fn profile(&self) -> UserDeliveryProfile {
        self.profiles.get()
    }

    /// Merge a partial profile update.
    pub fn update_profile(&self, patch: ProfilePatch) -> Result<UserDeliveryProfile> {
        self.profiles.update(patch)
    }

    // Read-only accessors for sync and notification badges.

    pub async fn queue_depth(&self) -> usize {
        self.sync.queue_depth().await
    }

    pub async fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.sync.last_sync_time().await
    }

    pub async fn failed_mutations(&self) -> Vec<FailedMutation> {
        self.sync.failed_mutations().await
    }

    pub async fn execution_log_tail(&self, n: usize) -> Vec<ExecutionLogEntry> {
        self.log.tail(n).await
    }

    /// All tasks in scheduled order.
    pub async fn tasks(&self) -> Vec<TaskRecord> {
        self.tasks.all().await
    }

    /// Delivery view of one task, if known.
    pub async fn task_delivery_status(&self, task_id: &str) -> Option<TaskDeliveryStatus> {
        let record = self.tasks.get(task_id).await?;
        Some(TaskDeliveryStatus {
            sync_status: record.sync_status,
            fired: record.fired,
            missed: record.missed,
            retry_pending: self.retry.contains(task_id).await,
            deferred_until: self.deferrals.get(task_id).await,
        })
    }
}
