//! Task model and the unified offline task cache.
//!
//! The cache is a single authoritative id-keyed table with a sync status
//! per row. Offline edits land here immediately for display and take
//! precedence over stale copies; remote state is merged in without
//! clobbering rows that still have unsynchronized local changes.

use crate::error::Result;
use crate::store::{self, LocalStore, keys};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Synchronization state of a cached task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local edit not yet acknowledged by the backend.
    Pending,
    /// In agreement with the backend.
    Synced,
    /// The backing mutation exhausted retries or was rejected.
    Failed,
}

/// A scheduled reminder task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable task identifier.
    pub id: String,
    /// Short title spoken or shown to the user.
    pub title: String,
    /// Optional longer description.
    pub notes: Option<String>,
    /// Instant at which the reminder fires.
    pub scheduled_at: DateTime<Utc>,
    /// Silent tasks deliver nothing when they fire.
    pub silent_mode: bool,
    /// Completed tasks are never delivered.
    pub completed: bool,
    /// Soft-deleted tasks are never delivered.
    pub deleted: bool,
}

impl Task {
    /// Create a new active, non-silent task.
    pub fn new(id: impl Into<String>, title: impl Into<String>, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            notes: None,
            scheduled_at,
            silent_mode: false,
            completed: false,
            deleted: false,
        }
    }
}

/// A free-form note, optionally attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    /// Stable note identifier.
    pub id: String,
    /// Task this note belongs to, if any.
    pub task_id: Option<String>,
    /// Note body.
    pub body: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

/// One row of the unified task table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// The task itself.
    pub task: Task,
    /// Sync state of the latest local edit.
    pub sync_status: SyncStatus,
    /// Whether the row was first created while offline.
    pub created_offline: bool,
    /// Last local modification instant.
    pub modified_at: DateTime<Utc>,
    /// Whether the scheduled firing was already handed to the router.
    /// Prevents duplicate firings across scheduler ticks and restarts.
    #[serde(default)]
    pub fired: bool,
    /// Marked when a fired task stayed unacknowledged past the grace period.
    #[serde(default)]
    pub missed: bool,
}

/// Persisted task table envelope.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskTable {
    #[serde(default = "default_table_version")]
    version: u8,
    #[serde(default)]
    records: Vec<TaskRecord>,
}

fn default_table_version() -> u8 {
    1
}

/// Unified, store-backed task cache.
pub struct TaskCache {
    store: Arc<dyn LocalStore>,
    records: Mutex<HashMap<String, TaskRecord>>,
}

impl TaskCache {
    /// Load the cache from the store. Corrupt state starts empty.
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        let records = match store::get_json::<TaskTable>(store.as_ref(), keys::TASKS) {
            Ok(Some(table)) => table
                .records
                .into_iter()
                .map(|r| (r.task.id.clone(), r))
                .collect(),
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("cannot load task cache, starting empty: {e}");
                HashMap::new()
            }
        };
        Self {
            store,
            records: Mutex::new(records),
        }
    }

    fn persist(&self, records: &HashMap<String, TaskRecord>) -> Result<()> {
        let mut rows: Vec<TaskRecord> = records.values().cloned().collect();
        rows.sort_by(|a, b| a.task.scheduled_at.cmp(&b.task.scheduled_at));
        let table = TaskTable {
            version: default_table_version(),
            records: rows,
        };
        store::set_json(self.store.as_ref(), keys::TASKS, &table)
    }

    /// Insert or replace a row with a local edit.
    pub async fn upsert_local(
        &self,
        task: Task,
        created_offline: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut records = self.records.lock().await;
        let created_offline = records
            .get(&task.id)
            .map(|r| r.created_offline)
            .unwrap_or(created_offline);
        records.insert(
            task.id.clone(),
            TaskRecord {
                task,
                sync_status: SyncStatus::Pending,
                created_offline,
                modified_at: now,
                fired: false,
                missed: false,
            },
        );
        self.persist(&records)
    }

    /// Merge a task received from the backend.
    ///
    /// Rows with unsynchronized local changes win over the remote copy.
    pub async fn apply_remote(&self, task: Task, now: DateTime<Utc>) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records.get(&task.id)
            && existing.sync_status == SyncStatus::Pending
        {
            return Ok(());
        }
        let (fired, missed) = records
            .get(&task.id)
            .map(|r| (r.fired, r.missed))
            .unwrap_or((false, false));
        records.insert(
            task.id.clone(),
            TaskRecord {
                fired,
                missed,
                task,
                sync_status: SyncStatus::Synced,
                created_offline: false,
                modified_at: now,
            },
        );
        self.persist(&records)
    }

    /// Look up a row by task id.
    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.records.lock().await.get(task_id).cloned()
    }

    /// Whether the task exists and is neither completed nor deleted.
    pub async fn is_active(&self, task_id: &str) -> bool {
        self.records
            .lock()
            .await
            .get(task_id)
            .map(|r| !r.task.completed && !r.task.deleted)
            .unwrap_or(false)
    }

    /// Update the sync status of a row, if present.
    pub async fn set_sync_status(
        &self,
        task_id: &str,
        status: SyncStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(task_id) {
            record.sync_status = status;
            record.modified_at = now;
            return self.persist(&records);
        }
        Ok(())
    }

    /// Mark a task completed. Returns `false` when the id is unknown.
    pub async fn complete(&self, task_id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.flag(task_id, now, |task| task.completed = true).await
    }

    /// Soft-delete a task. Returns `false` when the id is unknown.
    pub async fn delete(&self, task_id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.flag(task_id, now, |task| task.deleted = true).await
    }

    async fn flag(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
        apply: impl FnOnce(&mut Task),
    ) -> Result<bool> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(task_id) else {
            return Ok(false);
        };
        apply(&mut record.task);
        record.sync_status = SyncStatus::Pending;
        record.modified_at = now;
        self.persist(&records)?;
        Ok(true)
    }

    /// Active rows whose scheduled instant has arrived and which have not
    /// fired yet, in scheduled order.
    pub async fn due_unfired(&self, now: DateTime<Utc>) -> Vec<TaskRecord> {
        let records = self.records.lock().await;
        let mut due: Vec<TaskRecord> = records
            .values()
            .filter(|r| {
                !r.fired
                    && !r.missed
                    && !r.task.completed
                    && !r.task.deleted
                    && r.task.scheduled_at <= now
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.task.scheduled_at.cmp(&b.task.scheduled_at));
        due
    }

    /// Record that a firing was handed to the router.
    pub async fn mark_fired(&self, task_id: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(task_id) {
            record.fired = true;
            return self.persist(&records);
        }
        Ok(())
    }

    /// Fired, still-active rows scheduled at or before `cutoff`.
    pub async fn missed_candidates(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.records
            .lock()
            .await
            .values()
            .filter(|r| {
                r.fired
                    && !r.missed
                    && !r.task.completed
                    && !r.task.deleted
                    && r.task.scheduled_at <= cutoff
            })
            .map(|r| r.task.id.clone())
            .collect()
    }

    /// Mark a task missed after its grace period lapsed.
    pub async fn mark_missed(&self, task_id: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(task_id) {
            record.missed = true;
            return self.persist(&records);
        }
        Ok(())
    }

    /// All rows in scheduled order, for UI display.
    pub async fn all(&self) -> Vec<TaskRecord> {
        let records = self.records.lock().await;
        let mut rows: Vec<TaskRecord> = records.values().cloned().collect();
        rows.sort_by(|a, b| a.task.scheduled_at.cmp(&b.task.scheduled_at));
        rows
    }
}
