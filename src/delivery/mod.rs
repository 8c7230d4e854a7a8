//! Task delivery: channel selection, quiet-hours deferral, retries, audit log.
//!
//! [`router::DeliveryRouter`] is the state machine that runs when a task
//! fires; [`retry::RetryQueue`] and the [`DeferralStore`] hold firings that
//! must run again later, and [`log::ExecutionLog`] records every attempt.

pub mod log;
pub mod retry;
pub mod router;

use crate::error::Result;
use crate::store::{self, LocalStore, keys};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Channel used (or skipped) by a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    /// Voice call placed by the backend.
    Call,
    /// Push notification.
    Notification,
    /// No channel; the task is silent.
    Silent,
}

/// Result of one channel attempt. Ephemeral; it drives the execution log
/// entry and the retry decision, and is never persisted as such.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub success: bool,
    pub method: DeliveryMethod,
    pub message: String,
    pub error: Option<String>,
}

/// Why a firing is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiringKind {
    /// The task's scheduled instant arrived.
    Scheduled,
    /// Re-attempt from the retry queue.
    Retry,
    /// Notification-only firing after a quiet-hours deferral.
    Deferred,
}

/// Terminal state of one firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// A channel succeeded (or the task was silent).
    Delivered(DeliveryMethod),
    /// Quiet hours; a notification-only firing is scheduled for `until`.
    Deferred { until: DateTime<Utc> },
    /// All channels failed; the firing was handed to the retry queue.
    RetryQueued,
    /// All channels failed during a retry firing; the caller decides the
    /// backoff disposition.
    Failed,
    /// The task was completed or deleted before the firing ran.
    Skipped,
}

/// Firings pushed past a quiet-hours window, keyed by task id.
///
/// Persisted so a deferral survives a restart; the scheduler re-fires each
/// entry once `deliver_at` arrives.
pub struct DeferralStore {
    store: Arc<dyn LocalStore>,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeferralEntry {
    task_id: String,
    deliver_at: DateTime<Utc>,
}

impl DeferralStore {
    /// Load persisted deferrals. Corrupt state starts empty.
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        let entries = match store::get_json::<Vec<DeferralEntry>>(store.as_ref(), keys::DEFERRALS) {
            Ok(Some(entries)) => entries
                .into_iter()
                .map(|e| (e.task_id, e.deliver_at))
                .collect(),
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("cannot load deferrals, starting empty: {e}");
                HashMap::new()
            }
        };
        Self {
            store,
            entries: Mutex::new(entries),
        }
    }

    fn persist(&self, entries: &HashMap<String, DateTime<Utc>>) -> Result<()> {
        let mut rows: Vec<DeferralEntry> = entries
            .iter()
            .map(|(task_id, deliver_at)| DeferralEntry {
                task_id: task_id.clone(),
                deliver_at: *deliver_at,
            })
            .collect();
        rows.sort_by_key(|e| e.deliver_at);
        store::set_json(self.store.as_ref(), keys::DEFERRALS, &rows)
    }

    /// Record (or move) a deferred firing for `task_id`.
    pub async fn set(&self, task_id: &str, deliver_at: DateTime<Utc>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(task_id.to_owned(), deliver_at);
        self.persist(&entries)
    }

    /// Drop the deferral for `task_id`, if any.
    pub async fn remove(&self, task_id: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(task_id).is_some() {
            return self.persist(&entries);
        }
        Ok(())
    }

    pub async fn contains(&self, task_id: &str) -> bool {
        self.entries.lock().await.contains_key(task_id)
    }

    /// Deferred instant for `task_id`, if one is pending.
    pub async fn get(&self, task_id: &str) -> Option<DateTime<Utc>> {
        self.entries.lock().await.get(task_id).copied()
    }

    /// Task ids whose deferred instant has arrived, oldest first.
    pub async fn due(&self, now: DateTime<Utc>) -> Vec<String> {
        let entries = self.entries.lock().await;
        let mut due: Vec<(&String, &DateTime<Utc>)> =
            entries.iter().filter(|(_, at)| **at <= now).collect();
        due.sort_by_key(|(_, at)| **at);
        due.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// All deferred task ids.
    pub async fn task_ids(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }
}
