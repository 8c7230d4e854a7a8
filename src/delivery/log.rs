//! Bounded audit trail of delivery attempts.

use crate::delivery::DeliveryMethod;
use crate::store::{self, LocalStore, keys};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// One recorded delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub task_id: String,
    pub method: DeliveryMethod,
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Fixed-capacity ring of [`ExecutionLogEntry`] values, oldest evicted
/// first. Diagnostics only; nothing in the delivery path reads it back.
pub struct ExecutionLog {
    store: Arc<dyn LocalStore>,
    capacity: usize,
    entries: Mutex<VecDeque<ExecutionLogEntry>>,
}

impl ExecutionLog {
    /// Load the persisted log, trimming it to `capacity` if the configured
    /// bound shrank since it was written.
    pub fn new(capacity: usize, store: Arc<dyn LocalStore>) -> Self {
        let mut entries = match store::get_json::<VecDeque<ExecutionLogEntry>>(
            store.as_ref(),
            keys::EXECUTION_LOG,
        ) {
            Ok(Some(entries)) => entries,
            Ok(None) => VecDeque::new(),
            Err(e) => {
                warn!("cannot load execution log, starting empty: {e}");
                VecDeque::new()
            }
        };
        while entries.len() > capacity {
            entries.pop_front();
        }
        Self {
            store,
            capacity,
            entries: Mutex::new(entries),
        }
    }

    /// Append one attempt, evicting the oldest entry when full.
    ///
    /// A persistence failure is logged and swallowed; delivery control flow
    /// never depends on the log being writable.
    pub async fn record(
        &self,
        task_id: &str,
        method: DeliveryMethod,
        success: bool,
        message: impl Into<String>,
    ) {
        let entry = ExecutionLogEntry {
            task_id: task_id.to_owned(),
            method,
            success,
            message: message.into(),
            timestamp: Utc::now(),
        };
        let mut entries = self.entries.lock().await;
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        if let Err(e) = store::set_json(self.store.as_ref(), keys::EXECUTION_LOG, &*entries) {
            warn!("cannot persist execution log: {e}");
        }
    }

    /// The most recent `n` entries, oldest first.
    pub async fn tail(&self, n: usize) -> Vec<ExecutionLogEntry> {
        let entries = self.entries.lock().await;
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Entries recorded for one task, oldest first.
    pub async fn for_task(&self, task_id: &str) -> Vec<ExecutionLogEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
