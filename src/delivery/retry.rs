//! Backoff-scheduled re-attempts for firings that failed on every channel.

use crate::config::DeliveryConfig;
use crate::delivery::router::DeliveryRouter;
use crate::delivery::{DeliveryOutcome, FiringKind};
use crate::error::Result;
use crate::store::{self, LocalStore, keys};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One firing awaiting its next attempt.
///
/// `next_retry_at` strictly increases with `retry_count`; the entry leaves
/// the queue once a retry succeeds or `retry_count` reaches `max_retries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryQueueItem {
    pub task_id: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: DateTime<Utc>,
}

/// What happened to a retry entry after a renewed failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Backed off; the entry waits until the contained instant.
    Rescheduled(DateTime<Utc>),
    /// Retry budget exhausted; the firing is permanently abandoned.
    Abandoned,
}

/// Durable set of pending retries, at most one entry per task.
pub struct RetryQueue {
    store: Arc<dyn LocalStore>,
    backoff_base: Duration,
    max_retries: u32,
    items: Mutex<HashMap<String, RetryQueueItem>>,
}

impl RetryQueue {
    /// Load persisted entries. Corrupt state starts empty.
    pub fn new(config: &DeliveryConfig, store: Arc<dyn LocalStore>) -> Self {
        let items = match store::get_json::<Vec<RetryQueueItem>>(store.as_ref(), keys::RETRY_QUEUE)
        {
            Ok(Some(items)) => items
                .into_iter()
                .map(|item| (item.task_id.clone(), item))
                .collect(),
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("cannot load retry queue, starting empty: {e}");
                HashMap::new()
            }
        };
        Self {
            store,
            backoff_base: Duration::seconds(config.retry_backoff_base_secs as i64),
            max_retries: config.max_delivery_retries,
            items: Mutex::new(items),
        }
    }

    fn persist(&self, items: &HashMap<String, RetryQueueItem>) -> Result<()> {
        let mut rows: Vec<RetryQueueItem> = items.values().cloned().collect();
        rows.sort_by_key(|item| item.next_retry_at);
        store::set_json(self.store.as_ref(), keys::RETRY_QUEUE, &rows)
    }

    /// Enqueue a freshly failed firing; the first retry runs one backoff
    /// base from `now`. Re-enqueueing an already queued task resets it.
    pub async fn enqueue(&self, task_id: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let next_retry_at = now + self.backoff_base;
        let mut items = self.items.lock().await;
        items.insert(
            task_id.to_owned(),
            RetryQueueItem {
                task_id: task_id.to_owned(),
                retry_count: 0,
                max_retries: self.max_retries,
                next_retry_at,
            },
        );
        self.persist(&items)?;
        debug!("retry queued for '{task_id}' at {next_retry_at}");
        Ok(next_retry_at)
    }

    /// Drop the entry for `task_id`, if any.
    pub async fn remove(&self, task_id: &str) -> Result<()> {
        let mut items = self.items.lock().await;
        if items.remove(task_id).is_some() {
            return self.persist(&items);
        }
        Ok(())
    }

    pub async fn contains(&self, task_id: &str) -> bool {
        self.items.lock().await.contains_key(task_id)
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Entries whose retry instant has arrived, soonest first.
    pub async fn due(&self, now: DateTime<Utc>) -> Vec<RetryQueueItem> {
        let items = self.items.lock().await;
        let mut due: Vec<RetryQueueItem> = items
            .values()
            .filter(|item| item.next_retry_at <= now && item.retry_count < item.max_retries)
            .cloned()
            .collect();
        due.sort_by_key(|item| item.next_retry_at);
        due
    }

    /// After a renewed failure, double the backoff or abandon the firing.
    pub async fn reschedule_or_abandon(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryDisposition> {
        let mut items = self.items.lock().await;
        let Some(item) = items.get_mut(task_id) else {
            return Ok(RetryDisposition::Abandoned);
        };
        item.retry_count += 1;
        if item.retry_count >= item.max_retries {
            items.remove(task_id);
            self.persist(&items)?;
            return Ok(RetryDisposition::Abandoned);
        }
        let next = now + self.backoff_base * 2i32.pow(item.retry_count);
        item.next_retry_at = next;
        self.persist(&items)?;
        Ok(RetryDisposition::Rescheduled(next))
    }

    /// Run every due entry back through the full router flow.
    ///
    /// Called from the periodic scheduler tick; the queue never polls
    /// itself. Returns the number of entries processed.
    pub async fn process_due(&self, router: &DeliveryRouter, now: DateTime<Utc>) -> usize {
        let due = self.due(now).await;
        let processed = due.len();
        for item in due {
            let outcome = router.deliver(&item.task_id, FiringKind::Retry, now).await;
            match outcome {
                DeliveryOutcome::Failed => {
                    match self.reschedule_or_abandon(&item.task_id, now).await {
                        Ok(RetryDisposition::Rescheduled(next)) => {
                            debug!("retry for '{}' backed off to {next}", item.task_id);
                        }
                        Ok(RetryDisposition::Abandoned) => {
                            info!(
                                "delivery permanently abandoned for '{}' after {} retries",
                                item.task_id, item.max_retries
                            );
                        }
                        Err(e) => warn!("cannot update retry entry for '{}': {e}", item.task_id),
                    }
                }
                // Delivered, skipped, or moved to the deferral store: the
                // firing no longer belongs here.
                _ => {
                    if let Err(e) = self.remove(&item.task_id).await {
                        warn!("cannot remove retry entry for '{}': {e}", item.task_id);
                    }
                }
            }
        }
        processed
    }
}
