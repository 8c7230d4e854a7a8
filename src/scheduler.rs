//! Periodic delivery scheduler.
//!
//! A single interval tick scans the persisted task table for firings due
//! "now or earlier" instead of arming one timer per task, so pending
//! firings survive a process restart and the number of live timers stays
//! constant. The same tick re-fires deferrals whose quiet window ended,
//! drives the retry queue, and marks long-unacknowledged tasks missed.

use crate::config::SchedulerConfig;
use crate::delivery::retry::RetryQueue;
use crate::delivery::router::DeliveryRouter;
use crate::delivery::{DeferralStore, FiringKind};
use crate::task::TaskCache;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Tasks whose scheduled instant arrived this tick.
    pub fired: usize,
    /// Deferred firings re-fired this tick.
    pub resumed: usize,
    /// Retry entries processed this tick.
    pub retried: usize,
    /// Tasks marked missed this tick.
    pub missed: usize,
}

impl TickSummary {
    fn is_empty(&self) -> bool {
        *self == TickSummary::default()
    }
}

/// Drives deliveries off persisted state on a fixed interval.
pub struct Scheduler {
    config: SchedulerConfig,
    tasks: Arc<TaskCache>,
    router: Arc<DeliveryRouter>,
    retry: Arc<RetryQueue>,
    deferrals: Arc<DeferralStore>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        tasks: Arc<TaskCache>,
        router: Arc<DeliveryRouter>,
        retry: Arc<RetryQueue>,
        deferrals: Arc<DeferralStore>,
    ) -> Self {
        Self {
            config,
            tasks,
            router,
            retry,
            deferrals,
        }
    }

    /// Execute one scheduler pass at `now`.
    ///
    /// Each due task is marked fired before its delivery runs, so a firing
    /// happens at most once even if delivery stalls into the next tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();

        // Missed marking runs first so a retry or deferral resolved later in
        // this same tick still counts as pending for the grace check.
        summary.missed = self.mark_missed(now).await;

        for record in self.tasks.due_unfired(now).await {
            let task_id = record.task.id;
            if let Err(e) = self.tasks.mark_fired(&task_id).await {
                warn!("cannot mark '{task_id}' fired, skipping this firing: {e}");
                continue;
            }
            summary.fired += 1;
            let outcome = self.router.deliver(&task_id, FiringKind::Scheduled, now).await;
            debug!("scheduled firing for '{task_id}': {outcome:?}");
        }

        for task_id in self.deferrals.due(now).await {
            if let Err(e) = self.deferrals.remove(&task_id).await {
                warn!("cannot clear deferral for '{task_id}': {e}");
                continue;
            }
            summary.resumed += 1;
            let outcome = self.router.deliver(&task_id, FiringKind::Deferred, now).await;
            debug!("deferred firing for '{task_id}': {outcome:?}");
        }

        summary.retried = self.retry.process_due(self.router.as_ref(), now).await;

        if !summary.is_empty() {
            info!(
                "tick: {} fired, {} resumed, {} retried, {} missed",
                summary.fired, summary.resumed, summary.retried, summary.missed
            );
        }
        summary
    }

    /// Mark fired tasks missed once the grace period has passed without an
    /// acknowledgment, unless a retry or deferral is still pending for them.
    async fn mark_missed(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::seconds(self.config.missed_grace_secs as i64);
        let mut missed = 0;
        for task_id in self.tasks.missed_candidates(cutoff).await {
            if self.retry.contains(&task_id).await || self.deferrals.contains(&task_id).await {
                continue;
            }
            match self.tasks.mark_missed(&task_id).await {
                Ok(()) => {
                    info!("task '{task_id}' unacknowledged past grace period, marked missed");
                    missed += 1;
                }
                Err(e) => warn!("cannot mark '{task_id}' missed: {e}"),
            }
        }
        missed
    }

    /// Start the background loop.
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "delivery scheduler started, tick every {}s",
                self.config.tick_interval_secs
            );
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                self.config.tick_interval_secs.max(1),
            ));
            loop {
                interval.tick().await;
                self.tick(Utc::now()).await;
            }
        })
    }
}
