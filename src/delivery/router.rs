//! Channel selection for a firing task.
//!
//! The router runs once per firing and walks forward through silent check,
//! quiet-hours deferral, call attempt, notification fallback, and retry
//! enqueue. Failures only ever chain to the next step; a single firing
//! never loops. Each channel attempt appends exactly one execution log
//! entry.

use crate::backend::{CallRequest, NotificationRequest, RemoteBackend};
use crate::delivery::log::ExecutionLog;
use crate::delivery::retry::RetryQueue;
use crate::delivery::{DeferralStore, DeliveryMethod, DeliveryOutcome, DeliveryResult, FiringKind};
use crate::profile::{ProfileStore, UserDeliveryProfile};
use crate::task::{Task, TaskCache};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decides how a firing task reaches the user.
pub struct DeliveryRouter {
    tasks: Arc<TaskCache>,
    profiles: Arc<ProfileStore>,
    backend: Arc<dyn RemoteBackend>,
    retry: Arc<RetryQueue>,
    deferrals: Arc<DeferralStore>,
    log: Arc<ExecutionLog>,
}

impl DeliveryRouter {
    pub fn new(
        tasks: Arc<TaskCache>,
        profiles: Arc<ProfileStore>,
        backend: Arc<dyn RemoteBackend>,
        retry: Arc<RetryQueue>,
        deferrals: Arc<DeferralStore>,
        log: Arc<ExecutionLog>,
    ) -> Self {
        Self {
            tasks,
            profiles,
            backend,
            retry,
            deferrals,
            log,
        }
    }

    /// Run the delivery flow for one firing of `task_id`.
    ///
    /// `kind` is why the firing is running: scheduled firings and retries
    /// walk the full flow; deferred firings skip the quiet-hours check and
    /// the call attempt and go straight to a notification.
    pub async fn deliver(
        &self,
        task_id: &str,
        kind: FiringKind,
        now: DateTime<Utc>,
    ) -> DeliveryOutcome {
        // Final guard against stale firings: the task may have been
        // completed or deleted after this firing was scheduled.
        let Some(record) = self.tasks.get(task_id).await else {
            debug!("firing for unknown task '{task_id}' skipped");
            return DeliveryOutcome::Skipped;
        };
        if record.task.completed || record.task.deleted {
            debug!("firing for inactive task '{task_id}' skipped");
            return DeliveryOutcome::Skipped;
        }
        let task = record.task;

        if task.silent_mode {
            let result = DeliveryResult {
                success: true,
                method: DeliveryMethod::Silent,
                message: "silent mode, no delivery".to_owned(),
                error: None,
            };
            self.append(&task.id, &result).await;
            return DeliveryOutcome::Delivered(DeliveryMethod::Silent);
        }

        let profile = self.profiles.get();

        if kind != FiringKind::Deferred
            && let Some(quiet) = profile.quiet_hours
            && quiet.contains(profile.local_time(now))
        {
            let until = next_quiet_end(&profile, quiet.end, now);
            if let Err(e) = self.deferrals.set(&task.id, until).await {
                warn!("cannot persist deferral for '{}': {e}", task.id);
            }
            info!("quiet hours, delivery of '{}' deferred to {until}", task.id);
            return DeliveryOutcome::Deferred { until };
        }

        if kind != FiringKind::Deferred
            && profile.calling_enabled
            && let Some(phone_number) = profile.phone_number.clone()
        {
            let request = CallRequest {
                task_id: task.id.clone(),
                phone_number,
                title: task.title.clone(),
                notes: task.notes.clone(),
            };
            match self.backend.request_call(&request).await {
                Ok(()) => {
                    let result = DeliveryResult {
                        success: true,
                        method: DeliveryMethod::Call,
                        message: "call placed".to_owned(),
                        error: None,
                    };
                    self.append(&task.id, &result).await;
                    return DeliveryOutcome::Delivered(DeliveryMethod::Call);
                }
                Err(e) => {
                    let result = DeliveryResult {
                        success: false,
                        method: DeliveryMethod::Call,
                        message: "call failed, falling back to notification".to_owned(),
                        error: Some(e.to_string()),
                    };
                    self.append(&task.id, &result).await;
                }
            }
        }

        let request = NotificationRequest {
            task_id: task.id.clone(),
            title: task.title.clone(),
            body: notification_body(&task),
        };
        match self.backend.request_notification(&request).await {
            Ok(()) => {
                let result = DeliveryResult {
                    success: true,
                    method: DeliveryMethod::Notification,
                    message: "notification sent".to_owned(),
                    error: None,
                };
                self.append(&task.id, &result).await;
                DeliveryOutcome::Delivered(DeliveryMethod::Notification)
            }
            Err(e) => {
                let result = DeliveryResult {
                    success: false,
                    method: DeliveryMethod::Notification,
                    message: "notification failed".to_owned(),
                    error: Some(e.to_string()),
                };
                self.append(&task.id, &result).await;
                if kind == FiringKind::Retry {
                    // The retry queue owns the backoff disposition.
                    return DeliveryOutcome::Failed;
                }
                match self.retry.enqueue(&task.id, now).await {
                    Ok(_) => DeliveryOutcome::RetryQueued,
                    Err(e) => {
                        warn!("cannot enqueue retry for '{}': {e}", task.id);
                        DeliveryOutcome::Failed
                    }
                }
            }
        }
    }

    async fn append(&self, task_id: &str, result: &DeliveryResult) {
        let message = match &result.error {
            Some(error) => format!("{}: {error}", result.message),
            None => result.message.clone(),
        };
        self.log
            .record(task_id, result.method, result.success, message)
            .await;
    }
}

fn notification_body(task: &Task) -> String {
    match &task.notes {
        Some(notes) if !notes.is_empty() => notes.clone(),
        _ => format!("Reminder: {}", task.title),
    }
}

/// First instant at or after `now` whose local wall-clock time equals the
/// quiet-hours end.
fn next_quiet_end(
    profile: &UserDeliveryProfile,
    end: chrono::NaiveTime,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let tz = profile.timezone();
    let local_now = now.with_timezone(&tz).naive_local();
    let mut candidate = local_now.date().and_time(end);
    if candidate <= local_now {
        candidate += Duration::days(1);
    }
    match tz.from_local_datetime(&candidate).single() {
        Some(instant) => instant.with_timezone(&Utc),
        // Unreachable for a fixed offset; fall back to a short defer.
        None => now + Duration::hours(1),
    }
}
