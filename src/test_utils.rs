//! Shared helpers for unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::backend::{CallRequest, NotificationRequest, RemoteBackend};
use crate::error::{ChimeError, Result};
use crate::sync::SyncQueueItem;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Scripted result for one mock backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    Ok,
    /// Transient network failure.
    Transient,
    /// Permanent rejection.
    Rejected,
}

impl MockOutcome {
    fn into_result(self, what: &str) -> Result<()> {
        match self {
            MockOutcome::Ok => Ok(()),
            MockOutcome::Transient => Err(ChimeError::Network(format!("{what}: connection reset"))),
            MockOutcome::Rejected => Err(ChimeError::Rejected(format!("{what}: invalid request"))),
        }
    }
}

/// In-memory backend that records every request and replays scripted
/// outcomes. Submissions consume a per-call script (empty script means
/// success); calls and notifications use a single sticky outcome each.
pub struct MockBackend {
    submit_script: Mutex<VecDeque<MockOutcome>>,
    call_outcome: Mutex<MockOutcome>,
    notification_outcome: Mutex<MockOutcome>,
    submitted: Mutex<Vec<SyncQueueItem>>,
    calls: Mutex<Vec<CallRequest>>,
    notifications: Mutex<Vec<NotificationRequest>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            submit_script: Mutex::new(VecDeque::new()),
            call_outcome: Mutex::new(MockOutcome::Ok),
            notification_outcome: Mutex::new(MockOutcome::Ok),
            submitted: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
        }
    }

    /// Queue outcomes for upcoming `submit_mutation` calls, in order.
    pub fn script_submit(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
        self.submit_script.lock().unwrap().extend(outcomes);
    }

    pub fn set_call_outcome(&self, outcome: MockOutcome) {
        *self.call_outcome.lock().unwrap() = outcome;
    }

    pub fn set_notification_outcome(&self, outcome: MockOutcome) {
        *self.notification_outcome.lock().unwrap() = outcome;
    }

    pub fn submitted(&self) -> Vec<SyncQueueItem> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<CallRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<NotificationRequest> {
        self.notifications.lock().unwrap().clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteBackend for MockBackend {
    async fn submit_mutation(&self, item: &SyncQueueItem) -> Result<()> {
        // Yield so concurrent callers interleave the way a real request would.
        tokio::task::yield_now().await;
        self.submitted.lock().unwrap().push(item.clone());
        let outcome = self
            .submit_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockOutcome::Ok);
        outcome.into_result("submit")
    }

    async fn request_call(&self, request: &CallRequest) -> Result<()> {
        tokio::task::yield_now().await;
        self.calls.lock().unwrap().push(request.clone());
        let outcome = *self.call_outcome.lock().unwrap();
        outcome.into_result("call")
    }

    async fn request_notification(&self, request: &NotificationRequest) -> Result<()> {
        tokio::task::yield_now().await;
        self.notifications.lock().unwrap().push(request.clone());
        let outcome = *self.notification_outcome.lock().unwrap();
        outcome.into_result("notification")
    }
}

/// Fixed instant for deterministic scheduling tests.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}
