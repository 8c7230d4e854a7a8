//! Remote backend seam.
//!
//! The backend owns durable storage, places phone calls, and sends push
//! notifications; chime only submits requests and interprets the outcome.
//! Three RPCs cover the whole surface: submit a queued mutation
//! (idempotent on the item id), request a call, request a notification.

use crate::config::BackendConfig;
use crate::error::{ChimeError, Result};
use crate::sync::SyncQueueItem;
use async_trait::async_trait;
use serde::Serialize;

/// Request for a voice-call delivery.
#[derive(Debug, Clone, Serialize)]
pub struct CallRequest {
    /// Task being delivered.
    pub task_id: String,
    /// E.164 destination number.
    pub phone_number: String,
    /// Task title, spoken by the call script.
    pub title: String,
    /// Optional task description.
    pub notes: Option<String>,
}

/// Request for a push-notification delivery.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRequest {
    /// Task being delivered.
    pub task_id: String,
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
}

/// Remote backend contract.
///
/// Implementations must apply a request timeout and report it as
/// [`ChimeError::Network`]; a timeout is never success. Explicit refusals
/// (invalid phone number, unknown task) surface as [`ChimeError::Rejected`].
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Submit one queued mutation. Idempotent on `item.id`.
    async fn submit_mutation(&self, item: &SyncQueueItem) -> Result<()>;

    /// Ask the backend to place a reminder call.
    async fn request_call(&self, request: &CallRequest) -> Result<()>;

    /// Ask the backend to send a push notification.
    async fn request_notification(&self, request: &NotificationRequest) -> Result<()>;
}

/// HTTP backend client over the reminder service's REST surface.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Build a client with the configured per-request timeout.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ChimeError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        })
    }

    async fn post_json<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ChimeError::Network(format!("request to {path} timed out"))
            } else {
                ChimeError::Network(format!("cannot reach backend: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        // FastAPI-style error bodies carry a machine-readable `detail`.
        let reason = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_owned))
            .unwrap_or_else(|| format!("backend returned {status}"));

        if status.is_client_error() {
            Err(ChimeError::Rejected(reason))
        } else {
            Err(ChimeError::Network(reason))
        }
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn submit_mutation(&self, item: &SyncQueueItem) -> Result<()> {
        self.post_json("/api/v1/sync/queue", item).await
    }

    async fn request_call(&self, request: &CallRequest) -> Result<()> {
        self.post_json("/api/v1/calls/schedule", request).await
    }

    async fn request_notification(&self, request: &NotificationRequest) -> Result<()> {
        self.post_json("/api/v1/notifications/send", request).await
    }
}
