//! End-to-end delivery tests over a real HTTP backend and a file-backed store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chime::config::{BackendConfig, ChimeConfig};
use chime::profile::ProfilePatch;
use chime::store::JsonFileStore;
use chime::{ChimeCore, DeliveryMethod, DeliveryOutcome, Task};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn core_in(dir: &TempDir, server: &MockServer) -> ChimeCore {
    let config = ChimeConfig {
        backend: BackendConfig {
            base_url: server.uri(),
            request_timeout_secs: 5,
        },
        ..ChimeConfig::default()
    };
    let store = Arc::new(JsonFileStore::new(dir.path()).unwrap());
    ChimeCore::open(config, store).unwrap()
}

fn due_task(id: &str, title: &str) -> Task {
    Task::new(id, title, Utc::now() - Duration::minutes(1))
}

fn enable_calling(core: &ChimeCore) {
    core.update_profile(ProfilePatch {
        phone_number: Some("+15550100".to_owned()),
        calling_enabled: Some(true),
        ..ProfilePatch::default()
    })
    .unwrap();
}

#[tokio::test]
async fn due_task_is_delivered_by_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/calls/schedule"))
        .and(body_partial_json(serde_json::json!({
            "task_id": "t1",
            "phone_number": "+15550100",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/notifications/send"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let core = core_in(&dir, &server);
    enable_calling(&core);
    core.create_task(due_task("t1", "Take medication")).await.unwrap();

    let summary = core.tick().await;
    assert_eq!(summary.fired, 1);

    let tail = core.execution_log_tail(5).await;
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].method, DeliveryMethod::Call);
    assert!(tail[0].success);
}

#[tokio::test]
async fn call_failure_falls_back_to_notification() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/calls/schedule"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/notifications/send"))
        .and(body_partial_json(serde_json::json!({ "task_id": "t1" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let core = core_in(&dir, &server);
    enable_calling(&core);
    core.create_task(due_task("t1", "Take medication")).await.unwrap();

    core.tick().await;

    // One firing, two log entries: the call failure, then the notification.
    let tail = core.execution_log_tail(5).await;
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].method, DeliveryMethod::Call);
    assert!(!tail[0].success);
    assert_eq!(tail[1].method, DeliveryMethod::Notification);
    assert!(tail[1].success);
    assert!(!core.task_delivery_status("t1").await.unwrap().retry_pending);
}

#[tokio::test]
async fn total_channel_failure_lands_in_the_retry_queue() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/calls/schedule"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/notifications/send"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let core = core_in(&dir, &server);
    enable_calling(&core);
    core.create_task(due_task("t1", "Take medication")).await.unwrap();

    core.tick().await;

    let status = core.task_delivery_status("t1").await.unwrap();
    assert!(status.fired);
    assert!(status.retry_pending);

    // The retry is not due yet, so an immediate pass does nothing.
    assert_eq!(core.process_retry_queue().await, 0);
}

#[tokio::test]
async fn silent_task_makes_no_backend_request() {
    let server = MockServer::start().await;
    // No mocks mounted: any request would 404 and fail the delivery.

    let dir = TempDir::new().unwrap();
    let core = core_in(&dir, &server);
    enable_calling(&core);
    let mut task = due_task("t1", "Meditation");
    task.silent_mode = true;
    core.create_task(task).await.unwrap();

    let outcome = core.fire_task("t1").await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Delivered(DeliveryMethod::Silent));

    let tail = core.execution_log_tail(5).await;
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].method, DeliveryMethod::Silent);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn completed_task_is_never_delivered() {
    let server = MockServer::start().await;

    let dir = TempDir::new().unwrap();
    let core = core_in(&dir, &server);
    core.create_task(due_task("t1", "Take medication")).await.unwrap();
    core.complete_task("t1").await.unwrap();

    let summary = core.tick().await;
    assert_eq!(summary.fired, 0);
    assert!(core.execution_log_tail(5).await.is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn execution_log_survives_a_restart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/notifications/send"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    {
        let core = core_in(&dir, &server);
        core.create_task(due_task("t1", "Take medication")).await.unwrap();
        core.tick().await;
        assert_eq!(core.execution_log_tail(5).await.len(), 1);
    }

    let core = core_in(&dir, &server);
    let tail = core.execution_log_tail(5).await;
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].task_id, "t1");
}
