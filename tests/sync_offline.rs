//! End-to-end sync tests over a real HTTP backend and a file-backed store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chime::config::{BackendConfig, ChimeConfig};
use chime::store::JsonFileStore;
use chime::{ChimeCore, SyncStatus, Task};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> ChimeConfig {
    ChimeConfig {
        backend: BackendConfig {
            base_url: server.uri(),
            request_timeout_secs: 5,
        },
        ..ChimeConfig::default()
    }
}

fn core_in(dir: &TempDir, server: &MockServer) -> ChimeCore {
    let store = Arc::new(JsonFileStore::new(dir.path()).unwrap());
    ChimeCore::open(config_for(server), store).unwrap()
}

fn task(id: &str, title: &str) -> Task {
    let scheduled_at = Utc.with_ymd_and_hms(2026, 9, 1, 9, 0, 0).single().unwrap();
    Task::new(id, title, scheduled_at)
}

#[tokio::test]
async fn offline_mutations_drain_in_order_on_reconnect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sync/queue"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let core = core_in(&dir, &server);

    // All three edits happen offline.
    core.create_task(task("t1", "Buy milk")).await.unwrap();
    core.update_task(task("t1", "Buy oat milk")).await.unwrap();
    core.create_task(task("t2", "Call dentist")).await.unwrap();
    assert_eq!(core.queue_depth().await, 3);

    core.set_reachable(true).await.unwrap();

    assert_eq!(core.queue_depth().await, 0);
    assert!(core.last_sync_time().await.is_some());

    // The backend saw the mutations strictly in enqueue order.
    let requests = server.received_requests().await.unwrap();
    let order: Vec<(String, String)> = requests
        .iter()
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            (
                body["action"].as_str().unwrap().to_owned(),
                body["entity_id"].as_str().unwrap().to_owned(),
            )
        })
        .collect();
    assert_eq!(
        order,
        vec![
            ("create".to_owned(), "t1".to_owned()),
            ("update".to_owned(), "t1".to_owned()),
            ("create".to_owned(), "t2".to_owned()),
        ]
    );
}

#[tokio::test]
async fn server_error_keeps_the_item_for_the_next_drain() {
    let server = MockServer::start().await;
    // First attempt hits an outage, the follow-up drain succeeds.
    Mock::given(method("POST"))
        .and(path("/api/v1/sync/queue"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sync/queue"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let core = core_in(&dir, &server);
    core.create_task(task("t1", "Buy milk")).await.unwrap();

    core.set_reachable(true).await.unwrap();
    assert_eq!(core.queue_depth().await, 1);
    assert_eq!(
        core.task_delivery_status("t1").await.unwrap().sync_status,
        SyncStatus::Pending
    );

    let summary = core.sync_now().await;
    assert_eq!(summary.synced, 1);
    assert_eq!(core.queue_depth().await, 0);
    assert_eq!(
        core.task_delivery_status("t1").await.unwrap().sync_status,
        SyncStatus::Synced
    );
}

#[tokio::test]
async fn rejected_mutation_is_surfaced_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sync/queue"))
        .respond_with(
            ResponseTemplate::new(422)
                .set_body_json(serde_json::json!({ "detail": "invalid phone number" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let core = core_in(&dir, &server);
    core.create_task(task("t1", "Buy milk")).await.unwrap();
    core.set_reachable(true).await.unwrap();

    assert_eq!(core.queue_depth().await, 0);
    let failed = core.failed_mutations().await;
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.contains("invalid phone number"));
    assert_eq!(
        core.task_delivery_status("t1").await.unwrap().sync_status,
        SyncStatus::Failed
    );
}

#[tokio::test]
async fn queue_and_tasks_survive_a_restart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sync/queue"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    {
        let core = core_in(&dir, &server);
        core.create_task(task("t1", "Buy milk")).await.unwrap();
        assert_eq!(core.queue_depth().await, 1);
    }

    // A fresh process over the same directory picks up the pending edit.
    let core = core_in(&dir, &server);
    assert_eq!(core.queue_depth().await, 1);
    assert_eq!(core.tasks().await.len(), 1);

    core.set_reachable(true).await.unwrap();
    assert_eq!(core.queue_depth().await, 0);
}
