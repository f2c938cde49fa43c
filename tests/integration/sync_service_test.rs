// tests/integration/sync_service_test.rs

//! Sync service tests against a mock Cloud: live upload, offline enqueue
//! and in-order drain, the op_type dispatch table, and the result cache.

use super::test_helpers::MockCloud;
use edgelink::core::events::EventBus;
use edgelink::core::shared_state::SharedState;
use edgelink::core::sync::{ApprovedCommand, CloudClient, SyncQueue, SyncService};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    service: SyncService,
    bus: Arc<EventBus>,
    shared: Arc<SharedState>,
}

fn harness(base_url: &str, queue: SyncQueue, cache_dir: Option<PathBuf>, retention: usize) -> Harness {
    let bus = Arc::new(EventBus::new(128));
    let shared = Arc::new(SharedState::new(bus.clone()));
    let client = CloudClient::new(
        base_url,
        "edge-test",
        Some("cloud-api-token"),
        true,
        Duration::from_secs(5),
        Duration::from_secs(2),
    )
    .unwrap();
    let service = SyncService::new(
        client,
        queue,
        "edge-test",
        cache_dir,
        retention,
        shared.clone(),
        bus.clone(),
    );
    Harness {
        service,
        bus,
        shared,
    }
}

fn memory_queue() -> SyncQueue {
    SyncQueue::open_in_memory(50, 3, 20).unwrap()
}

#[tokio::test]
async fn test_live_settings_upload() {
    let cloud = MockCloud::spawn().await;
    let h = harness(&cloud.base_url, memory_queue(), None, 10);

    let report = h
        .service
        .sync_user_settings("u1", &json!({"theme": "dark"}))
        .await;
    assert!(report.success);
    assert!(!report.queued);
    assert!(report.updated_at.is_some());

    let requests = cloud.requests.lock().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "settings/u1");
    assert_eq!(requests[0].1["settings"]["theme"].as_str(), Some("dark"));
    assert_eq!(requests[0].1["edge_id"].as_str(), Some("edge-test"));
}

#[tokio::test]
async fn test_offline_enqueue_then_drain_in_order() {
    let cloud = MockCloud::spawn().await;
    cloud.set_failing(true);
    let h = harness(&cloud.base_url, memory_queue(), None, 10);

    // Three failed uploads, each queued.
    for _ in 0..3 {
        let report = h
            .service
            .sync_user_settings("u1", &json!({"theme": "dark"}))
            .await;
        assert!(!report.success);
        assert!(report.queued);
        assert!(report.op_id.is_some());
    }
    assert_eq!(h.service.queue_size(), 3);

    // The queue status landed in shared state.
    let queue_state = h.shared.get("queue:status").unwrap();
    assert_eq!(queue_state["pending"].as_u64(), Some(3));

    // Cloud comes back; the drain replays all three, in order, with the
    // original payloads.
    cloud.set_failing(false);
    h.service.set_cloud_available(true);
    let report = h.service.flush_queue().await;
    assert_eq!(report.sent, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.remaining, 0);

    let requests = cloud.requests.lock().clone();
    assert_eq!(requests.len(), 3);
    for (endpoint, body) in &requests {
        assert_eq!(endpoint, "settings/u1");
        assert_eq!(body["settings"]["theme"].as_str(), Some("dark"));
    }

    // The flush published a sync event.
    assert!(h
        .bus
        .recent(100)
        .iter()
        .any(|p| p.topic == "sync.flush_completed"));
}

#[tokio::test]
async fn test_empty_history_batch_is_noop_success() {
    let cloud = MockCloud::spawn().await;
    let h = harness(&cloud.base_url, memory_queue(), None, 10);

    let report = h.service.sync_command_history("u1", &[]).await;
    assert!(report.success);
    assert_eq!(report.synced_count, Some(0));
    assert!(cloud.requests.lock().is_empty());
}

#[tokio::test]
async fn test_history_upload_and_offline_queueing() {
    let cloud = MockCloud::spawn().await;
    let h = harness(&cloud.base_url, memory_queue(), None, 10);

    let records = vec![json!({"command_id": "c1"}), json!({"command_id": "c2"})];
    let report = h.service.sync_command_history("u1", &records).await;
    assert!(report.success);
    assert_eq!(report.synced_count, Some(2));

    cloud.set_failing(true);
    let report = h.service.sync_command_history("u1", &records).await;
    assert!(report.queued);
    assert_eq!(h.service.queue_size(), 1);

    cloud.set_failing(false);
    let report = h.service.flush_queue().await;
    assert_eq!(report.sent, 1);

    let requests = cloud.requests.lock().clone();
    let history_posts: Vec<_> = requests
        .iter()
        .filter(|(endpoint, _)| endpoint == "history/u1")
        .collect();
    assert_eq!(history_posts.len(), 2);
}

#[tokio::test]
async fn test_unknown_op_type_exhausts_retries() {
    let cloud = MockCloud::spawn().await;
    let queue = memory_queue();
    queue.enqueue("carrier_pigeon", &json!({"msg": "coo"}), None).unwrap();
    let h = harness(&cloud.base_url, queue, None, 10);

    // Unknown op types fail every attempt; after max_retry flushes the item
    // is parked as failed and stops occupying the queue.
    for _ in 0..3 {
        h.service.flush_queue().await;
    }
    let stats = h.service.queue_statistics();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_restore_user_settings() {
    let cloud = MockCloud::spawn().await;
    let h = harness(&cloud.base_url, memory_queue(), None, 10);

    let settings = h.service.restore_user_settings("u1").await.unwrap();
    assert_eq!(settings["theme"].as_str(), Some("dark"));

    assert!(h
        .service
        .restore_user_settings("user-without-backup")
        .await
        .is_none());
}

#[tokio::test]
async fn test_approved_command_sync_with_partial_failure() {
    let cloud = MockCloud::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        &cloud.base_url,
        memory_queue(),
        Some(dir.path().to_path_buf()),
        10,
    );

    let commands = vec![
        approved("patrol-route", 1),
        approved("rejected-command", 2),
        approved("dock-sequence", 3),
    ];
    let report = h.service.sync_approved_commands(&commands).await;

    assert_eq!(report.total, 3);
    assert_eq!(report.uploaded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].command_name, "rejected-command");

    // The summary was cached to disk.
    let cached: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|n| n.starts_with("sync_result_edge-test_"))
        })
        .collect();
    assert_eq!(cached.len(), 1);
}

#[tokio::test]
async fn test_cache_retention_keeps_newest_files() {
    let cloud = MockCloud::spawn().await;
    let dir = tempfile::tempdir().unwrap();

    // Seed stale result files beyond the retention limit.
    for n in 0..4 {
        std::fs::write(
            dir.path()
                .join(format!("sync_result_edge-test_2020010{n}_000000.json")),
            "{}",
        )
        .unwrap();
    }

    let h = harness(
        &cloud.base_url,
        memory_queue(),
        Some(dir.path().to_path_buf()),
        2,
    );
    h.service.sync_approved_commands(&[approved("patrol", 1)]).await;

    let count = std::fs::read_dir(dir.path()).unwrap().flatten().count();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_cloud_status_reports_queue_and_categories() {
    let cloud = MockCloud::spawn().await;
    let h = harness(&cloud.base_url, memory_queue(), None, 10);

    let status = h.service.get_cloud_status().await;
    assert!(status.available);
    assert_eq!(status.edge_id, "edge-test");
    assert_eq!(
        status.categories.as_deref(),
        Some(&["navigation".to_string(), "manipulation".to_string()][..])
    );

    cloud.set_failing(true);
    let status = h.service.get_cloud_status().await;
    assert!(!status.available);
    assert!(status.categories.is_none());
}

fn approved(name: &str, id: u64) -> ApprovedCommand {
    ApprovedCommand {
        id,
        name: name.to_string(),
        description: format!("{name} description"),
        category: "navigation".to_string(),
        content: "[{\"action\": \"go_forward\"}]".to_string(),
        version: 1,
        author_username: "alice".to_string(),
        author_email: "alice@example.com".to_string(),
    }
}
