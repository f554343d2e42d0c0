//! Scheduler dispatch against SQLite and in-memory / HTTP queues

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use upwatch::{
    model::CheckJob,
    queue::{HttpQueueClient, MemoryQueue, RegionRegistry},
    scheduler::TickReport,
};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use crate::helpers::{memory_registry, new_monitor, now_millis, scheduler, sqlite_store};

#[tokio::test]
async fn test_one_monitor_two_regions_yields_two_jobs() {
    let (store, _dir) = sqlite_store().await;
    let t0 = now_millis();
    let monitor = store
        .insert_monitor(new_monitor(&["us-east-1", "eu-west-1"]), t0)
        .await
        .unwrap();

    let queue = Arc::new(MemoryQueue::new());
    let registry = memory_registry(queue.clone(), &["us-east-1", "eu-west-1"]);

    let report = scheduler(store.clone(), registry).tick_at(t0).await.unwrap();
    assert_eq!(
        report,
        TickReport {
            due_monitors: 1,
            jobs: 2,
            batches: 2,
            enqueued: 2,
            failed: 0,
        }
    );

    let batches = queue.batches().await;
    for batch in &batches {
        let jobs = batch.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(batch.queue_url, format!("mem://{}", jobs[0].region));
        assert_eq!(
            jobs[0],
            CheckJob {
                region: jobs[0].region.clone(),
                monitor_id: monitor.id,
                url: "https://example.com/health".to_string(),
                method: monitor.method,
                expected_status: 200,
                timeout: 5000,
            }
        );
    }

    let stored = store.get_monitor(monitor.id).await.unwrap().unwrap();
    assert_eq!(stored.last_checked_at, Some(t0));
}

#[tokio::test]
async fn test_batches_hold_at_most_ten_unique_entries() {
    let (store, _dir) = sqlite_store().await;
    let t0 = now_millis();
    for _ in 0..25 {
        store
            .insert_monitor(new_monitor(&["ap-south-1"]), t0)
            .await
            .unwrap();
    }

    let queue = Arc::new(MemoryQueue::new());
    let report = scheduler(store.clone(), memory_registry(queue.clone(), &["ap-south-1"]))
        .tick_at(t0)
        .await
        .unwrap();

    assert_eq!(report.jobs, 25);
    assert_eq!(report.enqueued, 25);

    let batches = queue.batches().await;
    let sizes: Vec<_> = batches.iter().map(|b| b.entries.len()).collect();
    assert_eq!(sizes, vec![10, 10, 5]);

    for batch in &batches {
        let ids: HashSet<_> = batch.entries.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids.len(), batch.entries.len());
    }
}

#[tokio::test]
async fn test_interval_floor_controls_redispatch() {
    let (store, _dir) = sqlite_store().await;
    let t0 = now_millis();
    store
        .insert_monitor(new_monitor(&["us-east-1"]), t0)
        .await
        .unwrap();

    let queue = Arc::new(MemoryQueue::new());
    let scheduler = scheduler(store.clone(), memory_registry(queue.clone(), &["us-east-1"]));

    assert_eq!(scheduler.tick_at(t0).await.unwrap().jobs, 1);
    assert_eq!(
        scheduler
            .tick_at(t0 + ChronoDuration::seconds(60))
            .await
            .unwrap(),
        TickReport::default()
    );
    assert_eq!(
        scheduler
            .tick_at(t0 + ChronoDuration::seconds(180))
            .await
            .unwrap()
            .jobs,
        1
    );
}

#[tokio::test]
async fn test_paused_monitors_are_not_dispatched() {
    let (store, _dir) = sqlite_store().await;
    let t0 = now_millis();

    let mut paused = new_monitor(&["us-east-1"]);
    paused.is_paused = true;
    let paused = store.insert_monitor(paused, t0).await.unwrap();

    let queue = Arc::new(MemoryQueue::new());
    let report = scheduler(store.clone(), memory_registry(queue.clone(), &["us-east-1"]))
        .tick_at(t0)
        .await
        .unwrap();

    assert_eq!(report, TickReport::default());
    let stored = store.get_monitor(paused.id).await.unwrap().unwrap();
    assert_eq!(stored.last_checked_at, None);
}

#[tokio::test]
async fn test_http_queue_partial_failure() {
    let server = MockServer::start().await;

    // Accept every entry except the first one of each batch
    Mock::given(method("POST"))
        .respond_with(|req: &Request| {
            let body: Value = req.body_json().unwrap();
            let ids: Vec<String> = body["Entries"]
                .as_array()
                .unwrap()
                .iter()
                .map(|e| e["Id"].as_str().unwrap().to_string())
                .collect();

            ResponseTemplate::new(200).set_body_json(json!({
                "Successful": ids[1..].iter().map(|id| json!({ "Id": id })).collect::<Vec<_>>(),
                "Failed": [{
                    "Id": ids[0],
                    "Code": "ThrottlingException",
                    "Message": "slow down",
                    "SenderFault": false
                }]
            }))
        })
        .expect(1)
        .mount(&server)
        .await;

    let (store, _dir) = sqlite_store().await;
    let t0 = now_millis();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            store
                .insert_monitor(new_monitor(&["eu-west-1"]), t0)
                .await
                .unwrap()
                .id,
        );
    }

    let client = HttpQueueClient::new(Some("region-token".to_string()), Duration::from_secs(5))
        .unwrap();
    let registry = RegionRegistry::new().with_region(
        "eu-west-1",
        &format!("{}/queue/eu-west-1", server.uri()),
        Arc::new(client),
    );

    let report = scheduler(store.clone(), registry).tick_at(t0).await.unwrap();
    assert_eq!(report.enqueued, 2);
    assert_eq!(report.failed, 1);

    // Failed entries are not retried within the tick, the watermark still moves
    for id in ids {
        let stored = store.get_monitor(id).await.unwrap().unwrap();
        assert_eq!(stored.last_checked_at, Some(t0));
    }
}

#[tokio::test]
async fn test_unavailable_queue_fails_whole_batch() {
    let (store, _dir) = sqlite_store().await;
    let t0 = now_millis();
    store
        .insert_monitor(new_monitor(&["us-east-1", "eu-west-1"]), t0)
        .await
        .unwrap();

    let healthy = Arc::new(MemoryQueue::new());
    let broken = Arc::new(MemoryQueue::new());
    broken.set_unavailable(true).await;

    let registry = RegionRegistry::new()
        .with_region("us-east-1", "mem://us-east-1", healthy.clone())
        .with_region("eu-west-1", "mem://eu-west-1", broken.clone());

    let report = scheduler(store.clone(), registry).tick_at(t0).await.unwrap();

    assert_eq!(report.enqueued, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(healthy.jobs().await[0].region, "us-east-1");
}
