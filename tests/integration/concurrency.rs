//! Behaviour under concurrent callers

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use upwatch::{
    config::SlugConfig,
    queue::MemoryQueue,
    scheduler::SchedulerHandle,
    slug::{SlugAllocator, decode_base62, seed_tickets},
};

use crate::helpers::{
    DB_TIMEOUT, down, ingest_fixture, memory_registry, new_monitor, now_millis, scheduler,
    sqlite_store,
};

#[tokio::test]
async fn test_concurrent_slug_allocations_are_injective() {
    let (store, _dir) = sqlite_store().await;
    let config = SlugConfig {
        seed: true,
        start: 100_000,
        range: 1_000,
        tickets: 3,
    };
    seed_tickets(store.as_ref(), &config).await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..60 {
        ids.push(
            store
                .insert_monitor(new_monitor(&["us-east-1"]), now_millis())
                .await
                .unwrap()
                .id,
        );
    }

    let allocator = SlugAllocator::new(store.clone(), DB_TIMEOUT);
    let tasks: Vec<_> = ids
        .iter()
        .map(|&id| {
            let allocator = allocator.clone();
            tokio::spawn(async move { allocator.assign(id).await })
        })
        .collect();

    let mut numbers = Vec::new();
    for result in join_all(tasks).await {
        let slug = result.unwrap().unwrap();
        numbers.push(decode_base62(&slug).unwrap() as i64);
    }

    let unique: HashSet<_> = numbers.iter().copied().collect();
    assert_eq!(unique.len(), 60);

    // Per ticket the handed-out numbers form a gapless run from range_start
    let tickets = store.tickets().await.unwrap();
    let mut per_ticket: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for n in &numbers {
        let ticket = tickets
            .iter()
            .find(|t| (t.range_start..t.range_end).contains(n))
            .unwrap();
        per_ticket.entry(ticket.id).or_default().push(*n);
    }
    for ticket in &tickets {
        let mut drawn = per_ticket.remove(&ticket.id).unwrap_or_default();
        drawn.sort_unstable();
        let expected: Vec<i64> = (ticket.range_start..ticket.current_value).collect();
        assert_eq!(drawn, expected);
    }

    let advanced: i64 = tickets.iter().map(|t| t.current_value - t.range_start).sum();
    assert_eq!(advanced, 60);
}

#[tokio::test]
async fn test_concurrent_down_results_open_one_incident() {
    let (store, _dir) = sqlite_store().await;
    let fx = ingest_fixture(store.clone());
    let id = store
        .insert_monitor(
            new_monitor(&["us-east-1", "eu-west-1", "ap-south-1"]),
            now_millis(),
        )
        .await
        .unwrap()
        .id;

    let regions = ["us-east-1", "eu-west-1", "ap-south-1"];
    let tasks: Vec<_> = (0..12)
        .map(|i| {
            let ingestor = fx.ingestor.clone();
            let region = regions[i % regions.len()];
            tokio::spawn(async move { ingestor.ingest(down(id, region)).await })
        })
        .collect();

    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.opened).count(), 1);
    assert_eq!(store.open_incidents(id).await.unwrap().len(), 1);
    assert_eq!(store.latest_results(id, 100).await.unwrap().len(), 12);
}

#[tokio::test]
async fn test_ticks_never_overlap() {
    let (store, _dir) = sqlite_store().await;
    store
        .insert_monitor(new_monitor(&["us-east-1", "eu-west-1"]), now_millis())
        .await
        .unwrap();

    let queue = Arc::new(MemoryQueue::new());
    queue.set_delay(Some(Duration::from_millis(50))).await;
    let registry = memory_registry(queue.clone(), &["us-east-1", "eu-west-1"]);
    let handle = SchedulerHandle::spawn(scheduler(store, registry), Duration::from_secs(3600));

    let reports = join_all((0..5).map(|_| handle.tick_now())).await;

    let enqueued: usize = reports.into_iter().map(|r| r.unwrap().enqueued).sum();
    assert_eq!(enqueued, 2);
    assert_eq!(queue.jobs().await.len(), 2);

    handle.shutdown().await;
}
