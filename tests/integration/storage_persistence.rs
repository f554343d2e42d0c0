//! State survives reopening the SQLite file

use std::sync::Arc;

use upwatch::{
    config::SlugConfig,
    slug::{SlugAllocator, seed_tickets},
    storage::{StorageBackend, sqlite::SqliteBackend},
};

use crate::helpers::{DB_TIMEOUT, down, ingest_fixture, new_monitor, now_millis};

#[tokio::test]
async fn test_incidents_and_tickets_persist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("persist.db");
    let t0 = now_millis();

    let (monitor_id, slug) = {
        let store: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(&path).await.unwrap());
        seed_tickets(store.as_ref(), &SlugConfig::default()).await.unwrap();

        let id = store
            .insert_monitor(new_monitor(&["us-east-1"]), t0)
            .await
            .unwrap()
            .id;
        let slug = SlugAllocator::new(store.clone(), DB_TIMEOUT)
            .assign(id)
            .await
            .unwrap();

        let fx = ingest_fixture(store.clone());
        fx.ingestor.ingest_at(down(id, "us-east-1"), t0).await.unwrap();

        store.close().await.unwrap();
        (id, slug)
    };

    let store: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(&path).await.unwrap());

    let monitor = store.get_monitor(monitor_id).await.unwrap().unwrap();
    assert_eq!(monitor.slug.as_deref(), Some(slug.as_str()));
    assert_eq!(monitor.last_checked_at, Some(t0));
    assert_eq!(store.open_incidents(monitor_id).await.unwrap().len(), 1);

    // Seeding again is a no-op and the drawn number stays consumed
    assert_eq!(
        seed_tickets(store.as_ref(), &SlugConfig::default()).await.unwrap(),
        0
    );
    let tickets = store.tickets().await.unwrap();
    assert_eq!(tickets.len(), 5);
    let drawn: i64 = tickets.iter().map(|t| t.current_value - t.range_start).sum();
    assert_eq!(drawn, 1);
}
