//! Durability of the queue across reopen.

use std::sync::Arc;

use clinic_offline::{
    Connectivity, EntityCache, EntityType, LocalStore, MutationAction, MutationQueue,
    SqliteBackend,
};
use serde_json::json;

use crate::helpers::{engine_with, manual_config, FakeTransport};

fn open(path: &std::path::Path) -> LocalStore {
    let backend = SqliteBackend::open(path).unwrap();
    LocalStore::new(Arc::new(backend)).unwrap()
}

#[test]
fn queued_mutations_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clinic.db");

    let ids: Vec<String> = {
        let queue = MutationQueue::new(open(&path));
        ["a", "b", "c"]
            .iter()
            .map(|n| {
                queue
                    .enqueue(EntityType::Patient, MutationAction::Create, json!({ "name": n }))
                    .unwrap()
            })
            .collect()
    };

    let queue = MutationQueue::new(open(&path));
    let pending = queue.drain().unwrap();
    let reopened: Vec<String> = pending.iter().map(|m| m.id.clone()).collect();
    assert_eq!(reopened, ids);
    assert!(pending.iter().all(|m| m.retry_count == 0));

    // Sequence continues after reopen.
    let d = queue
        .enqueue(EntityType::Visit, MutationAction::Create, json!({}))
        .unwrap();
    assert_eq!(queue.drain().unwrap().last().unwrap().id, d);
}

#[tokio::test]
async fn last_sync_and_in_progress_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clinic.db");

    {
        let engine = engine_with(
            manual_config(),
            open(&path),
            FakeTransport::new(),
            Connectivity::online(),
        );
        engine
            .add_to_sync_queue(EntityType::Patient, MutationAction::Create, json!({}))
            .unwrap();
        engine.trigger_sync().await.unwrap();
        engine.dispose().await;
    }

    let engine = engine_with(
        manual_config(),
        open(&path),
        FakeTransport::new(),
        Connectivity::offline(),
    );
    let status = engine.get_sync_status();
    assert!(status.last_sync_at.is_some());
    assert!(!status.sync_in_progress);
    assert_eq!(status.pending_count, 0);
    engine.dispose().await;
}

#[test]
fn unopenable_path_degrades_to_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let store = LocalStore::open_sqlite(&blocker.join("clinic.db"));
    assert!(!store.is_available());
    assert!(store.unavailable_reason().is_some());
    let err = MutationQueue::new(store)
        .enqueue(EntityType::Patient, MutationAction::Create, json!({}))
        .unwrap_err();
    assert!(err.is_storage_unavailable());
}

#[test]
fn entity_cache_persists_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clinic.db");
    EntityCache::new(open(&path))
        .put(&EntityType::Appointment, "a1", &json!({ "at": "09:00" }))
        .unwrap();

    let cache = EntityCache::new(open(&path));
    assert_eq!(
        cache.get(&EntityType::Appointment, "a1").unwrap(),
        Some(json!({ "at": "09:00" }))
    );
}
