//! End-to-end drains through `SyncEngine`.

use std::time::Duration;

use clinic_offline::{
    Connectivity, EntityType, HttpMethod, LocalStore, MutationAction, OfflineError, SkipReason,
    SyncOutcome,
};
use serde_json::json;

use crate::helpers::{engine_with, manual_config, network_down, FakeTransport};

// ============================================================================
// Queue depth and drains
// ============================================================================

#[tokio::test]
async fn pending_count_tracks_enqueues() {
    let engine = engine_with(
        manual_config(),
        LocalStore::in_memory(),
        FakeTransport::new(),
        Connectivity::offline(),
    );
    assert_eq!(engine.get_sync_status().pending_count, 0);

    for n in 0..3 {
        engine
            .add_to_sync_queue(EntityType::Patient, MutationAction::Create, json!({ "n": n }))
            .unwrap();
    }
    let status = engine.get_sync_status();
    assert_eq!(status.pending_count, 3);
    assert!(!status.is_online);
    assert!(status.last_sync_at.is_none());
    engine.dispose().await;
}

#[tokio::test]
async fn successful_drain_empties_queue_and_stamps_last_sync() {
    let transport = FakeTransport::new();
    let engine = engine_with(
        manual_config(),
        LocalStore::in_memory(),
        transport.clone(),
        Connectivity::online(),
    );
    engine
        .add_to_sync_queue(EntityType::Patient, MutationAction::Create, json!({ "name": "Amina" }))
        .unwrap();
    engine
        .add_to_sync_queue(
            EntityType::Reminder,
            MutationAction::Update,
            json!({ "id": "r7", "text": "bring card" }),
        )
        .unwrap();

    let outcome = engine.trigger_sync().await.unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.succeeded, 2);

    let status = engine.get_sync_status();
    assert_eq!(status.pending_count, 0);
    assert!(status.last_sync_at.is_some());
    assert!(!status.sync_in_progress);

    let sent = transport.sent();
    assert_eq!(sent[0].method, HttpMethod::Post);
    assert_eq!(sent[0].path, "/patients");
    assert_eq!(sent[1].method, HttpMethod::Put);
    assert_eq!(sent[1].path, "/reminders/r7");
    engine.dispose().await;
}

#[tokio::test]
async fn trigger_while_offline_is_a_noop() {
    let transport = FakeTransport::new();
    let engine = engine_with(
        manual_config(),
        LocalStore::in_memory(),
        transport.clone(),
        Connectivity::offline(),
    );
    engine
        .add_to_sync_queue(EntityType::Visit, MutationAction::Create, json!({}))
        .unwrap();

    let outcome = engine.trigger_sync().await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Skipped(SkipReason::Offline)));
    assert!(transport.sent().is_empty());
    assert_eq!(engine.get_sync_status().pending_count, 1);
    engine.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_triggers_run_one_drain() {
    let transport = FakeTransport::slow(Duration::from_millis(50));
    let engine = engine_with(
        manual_config(),
        LocalStore::in_memory(),
        transport.clone(),
        Connectivity::online(),
    );
    for _ in 0..3 {
        engine
            .add_to_sync_queue(EntityType::Patient, MutationAction::Create, json!({}))
            .unwrap();
    }

    let (a, b) = tokio::join!(engine.trigger_sync(), engine.trigger_sync());
    let outcomes = [a.unwrap(), b.unwrap()];
    let completed = outcomes.iter().filter(|o| !o.is_skipped()).count();
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Skipped(SkipReason::InProgress)))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(skipped, 1);
    assert_eq!(transport.sent().len(), 3);
    assert_eq!(transport.max_in_flight(), 1);
    engine.dispose().await;
}

// ============================================================================
// Connectivity transitions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn reconnect_replays_queued_create() {
    let transport = FakeTransport::new();
    let connectivity = Connectivity::offline();
    let engine = engine_with(
        manual_config(),
        LocalStore::in_memory(),
        transport.clone(),
        connectivity.clone(),
    );
    let payload = json!({ "name": "Yaw Mensah", "village": "Akim Oda" });
    engine
        .add_to_sync_queue(EntityType::Patient, MutationAction::Create, payload.clone())
        .unwrap();

    connectivity.set_online(true);
    for _ in 0..20 {
        if engine.get_sync_status().pending_count == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, HttpMethod::Post);
    assert_eq!(sent[0].path, "/patients");
    assert_eq!(sent[0].body, Some(payload));
    assert_eq!(engine.get_sync_status().pending_count, 0);
    engine.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn auto_sync_drains_after_enqueue() {
    let transport = FakeTransport::new();
    let mut config = manual_config();
    config.auto_sync = true;
    let engine = engine_with(
        config,
        LocalStore::in_memory(),
        transport.clone(),
        Connectivity::online(),
    );
    engine
        .add_to_sync_queue(
            EntityType::Appointment,
            MutationAction::Delete,
            json!({ "id": "a1" }),
        )
        .unwrap();

    for _ in 0..20 {
        if !transport.sent().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, HttpMethod::Delete);
    assert_eq!(sent[0].path, "/appointments/a1");
    assert_eq!(sent[0].body, None);
    engine.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn periodic_tick_retries_failed_items() {
    let transport = FakeTransport::new();
    transport.fail_path("/patients", network_down());
    let mut config = manual_config();
    config.auto_sync = true;
    config.sync_interval_secs = 60;
    let engine = engine_with(
        config,
        LocalStore::in_memory(),
        transport.clone(),
        Connectivity::online(),
    );
    engine
        .add_to_sync_queue(EntityType::Patient, MutationAction::Create, json!({}))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(engine.pending().unwrap()[0].retry_count, 1);

    transport.heal();
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(transport.sent().len(), 2);
    assert_eq!(engine.get_sync_status().pending_count, 0);
    engine.dispose().await;
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn one_failing_item_does_not_block_the_rest() {
    let transport = FakeTransport::new();
    transport.fail_path("/appointments", network_down());
    let engine = engine_with(
        manual_config(),
        LocalStore::in_memory(),
        transport.clone(),
        Connectivity::online(),
    );
    engine
        .add_to_sync_queue(EntityType::Patient, MutationAction::Create, json!({ "name": "A" }))
        .unwrap();
    let appointment = engine
        .add_to_sync_queue(EntityType::Appointment, MutationAction::Create, json!({}))
        .unwrap();
    engine
        .add_to_sync_queue(EntityType::Patient, MutationAction::Create, json!({ "name": "B" }))
        .unwrap();

    let report = engine.trigger_sync().await.unwrap();
    let report = report.report().unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.retried, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].mutation_id, appointment);

    let pending = engine.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, appointment);
    assert_eq!(pending[0].retry_count, 1);
    assert!(pending[0].last_error.is_some());
    engine.dispose().await;
}

// ============================================================================
// Degraded storage
// ============================================================================

#[tokio::test]
async fn unavailable_store_reports_warning_and_refuses_enqueue() {
    let engine = engine_with(
        manual_config(),
        LocalStore::unavailable("storage quota exceeded"),
        FakeTransport::new(),
        Connectivity::online(),
    );
    let err = engine
        .add_to_sync_queue(EntityType::Patient, MutationAction::Create, json!({}))
        .unwrap_err();
    assert!(err.is_storage_unavailable());

    let status = engine.get_sync_status();
    assert_eq!(status.pending_count, 0);
    let warning = status.storage_warning.unwrap();
    assert!(warning.contains("storage quota exceeded"));

    assert!(engine.trigger_sync().await.is_err());
    assert!(!engine.get_sync_status().sync_in_progress);
    engine.dispose().await;
}

#[tokio::test]
async fn invalid_config_is_rejected_at_init() {
    let mut config = manual_config();
    config.request_timeout_secs = 0;
    let err = clinic_offline::SyncEngine::init(
        config,
        LocalStore::in_memory(),
        FakeTransport::new(),
        Connectivity::online(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, OfflineError::Config(_)));
}
