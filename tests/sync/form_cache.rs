//! Per-form buffering and replay.

use std::sync::Arc;
use std::time::Duration;

use clinic_offline::{
    Connectivity, FormCache, LocalStore, OfflineError, ReplayPolicy, SubmitOutcome,
};
use serde_json::json;

use crate::helpers::{engine_with, manual_config, FakeSubmitter, FakeTransport};

fn intake(
    store: &LocalStore,
    connectivity: &Connectivity,
    submitter: &Arc<FakeSubmitter>,
    policy: ReplayPolicy,
) -> FormCache {
    FormCache::new("intake", store.clone(), connectivity.clone(), submitter.clone())
        .with_policy(policy)
}

#[tokio::test]
async fn online_submit_goes_straight_through() {
    let store = LocalStore::in_memory();
    let submitter = FakeSubmitter::new();
    let form = intake(&store, &Connectivity::online(), &submitter, ReplayPolicy::default());

    let outcome = form.submit(json!({ "name": "Esi" })).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::Submitted);
    assert_eq!(submitter.submitted().len(), 1);
    assert!(form.pending().unwrap().is_empty());
}

#[tokio::test]
async fn online_submit_failure_is_returned_not_buffered() {
    let store = LocalStore::in_memory();
    let submitter = FakeSubmitter::new();
    submitter.reject_name("Esi");
    let form = intake(&store, &Connectivity::online(), &submitter, ReplayPolicy::default());

    let err = form.submit(json!({ "name": "Esi" })).await.unwrap_err();
    assert!(matches!(err, OfflineError::Remote(_)));
    assert!(form.pending().unwrap().is_empty());
}

#[tokio::test]
async fn offline_submissions_are_stored_under_form_key() {
    let store = LocalStore::in_memory();
    let submitter = FakeSubmitter::new();
    let form = intake(&store, &Connectivity::offline(), &submitter, ReplayPolicy::default());

    assert_eq!(form.storage_key(), "form_intake_pending");
    for name in ["A", "B"] {
        let outcome = form.submit(json!({ "name": name })).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Queued);
    }
    assert_eq!(
        form.pending().unwrap(),
        vec![json!({ "name": "A" }), json!({ "name": "B" })]
    );
    assert!(submitter.submitted().is_empty());
}

#[tokio::test]
async fn retain_failed_keeps_only_failures() {
    let store = LocalStore::in_memory();
    let connectivity = Connectivity::offline();
    let submitter = FakeSubmitter::new();
    let form = intake(&store, &connectivity, &submitter, ReplayPolicy::RetainFailed);
    for name in ["A", "B", "C"] {
        form.submit(json!({ "name": name })).await.unwrap();
    }

    submitter.reject_name("B");
    connectivity.set_online(true);
    let report = form.replay_pending().await.unwrap();
    assert_eq!(report.submitted, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.retained, 1);
    assert_eq!(form.pending().unwrap(), vec![json!({ "name": "B" })]);

    submitter.accept_all();
    form.replay_pending().await.unwrap();
    assert!(form.pending().unwrap().is_empty());
    let names: Vec<_> = submitter
        .submitted()
        .iter()
        .map(|p| p["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, ["A", "C", "B"]);
}

#[tokio::test]
async fn clear_all_drops_failures_after_replay() {
    let store = LocalStore::in_memory();
    let connectivity = Connectivity::offline();
    let submitter = FakeSubmitter::new();
    let form = intake(&store, &connectivity, &submitter, ReplayPolicy::ClearAll);
    for name in ["A", "B", "C"] {
        form.submit(json!({ "name": name })).await.unwrap();
    }

    submitter.reject_name("B");
    connectivity.set_online(true);
    let report = form.replay_pending().await.unwrap();
    assert_eq!(report.submitted, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.retained, 0);
    assert!(form.pending().unwrap().is_empty());
    assert!(store
        .get::<serde_json::Value>(clinic_offline::Collection::OfflineData, "form_intake_pending")
        .unwrap()
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn reconnect_triggers_replay() {
    let store = LocalStore::in_memory();
    let connectivity = Connectivity::offline();
    let submitter = FakeSubmitter::new();
    let form = Arc::new(intake(&store, &connectivity, &submitter, ReplayPolicy::default()));
    form.submit(json!({ "name": "A" })).await.unwrap();

    let task = Arc::clone(&form).spawn_reconnect_replay();
    connectivity.set_online(true);
    for _ in 0..20 {
        if form.pending().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(form.pending().unwrap().is_empty());
    assert_eq!(submitter.submitted(), vec![json!({ "name": "A" })]);
    task.abort();
}

#[tokio::test]
async fn engine_form_cache_follows_configured_policy() {
    let mut config = manual_config();
    config.form_cache.on_replay = clinic_offline::config::OnReplay::ClearAll;
    let connectivity = Connectivity::offline();
    let engine = engine_with(
        config,
        LocalStore::in_memory(),
        FakeTransport::new(),
        connectivity.clone(),
    );
    let submitter = FakeSubmitter::new();
    submitter.reject_name("A");
    let form = engine.form_cache("intake", submitter.clone());
    form.submit(json!({ "name": "A" })).await.unwrap();

    connectivity.set_online(true);
    form.replay_pending().await.unwrap();
    assert!(form.pending().unwrap().is_empty());

    let draft = engine.offline_data("intake_draft");
    draft.save_data(json!({ "step": 2 })).unwrap();
    assert_eq!(engine.offline_data("intake_draft").data(), Some(json!({ "step": 2 })));
    engine.dispose().await;
}
