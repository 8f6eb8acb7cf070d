//! Fakes shared by the integration suite.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clinic_offline::{
    Connectivity, EngineConfig, FormSubmitter, LocalStore, RemoteError, RemoteRequest,
    RemoteTransport, SyncEngine,
};
use parking_lot::Mutex;
use serde_json::Value;

// ============================================================================
// Transport
// ============================================================================

/// Records every request. Requests whose path starts with a failing prefix
/// are answered with the configured error.
#[derive(Default)]
pub struct FakeTransport {
    sent: Mutex<Vec<RemoteRequest>>,
    failing: Mutex<Vec<(String, RemoteError)>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call sleeps for `delay` (use with a paused clock).
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn fail_path(&self, prefix: &str, error: RemoteError) {
        self.failing.lock().push((prefix.to_string(), error));
    }

    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    pub fn sent(&self) -> Vec<RemoteRequest> {
        self.sent.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteTransport for FakeTransport {
    async fn send(&self, request: &RemoteRequest) -> Result<(), RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.sent.lock().push(request.clone());
        let failure = self
            .failing
            .lock()
            .iter()
            .find(|(prefix, _)| request.path.starts_with(prefix.as_str()))
            .map(|(_, e)| e.clone());
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub fn network_down() -> RemoteError {
    RemoteError::Network("connection refused".into())
}

// ============================================================================
// Form submitter
// ============================================================================

/// Fails any payload whose `name` is listed in `rejected`.
#[derive(Default)]
pub struct FakeSubmitter {
    submitted: Mutex<Vec<Value>>,
    rejected: Mutex<Vec<String>>,
}

impl FakeSubmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_name(&self, name: &str) {
        self.rejected.lock().push(name.to_string());
    }

    pub fn accept_all(&self) {
        self.rejected.lock().clear();
    }

    pub fn submitted(&self) -> Vec<Value> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl FormSubmitter for FakeSubmitter {
    async fn on_submit(&self, payload: &Value) -> Result<(), RemoteError> {
        let name = payload["name"].as_str().unwrap_or_default();
        if self.rejected.lock().iter().any(|r| r == name) {
            return Err(RemoteError::Rejected {
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.submitted.lock().push(payload.clone());
        Ok(())
    }
}

// ============================================================================
// Engine setup
// ============================================================================

/// No background draining, no backoff: every sync is an explicit call.
pub fn manual_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.auto_sync = false;
    config.retry.backoff_base_secs = 0;
    config
}

pub fn engine_with(
    config: EngineConfig,
    store: LocalStore,
    transport: Arc<FakeTransport>,
    connectivity: Connectivity,
) -> SyncEngine {
    SyncEngine::init(config, store, transport, connectivity).expect("engine init")
}
