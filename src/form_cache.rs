//! Per-form offline buffers, independent of the mutation queue.
//!
//! `FormCache` stashes whole submissions under `form_<formKey>_pending` in the
//! `offlineData` collection while offline and replays them in order once
//! connectivity returns. `OfflineData` is a smaller keyed blob with the
//! load/save/clear surface individual screens bind to.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::error::{RemoteError, Result};
use crate::storage::{Collection, LocalStore};
use crate::sync::manager::InFlight;

/// The form's own submit call (usually one REST request).
#[async_trait]
pub trait FormSubmitter: Send + Sync {
    async fn on_submit(&self, payload: &Value) -> std::result::Result<(), RemoteError>;
}

/// What happens to entries whose replay failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayPolicy {
    /// Keep failed entries for the next pass.
    #[default]
    RetainFailed,
    /// Clear the whole buffered list after a pass, failures included.
    ClearAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    /// Buffered locally for replay.
    Queued,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub submitted: usize,
    pub failed: usize,
    /// Entries left in the buffer after the pass.
    pub retained: usize,
}

// ============================================================================
// FormCache
// ============================================================================

pub struct FormCache {
    form_key: String,
    store: LocalStore,
    connectivity: Connectivity,
    submitter: Arc<dyn FormSubmitter>,
    policy: ReplayPolicy,
    /// Guards read-modify-write of the buffered list.
    list_lock: Mutex<()>,
    replaying: AtomicBool,
}

impl FormCache {
    pub fn new(
        form_key: impl Into<String>,
        store: LocalStore,
        connectivity: Connectivity,
        submitter: Arc<dyn FormSubmitter>,
    ) -> Self {
        Self {
            form_key: form_key.into(),
            store,
            connectivity,
            submitter,
            policy: ReplayPolicy::default(),
            list_lock: Mutex::new(()),
            replaying: AtomicBool::new(false),
        }
    }

    pub fn with_policy(mut self, policy: ReplayPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn form_key(&self) -> &str {
        &self.form_key
    }

    pub fn storage_key(&self) -> String {
        format!("form_{}_pending", self.form_key)
    }

    /// Submit now when online; otherwise buffer and return `Queued`.
    ///
    /// An online submission that fails is returned to the caller, not buffered.
    pub async fn submit(&self, payload: Value) -> Result<SubmitOutcome> {
        if self.connectivity.is_online() {
            self.submitter.on_submit(&payload).await?;
            return Ok(SubmitOutcome::Submitted);
        }

        let _guard = self.list_lock.lock();
        let mut pending = self.read_pending()?;
        pending.push(payload);
        self.store
            .put(Collection::OfflineData, &self.storage_key(), &pending)?;
        debug!(form_key = %self.form_key, pending = pending.len(), "buffered form submission");
        Ok(SubmitOutcome::Queued)
    }

    pub fn pending(&self) -> Result<Vec<Value>> {
        self.read_pending()
    }

    fn read_pending(&self) -> Result<Vec<Value>> {
        Ok(self
            .store
            .get(Collection::OfflineData, &self.storage_key())?
            .unwrap_or_default())
    }

    /// Replay buffered submissions in order. A failure is logged and the pass
    /// continues with the next entry. Concurrent calls return an empty report.
    /// A pass dropped mid-flight leaves the buffer untouched.
    pub async fn replay_pending(&self) -> Result<ReplayReport> {
        let Some(_replaying) = InFlight::acquire(&self.replaying) else {
            return Ok(ReplayReport::default());
        };
        self.replay_inner().await
    }

    async fn replay_inner(&self) -> Result<ReplayReport> {
        let batch = self.read_pending()?;
        if batch.is_empty() {
            return Ok(ReplayReport::default());
        }

        let mut report = ReplayReport::default();
        let mut failed = Vec::new();
        for (index, payload) in batch.iter().enumerate() {
            match self.submitter.on_submit(payload).await {
                Ok(()) => report.submitted += 1,
                Err(e) => {
                    warn!(form_key = %self.form_key, index, error = %e, "buffered form submission failed");
                    report.failed += 1;
                    failed.push(payload.clone());
                }
            }
        }

        // Entries appended during the pass sit after the replayed prefix.
        let _guard = self.list_lock.lock();
        let current = self.read_pending()?;
        let appended = current.into_iter().skip(batch.len());
        let remaining: Vec<Value> = match self.policy {
            ReplayPolicy::RetainFailed => failed.into_iter().chain(appended).collect(),
            ReplayPolicy::ClearAll => appended.collect(),
        };
        if remaining.is_empty() {
            self.store
                .delete(Collection::OfflineData, &self.storage_key())?;
        } else {
            self.store
                .put(Collection::OfflineData, &self.storage_key(), &remaining)?;
        }
        report.retained = remaining.len();

        info!(
            form_key = %self.form_key,
            submitted = report.submitted,
            failed = report.failed,
            retained = report.retained,
            "replayed buffered form submissions"
        );
        Ok(report)
    }

    /// Replay on every offline → online transition (and once at start if online).
    pub fn spawn_reconnect_replay(self: Arc<Self>) -> JoinHandle<()> {
        let mut online = self.connectivity.subscribe();
        let mut was_online = *online.borrow_and_update();
        tokio::spawn(async move {
            if was_online {
                self.replay_logged().await;
            }
            while online.changed().await.is_ok() {
                let now_online = *online.borrow_and_update();
                if now_online && !was_online {
                    self.replay_logged().await;
                }
                was_online = now_online;
            }
        })
    }

    async fn replay_logged(&self) {
        if let Err(e) = self.replay_pending().await {
            warn!(form_key = %self.form_key, error = %e, "form replay pass failed");
        }
    }
}

// ============================================================================
// OfflineData
// ============================================================================

#[derive(Default)]
struct OfflineDataState {
    data: Option<Value>,
    error: Option<String>,
}

/// A single value stored under an application-chosen key in `offlineData`.
///
/// Reads go straight to the synchronous store, so a value is either loaded or
/// has failed by the time any accessor can observe it.
pub struct OfflineData {
    key: String,
    store: LocalStore,
    state: Mutex<OfflineDataState>,
}

impl OfflineData {
    /// Bind to `key` and load its current value.
    pub fn new(store: LocalStore, key: impl Into<String>) -> Self {
        let this = Self {
            key: key.into(),
            store,
            state: Mutex::new(OfflineDataState::default()),
        };
        this.refresh();
        this
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn data(&self) -> Option<Value> {
        self.state.lock().data.clone()
    }

    /// Always `false`: `new` and `refresh` finish loading before returning.
    pub fn is_loading(&self) -> bool {
        false
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    /// Re-read the stored value. Failures land in `error()`.
    pub fn refresh(&self) {
        let loaded = self.store.get::<Value>(Collection::OfflineData, &self.key);
        let mut state = self.state.lock();
        match loaded {
            Ok(data) => {
                state.data = data;
                state.error = None;
            }
            Err(e) => state.error = Some(e.to_string()),
        }
    }

    pub fn save_data(&self, payload: Value) -> Result<()> {
        let written = self.store.put(Collection::OfflineData, &self.key, &payload);
        let mut state = self.state.lock();
        match written {
            Ok(()) => {
                state.data = Some(payload);
                state.error = None;
                Ok(())
            }
            Err(e) => {
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn clear_data(&self) -> Result<()> {
        let removed = self.store.delete(Collection::OfflineData, &self.key);
        let mut state = self.state.lock();
        match removed {
            Ok(_) => {
                state.data = None;
                state.error = None;
                Ok(())
            }
            Err(e) => {
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }
}
