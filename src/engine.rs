//! `SyncEngine`: the application-facing facade.
//!
//! Owns the queue, dispatcher, manager and scheduler for one local store and
//! hands out the caches that share it.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::cache::EntityCache;
use crate::config::EngineConfig;
use crate::connectivity::Connectivity;
use crate::error::Result;
use crate::form_cache::{FormCache, FormSubmitter, OfflineData};
use crate::queue::MutationQueue;
use crate::remote::{Dispatcher, RemoteTransport};
use crate::storage::LocalStore;
use crate::sync::{
    SyncErrorCallback, SyncManager, SyncManagerOptions, SyncOutcome, SyncScheduler,
    SyncStatusReporter, SyncStatusSnapshot,
};
use crate::types::{Clock, DeadLetter, EntityType, MutationAction, QueuedMutation};

pub struct SyncEngineOptions {
    pub config: EngineConfig,
    pub store: LocalStore,
    pub transport: Arc<dyn RemoteTransport>,
    pub connectivity: Connectivity,
    pub on_error: Option<SyncErrorCallback>,
    /// Overrides the wall clock for queue timestamps and backoff.
    pub now: Option<Clock>,
}

impl SyncEngineOptions {
    pub fn new(
        config: EngineConfig,
        store: LocalStore,
        transport: Arc<dyn RemoteTransport>,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            config,
            store,
            transport,
            connectivity,
            on_error: None,
            now: None,
        }
    }
}

pub struct SyncEngine {
    config: EngineConfig,
    store: LocalStore,
    connectivity: Connectivity,
    queue: Arc<MutationQueue>,
    manager: Arc<SyncManager>,
    reporter: SyncStatusReporter,
    scheduler: SyncScheduler,
}

impl SyncEngine {
    /// Wire the engine and start its scheduler. Requires a tokio runtime.
    pub fn init(
        config: EngineConfig,
        store: LocalStore,
        transport: Arc<dyn RemoteTransport>,
        connectivity: Connectivity,
    ) -> Result<Self> {
        Self::with_options(SyncEngineOptions::new(config, store, transport, connectivity))
    }

    pub fn with_options(opts: SyncEngineOptions) -> Result<Self> {
        let SyncEngineOptions {
            config,
            store,
            transport,
            connectivity,
            on_error,
            now,
        } = opts;
        config.validate()?;

        if let Some(reason) = store.unavailable_reason() {
            warn!(reason, "local store unavailable, offline queuing disabled");
        }

        let mut queue = MutationQueue::new(store.clone()).with_limit(config.queue_limit());
        if let Some(clock) = &now {
            queue = queue.with_clock(Arc::clone(clock));
        }
        let queue = Arc::new(queue);

        let dispatcher = Arc::new(
            Dispatcher::new(transport)
                .with_resources(config.resource_map())
                .with_id_field(config.remote.id_field.clone())
                .with_timeout(config.request_timeout()),
        );

        let mut manager_opts =
            SyncManagerOptions::new(Arc::clone(&queue), dispatcher, connectivity.clone());
        manager_opts.policy = config.retry_policy();
        manager_opts.lease = Some(config.lease());
        manager_opts.now = now;
        manager_opts.on_error = on_error;
        let manager = Arc::new(SyncManager::new(manager_opts));

        let interval = config.auto_sync.then(|| config.sync_interval());
        let scheduler = SyncScheduler::spawn(Arc::clone(&manager), interval);

        info!(
            auto_sync = config.auto_sync,
            interval_secs = config.sync_interval_secs,
            "sync engine started"
        );

        Ok(Self {
            reporter: SyncStatusReporter::new(Arc::clone(&manager)),
            config,
            store,
            connectivity,
            queue,
            manager,
            scheduler,
        })
    }

    /// Stop background syncing. Queued items stay in the store.
    pub async fn dispose(self) {
        self.scheduler.shutdown().await;
        info!("sync engine stopped");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    /// Queue a write and return its id. When online with auto-sync enabled a
    /// drain is requested in the background; the call never waits for it.
    pub fn add_to_sync_queue(
        &self,
        entity_type: EntityType,
        action: MutationAction,
        payload: Value,
    ) -> Result<String> {
        let id = self.queue.enqueue(entity_type, action, payload)?;
        if self.config.auto_sync && self.connectivity.is_online() {
            self.scheduler.nudge();
        }
        Ok(id)
    }

    pub fn pending(&self) -> Result<Vec<QueuedMutation>> {
        self.queue.drain()
    }

    pub fn get_sync_status(&self) -> SyncStatusSnapshot {
        self.reporter.snapshot()
    }

    pub async fn trigger_sync(&self) -> Result<SyncOutcome> {
        self.manager.trigger_sync().await
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.queue.dead_letters()
    }

    /// Move a dead letter back into the queue with a fresh retry budget.
    pub fn revive_dead_letter(&self, id: &str) -> Result<QueuedMutation> {
        let revived = self.queue.revive_dead_letter(id)?;
        if self.config.auto_sync && self.connectivity.is_online() {
            self.scheduler.nudge();
        }
        Ok(revived)
    }

    pub fn discard_dead_letter(&self, id: &str) -> Result<bool> {
        self.queue.discard_dead_letter(id)
    }

    pub fn entity_cache(&self) -> EntityCache {
        EntityCache::new(self.store.clone())
    }

    pub fn form_cache(
        &self,
        form_key: impl Into<String>,
        submitter: Arc<dyn FormSubmitter>,
    ) -> FormCache {
        FormCache::new(
            form_key,
            self.store.clone(),
            self.connectivity.clone(),
            submitter,
        )
        .with_policy(self.config.replay_policy())
    }

    pub fn offline_data(&self, key: impl Into<String>) -> OfflineData {
        OfflineData::new(self.store.clone(), key)
    }
}
