//! `SyncScheduler`: decides when to call `SyncManager::trigger_sync`.
//!
//! A background tokio task reacts to three triggers: an offline → online
//! transition, a periodic tick (when auto-sync is enabled) and explicit
//! `nudge()` calls. Nudges that arrive while a drain runs coalesce into one
//! follow-up drain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use super::manager::SyncManager;

pub struct SyncScheduler {
    nudge: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    /// Start the scheduler task. `interval = None` disables periodic sync.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(manager: Arc<SyncManager>, interval: Option<Duration>) -> Self {
        let nudge = Arc::new(Notify::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        // Subscribe before the task first runs so no transition is missed.
        let mut online = manager.connectivity().subscribe();
        let was_online = *online.borrow_and_update();
        let handle = tokio::spawn(run(
            manager,
            interval,
            Arc::clone(&nudge),
            (online, was_online),
            shutdown_rx,
        ));
        Self {
            nudge,
            shutdown,
            handle,
        }
    }

    /// Request a drain as soon as possible. Never blocks.
    pub fn nudge(&self) {
        self.nudge.notify_one();
    }

    /// Stop the task, letting an in-flight drain finish first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "sync scheduler task ended abnormally");
        }
    }
}

async fn run(
    manager: Arc<SyncManager>,
    interval: Option<Duration>,
    nudge: Arc<Notify>,
    (mut online, mut was_online): (watch::Receiver<bool>, bool),
    mut shutdown: watch::Receiver<bool>,
) {
    let periodic = interval.is_some();
    let mut ticker = tokio::time::interval(interval.unwrap_or(Duration::from_secs(3600)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = online.changed() => {
                if changed.is_err() {
                    break;
                }
                let now_online = *online.borrow_and_update();
                let came_online = now_online && !was_online;
                was_online = now_online;
                if came_online {
                    debug!("connectivity restored; draining queue");
                    drain(&manager).await;
                }
            }
            _ = nudge.notified() => {
                drain(&manager).await;
            }
            _ = ticker.tick(), if periodic => {
                debug!("periodic sync tick");
                drain(&manager).await;
            }
        }
    }
    debug!("sync scheduler stopped");
}

async fn drain(manager: &SyncManager) {
    if let Err(e) = manager.trigger_sync().await {
        error!(error = %e, "sync cycle failed");
    }
}
