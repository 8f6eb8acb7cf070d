//! `SyncManager`: drains the mutation queue against the remote API.
//!
//! One drain at a time per process (`trigger_sync` is single-flight). Items are
//! replayed sequentially in queue order; each is claimed before dispatch so a
//! second process sharing the store skips it. A failed item never affects the
//! others: the retry policy decides whether it is retried, dead-lettered or
//! parked. Undecodable queue rows are skipped and counted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::connectivity::Connectivity;
use crate::error::{RemoteError, Result};
use crate::queue::MutationQueue;
use crate::remote::Dispatcher;
use crate::types::{generate_id, system_clock, Clock, QueuedMutation};

use super::retry::{RetryDecision, RetryPolicy};
use super::types::{
    FailureDisposition, SkipReason, SyncErrorCallback, SyncErrorEvent, SyncOutcome, SyncReport,
};

/// Meta key holding the RFC 3339 time of the last completed drain.
pub const LAST_SYNC_KEY: &str = "sync.last_sync_at";

// ============================================================================
// Options
// ============================================================================

pub struct SyncManagerOptions {
    pub queue: Arc<MutationQueue>,
    pub dispatcher: Arc<Dispatcher>,
    pub connectivity: Connectivity,
    pub policy: RetryPolicy,
    /// How long a claimed item stays leased to this process (default: 60s).
    /// Should exceed the dispatcher's request timeout.
    pub lease: Option<Duration>,
    /// Lease owner name; defaults to a random id per manager.
    pub owner_id: Option<String>,
    pub now: Option<Clock>,
    /// Called for each failed item.
    pub on_error: Option<SyncErrorCallback>,
}

impl SyncManagerOptions {
    pub fn new(queue: Arc<MutationQueue>, dispatcher: Arc<Dispatcher>, connectivity: Connectivity) -> Self {
        Self {
            queue,
            dispatcher,
            connectivity,
            policy: RetryPolicy::default(),
            lease: None,
            owner_id: None,
            now: None,
            on_error: None,
        }
    }
}

// ============================================================================
// SyncManager
// ============================================================================

pub struct SyncManager {
    queue: Arc<MutationQueue>,
    dispatcher: Arc<Dispatcher>,
    connectivity: Connectivity,
    policy: RetryPolicy,
    lease: chrono::Duration,
    owner: String,
    now: Clock,
    on_error: Option<SyncErrorCallback>,
    /// In-memory only; a fresh manager always starts idle.
    in_progress: AtomicBool,
}

/// Clears the in-progress flag on every exit path, including errors and
/// cancellation.
pub(crate) struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncManager {
    pub fn new(opts: SyncManagerOptions) -> Self {
        let lease = opts.lease.unwrap_or(Duration::from_secs(60));
        Self {
            queue: opts.queue,
            dispatcher: opts.dispatcher,
            connectivity: opts.connectivity,
            policy: opts.policy,
            lease: chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::seconds(60)),
            owner: opts.owner_id.unwrap_or_else(generate_id),
            now: opts.now.unwrap_or_else(system_clock),
            on_error: opts.on_error,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn is_sync_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Time of the last completed drain, as persisted in the store.
    pub fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        let raw = self.queue.store().get_meta(LAST_SYNC_KEY)?;
        Ok(raw
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    /// Drain the queue once, unless offline or a drain is already running.
    ///
    /// Per-item failures are folded into the report. Only storage failures
    /// that prevent reading the queue are returned as errors.
    pub async fn trigger_sync(&self) -> Result<SyncOutcome> {
        if !self.connectivity.is_online() {
            debug!("skipping sync: offline");
            return Ok(SyncOutcome::Skipped(SkipReason::Offline));
        }
        let Some(_in_flight) = InFlight::acquire(&self.in_progress) else {
            debug!("skipping sync: drain already in progress");
            return Ok(SyncOutcome::Skipped(SkipReason::InProgress));
        };

        let report = self.drain_once().await?;

        let finished_at = report.finished_at.unwrap_or_else(|| (self.now)());
        if let Err(e) = self
            .queue
            .store()
            .set_meta(LAST_SYNC_KEY, &finished_at.to_rfc3339())
        {
            warn!(error = %e, "failed to persist last sync time");
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            parked = report.parked,
            deferred = report.deferred,
            contended = report.contended,
            superseded = report.superseded,
            corrupt = report.corrupt,
            "sync cycle complete"
        );
        Ok(SyncOutcome::Completed(report))
    }

    async fn drain_once(&self) -> Result<SyncReport> {
        let mut report = SyncReport {
            started_at: Some((self.now)()),
            ..Default::default()
        };

        let scan = self.queue.scan()?;
        report.corrupt = scan.corrupt.len();

        for item in scan.items {
            if !item.is_due((self.now)()) {
                report.deferred += 1;
                continue;
            }
            let Some(claimed) = self.queue.claim(&item.id, &self.owner, self.lease)? else {
                report.contended += 1;
                continue;
            };

            report.attempted += 1;
            match self.dispatcher.send(&claimed).await {
                Ok(()) => {
                    report.succeeded += 1;
                    match self.queue.complete(&claimed) {
                        Ok(true) => {}
                        Ok(false) => report.superseded += 1,
                        Err(e) => {
                            error!(mutation_id = %claimed.id, error = %e, "replayed mutation could not be removed");
                        }
                    }
                }
                Err(err) => self.handle_failure(claimed, err, &mut report),
            }
        }

        report.finished_at = Some((self.now)());
        Ok(report)
    }

    fn handle_failure(&self, item: QueuedMutation, err: RemoteError, report: &mut SyncReport) {
        let decision = self.policy.decide(item.retry_count, &err, (self.now)());
        let message = err.to_string();

        let disposition = match decision {
            RetryDecision::Retry { next_attempt_at } => {
                warn!(
                    mutation_id = %item.id,
                    entity = %item.entity_type,
                    action = %item.action,
                    retry_count = item.retry_count + 1,
                    error = %message,
                    "replay failed; will retry"
                );
                match self
                    .queue
                    .requeue_with_incremented_retry(&item, next_attempt_at, &message)
                {
                    Ok(Some(_)) => {
                        report.retried += 1;
                        FailureDisposition::Retried
                    }
                    Ok(None) => self.superseded(report),
                    Err(e) => self.unrecorded(&item, e),
                }
            }
            RetryDecision::DeadLetter(reason) => {
                error!(
                    mutation_id = %item.id,
                    entity = %item.entity_type,
                    action = %item.action,
                    retry_count = item.retry_count,
                    ?reason,
                    error = %message,
                    "replay failed permanently; moved to dead letters"
                );
                match self.queue.move_to_dead_letter(&item, reason, Some(&message)) {
                    Ok(Some(_)) => {
                        report.dead_lettered += 1;
                        FailureDisposition::DeadLettered
                    }
                    Ok(None) => self.superseded(report),
                    Err(e) => self.unrecorded(&item, e),
                }
            }
            RetryDecision::Park => {
                warn!(
                    mutation_id = %item.id,
                    retry_count = item.retry_count,
                    error = %message,
                    "replay failed with retries exhausted; leaving in queue"
                );
                match self.queue.release(&item) {
                    Ok(true) => {
                        report.parked += 1;
                        FailureDisposition::Parked
                    }
                    Ok(false) => self.superseded(report),
                    Err(e) => self.unrecorded(&item, e),
                }
            }
        };

        let event = SyncErrorEvent {
            mutation_id: item.id.clone(),
            entity_type: item.entity_type.clone(),
            action: item.action,
            retry_count: item.retry_count,
            error: message,
            kind: err.kind(),
            disposition,
        };
        if let Some(cb) = &self.on_error {
            cb(&event);
        }
        report.errors.push(event);
    }

    fn superseded(&self, report: &mut SyncReport) -> FailureDisposition {
        report.superseded += 1;
        FailureDisposition::Superseded
    }

    fn unrecorded(&self, item: &QueuedMutation, e: crate::error::OfflineError) -> FailureDisposition {
        error!(mutation_id = %item.id, error = %e, "failed to record replay failure");
        FailureDisposition::Unrecorded
    }
}

// ============================================================================
// Tests
// ============================================================================
