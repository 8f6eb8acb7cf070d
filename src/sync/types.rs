//! Sync-specific types: error classification, per-cycle reports and the
//! status snapshot shown to the UI.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{EntityType, MutationAction};

// ============================================================================
// Errors
// ============================================================================

/// Classification of replay failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    /// Retriable (network, timeouts, 5xx, 408, 429)
    Transient,
    /// Not retriable (validation rejection, unmappable mutation)
    Permanent,
}

/// What the retry policy did with a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDisposition {
    Retried,
    DeadLettered,
    Parked,
    /// The failure could not be recorded (storage error); the lease will lapse.
    Unrecorded,
    /// The lease lapsed mid-dispatch and the item changed under us; the
    /// current holder settles it.
    Superseded,
}

/// One failed replay, collected in `SyncReport.errors`.
#[derive(Debug, Clone, Serialize)]
pub struct SyncErrorEvent {
    pub mutation_id: String,
    pub entity_type: EntityType,
    pub action: MutationAction,
    pub retry_count: u32,
    pub error: String,
    pub kind: SyncErrorKind,
    pub disposition: FailureDisposition,
}

pub type SyncErrorCallback = Arc<dyn Fn(&SyncErrorEvent) + Send + Sync>;

// ============================================================================
// Cycle results
// ============================================================================

/// Aggregated result of one drain cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Items claimed and sent to the remote.
    pub attempted: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub parked: usize,
    /// Skipped because their backoff window has not elapsed.
    pub deferred: usize,
    /// Skipped because another process holds their lease.
    pub contended: usize,
    /// Dispatched, but the lease lapsed before the outcome could be written.
    pub superseded: usize,
    /// Rows that failed to decode and were skipped.
    pub corrupt: usize,
    pub errors: Vec<SyncErrorEvent>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    pub fn failed(&self) -> usize {
        self.errors.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another drain is running in this process.
    InProgress,
    Offline,
}

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Completed(SyncReport),
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, SyncOutcome::Skipped(_))
    }
}

// ============================================================================
// Status
// ============================================================================

/// Read-only view of the sync engine for display components.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatusSnapshot {
    pub is_online: bool,
    /// Mutations still in the queue (dead letters excluded).
    pub pending_count: usize,
    pub dead_letter_count: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_in_progress: bool,
    /// Set when the local store is unavailable or unreadable.
    pub storage_warning: Option<String>,
}
