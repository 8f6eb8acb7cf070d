//! Core data types shared across the queue, storage and sync layers.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Clock
// ============================================================================

/// Source of "now". Injected so tests can control timestamps and backoff.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The wall clock.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Generate a random mutation id (v4).
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// EntityType / MutationAction
// ============================================================================

/// Domain entity a mutation targets. Serialized as its lowercase name;
/// unrecognized names round-trip through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityType {
    Patient,
    Appointment,
    Reminder,
    Visit,
    Other(String),
}

impl EntityType {
    pub fn as_str(&self) -> &str {
        match self {
            EntityType::Patient => "patient",
            EntityType::Appointment => "appointment",
            EntityType::Reminder => "reminder",
            EntityType::Visit => "visit",
            EntityType::Other(name) => name,
        }
    }
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "patient" => EntityType::Patient,
            "appointment" => EntityType::Appointment,
            "reminder" => EntityType::Reminder,
            "visit" => EntityType::Visit,
            _ => EntityType::Other(s),
        }
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        EntityType::from(s.to_string())
    }
}

impl From<EntityType> for String {
    fn from(e: EntityType) -> Self {
        e.as_str().to_string()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

impl MutationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationAction::Create => "create",
            MutationAction::Update => "update",
            MutationAction::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// QueuedMutation
// ============================================================================

/// A lease on a queued mutation held by one sync process while it replays it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimLease {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

/// A pending write captured for later replay against the remote API.
///
/// Everything except the retry bookkeeping (`retry_count`, `next_attempt_at`,
/// `last_error`, `claim`) is fixed at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: String,
    /// Per-store enqueue order; drain sorts by it.
    pub sequence: u64,
    pub entity_type: EntityType,
    pub action: MutationAction,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    /// Earliest time the next replay may be attempted (`None` = immediately).
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub claim: Option<ClaimLease>,
}

impl QueuedMutation {
    /// Whether the backoff window has passed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Whether anyone holds a live lease at `now`.
    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        self.claim.as_ref().is_some_and(|c| c.expires_at > now)
    }

    /// Whether another process holds a live lease at `now`.
    pub fn is_claimed_by_other(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.claim
            .as_ref()
            .is_some_and(|c| c.owner != owner && c.expires_at > now)
    }
}

// ============================================================================
// Dead letters
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Transient failures exceeded `max_retries`.
    RetriesExhausted,
    /// The server answered with a non-retryable status.
    Rejected { status: u16 },
    /// The mutation could not be mapped to a remote call.
    Undispatchable,
    /// Removed to make room under a `DropOldest` queue limit.
    Evicted,
}

/// A mutation parked in the terminal `dead_letters` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub mutation: QueuedMutation,
    pub reason: DeadLetterReason,
    pub dead_at: DateTime<Utc>,
}
