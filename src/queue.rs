//! `MutationQueue`: durable intake of pending writes and their dead letters.
//!
//! Items live in the `syncQueue` collection keyed by id, so the queue
//! survives restarts. Drain order is ascending `sequence`. Replay uses a
//! claim/lease protocol built on `compare_and_swap`, so two processes sharing
//! one store never replay the same item concurrently. Settling a claimed item
//! (completion, retry, release, dead-lettering) is conditional on the row still
//! holding that claim; a holder whose lease lapsed cannot overwrite whoever
//! claimed the item after it.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{OfflineError, Result};
use crate::storage::local_store::decode;
use crate::storage::{Collection, LocalStore};
use crate::types::{
    generate_id, system_clock, ClaimLease, Clock, DeadLetter, DeadLetterReason, EntityType,
    MutationAction, QueuedMutation,
};

const NEXT_SEQUENCE_KEY: &str = "queue.next_sequence";

// ============================================================================
// QueueLimit
// ============================================================================

/// What to do when the queue reaches a size cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueLimit {
    #[default]
    Unbounded,
    /// Refuse new mutations with `OfflineError::QueueFull`.
    RejectNew(usize),
    /// Move the oldest unleased mutation to dead letters (reason `Evicted`).
    /// Items leased for replay are never evicted, so the queue can briefly
    /// exceed the cap while a drain is running.
    DropOldest(usize),
}

/// Queue contents in drain order, plus the keys of rows that failed to decode.
#[derive(Debug, Default)]
pub struct QueueScan {
    pub items: Vec<QueuedMutation>,
    pub corrupt: Vec<String>,
}

// ============================================================================
// MutationQueue
// ============================================================================

pub struct MutationQueue {
    store: LocalStore,
    limit: QueueLimit,
    now: Clock,
    /// Serializes sequence allocation within this process.
    enqueue_lock: Mutex<()>,
}

impl MutationQueue {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            limit: QueueLimit::Unbounded,
            now: system_clock(),
            enqueue_lock: Mutex::new(()),
        }
    }

    pub fn with_limit(mut self, limit: QueueLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_clock(mut self, now: Clock) -> Self {
        self.now = now;
        self
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.now)()
    }

    /// Append a mutation. Never touches the network.
    pub fn enqueue(
        &self,
        entity_type: EntityType,
        action: MutationAction,
        payload: Value,
    ) -> Result<String> {
        let _guard = self.enqueue_lock.lock();

        match self.limit {
            QueueLimit::Unbounded => {}
            QueueLimit::RejectNew(limit) => {
                if self.len()? >= limit {
                    return Err(OfflineError::QueueFull { limit });
                }
            }
            QueueLimit::DropOldest(limit) => self.evict_for(limit)?,
        }

        let sequence = self.next_sequence()?;
        let mutation = QueuedMutation {
            id: generate_id(),
            sequence,
            entity_type,
            action,
            payload,
            enqueued_at: self.now(),
            retry_count: 0,
            next_attempt_at: None,
            last_error: None,
            claim: None,
        };
        self.store
            .put(Collection::SyncQueue, &mutation.id, &mutation)?;
        self.store
            .set_meta(NEXT_SEQUENCE_KEY, &(sequence + 1).to_string())?;

        debug!(
            mutation_id = %mutation.id,
            entity = %mutation.entity_type,
            action = %mutation.action,
            sequence,
            "enqueued mutation"
        );
        Ok(mutation.id)
    }

    /// Make room for one more entry under `limit`.
    fn evict_for(&self, limit: usize) -> Result<()> {
        let now = self.now();
        let (entries, _) = self.entries()?;
        let excess = (entries.len() + 1).saturating_sub(limit);
        let mut evicted = 0;
        for (raw, oldest) in entries {
            if evicted == excess {
                break;
            }
            if oldest.is_leased(now) {
                continue;
            }
            let id = oldest.id.clone();
            if self.bury(&raw, oldest, DeadLetterReason::Evicted)?.is_some() {
                warn!(mutation_id = %id, limit, "queue limit reached; evicted oldest mutation");
                evicted += 1;
            }
        }
        if evicted < excess {
            warn!(
                limit,
                over_by = excess - evicted,
                "queue over limit; remaining entries are leased for replay"
            );
        }
        Ok(())
    }

    fn next_sequence(&self) -> Result<u64> {
        Ok(self
            .store
            .get_meta(NEXT_SEQUENCE_KEY)?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0))
    }

    /// Raw rows paired with their decoded form, in drain order. Rows that do
    /// not decode are logged and returned by key only.
    fn entries(&self) -> Result<(Vec<(String, QueuedMutation)>, Vec<String>)> {
        let mut entries = Vec::new();
        let mut corrupt = Vec::new();
        for (key, raw) in self.store.backend()?.scan_raw(Collection::SyncQueue)? {
            match decode::<QueuedMutation>(Collection::SyncQueue, &key, &raw) {
                Ok(item) => entries.push((raw, item)),
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping undecodable queue entry");
                    corrupt.push(key);
                }
            }
        }
        entries.sort_by(|(_, a), (_, b)| {
            a.sequence.cmp(&b.sequence).then_with(|| a.id.cmp(&b.id))
        });
        Ok((entries, corrupt))
    }

    /// Current queue contents in drain order. Undecodable rows are skipped.
    pub fn drain(&self) -> Result<Vec<QueuedMutation>> {
        Ok(self.scan()?.items)
    }

    /// Like `drain`, but also reports which rows were skipped as undecodable.
    pub fn scan(&self) -> Result<QueueScan> {
        let (entries, corrupt) = self.entries()?;
        Ok(QueueScan {
            items: entries.into_iter().map(|(_, item)| item).collect(),
            corrupt,
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<QueuedMutation>> {
        self.store.get(Collection::SyncQueue, id)
    }

    pub fn len(&self) -> Result<usize> {
        self.store.count(Collection::SyncQueue)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Delete an entry unconditionally.
    pub fn remove(&self, id: &str) -> Result<bool> {
        self.store.delete(Collection::SyncQueue, id)
    }

    // -----------------------------------------------------------------------
    // Claim protocol
    // -----------------------------------------------------------------------

    /// Atomically lease `id` to `owner` for `lease`.
    ///
    /// Returns `None` when the item is gone, still backing off, or leased by
    /// another live owner; the store is left untouched in that case.
    pub fn claim(&self, id: &str, owner: &str, lease: Duration) -> Result<Option<QueuedMutation>> {
        let backend = self.store.backend()?;
        let Some(raw) = backend.get_raw(Collection::SyncQueue, id)? else {
            return Ok(None);
        };
        let mut item: QueuedMutation = decode(Collection::SyncQueue, id, &raw)?;

        let now = self.now();
        if !item.is_due(now) || item.is_claimed_by_other(owner, now) {
            return Ok(None);
        }

        item.claim = Some(ClaimLease {
            owner: owner.to_string(),
            expires_at: now + lease,
        });
        let claimed = serde_json::to_string(&item)?;
        if backend.compare_and_swap(Collection::SyncQueue, id, Some(&raw), Some(&claimed))? {
            Ok(Some(item))
        } else {
            debug!(mutation_id = %id, "lost claim race");
            Ok(None)
        }
    }

    /// Replace `item` with `next` (or delete it) only if the stored row is
    /// still exactly `item`. `false` means the lease lapsed and the row has
    /// since been reclaimed, evicted or removed.
    fn settle(&self, item: &QueuedMutation, next: Option<&QueuedMutation>) -> Result<bool> {
        let expected = serde_json::to_string(item)?;
        let next = next.map(serde_json::to_string).transpose()?;
        let settled = self.store.backend()?.compare_and_swap(
            Collection::SyncQueue,
            &item.id,
            Some(&expected),
            next.as_deref(),
        )?;
        if !settled {
            warn!(mutation_id = %item.id, "queue entry changed since it was claimed; leaving it to its current holder");
        }
        Ok(settled)
    }

    /// Delete a claimed entry after a confirmed replay.
    pub fn complete(&self, item: &QueuedMutation) -> Result<bool> {
        self.settle(item, None)
    }

    /// Write the claimed item back with `retry_count + 1` and its lease
    /// cleared. `None` when the row no longer holds this claim.
    pub fn requeue_with_incremented_retry(
        &self,
        item: &QueuedMutation,
        next_attempt_at: Option<DateTime<Utc>>,
        last_error: &str,
    ) -> Result<Option<QueuedMutation>> {
        let mut updated = item.clone();
        updated.retry_count += 1;
        updated.next_attempt_at = next_attempt_at;
        updated.last_error = Some(last_error.to_string());
        updated.claim = None;
        Ok(self.settle(item, Some(&updated))?.then_some(updated))
    }

    /// Drop the lease without touching retry bookkeeping.
    pub fn release(&self, item: &QueuedMutation) -> Result<bool> {
        let mut released = item.clone();
        released.claim = None;
        self.settle(item, Some(&released))
    }

    // -----------------------------------------------------------------------
    // Dead letters
    // -----------------------------------------------------------------------

    /// Atomically move `item` from the queue into `deadLetters`, recording
    /// `last_error` on the letter when given. `None` when the stored row is
    /// no longer exactly `item`.
    pub fn move_to_dead_letter(
        &self,
        item: &QueuedMutation,
        reason: DeadLetterReason,
        last_error: Option<&str>,
    ) -> Result<Option<DeadLetter>> {
        let expected = serde_json::to_string(item)?;
        let mut mutation = item.clone();
        if let Some(message) = last_error {
            mutation.last_error = Some(message.to_string());
        }
        let letter = self.bury(&expected, mutation, reason)?;
        if letter.is_none() {
            warn!(mutation_id = %item.id, "queue entry changed since it was claimed; not dead-lettering");
        }
        Ok(letter)
    }

    fn bury(
        &self,
        expected: &str,
        mut mutation: QueuedMutation,
        reason: DeadLetterReason,
    ) -> Result<Option<DeadLetter>> {
        mutation.claim = None;
        let letter = DeadLetter {
            mutation,
            reason,
            dead_at: self.now(),
        };
        let raw = serde_json::to_string(&letter)?;
        let moved = self.store.backend()?.transfer(
            Collection::SyncQueue,
            Collection::DeadLetters,
            &letter.mutation.id,
            Some(expected),
            &raw,
        )?;
        Ok(moved.then_some(letter))
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let mut letters: Vec<DeadLetter> = self
            .store
            .get_all(Collection::DeadLetters)?
            .into_iter()
            .map(|(_, d)| d)
            .collect();
        letters.sort_by_key(|d| d.mutation.sequence);
        Ok(letters)
    }

    pub fn dead_letter_count(&self) -> Result<usize> {
        self.store.count(Collection::DeadLetters)
    }

    /// Return a dead letter to the queue with a fresh retry budget.
    pub fn revive_dead_letter(&self, id: &str) -> Result<QueuedMutation> {
        let letter: DeadLetter =
            self.store
                .get(Collection::DeadLetters, id)?
                .ok_or_else(|| OfflineError::NotFound {
                    what: "dead letter",
                    id: id.to_string(),
                })?;
        let mut mutation = letter.mutation;
        mutation.retry_count = 0;
        mutation.next_attempt_at = None;
        mutation.claim = None;
        let raw = serde_json::to_string(&mutation)?;
        let moved =
            self.store
                .backend()?
                .transfer(Collection::DeadLetters, Collection::SyncQueue, id, None, &raw)?;
        if !moved {
            return Err(OfflineError::NotFound {
                what: "dead letter",
                id: id.to_string(),
            });
        }
        Ok(mutation)
    }

    pub fn discard_dead_letter(&self, id: &str) -> Result<bool> {
        self.store.delete(Collection::DeadLetters, id)
    }
}

// ============================================================================
// Tests
// ============================================================================
