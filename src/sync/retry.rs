//! Retry policy: what happens to a queued mutation after a failed replay.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::RemoteError;
use crate::sync::types::SyncErrorKind;
use crate::types::DeadLetterReason;

/// Behavior once `max_retries` failures have been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustedAction {
    /// Move the item to the dead-letter collection.
    #[default]
    DeadLetter,
    /// Leave the item in the queue untouched; it is retried every cycle.
    Park,
}

/// Exponential backoff: `base * 2^(n-1)` after the n-th failure, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// `None` retries on every cycle.
    pub backoff: Option<Backoff>,
    pub on_exhausted: ExhaustedAction,
    /// Dead-letter permanent failures without spending retries.
    pub reject_is_permanent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Some(Backoff::default()),
            on_exhausted: ExhaustedAction::DeadLetter,
            reject_is_permanent: true,
        }
    }
}

/// Decision for one failed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { next_attempt_at: Option<DateTime<Utc>> },
    DeadLetter(DeadLetterReason),
    Park,
}

impl RetryPolicy {
    /// The source behavior: bounded retries, then parked forever with no backoff.
    pub fn park_after_exhaustion(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: None,
            on_exhausted: ExhaustedAction::Park,
            reject_is_permanent: false,
        }
    }

    pub fn decide(&self, retry_count: u32, error: &RemoteError, now: DateTime<Utc>) -> RetryDecision {
        if self.reject_is_permanent && error.kind() == SyncErrorKind::Permanent {
            let reason = match error {
                RemoteError::Rejected { status, .. } => DeadLetterReason::Rejected { status: *status },
                _ => DeadLetterReason::Undispatchable,
            };
            return RetryDecision::DeadLetter(reason);
        }

        if retry_count < self.max_retries {
            let next_attempt_at = self.backoff.and_then(|b| {
                chrono::Duration::from_std(b.delay_for(retry_count + 1))
                    .ok()
                    .map(|d| now + d)
            });
            return RetryDecision::Retry { next_attempt_at };
        }

        match self.on_exhausted {
            ExhaustedAction::DeadLetter => RetryDecision::DeadLetter(DeadLetterReason::RetriesExhausted),
            ExhaustedAction::Park => RetryDecision::Park,
        }
    }
}
