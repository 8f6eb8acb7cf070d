pub mod manager;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod types;

pub use manager::{SyncManager, SyncManagerOptions, LAST_SYNC_KEY};
pub use retry::{Backoff, ExhaustedAction, RetryDecision, RetryPolicy};
pub use scheduler::SyncScheduler;
pub use status::SyncStatusReporter;
pub use types::{
    FailureDisposition, SkipReason, SyncErrorCallback, SyncErrorEvent, SyncErrorKind, SyncOutcome,
    SyncReport, SyncStatusSnapshot,
};
