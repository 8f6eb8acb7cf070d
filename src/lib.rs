//! Offline-first mutation queue and sync engine for clinic and field-worker records.
//!
//! Writes are queued in a durable local store, replayed against the remote API
//! when connectivity allows, and reported through a read-only status snapshot.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod form_cache;
pub mod queue;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod types;

pub use cache::EntityCache;
pub use config::EngineConfig;
pub use connectivity::Connectivity;
pub use engine::{SyncEngine, SyncEngineOptions};
pub use error::{OfflineError, RemoteError, Result, StorageError};
pub use form_cache::{
    FormCache, FormSubmitter, OfflineData, ReplayPolicy, ReplayReport, SubmitOutcome,
};
pub use queue::{MutationQueue, QueueLimit, QueueScan};
#[cfg(feature = "http")]
pub use remote::HttpTransport;
pub use remote::{Dispatcher, HttpMethod, RemoteRequest, RemoteTransport, ResourceMap};
pub use storage::{Collection, LocalStore, MemoryBackend, StorageBackend};
#[cfg(feature = "sqlite")]
pub use storage::SqliteBackend;
pub use sync::{
    ExhaustedAction, RetryPolicy, SkipReason, SyncErrorEvent, SyncErrorKind, SyncManager,
    SyncOutcome, SyncReport, SyncStatusSnapshot,
};
pub use types::{DeadLetter, DeadLetterReason, EntityType, MutationAction, QueuedMutation};
