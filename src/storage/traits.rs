//! Storage backend trait and the fixed collection set.

use crate::error::StorageError;

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 2;

/// Named collections in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    SyncQueue,
    DeadLetters,
    Patients,
    Appointments,
    Reminders,
    Visits,
    OfflineData,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::SyncQueue,
        Collection::DeadLetters,
        Collection::Patients,
        Collection::Appointments,
        Collection::Reminders,
        Collection::Visits,
        Collection::OfflineData,
    ];

    /// Logical name, matching the persisted layout.
    pub fn name(&self) -> &'static str {
        match self {
            Collection::SyncQueue => "syncQueue",
            Collection::DeadLetters => "deadLetters",
            Collection::Patients => "patients",
            Collection::Appointments => "appointments",
            Collection::Reminders => "reminders",
            Collection::Visits => "visits",
            Collection::OfflineData => "offlineData",
        }
    }

    /// SQL table backing the collection.
    pub fn table(&self) -> &'static str {
        match self {
            Collection::SyncQueue => "sync_queue",
            Collection::DeadLetters => "dead_letters",
            Collection::Patients => "patients",
            Collection::Appointments => "appointments",
            Collection::Reminders => "reminders",
            Collection::Visits => "visits",
            Collection::OfflineData => "offline_data",
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Raw string key-value storage with a small set of atomic primitives.
///
/// Values are opaque strings (JSON, written by `LocalStore`). `scan_raw`
/// returns entries in ascending key order.
///
/// # Threading
/// All methods are synchronous and may be called from async tasks directly.
pub trait StorageBackend: Send + Sync {
    /// Schema version of the opened store.
    fn schema_version(&self) -> StorageResult<u32>;

    fn get_raw(&self, collection: Collection, key: &str) -> StorageResult<Option<String>>;

    fn put_raw(&self, collection: Collection, key: &str, value: &str) -> StorageResult<()>;

    /// Returns whether an entry was removed.
    fn delete_raw(&self, collection: Collection, key: &str) -> StorageResult<bool>;

    fn scan_raw(&self, collection: Collection) -> StorageResult<Vec<(String, String)>>;

    fn count_raw(&self, collection: Collection) -> StorageResult<usize>;

    /// Atomically replace `expected` with `new` for a single key.
    ///
    /// `expected = None` means "key must be absent"; `new = None` deletes.
    /// Returns `false` (and writes nothing) when the current value differs.
    fn compare_and_swap(
        &self,
        collection: Collection,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> StorageResult<bool>;

    /// Atomically delete `key` from `from` and write `value` under `key` in `to`.
    /// Returns `false` (and writes nothing) when `key` is absent from `from`, or
    /// when `only_if` is set and the current value in `from` differs from it.
    fn transfer(
        &self,
        from: Collection,
        to: Collection,
        key: &str,
        only_if: Option<&str>,
        value: &str,
    ) -> StorageResult<bool>;

    fn get_meta(&self, key: &str) -> StorageResult<Option<String>>;

    fn set_meta(&self, key: &str, value: &str) -> StorageResult<()>;
}
