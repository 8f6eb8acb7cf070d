//! `MemoryBackend`: a StorageBackend that holds everything in process memory.
//!
//! Used for hermetic tests and for hosts without durable storage. Contents do
//! not survive a restart.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use super::traits::{Collection, StorageBackend, StorageResult, SCHEMA_VERSION};

#[derive(Default)]
struct State {
    /// collection → (key → value)
    collections: HashMap<Collection, BTreeMap<String, String>>,
    /// metadata key → value
    meta: HashMap<String, String>,
}

/// In-memory storage. A single lock guards all collections, so
/// `compare_and_swap` and `transfer` are atomic.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn schema_version(&self) -> StorageResult<u32> {
        Ok(SCHEMA_VERSION)
    }

    fn get_raw(&self, collection: Collection, key: &str) -> StorageResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .collections
            .get(&collection)
            .and_then(|col| col.get(key))
            .cloned())
    }

    fn put_raw(&self, collection: Collection, key: &str, value: &str) -> StorageResult<()> {
        self.state
            .lock()
            .collections
            .entry(collection)
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_raw(&self, collection: Collection, key: &str) -> StorageResult<bool> {
        Ok(self
            .state
            .lock()
            .collections
            .get_mut(&collection)
            .and_then(|col| col.remove(key))
            .is_some())
    }

    fn scan_raw(&self, collection: Collection) -> StorageResult<Vec<(String, String)>> {
        Ok(self
            .state
            .lock()
            .collections
            .get(&collection)
            .map(|col| col.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn count_raw(&self, collection: Collection) -> StorageResult<usize> {
        Ok(self
            .state
            .lock()
            .collections
            .get(&collection)
            .map_or(0, BTreeMap::len))
    }

    fn compare_and_swap(
        &self,
        collection: Collection,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> StorageResult<bool> {
        let mut state = self.state.lock();
        let col = state.collections.entry(collection).or_default();
        if col.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        match new {
            Some(value) => {
                col.insert(key.to_string(), value.to_string());
            }
            None => {
                col.remove(key);
            }
        }
        Ok(true)
    }

    fn transfer(
        &self,
        from: Collection,
        to: Collection,
        key: &str,
        only_if: Option<&str>,
        value: &str,
    ) -> StorageResult<bool> {
        let mut state = self.state.lock();
        let Some(col) = state.collections.get_mut(&from) else {
            return Ok(false);
        };
        match (col.get(key), only_if) {
            (None, _) => return Ok(false),
            (Some(current), Some(expected)) if current != expected => return Ok(false),
            _ => {}
        }
        col.remove(key);
        state
            .collections
            .entry(to)
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(true)
    }

    fn get_meta(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.state.lock().meta.get(key).cloned())
    }

    fn set_meta(&self, key: &str, value: &str) -> StorageResult<()> {
        self.state
            .lock()
            .meta
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
