//! `EntityCache`: locally cached domain snapshots for offline reads.
//!
//! Each built-in entity type has its own collection. Writes here never reach
//! the server; they mirror what the remote last returned (or what the user
//! just queued) so screens can render without connectivity.

use serde_json::Value;

use crate::error::{OfflineError, Result};
use crate::storage::{Collection, LocalStore};
use crate::types::EntityType;

fn collection_for(entity_type: &EntityType) -> Result<Collection> {
    match entity_type {
        EntityType::Patient => Ok(Collection::Patients),
        EntityType::Appointment => Ok(Collection::Appointments),
        EntityType::Reminder => Ok(Collection::Reminders),
        EntityType::Visit => Ok(Collection::Visits),
        EntityType::Other(name) => Err(OfflineError::UnknownEntity(name.clone())),
    }
}

#[derive(Clone)]
pub struct EntityCache {
    store: LocalStore,
}

impl EntityCache {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub fn put(&self, entity_type: &EntityType, id: &str, snapshot: &Value) -> Result<()> {
        self.store.put(collection_for(entity_type)?, id, snapshot)
    }

    pub fn get(&self, entity_type: &EntityType, id: &str) -> Result<Option<Value>> {
        self.store.get(collection_for(entity_type)?, id)
    }

    pub fn list(&self, entity_type: &EntityType) -> Result<Vec<Value>> {
        Ok(self
            .store
            .get_all(collection_for(entity_type)?)?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    pub fn remove(&self, entity_type: &EntityType, id: &str) -> Result<bool> {
        self.store.delete(collection_for(entity_type)?, id)
    }

    /// Replace the whole collection with a fresh server listing.
    pub fn replace_all<'a, I>(&self, entity_type: &EntityType, snapshots: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let collection = collection_for(entity_type)?;
        for (key, _) in self.store.get_all::<Value>(collection)? {
            self.store.delete(collection, &key)?;
        }
        let mut written = 0;
        for (id, snapshot) in snapshots {
            self.store.put(collection, id, snapshot)?;
            written += 1;
        }
        Ok(written)
    }
}
