//! `LocalStore`: typed JSON facade over a `StorageBackend`.
//!
//! A store that failed to open is kept in an `Unavailable` state instead of
//! aborting the host: every operation then returns
//! `StorageError::Unavailable` and the status snapshot carries the reason.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StorageError};

use super::memory::MemoryBackend;
use super::traits::{Collection, StorageBackend, SCHEMA_VERSION};

#[derive(Clone)]
enum Inner {
    Ready(Arc<dyn StorageBackend>),
    Unavailable(Arc<str>),
}

#[derive(Clone)]
pub struct LocalStore {
    inner: Inner,
}

impl LocalStore {
    /// Wrap an already-opened backend, refusing one on an unexpected schema.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let version = backend.schema_version()?;
        if version != SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchema {
                found: version,
                supported: SCHEMA_VERSION,
            }
            .into());
        }
        Ok(Self {
            inner: Inner::Ready(backend),
        })
    }

    /// A non-durable store.
    pub fn in_memory() -> Self {
        Self {
            inner: Inner::Ready(Arc::new(MemoryBackend::new())),
        }
    }

    /// A store that rejects every operation with `reason`.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let reason: String = reason.into();
        Self {
            inner: Inner::Unavailable(Arc::from(reason)),
        }
    }

    /// Open the SQLite store at `path`, falling back to the unavailable state.
    #[cfg(feature = "sqlite")]
    pub fn open_sqlite(path: &std::path::Path) -> Self {
        let opened = super::sqlite::SqliteBackend::open(path)
            .map_err(crate::error::OfflineError::from)
            .and_then(|db| LocalStore::new(Arc::new(db)));
        match opened {
            Ok(store) => store,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "local store unavailable; offline queuing disabled");
                LocalStore::unavailable(e.to_string())
            }
        }
    }

    /// Why the store is unavailable, if it is.
    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.inner {
            Inner::Ready(_) => None,
            Inner::Unavailable(reason) => Some(&**reason),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.inner, Inner::Ready(_))
    }

    pub(crate) fn backend(&self) -> Result<&dyn StorageBackend> {
        match &self.inner {
            Inner::Ready(backend) => Ok(backend.as_ref()),
            Inner::Unavailable(reason) => Err(StorageError::Unavailable(reason.to_string()).into()),
        }
    }

    // -----------------------------------------------------------------------
    // Typed CRUD
    // -----------------------------------------------------------------------

    pub fn get<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> Result<Option<T>> {
        match self.backend()?.get_raw(collection, key)? {
            Some(raw) => Ok(Some(decode(collection, key, &raw)?)),
            None => Ok(None),
        }
    }

    pub fn put<T: Serialize>(&self, collection: Collection, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.backend()?.put_raw(collection, key, &raw)?;
        Ok(())
    }

    pub fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
        Ok(self.backend()?.delete_raw(collection, key)?)
    }

    /// All entries of a collection in key order.
    pub fn get_all<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<(String, T)>> {
        self.backend()?
            .scan_raw(collection)?
            .into_iter()
            .map(|(key, raw)| {
                let value = decode(collection, &key, &raw)?;
                Ok((key, value))
            })
            .collect()
    }

    pub fn count(&self, collection: Collection) -> Result<usize> {
        Ok(self.backend()?.count_raw(collection)?)
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.backend()?.get_meta(key)?)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        Ok(self.backend()?.set_meta(key, value)?)
    }
}

pub(crate) fn decode<T: DeserializeOwned>(collection: Collection, key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        StorageError::Corrupt {
            collection: collection.name(),
            key: key.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}
