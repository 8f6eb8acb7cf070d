pub mod local_store;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

pub use local_store::LocalStore;
pub use memory::MemoryBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
pub use traits::{Collection, StorageBackend, StorageResult, SCHEMA_VERSION};
