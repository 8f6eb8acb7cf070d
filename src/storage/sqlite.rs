//! `SqliteBackend`: durable StorageBackend on a single SQLite file.
//!
//! One table per collection (`key TEXT PRIMARY KEY, value TEXT NOT NULL`) plus
//! an unversioned `meta` table. `PRAGMA user_version` holds the schema version;
//! opening applies every missing migration step inside one transaction.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::StorageError;

use super::traits::{Collection, StorageBackend, StorageResult, SCHEMA_VERSION};

/// Tables introduced by each schema version, in order.
const MIGRATIONS: &[(u32, &[Collection])] = &[
    (
        1,
        &[
            Collection::SyncQueue,
            Collection::Patients,
            Collection::Appointments,
            Collection::Reminders,
            Collection::Visits,
            Collection::OfflineData,
        ],
    ),
    (2, &[Collection::DeadLetters]),
];

pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (creating on first use) the database at `path` and migrate it.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Unavailable(format!(
                        "failed to create store directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            StorageError::Unavailable(format!("failed to open {}: {e}", path.display()))
        })?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database (tests, ephemeral sessions).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Unavailable(format!("failed to open in-memory db: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> StorageResult<Self> {
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Bring the schema up to `SCHEMA_VERSION` without touching existing rows.
fn migrate(conn: &mut Connection) -> StorageResult<()> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current > SCHEMA_VERSION {
        return Err(StorageError::UnsupportedSchema {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    if current == SCHEMA_VERSION {
        debug!(version = current, "local store schema up to date");
        return Ok(());
    }

    let tx = conn.transaction()?;
    if current == 0 {
        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);",
        )?;
    }
    for (version, tables) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        for collection in *tables {
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value TEXT NOT NULL);",
                collection.table()
            ))?;
        }
    }
    tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
    tx.commit()?;

    info!(from = current, to = SCHEMA_VERSION, "migrated local store schema");
    Ok(())
}

fn select_value(
    conn: &Connection,
    collection: Collection,
    key: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        &format!("SELECT value FROM {} WHERE key = ?1", collection.table()),
        params![key],
        |row| row.get(0),
    )
    .optional()
}

fn upsert_value(
    conn: &Connection,
    collection: Collection,
    key: &str,
    value: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "INSERT INTO {} (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            collection.table()
        ),
        params![key, value],
    )
}

fn delete_value(conn: &Connection, collection: Collection, key: &str) -> rusqlite::Result<usize> {
    conn.execute(
        &format!("DELETE FROM {} WHERE key = ?1", collection.table()),
        params![key],
    )
}

impl StorageBackend for SqliteBackend {
    fn schema_version(&self) -> StorageResult<u32> {
        let conn = self.conn.lock();
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    fn get_raw(&self, collection: Collection, key: &str) -> StorageResult<Option<String>> {
        Ok(select_value(&self.conn.lock(), collection, key)?)
    }

    fn put_raw(&self, collection: Collection, key: &str, value: &str) -> StorageResult<()> {
        upsert_value(&self.conn.lock(), collection, key, value)?;
        Ok(())
    }

    fn delete_raw(&self, collection: Collection, key: &str) -> StorageResult<bool> {
        Ok(delete_value(&self.conn.lock(), collection, key)? > 0)
    }

    fn scan_raw(&self, collection: Collection) -> StorageResult<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT key, value FROM {} ORDER BY key",
            collection.table()
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn count_raw(&self, collection: Collection) -> StorageResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", collection.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn compare_and_swap(
        &self,
        collection: Collection,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> StorageResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let current = select_value(&tx, collection, key)?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        match new {
            Some(value) => upsert_value(&tx, collection, key, value)?,
            None => delete_value(&tx, collection, key)?,
        };
        tx.commit()?;
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
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        if let Some(expected) = only_if {
            if select_value(&tx, from, key)?.as_deref() != Some(expected) {
                return Ok(false);
            }
        }
        if delete_value(&tx, from, key)? == 0 {
            return Ok(false);
        }
        upsert_value(&tx, to, key, value)?;
        tx.commit()?;
        Ok(true)
    }

    fn get_meta(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_meta(&self, key: &str, value: &str) -> StorageResult<()> {
        self.conn.lock().execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
