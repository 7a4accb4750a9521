//! Registry persistence using SQLite.
//!
//! One row per entity id. Writes are point upserts so a crash mid-batch
//! never corrupts other records.

use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use super::RegistryRecord;

/// Persists registry records in SQLite.
pub(super) struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    /// Opens (or creates) the SQLite database and ensures the table exists.
    pub fn open<P: AsRef<Path>>(path: P) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS registry (
                entity_id  TEXT PRIMARY KEY,
                registered INTEGER NOT NULL DEFAULT 0,
                disabled   INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn load_all(&self) -> rusqlite::Result<Vec<RegistryRecord>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare("SELECT entity_id, registered, disabled FROM registry")?;
        let rows = stmt.query_map([], |row| {
            Ok(RegistryRecord {
                entity_id: row.get(0)?,
                registered: row.get(1)?,
                disabled: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    pub fn upsert(&self, record: &RegistryRecord) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO registry (entity_id, registered, disabled, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(entity_id) DO UPDATE SET
                registered = excluded.registered,
                disabled = excluded.disabled,
                updated_at = excluded.updated_at",
            params![
                record.entity_id,
                record.registered,
                record.disabled,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn clear(&self) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute("DELETE FROM registry", [])?;
        Ok(())
    }
}
