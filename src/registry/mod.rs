//! Local registry of per-entity registration state.
//!
//! The in-memory map is authoritative at runtime; every mutation is written
//! through to SQLite so records survive restarts. All access goes through a
//! single mutex, which keeps read-modify-write sequences atomic per id.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod store;

#[cfg(test)]
mod tests;

use store::RecordStore;

/// Registration and disablement state of one entity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub entity_id: String,
    /// Once true, never false again (until `reset`)
    pub registered: bool,
    pub disabled: bool,
}

impl RegistryRecord {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to open registry store: {0}")]
    Open(#[source] rusqlite::Error),

    #[error("failed to persist registry record for {entity_id}: {source}")]
    Persist {
        entity_id: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to clear registry store: {0}")]
    Reset(#[source] rusqlite::Error),
}

/// Durable per-entity registry.
///
/// Persist failures never roll back the in-memory state: the record is
/// updated first and the error is returned for the caller to log.
pub struct Registry {
    records: Mutex<HashMap<String, RegistryRecord>>,
    store: RecordStore,
}

impl Registry {
    /// Opens the registry at `path`, loading every persisted record.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let store = RecordStore::open(path).map_err(RegistryError::Open)?;
        let records = store
            .load_all()
            .map_err(RegistryError::Open)?
            .into_iter()
            .map(|r| (r.entity_id.clone(), r))
            .collect();

        Ok(Self {
            records: Mutex::new(records),
            store,
        })
    }

    /// Non-durable registry backed by an in-memory SQLite database.
    pub fn in_memory() -> Result<Self, RegistryError> {
        Self::open(":memory:")
    }

    pub fn get(&self, entity_id: &str) -> Option<RegistryRecord> {
        self.lock().get(entity_id).cloned()
    }

    /// Stores `record` for `entity_id`.
    ///
    /// `registered` is monotonic: a stored `true` is kept even when `record`
    /// says otherwise.
    pub fn set(&self, entity_id: &str, record: RegistryRecord) -> Result<(), RegistryError> {
        self.update(entity_id, |current| {
            current.registered |= record.registered;
            current.disabled = record.disabled;
        })
        .map(|_| ())
    }

    /// Applies `f` to the record for `entity_id` (created on first sight)
    /// and persists the result. Returns the stored record.
    pub fn update<F>(&self, entity_id: &str, f: F) -> Result<RegistryRecord, RegistryError>
    where
        F: FnOnce(&mut RegistryRecord),
    {
        let mut records = self.lock();
        let current = records
            .entry(entity_id.to_string())
            .or_insert_with(|| RegistryRecord::new(entity_id));

        let was_registered = current.registered;
        f(current);
        current.entity_id = entity_id.to_string();
        current.registered |= was_registered;

        let record = current.clone();
        self.store
            .upsert(&record)
            .map_err(|source| RegistryError::Persist {
                entity_id: entity_id.to_string(),
                source,
            })?;

        Ok(record)
    }

    pub fn mark_registered(&self, entity_id: &str) -> Result<(), RegistryError> {
        self.update(entity_id, |r| r.registered = true).map(|_| ())
    }

    pub fn set_disabled(&self, entity_id: &str, disabled: bool) -> Result<(), RegistryError> {
        self.update(entity_id, |r| r.disabled = disabled).map(|_| ())
    }

    pub fn is_registered(&self, entity_id: &str) -> bool {
        self.get(entity_id).is_some_and(|r| r.registered)
    }

    pub fn is_disabled(&self, entity_id: &str) -> bool {
        self.get(entity_id).is_some_and(|r| r.disabled)
    }

    /// Deletes every record, in memory and on disk.
    pub fn reset(&self) -> Result<(), RegistryError> {
        let mut records = self.lock();
        records.clear();
        self.store.clear().map_err(RegistryError::Reset)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RegistryRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
