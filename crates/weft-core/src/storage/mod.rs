//! # redb-backed Project Storage
//!
//! The graph lives in a redb embedded database, which gives the store:
//! - ACID write transactions (one per mutating request)
//! - Crash safety (copy-on-write B-trees)
//! - A single writer, which is exactly the editor's concurrency model
//!
//! ## Layout
//!
//! Row tables hold postcard-encoded records. Index tables are keyed by
//! `(scope, id)` pairs with a unit value so a prefix range lists one
//! scope in key order.
//!
//! Every operation in the submodules takes a `&WriteTransaction`. Callers
//! compose several of them into one atomic unit and commit once; dropping
//! the transaction instead rolls back every row change.

pub mod applications;
pub mod attrs;
pub mod entities;
pub mod projects;
pub mod relationships;

use crate::WeftError;
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::path::Path;

/// Projects: project id -> postcard `Project`.
pub(crate) const PROJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("projects");

/// Entities: entity id -> postcard `Entity`.
pub(crate) const ENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entities");

/// Index: (project id, entity id) -> ().
pub(crate) const PROJECT_ENTITIES: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("project_entities");

/// Attributes: (entity id, key) -> postcard `StoredValue`.
pub(crate) const ATTRS: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("attrs");

/// Relationships: relationship id -> postcard `Relationship`.
pub(crate) const RELATIONSHIPS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("relationships");

/// Index: (project id, relationship id) -> ().
pub(crate) const PROJECT_RELATIONSHIPS: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("project_relationships");

/// Index: (from entity id, relationship id) -> ().
pub(crate) const OUTGOING: TableDefinition<(&str, &str), ()> = TableDefinition::new("outgoing");

/// Index: (to entity id, relationship id) -> ().
pub(crate) const INCOMING: TableDefinition<(&str, &str), ()> = TableDefinition::new("incoming");

/// Stamps: stamp id -> postcard `StoredStamp`.
pub(crate) const STAMPS: TableDefinition<&str, &[u8]> = TableDefinition::new("stamps");

/// Stamp application markers: (entity id, stamp id, application id) -> applied_at.
pub(crate) const APPLICATIONS: TableDefinition<(&str, &str, &str), u64> =
    TableDefinition::new("stamp_applications");

/// Map any storage-engine error into `WeftError::StorageFailure`.
pub(crate) fn store_err<E: Display>(e: E) -> WeftError {
    WeftError::StorageFailure(e.to_string())
}

/// Encode a record for a row table.
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WeftError> {
    postcard::to_allocvec(value).map_err(|e| WeftError::SerializationError(e.to_string()))
}

/// Decode a record from a row table.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WeftError> {
    postcard::from_bytes(bytes).map_err(|e| WeftError::DeserializationError(e.to_string()))
}

/// Read and decode one row by id.
pub(crate) fn read_row<T, R>(table: &R, id: &str) -> Result<Option<T>, WeftError>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(id).map_err(store_err)? {
        Some(data) => Ok(Some(decode(data.value())?)),
        None => Ok(None),
    }
}

/// List the second key component of every `(first, _)` entry, in key order.
pub(crate) fn scoped_keys<R>(table: &R, first: &str) -> Result<Vec<String>, WeftError>
where
    R: ReadableTable<(&'static str, &'static str), ()>,
{
    let mut keys = Vec::new();
    for entry in table.range((first, "")..).map_err(store_err)? {
        let (key, _) = entry.map_err(store_err)?;
        let (scope, id) = key.value();
        if scope != first {
            break;
        }
        keys.push(id.to_string());
    }
    Ok(keys)
}

/// The storage handle.
///
/// Owns the redb database. All reads and writes go through
/// [`Store::begin_write`]; read-only requests abort their transaction
/// instead of committing.
pub struct Store {
    db: Database,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WeftError> {
        let db = Database::create(path.as_ref()).map_err(|e| WeftError::IoError(e.to_string()))?;
        Self::initialize(db)
    }

    /// Create a volatile store backed by memory only.
    pub fn in_memory() -> Result<Self, WeftError> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(store_err)?;
        Self::initialize(db)
    }

    fn initialize(db: Database) -> Result<Self, WeftError> {
        let txn = db.begin_write().map_err(store_err)?;
        {
            txn.open_table(PROJECTS).map_err(store_err)?;
            txn.open_table(ENTITIES).map_err(store_err)?;
            txn.open_table(PROJECT_ENTITIES).map_err(store_err)?;
            txn.open_table(ATTRS).map_err(store_err)?;
            txn.open_table(RELATIONSHIPS).map_err(store_err)?;
            txn.open_table(PROJECT_RELATIONSHIPS).map_err(store_err)?;
            txn.open_table(OUTGOING).map_err(store_err)?;
            txn.open_table(INCOMING).map_err(store_err)?;
            txn.open_table(STAMPS).map_err(store_err)?;
            txn.open_table(APPLICATIONS).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    /// Begin a write transaction. Commit it to publish, drop it to roll back.
    pub fn begin_write(&self) -> Result<WriteTransaction, WeftError> {
        self.db.begin_write().map_err(store_err)
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), WeftError> {
        self.db.compact().map_err(store_err)?;
        Ok(())
    }
}
