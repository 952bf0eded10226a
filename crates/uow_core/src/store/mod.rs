//! Persistence boundary consumed by repositories and units of work.
//!
//! # Responsibility
//! - Define the `Store` contract: snapshot reads, a change tracker, explicit
//!   transactions and raw commands.
//! - Define the store error taxonomy shared by every backend.
//!
//! # Invariants
//! - Rows cross the boundary as JSON objects produced by `serde_json`.
//! - `save_changes` writes inside an open transaction and never accepts the
//!   tracker's changes; only `commit_transaction` does.
//! - `rollback_transaction` leaves the pending change set intact.

use crate::model::entity::{Entity, EntityKey, KeyValue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use tokio_util::sync::CancellationToken;

pub mod memory;
pub mod sqlite;
pub mod tracker;

pub use tracker::{ChangeTracker, HistoryRecord, TrackedEntry};

/// One persisted entity instance.
pub type Row = serde_json::Value;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Codec(serde_json::Error),
    /// Insert of a key that already exists.
    DuplicateKey { entity: String, key: String },
    /// Update or delete of a key that does not exist.
    MissingRow { entity: String, key: String },
    /// Second instance with an already-tracked key.
    TrackingConflict { entity: &'static str, key: String },
    /// Caller cancelled the operation.
    Cancelled,
    /// Store is in use by another operation on the same unit of work.
    Busy,
    NoTransaction,
    TransactionActive,
    /// Backend does not implement the named capability.
    Unsupported(&'static str),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Codec(err) => write!(f, "row codec error: {err}"),
            Self::DuplicateKey { entity, key } => {
                write!(f, "{entity} with key `{key}` already exists")
            }
            Self::MissingRow { entity, key } => {
                write!(f, "{entity} with key `{key}` does not exist")
            }
            Self::TrackingConflict { entity, key } => {
                write!(f, "{entity} with key `{key}` is already tracked")
            }
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Busy => write!(f, "store is busy with another operation"),
            Self::NoTransaction => write!(f, "no transaction is open"),
            Self::TransactionActive => write!(f, "a transaction is already open"),
            Self::Unsupported(capability) => {
                write!(f, "store does not support {capability}")
            }
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

/// Rows of several entity sets read at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    sets: HashMap<&'static str, Vec<Row>>,
}

impl Snapshot {
    pub fn insert(&mut self, entity: &'static str, rows: Vec<Row>) {
        self.sets.insert(entity, rows);
    }

    /// Rows of one set; empty when the set was not fetched or has no rows.
    pub fn rows(&self, entity: &str) -> &[Row] {
        self.sets.get(entity).map_or(&[], Vec::as_slice)
    }

    pub fn decode<E: Entity>(&self) -> StoreResult<Vec<E>> {
        self.rows(E::NAME)
            .iter()
            .map(|row| decode_row::<E>(row.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn encode_row<E: Entity>(entity: &E) -> StoreResult<Row> {
    Ok(serde_json::to_value(entity)?)
}

pub(crate) fn decode_row<E: Entity>(row: Row) -> StoreResult<E> {
    Ok(serde_json::from_value(row)?)
}

/// Backend owned by exactly one unit of work.
///
/// Async methods default to their sync counterparts after a cancellation
/// check; backends with a native async driver override them.
#[async_trait]
pub trait Store: Send + 'static {
    /// Short backend name for logs.
    fn label(&self) -> &str;

    /// Entity metadata, or `None` when the backend exposes none.
    ///
    /// Without metadata, delete-by-key falls back to fetch-then-delete.
    fn model(&self) -> Option<&crate::model::metadata::Model>;

    /// Reads every committed row of the named sets, in key order.
    fn fetch(&mut self, sets: &[&'static str]) -> StoreResult<Snapshot>;

    async fn fetch_async(
        &mut self,
        sets: &[&'static str],
        cancel: &CancellationToken,
    ) -> StoreResult<Snapshot> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        self.fetch(sets)
    }

    /// Reads one committed row by key.
    fn find_row(&mut self, entity: &'static str, key: &EntityKey) -> StoreResult<Option<Row>>;

    async fn find_row_async(
        &mut self,
        entity: &'static str,
        key: &EntityKey,
        cancel: &CancellationToken,
    ) -> StoreResult<Option<Row>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        self.find_row(entity, key)
    }

    fn tracker(&self) -> &ChangeTracker;

    fn tracker_mut(&mut self) -> &mut ChangeTracker;

    fn in_transaction(&self) -> bool;

    fn begin_transaction(&mut self) -> StoreResult<()>;

    /// Writes pending changes and pending history inside the open
    /// transaction; returns the number of entity rows written.
    fn save_changes(&mut self) -> StoreResult<usize>;

    async fn save_changes_async(&mut self, cancel: &CancellationToken) -> StoreResult<usize> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        self.save_changes()
    }

    /// Makes the transaction durable and accepts tracked changes.
    fn commit_transaction(&mut self) -> StoreResult<()>;

    /// Discards the transaction; pending changes stay pending.
    fn rollback_transaction(&mut self) -> StoreResult<()>;

    /// Executes a backend-native command; returns affected rows.
    fn execute_raw(&mut self, command: &str, params: &[KeyValue]) -> StoreResult<usize>;

    /// Runs a backend-native query returning entity rows.
    fn query_raw(&mut self, command: &str, params: &[KeyValue]) -> StoreResult<Vec<Row>>;

    /// Committed change history, oldest first.
    fn history(&mut self) -> StoreResult<Vec<HistoryRecord>>;

    /// Releases backend resources. Called once, on dispose.
    fn close(&mut self) -> StoreResult<()>;
}
