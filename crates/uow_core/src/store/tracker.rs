//! In-memory change tracker shared by every store backend.
//!
//! # Responsibility
//! - Record per-entity state transitions between commits.
//! - Produce history records for pending changes on request.
//!
//! # Invariants
//! - At most one entry per `(entity set, key)`.
//! - Entries of an `Added` instance that is later removed are dropped, never
//!   written as deletes.
//! - `accept_changes` is the only transition back to `Unchanged` for
//!   pending entries.

use crate::model::entity::EntityKey;
use crate::model::state::EntityState;
use crate::store::{Row, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Tracked instance of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntry {
    pub entity: &'static str,
    pub key: EntityKey,
    pub state: EntityState,
    /// Row as it will be written.
    pub current: Row,
    /// Row as last read from the store; `None` for instances never read.
    pub original: Option<Row>,
}

/// Audit record written alongside a committed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub entity: String,
    pub key: String,
    pub kind: EntityState,
    /// Inserted row, deleted row, or `{field: {before, after}}` for updates.
    pub changed: Value,
    /// Unix epoch milliseconds.
    pub recorded_at: i64,
}

#[derive(Debug, Default)]
pub struct ChangeTracker {
    entries: BTreeMap<(&'static str, EntityKey), TrackedEntry>,
    history: Vec<HistoryRecord>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a row read from the store as `Unchanged`.
    ///
    /// Returns `false` when the key is already tracked; the existing entry
    /// wins.
    pub fn attach(&mut self, entity: &'static str, key: EntityKey, row: Row) -> bool {
        let slot = (entity, key);
        if self.entries.contains_key(&slot) {
            return false;
        }
        let (entity, key) = slot;
        self.entries.insert(
            (entity, key.clone()),
            TrackedEntry {
                entity,
                key,
                state: EntityState::Unchanged,
                original: Some(row.clone()),
                current: row,
            },
        );
        true
    }

    /// Marks an instance for insert.
    pub fn add(&mut self, entity: &'static str, key: EntityKey, row: Row) -> StoreResult<()> {
        match self.entries.get_mut(&(entity, key.clone())) {
            None => {
                self.entries.insert(
                    (entity, key.clone()),
                    TrackedEntry {
                        entity,
                        key,
                        state: EntityState::Added,
                        current: row,
                        original: None,
                    },
                );
                Ok(())
            }
            Some(entry) if entry.state == EntityState::Deleted => {
                entry.state = EntityState::Modified;
                entry.current = row;
                Ok(())
            }
            Some(_) => Err(StoreError::TrackingConflict {
                entity,
                key: key.to_string(),
            }),
        }
    }

    /// Marks an instance for update; a pending insert stays an insert.
    pub fn update(&mut self, entity: &'static str, key: EntityKey, row: Row) {
        match self.entries.get_mut(&(entity, key.clone())) {
            Some(entry) => {
                if entry.state != EntityState::Added {
                    entry.state = EntityState::Modified;
                }
                entry.current = row;
            }
            None => {
                self.entries.insert(
                    (entity, key.clone()),
                    TrackedEntry {
                        entity,
                        key,
                        state: EntityState::Modified,
                        current: row,
                        original: None,
                    },
                );
            }
        }
    }

    /// Marks an instance for delete; a pending insert is simply dropped.
    pub fn remove(&mut self, entity: &'static str, key: EntityKey, row: Row) {
        let slot = (entity, key);
        match self.entries.get_mut(&slot) {
            Some(entry) if entry.state != EntityState::Added => {
                entry.state = EntityState::Deleted;
            }
            Some(_) => {
                self.entries.remove(&slot);
            }
            None => {
                let (entity, key) = slot;
                self.entries.insert(
                    (entity, key.clone()),
                    TrackedEntry {
                        entity,
                        key,
                        state: EntityState::Deleted,
                        current: row,
                        original: None,
                    },
                );
            }
        }
    }

    /// Forces the state of one instance.
    pub fn set_state(&mut self, entity: &'static str, key: EntityKey, row: Row, state: EntityState) {
        let slot = (entity, key);
        if state == EntityState::Detached {
            self.entries.remove(&slot);
            return;
        }
        match self.entries.get_mut(&slot) {
            Some(entry) => {
                entry.state = state;
                if state == EntityState::Unchanged {
                    entry.original = Some(row.clone());
                }
                entry.current = row;
            }
            None => {
                let (entity, key) = slot;
                let original = (state == EntityState::Unchanged).then(|| row.clone());
                self.entries.insert(
                    (entity, key.clone()),
                    TrackedEntry {
                        entity,
                        key,
                        state,
                        current: row,
                        original,
                    },
                );
            }
        }
    }

    pub fn get(&self, entity: &'static str, key: &EntityKey) -> Option<&TrackedEntry> {
        self.entries.get(&(entity, key.clone()))
    }

    pub fn state(&self, entity: &'static str, key: &EntityKey) -> EntityState {
        self.get(entity, key)
            .map_or(EntityState::Detached, |entry| entry.state)
    }

    /// Entries with work to do at commit, in `(set, key)` order.
    pub fn pending(&self) -> impl Iterator<Item = &TrackedEntry> {
        self.entries.values().filter(|entry| entry.state.is_pending())
    }

    pub fn has_changes(&self) -> bool {
        self.pending().next().is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// Rebuilds pending history from the current pending entries.
    pub fn ensure_history(&mut self, recorded_at: i64) {
        self.history = self
            .pending()
            .map(|entry| HistoryRecord {
                entity: entry.entity.to_string(),
                key: entry.key.to_string(),
                kind: entry.state,
                changed: changed_fields(entry),
                recorded_at,
            })
            .collect();
    }

    pub fn pending_history(&self) -> &[HistoryRecord] {
        &self.history
    }

    pub fn discard_history(&mut self) {
        self.history.clear();
    }

    /// Called after a durable commit: inserts and updates become
    /// `Unchanged`, deletes are detached.
    pub fn accept_changes(&mut self) {
        self.entries
            .retain(|_, entry| entry.state != EntityState::Deleted);
        for entry in self.entries.values_mut() {
            if entry.state.is_pending() {
                entry.state = EntityState::Unchanged;
                entry.original = Some(entry.current.clone());
            }
        }
        self.history.clear();
    }

    /// Drops every entry and pending history.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn changed_fields(entry: &TrackedEntry) -> Value {
    match (entry.state, &entry.original) {
        (EntityState::Modified, Some(original)) => diff(original, &entry.current),
        (EntityState::Deleted, Some(original)) => original.clone(),
        _ => entry.current.clone(),
    }
}

fn diff(before: &Value, after: &Value) -> Value {
    let (Some(before), Some(after)) = (before.as_object(), after.as_object()) else {
        return json!({ "before": before, "after": after });
    };
    let mut changed = Map::new();
    for (field, value) in after {
        let previous = before.get(field).unwrap_or(&Value::Null);
        if previous != value {
            changed.insert(
                field.clone(),
                json!({ "before": previous, "after": value }),
            );
        }
    }
    for (field, previous) in before {
        if !after.contains_key(field) {
            changed.insert(
                field.clone(),
                json!({ "before": previous, "after": Value::Null }),
            );
        }
    }
    Value::Object(changed)
}
