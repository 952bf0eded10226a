//! Process-local store backed by ordered maps.
//!
//! # Responsibility
//! - Serve tests and embedded hosts that need no durable storage.
//!
//! # Invariants
//! - Committed tables are only replaced on `commit_transaction`.
//! - An open transaction works on a private copy of the committed tables.

use crate::model::entity::{EntityKey, KeyValue};
use crate::model::metadata::Model;
use crate::model::state::EntityState;
use crate::store::{
    ChangeTracker, HistoryRecord, Row, Snapshot, Store, StoreError, StoreResult,
};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<&'static str, BTreeMap<EntityKey, Row>>,
    history: Vec<HistoryRecord>,
}

#[derive(Debug)]
pub struct MemoryStore {
    model: Option<Model>,
    committed: Tables,
    staging: Option<Tables>,
    tracker: ChangeTracker,
}

impl MemoryStore {
    /// Store with entity metadata; delete-by-key uses key stubs.
    pub fn new(model: Model) -> Self {
        Self::build(Some(model))
    }

    /// Store without metadata; delete-by-key always fetches first.
    pub fn without_model() -> Self {
        Self::build(None)
    }

    fn build(model: Option<Model>) -> Self {
        Self {
            model,
            committed: Tables::default(),
            staging: None,
            tracker: ChangeTracker::new(),
        }
    }

    /// Committed rows of one set.
    pub fn committed_len(&self, entity: &str) -> usize {
        self.committed.rows.get(entity).map_or(0, BTreeMap::len)
    }
}

impl Store for MemoryStore {
    fn label(&self) -> &str {
        "memory"
    }

    fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    fn fetch(&mut self, sets: &[&'static str]) -> StoreResult<Snapshot> {
        let mut snapshot = Snapshot::default();
        for &set in sets {
            let rows = self
                .committed
                .rows
                .get(set)
                .map(|table| table.values().cloned().collect())
                .unwrap_or_default();
            snapshot.insert(set, rows);
        }
        Ok(snapshot)
    }

    fn find_row(&mut self, entity: &'static str, key: &EntityKey) -> StoreResult<Option<Row>> {
        Ok(self
            .committed
            .rows
            .get(entity)
            .and_then(|table| table.get(key))
            .cloned())
    }

    fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    fn in_transaction(&self) -> bool {
        self.staging.is_some()
    }

    fn begin_transaction(&mut self) -> StoreResult<()> {
        if self.staging.is_some() {
            return Err(StoreError::TransactionActive);
        }
        self.staging = Some(self.committed.clone());
        Ok(())
    }

    fn save_changes(&mut self) -> StoreResult<usize> {
        let staging = self.staging.as_mut().ok_or(StoreError::NoTransaction)?;
        let mut written = 0;

        for entry in self.tracker.pending() {
            let table = staging.rows.entry(entry.entity).or_default();
            let exists = table.contains_key(&entry.key);
            match entry.state {
                EntityState::Added if exists => {
                    return Err(StoreError::DuplicateKey {
                        entity: entry.entity.to_string(),
                        key: entry.key.to_string(),
                    });
                }
                EntityState::Modified | EntityState::Deleted if !exists => {
                    return Err(StoreError::MissingRow {
                        entity: entry.entity.to_string(),
                        key: entry.key.to_string(),
                    });
                }
                EntityState::Deleted => {
                    table.remove(&entry.key);
                }
                _ => {
                    table.insert(entry.key.clone(), entry.current.clone());
                }
            }
            written += 1;
        }

        staging
            .history
            .extend(self.tracker.pending_history().iter().cloned());
        debug!(
            "event=store_save module=store status=ok store=memory rows={} history={}",
            written,
            self.tracker.pending_history().len()
        );
        Ok(written)
    }

    fn commit_transaction(&mut self) -> StoreResult<()> {
        let staging = self.staging.take().ok_or(StoreError::NoTransaction)?;
        self.committed = staging;
        self.tracker.accept_changes();
        Ok(())
    }

    fn rollback_transaction(&mut self) -> StoreResult<()> {
        self.staging.take().ok_or(StoreError::NoTransaction)?;
        self.tracker.discard_history();
        Ok(())
    }

    fn execute_raw(&mut self, _command: &str, _params: &[KeyValue]) -> StoreResult<usize> {
        Err(StoreError::Unsupported("raw commands"))
    }

    fn query_raw(&mut self, _command: &str, _params: &[KeyValue]) -> StoreResult<Vec<Row>> {
        Err(StoreError::Unsupported("raw queries"))
    }

    fn history(&mut self) -> StoreResult<Vec<HistoryRecord>> {
        Ok(self.committed.history.clone())
    }

    fn close(&mut self) -> StoreResult<()> {
        self.staging = None;
        self.tracker.clear();
        info!(
            "event=store_close module=store status=ok store=memory sets={}",
            self.committed.rows.len()
        );
        Ok(())
    }
}
