//! SQLite-backed row store.
//!
//! # Responsibility
//! - Persist entity rows as JSON documents keyed by `(entity, key)`.
//! - Map store transactions onto `BEGIN IMMEDIATE` / `COMMIT` / `ROLLBACK`.
//! - Persist change history in the same transaction as the change.
//!
//! # Invariants
//! - The `key` column holds the JSON encoding of `EntityKey`; ordering for
//!   reads is restored from the decoded key, not from the text.
//! - Raw queries must return a `body` column holding an entity row.

use crate::model::entity::{EntityKey, KeyValue};
use crate::model::metadata::Model;
use crate::model::state::EntityState;
use crate::store::{
    ChangeTracker, HistoryRecord, Row, Snapshot, Store, StoreError, StoreResult,
};
use log::{debug, info, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};

pub mod migrations;
mod open;

pub struct SqliteStore {
    conn: Connection,
    model: Model,
    path: Option<PathBuf>,
    tracker: ChangeTracker,
    in_transaction: bool,
}

impl SqliteStore {
    /// Opens (or creates) a database file and applies pending migrations.
    pub fn open(path: impl AsRef<Path>, model: Model) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = open::open_file(path)?;
        Ok(Self::with_connection(conn, model, Some(path.to_path_buf())))
    }

    pub fn open_in_memory(model: Model) -> StoreResult<Self> {
        let conn = open::open_memory()?;
        Ok(Self::with_connection(conn, model, None))
    }

    fn with_connection(conn: Connection, model: Model, path: Option<PathBuf>) -> Self {
        Self {
            conn,
            model,
            path,
            tracker: ChangeTracker::new(),
            in_transaction: false,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read_set(&self, entity: &str) -> StoreResult<Vec<Row>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, body FROM uow_rows WHERE entity = ?1;")?;
        let raw = stmt
            .query_map(params![entity], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut keyed = raw
            .into_iter()
            .map(|(key, body)| {
                Ok((
                    serde_json::from_str::<EntityKey>(&key)?,
                    serde_json::from_str::<Row>(&body)?,
                ))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }

    fn write_pending(&self) -> StoreResult<usize> {
        let mut written = 0;
        for entry in self.tracker.pending() {
            let key = serde_json::to_string(&entry.key)?;
            let affected = match entry.state {
                EntityState::Added => self
                    .conn
                    .execute(
                        "INSERT INTO uow_rows (entity, key, body) VALUES (?1, ?2, ?3);",
                        params![entry.entity, key, entry.current.to_string()],
                    )
                    .map_err(|err| match err.sqlite_error_code() {
                        Some(ErrorCode::ConstraintViolation) => StoreError::DuplicateKey {
                            entity: entry.entity.to_string(),
                            key: entry.key.to_string(),
                        },
                        _ => StoreError::Sqlite(err),
                    })?,
                EntityState::Modified => self.conn.execute(
                    "UPDATE uow_rows SET body = ?3 WHERE entity = ?1 AND key = ?2;",
                    params![entry.entity, key, entry.current.to_string()],
                )?,
                _ => self.conn.execute(
                    "DELETE FROM uow_rows WHERE entity = ?1 AND key = ?2;",
                    params![entry.entity, key],
                )?,
            };
            if affected == 0 {
                return Err(StoreError::MissingRow {
                    entity: entry.entity.to_string(),
                    key: entry.key.to_string(),
                });
            }
            written += 1;
        }
        Ok(written)
    }

    fn write_history(&self) -> StoreResult<usize> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO uow_history (entity, key, kind, changed, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5);",
        )?;
        for record in self.tracker.pending_history() {
            stmt.execute(params![
                record.entity,
                record.key,
                record.kind.as_str(),
                record.changed.to_string(),
                record.recorded_at,
            ])?;
        }
        Ok(self.tracker.pending_history().len())
    }
}

impl Store for SqliteStore {
    fn label(&self) -> &str {
        "sqlite"
    }

    fn model(&self) -> Option<&Model> {
        Some(&self.model)
    }

    fn fetch(&mut self, sets: &[&'static str]) -> StoreResult<Snapshot> {
        let mut snapshot = Snapshot::default();
        for &set in sets {
            snapshot.insert(set, self.read_set(set)?);
        }
        Ok(snapshot)
    }

    fn find_row(&mut self, entity: &'static str, key: &EntityKey) -> StoreResult<Option<Row>> {
        let key = serde_json::to_string(key)?;
        let body = self
            .conn
            .query_row(
                "SELECT body FROM uow_rows WHERE entity = ?1 AND key = ?2;",
                params![entity, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        body.map(|body| serde_json::from_str(&body).map_err(StoreError::from))
            .transpose()
    }

    fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn begin_transaction(&mut self) -> StoreResult<()> {
        if self.in_transaction {
            return Err(StoreError::TransactionActive);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        self.in_transaction = true;
        Ok(())
    }

    fn save_changes(&mut self) -> StoreResult<usize> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        let written = self.write_pending()?;
        let history = self.write_history()?;
        debug!(
            "event=store_save module=store status=ok store=sqlite rows={} history={}",
            written, history
        );
        Ok(written)
    }

    fn commit_transaction(&mut self) -> StoreResult<()> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        self.conn.execute_batch("COMMIT;")?;
        self.in_transaction = false;
        self.tracker.accept_changes();
        Ok(())
    }

    fn rollback_transaction(&mut self) -> StoreResult<()> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        self.in_transaction = false;
        self.tracker.discard_history();
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }

    fn execute_raw(&mut self, command: &str, params: &[KeyValue]) -> StoreResult<usize> {
        let affected = self
            .conn
            .execute(command, params_from_iter(params.iter().map(sql_value)))?;
        debug!(
            "event=store_execute_raw module=store status=ok store=sqlite affected={}",
            affected
        );
        Ok(affected)
    }

    fn query_raw(&mut self, command: &str, params: &[KeyValue]) -> StoreResult<Vec<Row>> {
        let mut stmt = self.conn.prepare(command)?;
        let body = stmt.column_index("body")?;
        let bodies = stmt
            .query_map(params_from_iter(params.iter().map(sql_value)), |row| {
                row.get::<_, String>(body)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(StoreError::from))
            .collect()
    }

    fn history(&mut self) -> StoreResult<Vec<HistoryRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT entity, key, kind, changed, recorded_at
             FROM uow_history
             ORDER BY id ASC;",
        )?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(entity, key, kind, changed, recorded_at)| {
                Ok(HistoryRecord {
                    entity,
                    key,
                    kind: serde_json::from_value::<EntityState>(Row::String(kind))?,
                    changed: serde_json::from_str(&changed)?,
                    recorded_at,
                })
            })
            .collect()
    }

    fn close(&mut self) -> StoreResult<()> {
        if self.in_transaction {
            warn!("event=store_close module=store status=rollback store=sqlite reason=open_transaction");
            self.rollback_transaction()?;
        }
        self.tracker.clear();
        info!(
            "event=store_close module=store status=ok store=sqlite mode={}",
            if self.path.is_some() { "file" } else { "memory" }
        );
        Ok(())
    }
}

fn sql_value(value: &KeyValue) -> SqlValue {
    match value {
        KeyValue::Int(value) => SqlValue::Integer(*value),
        KeyValue::Text(value) => SqlValue::Text(value.clone()),
        KeyValue::Uuid(value) => SqlValue::Text(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteStore;
    use crate::model::entity::{EntityKey, KeyValue};
    use crate::model::metadata::Model;
    use crate::model::state::EntityState;
    use crate::store::{Store, StoreError};
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(Model::default()).unwrap()
    }

    fn commit(store: &mut SqliteStore) -> Result<usize, StoreError> {
        store.begin_transaction()?;
        match store.save_changes() {
            Ok(written) => {
                store.commit_transaction()?;
                Ok(written)
            }
            Err(err) => {
                store.rollback_transaction()?;
                Err(err)
            }
        }
    }

    #[test]
    fn rows_read_back_in_key_order() {
        let mut store = store();
        for id in [10, 2, 1] {
            store
                .tracker_mut()
                .add("items", EntityKey::from(id), json!({"id": id}))
                .unwrap();
        }
        assert_eq!(commit(&mut store).unwrap(), 3);

        let snapshot = store.fetch(&["items"]).unwrap();
        let ids: Vec<i64> = snapshot
            .rows("items")
            .iter()
            .map(|row| row["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 10]);
    }

    #[test]
    fn duplicate_insert_maps_to_duplicate_key() {
        let mut store = store();
        store
            .tracker_mut()
            .add("items", EntityKey::from(1), json!({"id": 1}))
            .unwrap();
        commit(&mut store).unwrap();

        store
            .tracker_mut()
            .set_state("items", EntityKey::from(1), json!({"id": 1}), EntityState::Added);
        let err = commit(&mut store).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        assert!(!store.in_transaction());
    }

    #[test]
    fn history_is_committed_with_the_change() {
        let mut store = store();
        store
            .tracker_mut()
            .add("items", EntityKey::from(1), json!({"id": 1, "name": "a"}))
            .unwrap();
        store.tracker_mut().ensure_history(1_700_000_000_000);
        commit(&mut store).unwrap();

        let history = store.history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].entity, "items");
        assert_eq!(history[0].kind, EntityState::Added);
        assert_eq!(history[0].changed["name"], "a");
    }

    #[test]
    fn raw_query_requires_body_column() {
        let mut store = store();
        store
            .tracker_mut()
            .add("items", EntityKey::from(1), json!({"id": 1, "age": 4}))
            .unwrap();
        commit(&mut store).unwrap();

        let rows = store
            .query_raw(
                "SELECT body FROM uow_rows WHERE entity = 'items' AND json_extract(body, '$.age') > ?1;",
                &[KeyValue::Int(2)],
            )
            .unwrap();
        assert_eq!(rows, vec![json!({"id": 1, "age": 4})]);

        assert!(store
            .query_raw("SELECT key FROM uow_rows;", &[])
            .is_err());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uow.sqlite3");
        {
            let mut store = SqliteStore::open(&path, Model::default()).unwrap();
            store
                .tracker_mut()
                .add("items", EntityKey::from("a"), json!({"id": "a"}))
                .unwrap();
            commit(&mut store).unwrap();
            store.close().unwrap();
        }

        let mut reopened = SqliteStore::open(&path, Model::default()).unwrap();
        let row = reopened.find_row("items", &EntityKey::from("a")).unwrap();
        assert_eq!(row, Some(json!({"id": "a"})));
        assert_eq!(reopened.path(), Some(path.as_path()));
    }
}
