//! Units of work: one store, memoized repositories, atomic commit.
//!
//! # Responsibility
//! - Own exactly one store and hand out repositories bound to it.
//! - Commit everything tracked since the last commit as one transaction,
//!   optionally together with other units of work.
//! - Release the store exactly once, on dispose, drop or failed commit.
//!
//! # Invariants
//! - `get_repository::<E>(false)` returns the same instance on every call.
//! - Custom repositories are resolved fresh on every call and never
//!   memoized.
//! - A failed commit rolls back, disposes this unit of work and returns
//!   the original error.

use crate::model::entity::{Entity, KeyValue};
use crate::repo::{RepoError, RepoResult, Repository};
use crate::store::{HistoryRecord, Store};
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod handle;
pub mod registry;
pub mod resolver;
pub mod scope;

pub use handle::{StoreGuard, StoreHandle};
pub use registry::RepositoryRegistry;
pub use resolver::RepositoryResolver;
pub use scope::{Participant, TransactionScope};

pub struct UnitOfWork<S: Store> {
    id: Uuid,
    label: String,
    store: StoreHandle<S>,
    registry: RepositoryRegistry,
    resolver: Option<Arc<RepositoryResolver<S>>>,
    disposed: bool,
}

impl<S: Store> UnitOfWork<S> {
    pub fn new(store: S) -> Self {
        Self::build(store, None)
    }

    /// Unit of work whose `get_repository(true)` consults `resolver`.
    pub fn with_resolver(store: S, resolver: Arc<RepositoryResolver<S>>) -> Self {
        Self::build(store, Some(resolver))
    }

    fn build(store: S, resolver: Option<Arc<RepositoryResolver<S>>>) -> Self {
        let id = Uuid::new_v4();
        let label = store.label().to_string();
        info!(
            "event=uow_open module=uow status=ok uow_id={} store={} custom_repositories={}",
            id,
            label,
            resolver.as_ref().map_or(0, |resolver| resolver.len())
        );
        Self {
            id,
            label,
            store: StoreHandle::new(store),
            registry: RepositoryRegistry::new(),
            resolver,
            disposed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn store(&self) -> &StoreHandle<S> {
        &self.store
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Generic repository for `E`; shorthand for `get_repository(false)`.
    pub fn repository<E: Entity>(&mut self) -> RepoResult<Arc<Repository<E, S>>> {
        self.get_repository::<E>(false)
    }

    /// Custom repository for `E` when `prefer_custom` is set and one is
    /// registered, otherwise the memoized generic repository.
    pub fn get_repository<E: Entity>(
        &mut self,
        prefer_custom: bool,
    ) -> RepoResult<Arc<Repository<E, S>>> {
        if self.disposed {
            return Err(RepoError::Disposed);
        }
        if prefer_custom {
            if let Some(custom) = self
                .resolver
                .as_ref()
                .and_then(|resolver| resolver.resolve::<E>(&self.store))
            {
                return Ok(Arc::new(custom));
            }
        }
        let store = &self.store;
        Ok(self
            .registry
            .get_or_create(|| Repository::<E, S>::new(store.clone())))
    }

    /// Number of memoized generic repositories.
    pub fn repository_count(&self) -> usize {
        self.registry.len()
    }

    pub fn has_changes(&self) -> RepoResult<bool> {
        self.store.with(|store| Ok(store.tracker().has_changes()))
    }

    /// Executes a backend-native command outside change tracking.
    pub fn execute_raw(&self, command: &str, params: &[KeyValue]) -> RepoResult<usize> {
        self.store
            .with(|store| Ok(store.execute_raw(command, params)?))
    }

    /// Backend-native query decoded as `E`.
    pub fn from_raw<E: Entity>(&mut self, command: &str, params: &[KeyValue]) -> RepoResult<Vec<E>> {
        self.repository::<E>()?.from_raw(command, params)
    }

    /// Committed change history recorded by `commit(true)`.
    pub fn history(&self) -> RepoResult<Vec<HistoryRecord>> {
        self.store.with(|store| Ok(store.history()?))
    }

    /// Persists every tracked change in one transaction; returns the number
    /// of entity rows written (history rows excluded).
    pub fn commit(&mut self, ensure_history: bool) -> RepoResult<usize> {
        if self.disposed {
            return Err(RepoError::Disposed);
        }
        TransactionScope::new(ensure_history).run(&mut [self as &mut dyn Participant])
    }

    pub async fn commit_async(
        &mut self,
        ensure_history: bool,
        cancel: &CancellationToken,
    ) -> RepoResult<usize> {
        if self.disposed {
            return Err(RepoError::Disposed);
        }
        TransactionScope::new(ensure_history)
            .run_async(&mut [self as &mut dyn Participant], cancel)
            .await
    }

    /// Commits `others` first, then this unit of work, in one scope.
    ///
    /// Returns the total rows written across all participants.
    pub fn commit_atomic(
        &mut self,
        ensure_history: bool,
        others: &mut [&mut dyn Participant],
    ) -> RepoResult<usize> {
        if self.disposed {
            return Err(RepoError::Disposed);
        }
        let mut participants: Vec<&mut dyn Participant> = Vec::with_capacity(others.len() + 1);
        for other in others.iter_mut() {
            participants.push(&mut **other);
        }
        participants.push(self);
        TransactionScope::new(ensure_history).run(&mut participants)
    }

    pub async fn commit_atomic_async(
        &mut self,
        ensure_history: bool,
        others: &mut [&mut dyn Participant],
        cancel: &CancellationToken,
    ) -> RepoResult<usize> {
        if self.disposed {
            return Err(RepoError::Disposed);
        }
        let mut participants: Vec<&mut dyn Participant> = Vec::with_capacity(others.len() + 1);
        for other in others.iter_mut() {
            participants.push(&mut **other);
        }
        participants.push(self);
        TransactionScope::new(ensure_history)
            .run_async(&mut participants, cancel)
            .await
    }

    /// Releases the store and forgets memoized repositories. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let repositories = self.registry.len();
        self.registry.clear();

        match self.store.release() {
            Ok(Some(mut store)) => {
                if let Err(err) = store.close() {
                    warn!(
                        "event=uow_dispose module=uow status=error uow_id={} error={}",
                        self.id, err
                    );
                }
                info!(
                    "event=uow_dispose module=uow status=ok uow_id={} store={} repositories={}",
                    self.id, self.label, repositories
                );
            }
            Ok(None) => {}
            Err(_) => info!(
                "event=uow_dispose module=uow status=deferred uow_id={} store={} repositories={}",
                self.id, self.label, repositories
            ),
        }
    }
}

impl<S: Store> Drop for UnitOfWork<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[async_trait]
impl<S: Store> Participant for UnitOfWork<S> {
    fn label(&self) -> String {
        format!("{}:{}", self.label, self.id)
    }

    fn enlist(&mut self) -> RepoResult<()> {
        self.store.with(|store| Ok(store.begin_transaction()?))
    }

    fn stage(&mut self, ensure_history: bool) -> RepoResult<usize> {
        self.store.with(|store| {
            if ensure_history {
                store.tracker_mut().ensure_history(now_millis());
            }
            Ok(store.save_changes()?)
        })
    }

    async fn stage_async(
        &mut self,
        ensure_history: bool,
        cancel: &CancellationToken,
    ) -> RepoResult<usize> {
        let mut guard = self.store.lock()?;
        let store = guard.store()?;
        if ensure_history {
            store.tracker_mut().ensure_history(now_millis());
        }
        let written = store.save_changes_async(cancel).await?;
        drop(guard);
        Ok(written)
    }

    fn complete(&mut self) -> RepoResult<()> {
        self.store.with(|store| Ok(store.commit_transaction()?))?;
        info!(
            "event=uow_commit module=uow status=ok uow_id={} store={}",
            self.id, self.label
        );
        Ok(())
    }

    fn abort(&mut self) {
        let result = self.store.with(|store| {
            if store.in_transaction() {
                store.rollback_transaction()?;
            }
            Ok(())
        });
        match result {
            Ok(()) | Err(RepoError::Disposed) => {}
            Err(err) => warn!(
                "event=uow_rollback module=uow status=error uow_id={} error={}",
                self.id, err
            ),
        }
    }

    fn fail(&mut self) {
        self.dispose();
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}
