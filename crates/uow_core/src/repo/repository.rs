//! Generic repository over one entity type.
//!
//! # Responsibility
//! - Offer list, first, page, find, projection and aggregate reads, each in
//!   a blocking and a cancellable async form with identical results.
//! - Offer insert, update, delete, delete-by-key and state overrides.
//!
//! # Invariants
//! - A composed read issues exactly one store fetch; everything after it is
//!   in-memory and identical between sync and async forms.
//! - Aggregates honour only the predicate (plus default filters and the
//!   repository scope).
//! - Delete-by-key never reads the row when a key stub is available.

use crate::config::ConfigError;
use crate::model::entity::{Entity, EntityKey, KeyValue};
use crate::model::metadata::Model;
use crate::model::state::EntityState;
use crate::query::compose::{compose, Filtered};
use crate::query::page::{page_filtered, PageRequest, PagedResult};
use crate::query::spec::{Predicate, QuerySpec, Stage, Tracking};
use crate::repo::hooks::RepositoryHooks;
use crate::repo::{RepoError, RepoResult};
use crate::store::{decode_row, encode_row, Row, Snapshot, Store};
use crate::uow::handle::StoreHandle;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// How delete-by-key reaches the row.
enum DeletePlan<E> {
    /// Attach a key-only instance as deleted.
    Stub(E),
    /// Read the row first; absent rows are a no-op.
    Fetch,
}

pub struct Repository<E, S> {
    store: StoreHandle<S>,
    hooks: Option<Arc<dyn RepositoryHooks<E>>>,
}

impl<E: Entity, S: Store> Repository<E, S> {
    pub fn new(store: StoreHandle<S>) -> Self {
        Self {
            store,
            hooks: None,
        }
    }

    /// Custom repository: generic behaviour plus `hooks`.
    pub fn with_hooks<H>(store: StoreHandle<S>, hooks: H) -> Self
    where
        H: RepositoryHooks<E> + 'static,
    {
        Self {
            store,
            hooks: Some(Arc::new(hooks)),
        }
    }

    pub fn is_custom(&self) -> bool {
        self.hooks.is_some()
    }

    /// `generic`, or the hooks' name for custom repositories.
    pub fn kind(&self) -> &'static str {
        self.hooks.as_ref().map_or("generic", |hooks| hooks.name())
    }

    pub fn store(&self) -> &StoreHandle<S> {
        &self.store
    }

    /// Every element matching `spec`, ordered.
    pub fn list(&self, spec: &QuerySpec<E>) -> RepoResult<Vec<E>> {
        let started_at = Instant::now();
        let items = self.store.with(|store| {
            let snapshot = store.fetch(&spec.entity_sets())?;
            self.ordered_tracked(store, spec, &snapshot)
        })?;
        self.log_read("list", &spec.plan_label(), items.len(), started_at);
        Ok(items)
    }

    pub async fn list_async(
        &self,
        spec: &QuerySpec<E>,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<E>> {
        let started_at = Instant::now();
        let mut guard = self.store.lock()?;
        let store = guard.store()?;
        let snapshot = store.fetch_async(&spec.entity_sets(), cancel).await?;
        let items = self.ordered_tracked(store, spec, &snapshot)?;
        drop(guard);
        self.log_read("list", &spec.plan_label(), items.len(), started_at);
        Ok(items)
    }

    /// Projected elements; projection runs after every other stage.
    pub fn list_as<R, F>(&self, spec: &QuerySpec<E>, projector: F) -> RepoResult<Vec<R>>
    where
        F: FnMut(E) -> R,
    {
        let started_at = Instant::now();
        let items = self.store.with(|store| {
            let snapshot = store.fetch(&spec.entity_sets())?;
            Ok(self.ordered(store.model(), spec, &snapshot)?)
        })?;
        let projected: Vec<R> = items.into_iter().map(projector).collect();
        self.log_read("list_as", &projected_plan(spec), projected.len(), started_at);
        Ok(projected)
    }

    pub async fn list_as_async<R, F>(
        &self,
        spec: &QuerySpec<E>,
        projector: F,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<R>>
    where
        F: FnMut(E) -> R,
    {
        let started_at = Instant::now();
        let mut guard = self.store.lock()?;
        let store = guard.store()?;
        let snapshot = store.fetch_async(&spec.entity_sets(), cancel).await?;
        let items = self.ordered(store.model(), spec, &snapshot)?;
        drop(guard);
        let projected: Vec<R> = items.into_iter().map(projector).collect();
        self.log_read("list_as", &projected_plan(spec), projected.len(), started_at);
        Ok(projected)
    }

    /// First element of the ordered query, or `None`.
    pub fn first(&self, spec: &QuerySpec<E>) -> RepoResult<Option<E>> {
        let started_at = Instant::now();
        let first = self.store.with(|store| {
            let snapshot = store.fetch(&spec.entity_sets())?;
            let first = self.ordered(store.model(), spec, &snapshot)?.into_iter().next();
            self.track(store, spec, first.as_slice())?;
            Ok(first)
        })?;
        self.log_read("first", &spec.plan_label(), usize::from(first.is_some()), started_at);
        Ok(first)
    }

    pub async fn first_async(
        &self,
        spec: &QuerySpec<E>,
        cancel: &CancellationToken,
    ) -> RepoResult<Option<E>> {
        let started_at = Instant::now();
        let mut guard = self.store.lock()?;
        let store = guard.store()?;
        let snapshot = store.fetch_async(&spec.entity_sets(), cancel).await?;
        let first = self.ordered(store.model(), spec, &snapshot)?.into_iter().next();
        self.track(store, spec, first.as_slice())?;
        drop(guard);
        self.log_read("first", &spec.plan_label(), usize::from(first.is_some()), started_at);
        Ok(first)
    }

    pub fn first_as<R, F>(&self, spec: &QuerySpec<E>, projector: F) -> RepoResult<Option<R>>
    where
        F: FnOnce(E) -> R,
    {
        let first = self.store.with(|store| {
            let snapshot = store.fetch(&spec.entity_sets())?;
            Ok(self.ordered(store.model(), spec, &snapshot)?.into_iter().next())
        })?;
        Ok(first.map(projector))
    }

    pub async fn first_as_async<R, F>(
        &self,
        spec: &QuerySpec<E>,
        projector: F,
        cancel: &CancellationToken,
    ) -> RepoResult<Option<R>>
    where
        F: FnOnce(E) -> R,
    {
        let mut guard = self.store.lock()?;
        let store = guard.store()?;
        let snapshot = store.fetch_async(&spec.entity_sets(), cancel).await?;
        let first = self.ordered(store.model(), spec, &snapshot)?.into_iter().next();
        Ok(first.map(projector))
    }

    /// One page of the ordered query; `total_count` counts the filtered,
    /// unordered query.
    pub fn page(&self, spec: &QuerySpec<E>, request: PageRequest) -> RepoResult<PagedResult<E>> {
        let started_at = Instant::now();
        let page = self.store.with(|store| {
            let snapshot = store.fetch(&spec.entity_sets())?;
            let filtered = self.filtered(store.model(), spec, &snapshot)?;
            let page = page_filtered(filtered, spec.order(), request);
            self.track(store, spec, &page.items)?;
            Ok(page)
        })?;
        self.log_page(spec, &page, started_at);
        Ok(page)
    }

    pub async fn page_async(
        &self,
        spec: &QuerySpec<E>,
        request: PageRequest,
        cancel: &CancellationToken,
    ) -> RepoResult<PagedResult<E>> {
        let started_at = Instant::now();
        let mut guard = self.store.lock()?;
        let store = guard.store()?;
        let snapshot = store.fetch_async(&spec.entity_sets(), cancel).await?;
        let filtered = self.filtered(store.model(), spec, &snapshot)?;
        let page = page_filtered(filtered, spec.order(), request);
        self.track(store, spec, &page.items)?;
        drop(guard);
        self.log_page(spec, &page, started_at);
        Ok(page)
    }

    pub fn page_as<R, F>(
        &self,
        spec: &QuerySpec<E>,
        request: PageRequest,
        projector: F,
    ) -> RepoResult<PagedResult<R>>
    where
        F: FnMut(E) -> R,
    {
        let page = self.store.with(|store| {
            let snapshot = store.fetch(&spec.entity_sets())?;
            let filtered = self.filtered(store.model(), spec, &snapshot)?;
            Ok(page_filtered(filtered, spec.order(), request))
        })?;
        Ok(page.map(projector))
    }

    pub async fn page_as_async<R, F>(
        &self,
        spec: &QuerySpec<E>,
        request: PageRequest,
        projector: F,
        cancel: &CancellationToken,
    ) -> RepoResult<PagedResult<R>>
    where
        F: FnMut(E) -> R,
    {
        let mut guard = self.store.lock()?;
        let store = guard.store()?;
        let snapshot = store.fetch_async(&spec.entity_sets(), cancel).await?;
        let filtered = self.filtered(store.model(), spec, &snapshot)?;
        drop(guard);
        Ok(page_filtered(filtered, spec.order(), request).map(projector))
    }

    /// Tracked instance first, then the store; found rows are tracked.
    pub fn find(&self, key: impl Into<EntityKey>) -> RepoResult<Option<E>> {
        let key = key.into();
        self.store.with(|store| {
            if let Some(found) = tracked_instance::<E, S>(store, &key) {
                return found;
            }
            let row = store.find_row(E::NAME, &key)?;
            attach_found(store, key, row)
        })
    }

    pub async fn find_async(
        &self,
        key: impl Into<EntityKey>,
        cancel: &CancellationToken,
    ) -> RepoResult<Option<E>> {
        let key = key.into();
        let mut guard = self.store.lock()?;
        let store = guard.store()?;
        if let Some(found) = tracked_instance::<E, S>(store, &key) {
            return found;
        }
        let row = store.find_row_async(E::NAME, &key, cancel).await?;
        let found = attach_found(store, key, row)?;
        drop(guard);
        Ok(found)
    }

    pub fn count(&self, predicate: Option<&Predicate<E>>) -> RepoResult<usize> {
        self.aggregate("count", predicate, |items| items.len())
    }

    pub async fn count_async(
        &self,
        predicate: Option<&Predicate<E>>,
        cancel: &CancellationToken,
    ) -> RepoResult<usize> {
        self.aggregate_async("count", predicate, cancel, |items| items.len())
            .await
    }

    pub fn long_count(&self, predicate: Option<&Predicate<E>>) -> RepoResult<u64> {
        self.aggregate("long_count", predicate, |items| items.len() as u64)
    }

    pub async fn long_count_async(
        &self,
        predicate: Option<&Predicate<E>>,
        cancel: &CancellationToken,
    ) -> RepoResult<u64> {
        self.aggregate_async("long_count", predicate, cancel, |items| {
            items.len() as u64
        })
        .await
    }

    pub fn exists(&self, predicate: Option<&Predicate<E>>) -> RepoResult<bool> {
        self.aggregate("exists", predicate, |items| !items.is_empty())
    }

    pub async fn exists_async(
        &self,
        predicate: Option<&Predicate<E>>,
        cancel: &CancellationToken,
    ) -> RepoResult<bool> {
        self.aggregate_async("exists", predicate, cancel, |items| !items.is_empty())
            .await
    }

    pub fn min<K, F>(&self, predicate: Option<&Predicate<E>>, selector: F) -> RepoResult<Option<K>>
    where
        K: Ord,
        F: Fn(&E) -> K,
    {
        self.aggregate("min", predicate, |items| items.iter().map(selector).min())
    }

    pub async fn min_async<K, F>(
        &self,
        predicate: Option<&Predicate<E>>,
        selector: F,
        cancel: &CancellationToken,
    ) -> RepoResult<Option<K>>
    where
        K: Ord,
        F: Fn(&E) -> K,
    {
        self.aggregate_async("min", predicate, cancel, |items| {
            items.iter().map(selector).min()
        })
        .await
    }

    pub fn max<K, F>(&self, predicate: Option<&Predicate<E>>, selector: F) -> RepoResult<Option<K>>
    where
        K: Ord,
        F: Fn(&E) -> K,
    {
        self.aggregate("max", predicate, |items| items.iter().map(selector).max())
    }

    pub async fn max_async<K, F>(
        &self,
        predicate: Option<&Predicate<E>>,
        selector: F,
        cancel: &CancellationToken,
    ) -> RepoResult<Option<K>>
    where
        K: Ord,
        F: Fn(&E) -> K,
    {
        self.aggregate_async("max", predicate, cancel, |items| {
            items.iter().map(selector).max()
        })
        .await
    }

    /// Sum of `selector`; `0.0` for an empty query.
    pub fn sum<F>(&self, predicate: Option<&Predicate<E>>, selector: F) -> RepoResult<f64>
    where
        F: Fn(&E) -> f64,
    {
        self.aggregate("sum", predicate, |items| items.iter().map(selector).sum())
    }

    pub async fn sum_async<F>(
        &self,
        predicate: Option<&Predicate<E>>,
        selector: F,
        cancel: &CancellationToken,
    ) -> RepoResult<f64>
    where
        F: Fn(&E) -> f64,
    {
        self.aggregate_async("sum", predicate, cancel, |items| {
            items.iter().map(selector).sum()
        })
        .await
    }

    /// Mean of `selector`; `None` for an empty query.
    pub fn average<F>(&self, predicate: Option<&Predicate<E>>, selector: F) -> RepoResult<Option<f64>>
    where
        F: Fn(&E) -> f64,
    {
        self.aggregate("average", predicate, |items| mean(&items, selector))
    }

    pub async fn average_async<F>(
        &self,
        predicate: Option<&Predicate<E>>,
        selector: F,
        cancel: &CancellationToken,
    ) -> RepoResult<Option<f64>>
    where
        F: Fn(&E) -> f64,
    {
        self.aggregate_async("average", predicate, cancel, |items| {
            mean(&items, selector)
        })
        .await
    }

    /// Runs a backend-native query and decodes its rows as `E`.
    ///
    /// No composition stage applies; results are untracked.
    pub fn from_raw(&self, command: &str, params: &[KeyValue]) -> RepoResult<Vec<E>> {
        let rows = self.store.with(|store| Ok(store.query_raw(command, params)?))?;
        let items = rows
            .into_iter()
            .map(decode_row::<E>)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            "event=repo_query module=repo status=ok entity={} op=from_raw rows={}",
            E::NAME,
            items.len()
        );
        Ok(items)
    }

    pub fn insert(&self, entity: &E) -> RepoResult<()> {
        self.insert_many(std::iter::once(entity)).map(|_| ())
    }

    /// Validates and encodes every entity before tracking any of them.
    pub fn insert_many<'a, I>(&self, entities: I) -> RepoResult<usize>
    where
        I: IntoIterator<Item = &'a E>,
    {
        let staged = self.prepare_inserts(entities)?;
        self.store
            .with(|store| track_inserts::<E, S>(store, staged))
    }

    pub async fn insert_async(&self, entity: &E, cancel: &CancellationToken) -> RepoResult<()> {
        self.insert_many_async(std::iter::once(entity), cancel)
            .await
            .map(|_| ())
    }

    /// Staging makes no store call, so the token is never consulted here;
    /// cancellation takes effect at commit.
    pub async fn insert_many_async<'a, I>(
        &self,
        entities: I,
        _cancel: &CancellationToken,
    ) -> RepoResult<usize>
    where
        I: IntoIterator<Item = &'a E>,
    {
        let staged = self.prepare_inserts(entities)?;
        let mut guard = self.store.lock()?;
        let store = guard.store()?;
        let inserted = track_inserts::<E, S>(store, staged)?;
        drop(guard);
        Ok(inserted)
    }

    pub fn update(&self, entity: &E) -> RepoResult<()> {
        self.update_many(std::iter::once(entity)).map(|_| ())
    }

    pub fn update_many<'a, I>(&self, entities: I) -> RepoResult<usize>
    where
        I: IntoIterator<Item = &'a E>,
    {
        let mut staged = Vec::new();
        for entity in entities {
            if let Some(hooks) = &self.hooks {
                hooks
                    .before_update(entity)
                    .map_err(|reason| self.rejected("update", reason))?;
            }
            staged.push((entity.key(), encode_row(entity)?));
        }
        self.store.with(|store| {
            let count = staged.len();
            for (key, row) in staged {
                store.tracker_mut().update(E::NAME, key, row);
            }
            Ok(count)
        })
    }

    pub fn delete(&self, entity: &E) -> RepoResult<()> {
        self.delete_many(std::iter::once(entity)).map(|_| ())
    }

    pub fn delete_many<'a, I>(&self, entities: I) -> RepoResult<usize>
    where
        I: IntoIterator<Item = &'a E>,
    {
        let staged = entities
            .into_iter()
            .map(|entity| Ok((entity.key(), encode_row(entity)?)))
            .collect::<RepoResult<Vec<_>>>()?;
        self.store.with(|store| {
            let count = staged.len();
            for (key, row) in staged {
                store.tracker_mut().remove(E::NAME, key, row);
            }
            Ok(count)
        })
    }

    /// Marks the row with `key` for deletion.
    ///
    /// With a key stub registered, no read happens and a missing row fails
    /// at commit. Without one (or without store metadata) the row is read
    /// first and an absent row is a silent no-op.
    pub fn delete_by_key(&self, key: impl Into<EntityKey>) -> RepoResult<()> {
        let key = key.into();
        let path = self.store.with(|store| match plan_delete::<E>(store.model(), &key)? {
            DeletePlan::Stub(stub) => stub_delete(store, key.clone(), &stub),
            DeletePlan::Fetch => {
                let row = match tracked_row::<E, S>(store, &key) {
                    Some(row) => Some(row),
                    None => store.find_row(E::NAME, &key)?,
                };
                Ok(fetched_delete::<E, S>(store, key.clone(), row))
            }
        })?;
        debug!(
            "event=repo_delete_by_key module=repo status=ok entity={} key={} path={}",
            E::NAME,
            key,
            path
        );
        Ok(())
    }

    pub async fn delete_by_key_async(
        &self,
        key: impl Into<EntityKey>,
        cancel: &CancellationToken,
    ) -> RepoResult<()> {
        let key = key.into();
        let mut guard = self.store.lock()?;
        let store = guard.store()?;
        let path = match plan_delete::<E>(store.model(), &key)? {
            DeletePlan::Stub(stub) => stub_delete(store, key.clone(), &stub)?,
            DeletePlan::Fetch => {
                let row = match tracked_row::<E, S>(store, &key) {
                    Some(row) => Some(row),
                    None => store.find_row_async(E::NAME, &key, cancel).await?,
                };
                fetched_delete::<E, S>(store, key.clone(), row)
            }
        };
        drop(guard);
        debug!(
            "event=repo_delete_by_key module=repo status=ok entity={} key={} path={}",
            E::NAME,
            key,
            path
        );
        Ok(())
    }

    /// Forces the tracked state of `entity`.
    pub fn set_state(&self, entity: &E, state: EntityState) -> RepoResult<()> {
        let row = encode_row(entity)?;
        self.store.with(|store| {
            store
                .tracker_mut()
                .set_state(E::NAME, entity.key(), row, state);
            Ok(())
        })
    }

    pub fn state_of(&self, entity: &E) -> RepoResult<EntityState> {
        self.store
            .with(|store| Ok(store.tracker().state(E::NAME, &entity.key())))
    }

    fn scope(&self) -> Option<Predicate<E>> {
        self.hooks.as_ref().and_then(|hooks| hooks.scope())
    }

    fn filtered(
        &self,
        model: Option<&Model>,
        spec: &QuerySpec<E>,
        snapshot: &Snapshot,
    ) -> RepoResult<Filtered<E>> {
        let scope = self.scope();
        Ok(compose(spec, scope.as_ref(), snapshot, model)?)
    }

    fn ordered(
        &self,
        model: Option<&Model>,
        spec: &QuerySpec<E>,
        snapshot: &Snapshot,
    ) -> RepoResult<Vec<E>> {
        Ok(self
            .filtered(model, spec, snapshot)?
            .into_ordered(spec.order()))
    }

    fn ordered_tracked(
        &self,
        store: &mut S,
        spec: &QuerySpec<E>,
        snapshot: &Snapshot,
    ) -> RepoResult<Vec<E>> {
        let items = self.ordered(store.model(), spec, snapshot)?;
        self.track(store, spec, &items)?;
        Ok(items)
    }

    /// Attaches results of a tracked query; already-tracked keys keep
    /// their tracked state.
    fn track(&self, store: &mut S, spec: &QuerySpec<E>, items: &[E]) -> RepoResult<()> {
        if spec.tracking() == Tracking::Disabled {
            return Ok(());
        }
        let tracker = store.tracker_mut();
        for item in items {
            tracker.attach(E::NAME, item.key(), encode_row(item)?);
        }
        Ok(())
    }

    fn aggregate<R, F>(&self, op: &str, predicate: Option<&Predicate<E>>, reduce: F) -> RepoResult<R>
    where
        F: FnOnce(Vec<E>) -> R,
    {
        let started_at = Instant::now();
        let spec = aggregate_spec(predicate);
        let items = self.store.with(|store| {
            let snapshot = store.fetch(&[E::NAME])?;
            Ok(self.filtered(store.model(), &spec, &snapshot)?.into_unordered())
        })?;
        self.log_read(op, &spec.plan_label(), items.len(), started_at);
        Ok(reduce(items))
    }

    async fn aggregate_async<R, F>(
        &self,
        op: &str,
        predicate: Option<&Predicate<E>>,
        cancel: &CancellationToken,
        reduce: F,
    ) -> RepoResult<R>
    where
        F: FnOnce(Vec<E>) -> R,
    {
        let started_at = Instant::now();
        let spec = aggregate_spec(predicate);
        let mut guard = self.store.lock()?;
        let store = guard.store()?;
        let snapshot = store.fetch_async(&[E::NAME], cancel).await?;
        let items = self.filtered(store.model(), &spec, &snapshot)?.into_unordered();
        drop(guard);
        self.log_read(op, &spec.plan_label(), items.len(), started_at);
        Ok(reduce(items))
    }

    fn prepare_inserts<'a, I>(&self, entities: I) -> RepoResult<Vec<(EntityKey, Row)>>
    where
        I: IntoIterator<Item = &'a E>,
    {
        let mut staged = Vec::new();
        for entity in entities {
            if let Some(hooks) = &self.hooks {
                hooks
                    .before_insert(entity)
                    .map_err(|reason| self.rejected("insert", reason))?;
            }
            staged.push((entity.key(), encode_row(entity)?));
        }
        Ok(staged)
    }

    fn rejected(&self, op: &str, reason: String) -> RepoError {
        warn!(
            "event=repo_reject module=repo status=rejected entity={} repository={} op={} reason={}",
            E::NAME,
            self.kind(),
            op,
            reason
        );
        RepoError::Rejected(reason)
    }

    fn log_read(&self, op: &str, plan: &str, rows: usize, started_at: Instant) {
        debug!(
            "event=repo_query module=repo status=ok entity={} repository={} op={} plan={} rows={} duration_ms={}",
            E::NAME,
            self.kind(),
            op,
            plan,
            rows,
            started_at.elapsed().as_millis()
        );
    }

    fn log_page(&self, spec: &QuerySpec<E>, page: &PagedResult<E>, started_at: Instant) {
        debug!(
            "event=repo_page module=repo status=ok entity={} plan={} page_index={} page_size={} total_count={} duration_ms={}",
            E::NAME,
            spec.plan_label(),
            page.page_index,
            page.page_size,
            page.total_count,
            started_at.elapsed().as_millis()
        );
    }
}

fn projected_plan<E: Entity>(spec: &QuerySpec<E>) -> String {
    format!("{}>{}", spec.plan_label(), Stage::Project)
}

fn aggregate_spec<E: Entity>(predicate: Option<&Predicate<E>>) -> QuerySpec<E> {
    match predicate {
        Some(predicate) => QuerySpec::new().with_predicate(predicate.clone()),
        None => QuerySpec::new(),
    }
}

fn mean<E, F>(items: &[E], selector: F) -> Option<f64>
where
    F: Fn(&E) -> f64,
{
    if items.is_empty() {
        return None;
    }
    let total: f64 = items.iter().map(selector).sum();
    Some(total / items.len() as f64)
}

fn track_inserts<E: Entity, S: Store>(
    store: &mut S,
    staged: Vec<(EntityKey, Row)>,
) -> RepoResult<usize> {
    let count = staged.len();
    let tracker = store.tracker_mut();
    for (key, row) in staged {
        tracker.add(E::NAME, key, row)?;
    }
    Ok(count)
}

/// Tracked instance for `key`: `Some(Ok(None))` when tracked as deleted.
fn tracked_instance<E: Entity, S: Store>(
    store: &S,
    key: &EntityKey,
) -> Option<RepoResult<Option<E>>> {
    let entry = store.tracker().get(E::NAME, key)?;
    if entry.state == EntityState::Deleted {
        return Some(Ok(None));
    }
    Some(decode_row::<E>(entry.current.clone()).map(Some).map_err(RepoError::from))
}

fn attach_found<E: Entity, S: Store>(
    store: &mut S,
    key: EntityKey,
    row: Option<Row>,
) -> RepoResult<Option<E>> {
    let Some(row) = row else {
        return Ok(None);
    };
    let entity = decode_row::<E>(row.clone())?;
    store.tracker_mut().attach(E::NAME, key, row);
    Ok(Some(entity))
}

fn tracked_row<E: Entity, S: Store>(store: &S, key: &EntityKey) -> Option<Row> {
    store
        .tracker()
        .get(E::NAME, key)
        .map(|entry| entry.current.clone())
}

fn plan_delete<E: Entity>(model: Option<&Model>, key: &EntityKey) -> RepoResult<DeletePlan<E>> {
    let Some(model) = model else {
        return Ok(DeletePlan::Fetch);
    };
    let entity_type = model
        .entity_type::<E>()
        .ok_or(ConfigError::MissingEntityType(E::NAME))?;
    match entity_type.key_columns() {
        [] => return Err(ConfigError::MissingPrimaryKey(E::NAME).into()),
        [_] => {}
        columns => {
            return Err(ConfigError::CompositeKey {
                entity: E::NAME,
                columns: columns.to_vec(),
            }
            .into())
        }
    }
    let Some(factory) = entity_type.stub_factory() else {
        return Ok(DeletePlan::Fetch);
    };
    let mismatch = || ConfigError::KeyMismatch {
        entity: E::NAME,
        key: key.to_string(),
    };
    let value = key.as_single().ok_or_else(mismatch)?;
    let stub = factory(value).ok_or_else(mismatch)?;
    Ok(DeletePlan::Stub(stub))
}

fn stub_delete<E: Entity, S: Store>(
    store: &mut S,
    key: EntityKey,
    stub: &E,
) -> RepoResult<&'static str> {
    let row = encode_row(stub)?;
    store.tracker_mut().remove(E::NAME, key, row);
    Ok("stub")
}

fn fetched_delete<E: Entity, S: Store>(
    store: &mut S,
    key: EntityKey,
    row: Option<Row>,
) -> &'static str {
    match row {
        Some(row) => {
            store.tracker_mut().remove(E::NAME, key, row);
            "fetch"
        }
        None => "absent",
    }
}
