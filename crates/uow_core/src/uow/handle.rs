//! Shared ownership of the one store a unit of work owns.
//!
//! # Invariants
//! - Once released, every access fails with `RepoError::Disposed`, even
//!   while an earlier guard is still alive.
//! - The store is closed exactly once: by `release` when it is free, or by
//!   the last live guard when it is not.
//! - Access never waits: a store held by an in-flight operation yields
//!   `StoreError::Busy`, for sync and async callers alike.

use crate::repo::{RepoError, RepoResult};
use crate::store::{Store, StoreError};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Cloneable handle to a unit of work's store.
pub struct StoreHandle<S> {
    slot: Arc<Mutex<Option<S>>>,
    released: Arc<AtomicBool>,
}

impl<S> Clone for StoreHandle<S> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            released: Arc::clone(&self.released),
        }
    }
}

impl<S: Store> StoreHandle<S> {
    pub(crate) fn new(store: S) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(store))),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs `op` against the store.
    pub fn with<R, F>(&self, op: F) -> RepoResult<R>
    where
        F: FnOnce(&mut S) -> RepoResult<R>,
    {
        let mut guard = self.lock()?;
        let store = guard.store()?;
        op(store)
    }

    /// Exclusive access for the duration of one operation.
    pub fn lock(&self) -> RepoResult<StoreGuard<'_, S>> {
        if self.is_released() {
            return Err(RepoError::Disposed);
        }
        let slot = self.slot.try_lock().map_err(|_| StoreError::Busy)?;
        Ok(StoreGuard {
            slot,
            released: &self.released,
        })
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Marks the handle released and takes the store out.
    ///
    /// Returns `Ok(None)` when already released, and `Err(Busy)` when a live
    /// guard holds the store; that guard closes it on drop.
    pub(crate) fn release(&self) -> Result<Option<S>, StoreError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(None);
        }
        let mut slot = self.slot.try_lock().map_err(|_| StoreError::Busy)?;
        Ok(slot.take())
    }

    /// Whether `other` points at the same store.
    pub fn same_store(&self, other: &StoreHandle<S>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

/// Exclusive access obtained by [`StoreHandle::lock`].
pub struct StoreGuard<'a, S: Store> {
    slot: MutexGuard<'a, Option<S>>,
    released: &'a AtomicBool,
}

impl<S: Store> StoreGuard<'_, S> {
    pub fn store(&mut self) -> RepoResult<&mut S> {
        if self.released.load(Ordering::Acquire) {
            return Err(RepoError::Disposed);
        }
        self.slot.as_mut().ok_or(RepoError::Disposed)
    }
}

impl<S: Store> Drop for StoreGuard<'_, S> {
    fn drop(&mut self) {
        if !self.released.load(Ordering::Acquire) {
            return;
        }
        let Some(mut store) = self.slot.take() else {
            return;
        };
        if let Err(err) = store.close() {
            warn!(
                "event=store_release module=uow status=error store={} error={}",
                store.label(),
                err
            );
            return;
        }
        info!(
            "event=store_release module=uow status=ok store={} path=deferred",
            store.label()
        );
    }
}
