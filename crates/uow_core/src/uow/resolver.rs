//! Factories for custom repositories, supplied by the host.
//!
//! # Invariants
//! - One factory per entity type.
//! - Resolved repositories are never memoized; every resolution builds a
//!   fresh instance over the caller's store.

use crate::config::ConfigError;
use crate::model::entity::Entity;
use crate::repo::Repository;
use crate::store::Store;
use crate::uow::handle::StoreHandle;
use std::any::{Any, TypeId};
use std::collections::HashMap;

type RepositoryFactory<E, S> = Box<dyn Fn(StoreHandle<S>) -> Repository<E, S> + Send + Sync>;

struct Registration {
    entity: &'static str,
    factory: Box<dyn Any + Send + Sync>,
}

pub struct RepositoryResolver<S> {
    factories: HashMap<TypeId, Registration>,
    _store: std::marker::PhantomData<fn() -> S>,
}

impl<S: Store> Default for RepositoryResolver<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store> RepositoryResolver<S> {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            _store: std::marker::PhantomData,
        }
    }

    /// Registers the custom repository factory for `E`.
    pub fn register<E, F>(&mut self, factory: F) -> Result<(), ConfigError>
    where
        E: Entity,
        F: Fn(StoreHandle<S>) -> Repository<E, S> + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<E>();
        if self.factories.contains_key(&type_id) {
            return Err(ConfigError::DuplicateEntityType(E::NAME));
        }
        let factory: RepositoryFactory<E, S> = Box::new(factory);
        self.factories.insert(
            type_id,
            Registration {
                entity: E::NAME,
                factory: Box::new(factory),
            },
        );
        Ok(())
    }

    /// Builds the custom repository for `E`, if one is registered.
    pub fn resolve<E: Entity>(&self, store: &StoreHandle<S>) -> Option<Repository<E, S>> {
        let registration = self.factories.get(&TypeId::of::<E>())?;
        let factory = registration
            .factory
            .downcast_ref::<RepositoryFactory<E, S>>()?;
        Some(factory(store.clone()))
    }

    pub fn contains<E: Entity>(&self) -> bool {
        self.factories.contains_key(&TypeId::of::<E>())
    }

    /// Entity set names with a registered factory, sorted.
    pub fn entities(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.values().map(|reg| reg.entity).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
