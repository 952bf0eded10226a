//! Memoized generic repositories of one unit of work.

use crate::model::entity::Entity;
use crate::repo::Repository;
use crate::store::Store;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

struct Slot {
    entity: &'static str,
    repository: Arc<dyn Any + Send + Sync>,
}

/// At most one generic repository per entity type.
#[derive(Default)]
pub struct RepositoryRegistry {
    slots: HashMap<TypeId, Slot>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized repository for `E`, creating it on first use.
    pub fn get_or_create<E, S, F>(&mut self, create: F) -> Arc<Repository<E, S>>
    where
        E: Entity,
        S: Store,
        F: FnOnce() -> Repository<E, S>,
    {
        let type_id = TypeId::of::<Repository<E, S>>();
        if let Some(existing) = self
            .slots
            .get(&type_id)
            .and_then(|slot| Arc::clone(&slot.repository).downcast::<Repository<E, S>>().ok())
        {
            return existing;
        }

        let repository = Arc::new(create());
        self.slots.insert(
            type_id,
            Slot {
                entity: E::NAME,
                repository: repository.clone(),
            },
        );
        repository
    }

    pub fn contains<E: Entity, S: Store>(&self) -> bool {
        self.slots.contains_key(&TypeId::of::<Repository<E, S>>())
    }

    /// Entity set names with a memoized repository, sorted.
    pub fn entities(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.slots.values().map(|slot| slot.entity).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
