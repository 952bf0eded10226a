//! Declarative per-entity-type metadata.
//!
//! # Responsibility
//! - Describe primary-key columns, the key stub constructor used by
//!   delete-by-key, and the default query filter of each entity type.
//! - Collect those descriptions into one immutable `Model` at startup.
//!
//! # Invariants
//! - Entity set names and key column names are plain identifiers.
//! - One registration per entity set name.

use crate::config::ConfigError;
use crate::model::entity::{Entity, KeyValue};
use crate::query::spec::Predicate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Builds a transient instance carrying only the given key value.
pub type StubFactory<E> = Arc<dyn Fn(&KeyValue) -> Option<E> + Send + Sync>;

/// Metadata for one entity type.
pub struct EntityType<E: Entity> {
    key_columns: Vec<&'static str>,
    stub: Option<StubFactory<E>>,
    query_filter: Option<Predicate<E>>,
}

impl<E: Entity> EntityType<E> {
    pub fn new() -> Self {
        Self {
            key_columns: Vec::new(),
            stub: None,
            query_filter: None,
        }
    }

    /// Declares the primary-key columns in key order.
    pub fn primary_key(mut self, columns: impl IntoIterator<Item = &'static str>) -> Self {
        self.key_columns = columns.into_iter().collect();
        self
    }

    /// Registers the key stub constructor used by delete-by-key.
    ///
    /// The factory returns `None` when the key value has the wrong shape for
    /// this entity type.
    pub fn stub<F>(mut self, factory: F) -> Self
    where
        F: Fn(&KeyValue) -> Option<E> + Send + Sync + 'static,
    {
        self.stub = Some(Arc::new(factory));
        self
    }

    /// Registers a store-level default filter (for example soft delete).
    ///
    /// Applied to every composed query unless the query bypasses filters.
    pub fn query_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.query_filter = Some(Predicate::new(filter));
        self
    }

    pub fn name(&self) -> &'static str {
        E::NAME
    }

    pub fn key_columns(&self) -> &[&'static str] {
        &self.key_columns
    }

    pub fn stub_factory(&self) -> Option<&StubFactory<E>> {
        self.stub.as_ref()
    }

    pub fn default_filter(&self) -> Option<&Predicate<E>> {
        self.query_filter.as_ref()
    }
}

impl<E: Entity> Default for EntityType<E> {
    fn default() -> Self {
        Self::new()
    }
}

struct Registration {
    name: &'static str,
    metadata: Arc<dyn Any + Send + Sync>,
}

/// Immutable registry of entity-type metadata.
#[derive(Clone, Default)]
pub struct Model {
    types: Arc<HashMap<TypeId, Registration>>,
}

impl Model {
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    /// Returns metadata registered for `E`, if any.
    pub fn entity_type<E: Entity>(&self) -> Option<&EntityType<E>> {
        self.types
            .get(&TypeId::of::<E>())
            .and_then(|registration| registration.metadata.downcast_ref::<EntityType<E>>())
    }

    /// Returns registered entity set names in sorted order.
    pub fn entity_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.types.values().map(|reg| reg.name).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("types", &self.entity_names())
            .finish()
    }
}

/// Collects `EntityType` registrations; the first invalid one fails `build`.
#[derive(Default)]
pub struct ModelBuilder {
    types: HashMap<TypeId, Registration>,
    error: Option<ConfigError>,
}

impl ModelBuilder {
    pub fn register<E: Entity>(mut self, entity_type: EntityType<E>) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Err(err) = self.validate(&entity_type) {
            self.error = Some(err);
            return self;
        }
        self.types.insert(
            TypeId::of::<E>(),
            Registration {
                name: E::NAME,
                metadata: Arc::new(entity_type),
            },
        );
        self
    }

    pub fn build(self) -> Result<Model, ConfigError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(Model {
                types: Arc::new(self.types),
            }),
        }
    }

    fn validate<E: Entity>(&self, entity_type: &EntityType<E>) -> Result<(), ConfigError> {
        if !is_identifier(E::NAME) {
            return Err(ConfigError::InvalidIdentifier(E::NAME.to_string()));
        }
        if let Some(column) = entity_type
            .key_columns()
            .iter()
            .find(|column| !is_identifier(column))
        {
            return Err(ConfigError::InvalidIdentifier((*column).to_string()));
        }
        if self.types.values().any(|reg| reg.name == E::NAME) {
            return Err(ConfigError::DuplicateEntityType(E::NAME));
        }
        Ok(())
    }
}

pub(crate) fn is_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}
