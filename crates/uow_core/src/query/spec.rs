//! Immutable bundle of optional query fragments.
//!
//! # Invariants
//! - Fragments are applied in one fixed order regardless of the order in
//!   which they were supplied: tracking, includes, predicate, filter
//!   bypass, ordering.
//! - Builder methods consume and return the `QuerySpec`; a built one is
//!   never mutated through a shared reference.

use crate::model::entity::Entity;
use crate::query::include::{Include, Relation};
use crate::query::order::OrderBy;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Boolean test over one entity.
pub struct Predicate<E>(Arc<dyn Fn(&E) -> bool + Send + Sync>);

impl<E> Predicate<E> {
    pub fn new<F>(test: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(test))
    }

    pub fn test(&self, entity: &E) -> bool {
        (self.0)(entity)
    }
}

impl<E: 'static> Predicate<E> {
    /// Conjunction of both predicates.
    pub fn and(self, other: Predicate<E>) -> Self {
        Self::new(move |entity: &E| self.test(entity) && other.test(entity))
    }
}

impl<E> Clone for Predicate<E> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// Whether materialized entities are attached to the change tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tracking {
    /// Results are read-only snapshots.
    #[default]
    Disabled,
    /// Results are attached as `Unchanged`.
    Enabled,
}

/// One composition stage, listed in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    NoTracking,
    Include,
    Filter,
    IgnoreQueryFilters,
    Order,
    Project,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoTracking => "no_tracking",
            Self::Include => "include",
            Self::Filter => "filter",
            Self::IgnoreQueryFilters => "ignore_query_filters",
            Self::Order => "order",
            Self::Project => "project",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional query fragments for one entity type.
///
/// ```rust,ignore
/// let spec = QuerySpec::new()
///     .order_by(OrderBy::asc(|c: &Customer| c.age))
///     .filter(|c: &Customer| c.age > 1);
/// ```
pub struct QuerySpec<E> {
    predicate: Option<Predicate<E>>,
    order: Option<OrderBy<E>>,
    include: Option<Include<E>>,
    tracking: Tracking,
    ignore_query_filters: bool,
}

impl<E> Clone for QuerySpec<E> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            order: self.order.clone(),
            include: self.include.clone(),
            tracking: self.tracking,
            ignore_query_filters: self.ignore_query_filters,
        }
    }
}

impl<E: Entity> Default for QuerySpec<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> QuerySpec<E> {
    /// Empty spec: every element, untracked, default filters applied.
    pub fn new() -> Self {
        Self {
            predicate: None,
            order: None,
            include: None,
            tracking: Tracking::Disabled,
            ignore_query_filters: false,
        }
    }

    /// Alias of `new` that reads better at call sites.
    pub fn all() -> Self {
        Self::new()
    }

    /// Narrows the query; repeated calls combine with logical AND.
    pub fn filter<F>(self, test: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.with_predicate(Predicate::new(test))
    }

    pub fn with_predicate(mut self, predicate: Predicate<E>) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Sets the ordering, replacing any previous one.
    pub fn order_by(mut self, order: OrderBy<E>) -> Self {
        self.order = Some(order);
        self
    }

    /// Adds one relation (with its nested `then` chain) to eager-load.
    pub fn include<C: Entity>(self, relation: Relation<E, C>) -> Self {
        self.include_all(Include::new().with(relation))
    }

    /// Merges a prepared include tree.
    pub fn include_all(mut self, include: Include<E>) -> Self {
        self.include = Some(match self.include.take() {
            Some(existing) => existing.merge(include),
            None => include,
        });
        self
    }

    /// Attaches results to the change tracker.
    pub fn tracked(mut self) -> Self {
        self.tracking = Tracking::Enabled;
        self
    }

    pub fn untracked(mut self) -> Self {
        self.tracking = Tracking::Disabled;
        self
    }

    /// Bypasses store-level default filters for this query only.
    pub fn ignore_query_filters(mut self) -> Self {
        self.ignore_query_filters = true;
        self
    }

    pub fn predicate(&self) -> Option<&Predicate<E>> {
        self.predicate.as_ref()
    }

    pub fn order(&self) -> Option<&OrderBy<E>> {
        self.order.as_ref()
    }

    pub fn includes(&self) -> Option<&Include<E>> {
        self.include.as_ref()
    }

    pub fn tracking(&self) -> Tracking {
        self.tracking
    }

    pub fn ignores_query_filters(&self) -> bool {
        self.ignore_query_filters
    }

    /// Entity sets the query reads: the root set, then every included set.
    pub fn entity_sets(&self) -> Vec<&'static str> {
        let mut sets = vec![E::NAME];
        if let Some(include) = &self.include {
            include.collect_sets(&mut sets);
        }
        sets
    }

    /// Stages this spec contributes, in application order.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = Vec::with_capacity(5);
        if self.tracking == Tracking::Disabled {
            stages.push(Stage::NoTracking);
        }
        if self.include.as_ref().is_some_and(|include| !include.is_empty()) {
            stages.push(Stage::Include);
        }
        if self.predicate.is_some() {
            stages.push(Stage::Filter);
        }
        if self.ignore_query_filters {
            stages.push(Stage::IgnoreQueryFilters);
        }
        if self.order.is_some() {
            stages.push(Stage::Order);
        }
        stages
    }

    /// `>`-joined stage names for diagnostics.
    pub fn plan_label(&self) -> String {
        let stages = self.stages();
        if stages.is_empty() {
            return "scan".to_string();
        }
        stages
            .iter()
            .map(|stage| stage.as_str())
            .collect::<Vec<_>>()
            .join(">")
    }
}
