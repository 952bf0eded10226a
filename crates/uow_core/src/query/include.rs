//! Eager-loading of related entities.
//!
//! # Responsibility
//! - Describe typed parent/child relations and arbitrarily deep chains of
//!   them (`Country -> City -> Town`).
//! - Populate navigation fields from the same snapshot the root query reads.
//!
//! # Invariants
//! - Children are matched against parents in store order.
//! - Nested relations are loaded before children are assigned, so every
//!   parent receives fully populated children.
//! - Child sets honour their own default filters unless the query bypasses
//!   them.

use crate::model::entity::Entity;
use crate::query::compose::Materializer;
use crate::store::StoreResult;
use std::sync::Arc;

pub(crate) trait IncludeNode<P>: Send + Sync {
    fn name(&self) -> &'static str;
    fn collect_sets(&self, sets: &mut Vec<&'static str>);
    fn collect_paths(&self, prefix: &str, paths: &mut Vec<String>);
    fn load(&self, source: &Materializer<'_>, parents: &mut [P]) -> StoreResult<()>;
}

type Matcher<P, C> = Arc<dyn Fn(&P, &C) -> bool + Send + Sync>;
type Assigner<P, C> = Arc<dyn Fn(&mut P, Vec<C>) + Send + Sync>;

/// Navigation from parent type `P` to child type `C`.
pub struct Relation<P, C> {
    name: &'static str,
    matches: Matcher<P, C>,
    assign: Assigner<P, C>,
    nested: Include<C>,
}

impl<P: Entity, C: Entity> Relation<P, C> {
    /// Collection navigation: every matching child is assigned.
    pub fn many<M, A>(name: &'static str, matches: M, assign: A) -> Self
    where
        M: Fn(&P, &C) -> bool + Send + Sync + 'static,
        A: Fn(&mut P, Vec<C>) + Send + Sync + 'static,
    {
        Self {
            name,
            matches: Arc::new(matches),
            assign: Arc::new(assign),
            nested: Include::new(),
        }
    }

    /// Reference navigation: the first matching child, if any.
    pub fn one<M, A>(name: &'static str, matches: M, assign: A) -> Self
    where
        M: Fn(&P, &C) -> bool + Send + Sync + 'static,
        A: Fn(&mut P, Option<C>) + Send + Sync + 'static,
    {
        Self::many(name, matches, move |parent: &mut P, children: Vec<C>| {
            assign(parent, children.into_iter().next())
        })
    }

    /// Continues the chain one level deeper.
    pub fn then<G: Entity>(mut self, relation: Relation<C, G>) -> Self {
        self.nested = self.nested.with(relation);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<P: Entity, C: Entity> IncludeNode<P> for Relation<P, C> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn collect_sets(&self, sets: &mut Vec<&'static str>) {
        if !sets.contains(&C::NAME) {
            sets.push(C::NAME);
        }
        self.nested.collect_sets(sets);
    }

    fn collect_paths(&self, prefix: &str, paths: &mut Vec<String>) {
        let path = if prefix.is_empty() {
            self.name.to_string()
        } else {
            format!("{prefix}.{}", self.name)
        };
        if self.nested.is_empty() {
            paths.push(path);
        } else {
            for node in &self.nested.nodes {
                node.collect_paths(&path, paths);
            }
        }
    }

    fn load(&self, source: &Materializer<'_>, parents: &mut [P]) -> StoreResult<()> {
        let mut children = source.related::<C>()?;
        self.nested.load(source, &mut children)?;

        for parent in parents.iter_mut() {
            let view: &P = parent;
            let related: Vec<C> = children
                .iter()
                .filter(|child| (self.matches)(view, *child))
                .cloned()
                .collect();
            (self.assign)(parent, related);
        }
        Ok(())
    }
}

/// Set of relations to eager-load for root type `E`.
pub struct Include<E> {
    nodes: Vec<Arc<dyn IncludeNode<E>>>,
}

impl<E> Clone for Include<E> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
        }
    }
}

impl<E: Entity> Default for Include<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Include<E> {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn with<C: Entity>(mut self, relation: Relation<E, C>) -> Self {
        self.nodes.push(Arc::new(relation));
        self
    }

    pub fn merge(mut self, other: Include<E>) -> Self {
        self.nodes.extend(other.nodes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Dotted paths of every leaf relation, e.g. `cities.towns`.
    pub fn paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for node in &self.nodes {
            node.collect_paths("", &mut paths);
        }
        paths.dedup();
        paths
    }

    pub(crate) fn collect_sets(&self, sets: &mut Vec<&'static str>) {
        for node in &self.nodes {
            node.collect_sets(sets);
        }
    }

    pub(crate) fn load(&self, source: &Materializer<'_>, items: &mut [E]) -> StoreResult<()> {
        for node in &self.nodes {
            log::trace!(
                "event=include_load module=query entity={} relation={}",
                E::NAME,
                node.name()
            );
            node.load(source, items)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Include, Relation};
    use crate::model::entity::{Entity, EntityKey};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Country {
        id: i64,
        #[serde(skip)]
        cities: Vec<City>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct City {
        id: i64,
        country_id: i64,
        #[serde(skip)]
        towns: Vec<Town>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Town {
        id: i64,
        city_id: i64,
    }

    impl Entity for Country {
        const NAME: &'static str = "countries";
        fn key(&self) -> EntityKey {
            EntityKey::from(self.id)
        }
    }

    impl Entity for City {
        const NAME: &'static str = "cities";
        fn key(&self) -> EntityKey {
            EntityKey::from(self.id)
        }
    }

    impl Entity for Town {
        const NAME: &'static str = "towns";
        fn key(&self) -> EntityKey {
            EntityKey::from(self.id)
        }
    }

    fn cities() -> Relation<Country, City> {
        Relation::many(
            "cities",
            |country: &Country, city: &City| city.country_id == country.id,
            |country: &mut Country, cities| country.cities = cities,
        )
    }

    fn towns() -> Relation<City, Town> {
        Relation::many(
            "towns",
            |city: &City, town: &Town| town.city_id == city.id,
            |city: &mut City, towns| city.towns = towns,
        )
    }

    #[test]
    fn nested_chain_reports_dotted_path_and_all_sets() {
        let include = Include::<Country>::new().with(cities().then(towns()));
        assert_eq!(include.paths(), vec!["cities.towns".to_string()]);

        let mut sets = vec![Country::NAME];
        include.collect_sets(&mut sets);
        assert_eq!(sets, vec!["countries", "cities", "towns"]);
    }

    #[test]
    fn merge_keeps_both_relations() {
        let include = Include::<Country>::new()
            .with(cities())
            .merge(Include::new().with(cities().then(towns())));
        assert_eq!(include.len(), 2);
        assert!(!include.is_empty());
    }
}
