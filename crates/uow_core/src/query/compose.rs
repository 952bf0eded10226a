//! Fixed-order query composition over one store snapshot.
//!
//! # Responsibility
//! - Turn a snapshot plus a `QuerySpec` into the filtered element sequence.
//! - Keep counting (unordered) separate from ordering so paging can count
//!   first and slice second.
//!
//! # Invariants
//! - Stages run as: includes, predicate, repository scope, default filter
//!   (unless bypassed), ordering. Tracking is carried on the `QuerySpec` and
//!   applied when results are attached to a tracker.
//! - Composition is pure; it never touches the store or the tracker.

use crate::model::entity::Entity;
use crate::model::metadata::Model;
use crate::query::order::OrderBy;
use crate::query::spec::{Predicate, QuerySpec};
use crate::store::{Snapshot, StoreResult};

/// Read side of one snapshot, as seen by a single composed query.
pub(crate) struct Materializer<'a> {
    snapshot: &'a Snapshot,
    model: Option<&'a Model>,
    ignore_query_filters: bool,
}

impl<'a> Materializer<'a> {
    pub(crate) fn new(
        snapshot: &'a Snapshot,
        model: Option<&'a Model>,
        ignore_query_filters: bool,
    ) -> Self {
        Self {
            snapshot,
            model,
            ignore_query_filters,
        }
    }

    /// Every element of `E`'s set, in store order, unfiltered.
    pub(crate) fn decode<E: Entity>(&self) -> StoreResult<Vec<E>> {
        self.snapshot.decode::<E>()
    }

    pub(crate) fn default_filter<E: Entity>(&self) -> Option<&'a Predicate<E>> {
        if self.ignore_query_filters {
            return None;
        }
        self.model
            .and_then(|model| model.entity_type::<E>())
            .and_then(|entity_type| entity_type.default_filter())
    }

    /// Elements of an included set with its default filter applied.
    pub(crate) fn related<C: Entity>(&self) -> StoreResult<Vec<C>> {
        let mut children = self.decode::<C>()?;
        if let Some(filter) = self.default_filter::<C>() {
            children.retain(|child| filter.test(child));
        }
        Ok(children)
    }
}

/// Result of the filtering stages, not yet ordered.
pub(crate) struct Filtered<E> {
    items: Vec<E>,
}

impl<E: Entity> Filtered<E> {
    pub(crate) fn count(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn into_unordered(self) -> Vec<E> {
        self.items
    }

    pub(crate) fn into_ordered(self, order: Option<&OrderBy<E>>) -> Vec<E> {
        let mut items = self.items;
        if let Some(order) = order {
            order.sort(&mut items);
        }
        items
    }
}

/// Runs every filtering stage of `spec` against `snapshot`.
///
/// `scope` is the custom-repository predicate, if any; it narrows the query
/// exactly like the caller's predicate does.
pub(crate) fn compose<E: Entity>(
    spec: &QuerySpec<E>,
    scope: Option<&Predicate<E>>,
    snapshot: &Snapshot,
    model: Option<&Model>,
) -> StoreResult<Filtered<E>> {
    let source = Materializer::new(snapshot, model, spec.ignores_query_filters());
    let mut items = source.decode::<E>()?;

    if let Some(include) = spec.includes() {
        include.load(&source, &mut items)?;
    }
    if let Some(predicate) = spec.predicate() {
        items.retain(|item| predicate.test(item));
    }
    if let Some(scope) = scope {
        items.retain(|item| scope.test(item));
    }
    if let Some(filter) = source.default_filter::<E>() {
        items.retain(|item| filter.test(item));
    }

    Ok(Filtered { items })
}

#[cfg(test)]
mod tests {
    use super::compose;
    use crate::model::entity::{Entity, EntityKey};
    use crate::model::metadata::{EntityType, Model};
    use crate::query::include::Relation;
    use crate::query::order::OrderBy;
    use crate::query::spec::{Predicate, QuerySpec};
    use crate::store::Snapshot;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Note {
        id: i64,
        title: String,
        archived: bool,
        #[serde(skip)]
        links: Vec<Link>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Link {
        id: i64,
        note_id: i64,
        hidden: bool,
    }

    impl Entity for Note {
        const NAME: &'static str = "notes";
        fn key(&self) -> EntityKey {
            EntityKey::from(self.id)
        }
    }

    impl Entity for Link {
        const NAME: &'static str = "links";
        fn key(&self) -> EntityKey {
            EntityKey::from(self.id)
        }
    }

    fn snapshot() -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.insert(
            "notes",
            vec![
                json!({"id": 1, "title": "b", "archived": false}),
                json!({"id": 2, "title": "a", "archived": true}),
                json!({"id": 3, "title": "c", "archived": false}),
            ],
        );
        snapshot.insert(
            "links",
            vec![
                json!({"id": 10, "note_id": 1, "hidden": false}),
                json!({"id": 11, "note_id": 1, "hidden": true}),
                json!({"id": 12, "note_id": 3, "hidden": false}),
            ],
        );
        snapshot
    }

    fn model() -> Model {
        Model::builder()
            .register(
                EntityType::<Note>::new()
                    .primary_key(["id"])
                    .query_filter(|note: &Note| !note.archived),
            )
            .register(
                EntityType::<Link>::new()
                    .primary_key(["id"])
                    .query_filter(|link: &Link| !link.hidden),
            )
            .build()
            .unwrap()
    }

    fn links() -> Relation<Note, Link> {
        Relation::many(
            "links",
            |note: &Note, link: &Link| link.note_id == note.id,
            |note: &mut Note, links| note.links = links,
        )
    }

    #[test]
    fn default_filter_applies_unless_bypassed() {
        let snapshot = snapshot();
        let model = model();

        let filtered = compose(&QuerySpec::<Note>::new(), None, &snapshot, Some(&model)).unwrap();
        assert_eq!(filtered.count(), 2);

        let bypassed = compose(
            &QuerySpec::<Note>::new().ignore_query_filters(),
            None,
            &snapshot,
            Some(&model),
        )
        .unwrap();
        assert_eq!(bypassed.count(), 3);
    }

    #[test]
    fn predicate_may_read_included_navigations() {
        let snapshot = snapshot();
        let model = model();
        let spec = QuerySpec::<Note>::new()
            .filter(|note: &Note| !note.links.is_empty())
            .include(links());

        let notes = compose(&spec, None, &snapshot, Some(&model))
            .unwrap()
            .into_unordered();
        let ids: Vec<i64> = notes.iter().map(|note| note.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(notes[0].links.len(), 1, "hidden link filtered from include");
    }

    #[test]
    fn bypass_also_reaches_included_sets() {
        let snapshot = snapshot();
        let model = model();
        let spec = QuerySpec::<Note>::new()
            .include(links())
            .ignore_query_filters();

        let notes = compose(&spec, None, &snapshot, Some(&model))
            .unwrap()
            .into_unordered();
        assert_eq!(notes[0].links.len(), 2);
    }

    #[test]
    fn ordering_happens_after_filtering() {
        let snapshot = snapshot();
        let spec = QuerySpec::<Note>::new().order_by(OrderBy::asc(|note: &Note| note.title.clone()));

        let filtered = compose(&spec, None, &snapshot, Some(&model())).unwrap();
        let titles: Vec<String> = filtered
            .into_ordered(spec.order())
            .into_iter()
            .map(|note| note.title)
            .collect();
        assert_eq!(titles, vec!["b", "c"]);
    }

    #[test]
    fn scope_narrows_like_a_predicate() {
        let snapshot = snapshot();
        let scope = Predicate::new(|note: &Note| note.id != 3);
        let filtered = compose(&QuerySpec::<Note>::new(), Some(&scope), &snapshot, None).unwrap();
        assert_eq!(filtered.count(), 2, "no model means no default filter");
    }
}
