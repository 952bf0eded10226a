//! Extension points for custom repositories.

use crate::query::spec::Predicate;

/// Behaviour a custom repository layers over the generic one.
///
/// Every method has a pass-through default, so implementors override only
/// what they need.
pub trait RepositoryHooks<E>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str {
        "custom"
    }

    /// Extra predicate applied to every composed query of this repository.
    fn scope(&self) -> Option<Predicate<E>> {
        None
    }

    fn before_insert(&self, _entity: &E) -> Result<(), String> {
        Ok(())
    }

    fn before_update(&self, _entity: &E) -> Result<(), String> {
        Ok(())
    }
}
