mod common;

use common::{committed_customers, memory_uow, model, seed_customers, Customer, OrderLine};
use std::sync::Arc;
use uow_core::{
    CancellationToken, ConfigError, EntityState, MemoryStore, Predicate, QuerySpec, RepoError,
    Repository, RepositoryHooks, RepositoryResolver, StoreError, UnitOfWork,
};

struct AdultCustomers;

impl RepositoryHooks<Customer> for AdultCustomers {
    fn name(&self) -> &'static str {
        "adult_customers"
    }

    fn scope(&self) -> Option<Predicate<Customer>> {
        Some(Predicate::new(|customer: &Customer| customer.age > 1))
    }

    fn before_insert(&self, customer: &Customer) -> Result<(), String> {
        if customer.name.trim().is_empty() {
            return Err("customer name is required".to_string());
        }
        Ok(())
    }
}

fn resolver() -> Arc<RepositoryResolver<MemoryStore>> {
    let mut resolver = RepositoryResolver::new();
    resolver
        .register::<Customer, _>(|store| Repository::with_hooks(store, AdultCustomers))
        .unwrap();
    Arc::new(resolver)
}

#[test]
fn generic_repository_is_memoized() {
    let mut uow = memory_uow();

    let first = uow.repository::<Customer>().unwrap();
    let second = uow.get_repository::<Customer>(false).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(uow.repository_count(), 1);
    assert!(!first.is_custom());
}

#[test]
fn custom_repository_wins_when_preferred_and_is_not_memoized() {
    let mut uow = UnitOfWork::with_resolver(MemoryStore::new(model()), resolver());
    seed_customers(&mut uow);

    let custom = uow.get_repository::<Customer>(true).unwrap();
    let again = uow.get_repository::<Customer>(true).unwrap();
    let generic = uow.get_repository::<Customer>(false).unwrap();

    assert!(custom.is_custom());
    assert_eq!(custom.kind(), "adult_customers");
    assert!(!Arc::ptr_eq(&custom, &again));
    assert!(custom.store().same_store(generic.store()));

    assert_eq!(custom.count(None).unwrap(), 4);
    assert_eq!(generic.count(None).unwrap(), 6);
}

#[test]
fn prefer_custom_falls_back_to_generic_without_registration() {
    let mut uow = memory_uow();

    let repo = uow.get_repository::<Customer>(true).unwrap();
    let generic = uow.get_repository::<Customer>(false).unwrap();

    assert!(!repo.is_custom());
    assert!(Arc::ptr_eq(&repo, &generic));
}

#[test]
fn duplicate_custom_registration_is_rejected() {
    let mut resolver = RepositoryResolver::<MemoryStore>::new();
    resolver
        .register::<Customer, _>(|store| Repository::with_hooks(store, AdultCustomers))
        .unwrap();

    let err = resolver
        .register::<Customer, _>(Repository::new)
        .unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateEntityType("customers")));
}

#[test]
fn custom_hook_rejection_stages_nothing() {
    let mut uow = UnitOfWork::with_resolver(MemoryStore::new(model()), resolver());
    let repo = uow.get_repository::<Customer>(true).unwrap();

    let err = repo
        .insert_many([Customer::new(1, "A", 3), Customer::new(2, " ", 4)].iter())
        .unwrap_err();

    assert!(matches!(err, RepoError::Rejected(_)));
    assert!(!uow.has_changes().unwrap());
}

#[test]
fn commit_counts_entity_rows() {
    let mut uow = memory_uow();
    let repo = uow.repository::<Customer>().unwrap();

    repo.insert(&Customer::new(1, "A", 1)).unwrap();
    repo.insert(&Customer::new(2, "B", 2)).unwrap();
    assert!(uow.has_changes().unwrap());

    assert_eq!(uow.commit(true).unwrap(), 2);
    assert!(!uow.has_changes().unwrap());
    assert_eq!(committed_customers(&repo), 2);
    assert_eq!(uow.history().unwrap().len(), 2);
}

#[test]
fn delete_by_key_uses_the_stub_without_reading() {
    let mut uow = memory_uow();
    seed_customers(&mut uow);
    let repo = uow.repository::<Customer>().unwrap();

    repo.delete_by_key(4_i64).unwrap();
    assert_eq!(uow.commit(false).unwrap(), 1);

    assert_eq!(committed_customers(&repo), 5);
    assert!(repo.find(4_i64).unwrap().is_none());
}

#[test]
fn stub_delete_of_missing_key_fails_at_commit_and_disposes() {
    let mut uow = memory_uow();
    seed_customers(&mut uow);
    let repo = uow.repository::<Customer>().unwrap();

    repo.delete_by_key(404_i64).unwrap();
    let err = uow.commit(false).unwrap_err();

    assert!(matches!(err, RepoError::Store(StoreError::MissingRow { .. })));
    assert!(uow.is_disposed());
    assert!(matches!(
        uow.repository::<Customer>(),
        Err(RepoError::Disposed)
    ));
    assert!(matches!(repo.count(None), Err(RepoError::Disposed)));
}

#[test]
fn delete_by_key_without_metadata_fetches_first() {
    let mut uow = UnitOfWork::new(MemoryStore::without_model());
    let repo = uow.repository::<Customer>().unwrap();
    repo.insert(&Customer::new(1, "A", 1)).unwrap();
    uow.commit(false).unwrap();

    repo.delete_by_key(404_i64).unwrap();
    assert_eq!(uow.commit(false).unwrap(), 0);

    repo.delete_by_key(1_i64).unwrap();
    assert_eq!(uow.commit(false).unwrap(), 1);
    assert_eq!(committed_customers(&repo), 0);
}

#[test]
fn delete_by_key_rejects_composite_keys() {
    let mut uow = memory_uow();
    let repo = uow.repository::<OrderLine>().unwrap();

    let err = repo.delete_by_key(1_i64).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Config(ConfigError::CompositeKey { entity: "order_lines", .. })
    ));
}

#[test]
fn delete_by_key_rejects_wrong_key_shape() {
    let mut uow = memory_uow();
    let repo = uow.repository::<Customer>().unwrap();

    let err = repo.delete_by_key("not-a-number").unwrap_err();
    assert!(matches!(
        err,
        RepoError::Config(ConfigError::KeyMismatch { .. })
    ));
}

#[test]
fn find_attaches_and_update_marks_modified() {
    let mut uow = memory_uow();
    seed_customers(&mut uow);
    let repo = uow.repository::<Customer>().unwrap();

    let mut found = repo.find(3_i64).unwrap().unwrap();
    assert_eq!(repo.state_of(&found).unwrap(), EntityState::Unchanged);

    found.name = "Carol".to_string();
    repo.update(&found).unwrap();
    assert_eq!(repo.state_of(&found).unwrap(), EntityState::Modified);
    assert_eq!(repo.find(3_i64).unwrap().unwrap().name, "Carol");

    assert_eq!(uow.commit(false).unwrap(), 1);
    let reloaded = repo
        .first(&QuerySpec::new().filter(|customer: &Customer| customer.id == 3))
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.name, "Carol");
}

#[test]
fn explicit_state_override_supports_partial_updates() {
    let mut uow = memory_uow();
    seed_customers(&mut uow);
    let repo = uow.repository::<Customer>().unwrap();

    let patched = Customer::new(2, "Bea", 30);
    repo.set_state(&patched, EntityState::Modified).unwrap();
    assert_eq!(uow.commit(false).unwrap(), 1);

    assert_eq!(repo.find(2_i64).unwrap().unwrap().age, 30);

    repo.set_state(&patched, EntityState::Detached).unwrap();
    assert_eq!(repo.state_of(&patched).unwrap(), EntityState::Detached);
}

#[test]
fn only_tracked_queries_attach_results() {
    let mut uow = memory_uow();
    seed_customers(&mut uow);
    let repo = uow.repository::<Customer>().unwrap();
    repo.set_state(&Customer::new(1, "A", 1), EntityState::Detached)
        .unwrap();

    let untracked = repo.list(&QuerySpec::new()).unwrap();
    assert_eq!(repo.state_of(&untracked[0]).unwrap(), EntityState::Detached);

    let tracked = repo.list(&QuerySpec::new().tracked()).unwrap();
    assert_eq!(repo.state_of(&tracked[0]).unwrap(), EntityState::Unchanged);
}

#[test]
fn atomic_commit_rolls_back_every_participant() {
    let mut first = memory_uow();
    let mut second = memory_uow();
    seed_customers(&mut second);

    let staged = first.repository::<Customer>().unwrap();
    staged.insert(&Customer::new(10, "K", 7)).unwrap();

    let failing = second.repository::<Customer>().unwrap();
    failing.delete_by_key(404_i64).unwrap();

    let err = second.commit_atomic(false, &mut [&mut first]).unwrap_err();

    assert!(matches!(err, RepoError::Store(StoreError::MissingRow { .. })));
    assert!(second.is_disposed());
    assert!(!first.is_disposed());
    assert_eq!(committed_customers(&staged), 0);
    assert!(first.has_changes().unwrap());
}

#[test]
fn atomic_commit_sums_rows_across_participants() {
    let mut first = memory_uow();
    let mut second = memory_uow();

    first
        .repository::<Customer>()
        .unwrap()
        .insert(&Customer::new(1, "A", 1))
        .unwrap();
    second
        .repository::<Customer>()
        .unwrap()
        .insert_many([Customer::new(1, "A", 1), Customer::new(2, "B", 2)].iter())
        .unwrap();

    assert_eq!(second.commit_atomic(true, &mut [&mut first]).unwrap(), 3);
    assert!(!first.has_changes().unwrap());
    assert!(!second.has_changes().unwrap());
}

#[test]
fn dispose_is_idempotent() {
    let mut uow = memory_uow();
    let repo = uow.repository::<Customer>().unwrap();

    uow.dispose();
    uow.dispose();

    assert!(uow.is_disposed());
    assert!(repo.store().is_released());
    assert_eq!(uow.repository_count(), 0);
    assert!(matches!(uow.commit(false), Err(RepoError::Disposed)));
}

#[test]
fn dispose_while_the_store_is_held_still_releases_it() {
    let mut uow = memory_uow();
    seed_customers(&mut uow);
    let repo = uow.repository::<Customer>().unwrap();

    let guard = repo.store().lock().unwrap();
    uow.dispose();

    assert!(uow.is_disposed());
    assert!(repo.store().is_released());
    assert!(matches!(repo.count(None), Err(RepoError::Disposed)));

    drop(guard);
    drop(uow);
    assert!(matches!(repo.count(None), Err(RepoError::Disposed)));
    assert!(matches!(repo.store().lock().err(), Some(RepoError::Disposed)));
}

#[tokio::test]
async fn async_reads_fail_fast_on_a_busy_store() {
    let mut uow = memory_uow();
    seed_customers(&mut uow);
    let repo = uow.repository::<Customer>().unwrap();
    let cancel = CancellationToken::new();

    let guard = repo.store().lock().unwrap();
    let err = repo
        .list_async(&QuerySpec::new(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Store(StoreError::Busy)));
    drop(guard);

    assert_eq!(repo.list_async(&QuerySpec::new(), &cancel).await.unwrap().len(), 6);
}

#[tokio::test]
async fn cancellation_is_left_to_the_store() {
    let mut uow = memory_uow();
    let repo = uow.repository::<Customer>().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    repo.insert_async(&Customer::new(1, "A", 1), &cancel)
        .await
        .unwrap();
    assert!(uow.has_changes().unwrap());

    let err = uow.commit_async(false, &cancel).await.unwrap_err();
    assert!(matches!(err, RepoError::Store(StoreError::Cancelled)));
    assert!(uow.is_disposed());
}

#[test]
fn duplicate_insert_fails_the_commit() {
    let mut uow = memory_uow();
    seed_customers(&mut uow);
    let repo = uow.repository::<Customer>().unwrap();

    repo.set_state(&Customer::new(1, "A", 1), EntityState::Detached)
        .unwrap();
    repo.insert(&Customer::new(1, "Again", 1)).unwrap();

    let err = uow.commit(false).unwrap_err();
    assert!(matches!(err, RepoError::Store(StoreError::DuplicateKey { .. })));
    assert!(uow.is_disposed());
}

#[tokio::test]
async fn async_commit_and_mutations() {
    let mut uow = memory_uow();
    let repo = uow.repository::<Customer>().unwrap();
    let cancel = CancellationToken::new();

    repo.insert_many_async([Customer::new(1, "A", 1), Customer::new(2, "B", 2)].iter(), &cancel)
        .await
        .unwrap();
    assert_eq!(uow.commit_async(true, &cancel).await.unwrap(), 2);

    repo.delete_by_key_async(2_i64, &cancel).await.unwrap();
    assert_eq!(uow.commit_async(false, &cancel).await.unwrap(), 1);

    let found = repo.find_async(1_i64, &cancel).await.unwrap();
    assert_eq!(found.map(|customer| customer.name), Some("A".to_string()));
    assert_eq!(committed_customers(&repo), 1);
}
