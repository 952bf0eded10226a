mod common;

use common::{cities_with_towns, model, City, Country, Customer, Town};
use uow_core::{
    EntityState, KeyValue, OrderBy, PageRequest, QuerySpec, RepoError, SqliteStore, StoreError,
    UnitOfWork,
};

fn open(path: &std::path::Path) -> UnitOfWork<SqliteStore> {
    UnitOfWork::new(SqliteStore::open(path, model()).unwrap())
}

#[test]
fn committed_rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("uow.sqlite3");

    {
        let mut uow = open(&path);
        let repo = uow.repository::<Customer>().unwrap();
        repo.insert_many(
            [
                Customer::new(1, "A", 1),
                Customer::new(2, "B", 1),
                Customer::new(3, "C", 2),
                Customer::new(4, "D", 3),
            ]
            .iter(),
        )
        .unwrap();
        assert_eq!(uow.commit(true).unwrap(), 4);
    }

    let mut uow = open(&path);
    let repo = uow.repository::<Customer>().unwrap();
    let page = repo
        .page(
            &QuerySpec::new()
                .filter(|customer: &Customer| customer.age > 1)
                .order_by(OrderBy::desc(|customer: &Customer| customer.age)),
            PageRequest::new(0, 1).unwrap(),
        )
        .unwrap();

    assert_eq!(page.total_count, 2);
    assert_eq!(page.items[0].name, "D");

    let history = uow.history().unwrap();
    assert_eq!(history.len(), 4);
    assert!(history.iter().all(|record| record.kind == EntityState::Added));
}

#[test]
fn nested_include_over_sqlite() {
    let mut uow = UnitOfWork::new(SqliteStore::open_in_memory(model()).unwrap());
    uow.repository::<Country>()
        .unwrap()
        .insert(&Country {
            id: 1,
            name: "A".to_string(),
            cities: Vec::new(),
        })
        .unwrap();
    uow.repository::<City>()
        .unwrap()
        .insert(&City {
            id: 1,
            country_id: 1,
            name: "A".to_string(),
            towns: Vec::new(),
        })
        .unwrap();
    uow.repository::<Town>()
        .unwrap()
        .insert(&Town {
            id: 1,
            city_id: 1,
            name: "A1".to_string(),
        })
        .unwrap();
    uow.commit(false).unwrap();

    let country = uow
        .repository::<Country>()
        .unwrap()
        .first(&QuerySpec::new().include(cities_with_towns()))
        .unwrap()
        .unwrap();

    assert_eq!(country.cities.len(), 1);
    assert_eq!(country.cities[0].towns[0].name, "A1");
}

#[test]
fn raw_queries_bypass_composition() {
    let mut uow = UnitOfWork::new(SqliteStore::open_in_memory(model()).unwrap());
    let repo = uow.repository::<Customer>().unwrap();
    repo.insert_many([Customer::new(1, "A", 1), Customer::new(2, "B", 5)].iter())
        .unwrap();
    uow.commit(false).unwrap();

    let older = uow
        .from_raw::<Customer>(
            "SELECT body FROM uow_rows WHERE entity = 'customers' AND json_extract(body, '$.age') > ?1;",
            &[KeyValue::Int(2)],
        )
        .unwrap();
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].name, "B");

    let affected = uow
        .execute_raw(
            "DELETE FROM uow_rows WHERE entity = 'customers' AND json_extract(body, '$.id') = ?1;",
            &[KeyValue::Int(1)],
        )
        .unwrap();
    assert_eq!(affected, 1);
    assert_eq!(repo.count(None).unwrap(), 1);
}

#[test]
fn stub_delete_of_missing_row_rolls_back() {
    let mut uow = UnitOfWork::new(SqliteStore::open_in_memory(model()).unwrap());
    let repo = uow.repository::<Customer>().unwrap();
    repo.insert(&Customer::new(1, "A", 1)).unwrap();
    uow.commit(false).unwrap();

    repo.insert(&Customer::new(2, "B", 2)).unwrap();
    repo.delete_by_key(404_i64).unwrap();
    let err = uow.commit(false).unwrap_err();

    assert!(matches!(err, RepoError::Store(StoreError::MissingRow { .. })));
    assert!(uow.is_disposed());
}
