#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use uow_core::{
    Entity, EntityKey, EntityType, KeyValue, MemoryStore, Model, Relation, Repository, UnitOfWork,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub age: u32,
    #[serde(default)]
    pub archived: bool,
}

impl Customer {
    pub fn new(id: i64, name: &str, age: u32) -> Self {
        Self {
            id,
            name: name.to_string(),
            age,
            archived: false,
        }
    }
}

impl Entity for Customer {
    const NAME: &'static str = "customers";

    fn key(&self) -> EntityKey {
        EntityKey::from(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub id: i64,
    pub name: String,
    #[serde(skip)]
    pub cities: Vec<City>,
}

impl Entity for Country {
    const NAME: &'static str = "countries";

    fn key(&self) -> EntityKey {
        EntityKey::from(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub id: i64,
    pub country_id: i64,
    pub name: String,
    #[serde(skip)]
    pub towns: Vec<Town>,
}

impl Entity for City {
    const NAME: &'static str = "cities";

    fn key(&self) -> EntityKey {
        EntityKey::from(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Town {
    pub id: i64,
    pub city_id: i64,
    pub name: String,
}

impl Entity for Town {
    const NAME: &'static str = "towns";

    fn key(&self) -> EntityKey {
        EntityKey::from(self.id)
    }
}

/// Order line keyed by `(order_id, line_no)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub order_id: i64,
    pub line_no: i64,
}

impl Entity for OrderLine {
    const NAME: &'static str = "order_lines";

    fn key(&self) -> EntityKey {
        EntityKey::composite([KeyValue::Int(self.order_id), KeyValue::Int(self.line_no)])
    }
}

pub fn customer_type() -> EntityType<Customer> {
    EntityType::new()
        .primary_key(["id"])
        .stub(|key| {
            key.as_i64().map(|id| Customer {
                id,
                name: String::new(),
                age: 0,
                archived: false,
            })
        })
        .query_filter(|customer: &Customer| !customer.archived)
}

pub fn model() -> Model {
    Model::builder()
        .register(customer_type())
        .register(EntityType::<Country>::new().primary_key(["id"]))
        .register(EntityType::<City>::new().primary_key(["id"]))
        .register(EntityType::<Town>::new().primary_key(["id"]))
        .register(EntityType::<OrderLine>::new().primary_key(["order_id", "line_no"]))
        .build()
        .unwrap()
}

pub fn memory_uow() -> UnitOfWork<MemoryStore> {
    UnitOfWork::new(MemoryStore::new(model()))
}

/// A1, B1, C2, D3, E4, F5: name letter plus age.
pub fn seed_customers(uow: &mut UnitOfWork<MemoryStore>) {
    let customers = [
        Customer::new(1, "A", 1),
        Customer::new(2, "B", 1),
        Customer::new(3, "C", 2),
        Customer::new(4, "D", 3),
        Customer::new(5, "E", 4),
        Customer::new(6, "F", 5),
    ];
    let repo = uow.repository::<Customer>().unwrap();
    repo.insert_many(customers.iter()).unwrap();
    uow.commit(false).unwrap();
}

pub fn seed_geography(uow: &mut UnitOfWork<MemoryStore>) {
    let countries = [
        Country {
            id: 1,
            name: "A".to_string(),
            cities: Vec::new(),
        },
        Country {
            id: 2,
            name: "B".to_string(),
            cities: Vec::new(),
        },
    ];
    let cities = [
        city(1, 1, "A"),
        city(2, 2, "B"),
        city(3, 1, "C"),
    ];
    let towns = [town(1, 1, "A1"), town(2, 1, "A2"), town(3, 3, "C1"), town(4, 2, "B1")];

    uow.repository::<Country>()
        .unwrap()
        .insert_many(countries.iter())
        .unwrap();
    uow.repository::<City>()
        .unwrap()
        .insert_many(cities.iter())
        .unwrap();
    uow.repository::<Town>()
        .unwrap()
        .insert_many(towns.iter())
        .unwrap();
    uow.commit(false).unwrap();
}

pub fn cities_with_towns() -> Relation<Country, City> {
    Relation::many(
        "cities",
        |country: &Country, city: &City| city.country_id == country.id,
        |country: &mut Country, cities: Vec<City>| country.cities = cities,
    )
    .then(Relation::many(
        "towns",
        |city: &City, town: &Town| town.city_id == city.id,
        |city: &mut City, towns: Vec<Town>| city.towns = towns,
    ))
}

pub fn names<E, F>(items: &[E], name: F) -> Vec<String>
where
    F: Fn(&E) -> &str,
{
    items.iter().map(|item| name(item).to_string()).collect()
}

pub fn committed_customers(repo: &Repository<Customer, MemoryStore>) -> usize {
    repo.store()
        .with(|store| Ok(store.committed_len(Customer::NAME)))
        .unwrap()
}

fn city(id: i64, country_id: i64, name: &str) -> City {
    City {
        id,
        country_id,
        name: name.to_string(),
        towns: Vec::new(),
    }
}

fn town(id: i64, city_id: i64, name: &str) -> Town {
    Town {
        id,
        city_id,
        name: name.to_string(),
    }
}
