//! Generic data-access core: query specs, paging, repositories and units
//! of work over pluggable stores.

pub mod config;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod store;
pub mod uow;

pub use config::{ConfigError, CoreConfig, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status, LoggingError};
pub use model::entity::{Entity, EntityKey, KeyValue};
pub use model::metadata::{EntityType, Model, ModelBuilder};
pub use model::state::EntityState;
pub use query::include::{Include, Relation};
pub use query::order::OrderBy;
pub use query::page::{paginate, PageRequest, PagedResult};
pub use query::spec::{Predicate, QuerySpec, Stage, Tracking};
pub use repo::{RepoError, RepoResult, Repository, RepositoryHooks};
pub use store::memory::MemoryStore;
pub use store::sqlite::SqliteStore;
pub use store::{HistoryRecord, Row, Store, StoreError, StoreResult};
pub use uow::{
    Participant, RepositoryResolver, StoreHandle, TransactionScope, UnitOfWork,
};

/// Re-exported so hosts can cancel async operations without a direct
/// dependency.
pub use tokio_util::sync::CancellationToken;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
