//! Generic per-entity repositories.
//!
//! # Responsibility
//! - Compose queries, page them, project them and aggregate over them.
//! - Record inserts, updates and deletes in the owning store's tracker.
//!
//! # Invariants
//! - Repositories never commit; the owning unit of work does.
//! - Every operation fails with `Disposed` once the unit of work is gone.

use crate::config::ConfigError;
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod hooks;
pub mod repository;

pub use hooks::RepositoryHooks;
pub use repository::Repository;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    Config(ConfigError),
    Store(StoreError),
    /// The owning unit of work has been disposed.
    Disposed,
    /// A custom repository refused the change.
    Rejected(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Disposed => write!(f, "unit of work has been disposed"),
            Self::Rejected(reason) => write!(f, "change rejected: {reason}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Disposed | Self::Rejected(_) => None,
        }
    }
}

impl From<ConfigError> for RepoError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Store(StoreError::Codec(value))
    }
}
