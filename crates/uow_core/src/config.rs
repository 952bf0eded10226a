//! Core configuration and configuration-error taxonomy.
//!
//! # Responsibility
//! - Hold paging defaults, store location and logging settings.
//! - Define errors for invalid construction arguments and metadata.
//!
//! # Invariants
//! - Configuration errors are surfaced immediately and never retried.
//! - `default_page_size` is always within `1..=max_page_size`.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Page size used when a caller does not supply one.
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Upper bound accepted for one page.
pub const MAX_PAGE_SIZE: usize = 1000;

const ENV_DEFAULT_PAGE_SIZE: &str = "UOW_DEFAULT_PAGE_SIZE";
const ENV_MAX_PAGE_SIZE: &str = "UOW_MAX_PAGE_SIZE";
const ENV_DATABASE_PATH: &str = "UOW_DATABASE_PATH";
const ENV_LOG_LEVEL: &str = "UOW_LOG_LEVEL";
const ENV_LOG_DIR: &str = "UOW_LOG_DIR";

/// Invalid arguments, settings or entity metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Page size is zero or above the configured maximum.
    InvalidPageSize { size: usize, max: usize },
    /// No metadata registered for the entity type.
    MissingEntityType(&'static str),
    /// Entity type has no primary-key columns.
    MissingPrimaryKey(&'static str),
    /// Operation requires a single-column key.
    CompositeKey {
        entity: &'static str,
        columns: Vec<&'static str>,
    },
    /// Key value cannot be applied to the entity type's key stub.
    KeyMismatch { entity: &'static str, key: String },
    /// Name is not a plain identifier.
    InvalidIdentifier(String),
    /// Entity set name registered twice.
    DuplicateEntityType(&'static str),
    /// Setting value cannot be parsed or is out of range.
    InvalidSetting { name: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageSize { size, max } => {
                write!(f, "page size must be within 1..={max}, got {size}")
            }
            Self::MissingEntityType(entity) => {
                write!(f, "no entity type metadata registered for `{entity}`")
            }
            Self::MissingPrimaryKey(entity) => {
                write!(f, "entity type `{entity}` has no primary key")
            }
            Self::CompositeKey { entity, columns } => write!(
                f,
                "entity type `{entity}` has a composite key ({}); only single-column keys are supported",
                columns.join(", ")
            ),
            Self::KeyMismatch { entity, key } => {
                write!(f, "key `{key}` does not fit the key of entity type `{entity}`")
            }
            Self::InvalidIdentifier(value) => write!(f, "invalid identifier: `{value}`"),
            Self::DuplicateEntityType(entity) => {
                write!(f, "entity type `{entity}` registered twice")
            }
            Self::InvalidSetting { name, value } => {
                write!(f, "invalid value `{value}` for setting {name}")
            }
        }
    }
}

impl Error for ConfigError {}

/// Settings shared by the core and its hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// `None` selects an in-memory store.
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    /// `None` leaves logging uninitialised.
    pub log_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            database_path: None,
            log_level: crate::logging::default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl CoreConfig {
    /// Reads `UOW_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_MAX_PAGE_SIZE) {
            config.max_page_size = parse_size(ENV_MAX_PAGE_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_DEFAULT_PAGE_SIZE) {
            config.default_page_size = parse_size(ENV_DEFAULT_PAGE_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_DATABASE_PATH).filter(|v| !v.trim().is_empty()) {
            config.database_path = Some(PathBuf::from(value.trim()));
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            config.log_level = value.trim().to_ascii_lowercase();
        }
        if let Some(value) = lookup(ENV_LOG_DIR).filter(|v| !v.trim().is_empty()) {
            config.log_dir = Some(PathBuf::from(value.trim()));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_page_size == 0 {
            return Err(ConfigError::InvalidSetting {
                name: ENV_MAX_PAGE_SIZE,
                value: self.max_page_size.to_string(),
            });
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::InvalidSetting {
                name: ENV_DEFAULT_PAGE_SIZE,
                value: self.default_page_size.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_size(name: &'static str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidSetting {
            name,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig, DEFAULT_PAGE_SIZE};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = CoreConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.default_page_size, DEFAULT_PAGE_SIZE);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn variables_override_defaults() {
        let config = CoreConfig::from_lookup(lookup_from(&[
            ("UOW_DEFAULT_PAGE_SIZE", "5"),
            ("UOW_MAX_PAGE_SIZE", "50"),
            ("UOW_DATABASE_PATH", "/tmp/uow.sqlite3"),
            ("UOW_LOG_LEVEL", " WARN "),
        ]))
        .unwrap();
        assert_eq!(config.default_page_size, 5);
        assert_eq!(config.max_page_size, 50);
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/uow.sqlite3")));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn out_of_range_default_page_size_is_rejected() {
        let err = CoreConfig::from_lookup(lookup_from(&[
            ("UOW_DEFAULT_PAGE_SIZE", "80"),
            ("UOW_MAX_PAGE_SIZE", "40"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting {
                name: "UOW_DEFAULT_PAGE_SIZE",
                ..
            }
        ));
    }

    #[test]
    fn unparsable_size_is_rejected() {
        let err =
            CoreConfig::from_lookup(lookup_from(&[("UOW_MAX_PAGE_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { value, .. } if value == "lots"));
    }
}
