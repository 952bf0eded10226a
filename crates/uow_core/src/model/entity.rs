//! Entity contract and primary-key values.
//!
//! # Invariants
//! - `Entity::key()` is stable for the lifetime of a record.
//! - `EntityKey` ordering is total, so keys can index ordered maps.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// A record type with an identity resolvable by a Store.
///
/// Entities cross the Store boundary as JSON rows, so they must be
/// serializable. Navigation collections (populated by includes) should be
/// marked `#[serde(skip)]` so they are never written into the parent row.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Entity set name. Must be a plain identifier and unique per model.
    const NAME: &'static str;

    /// Returns the primary-key value of this instance.
    fn key(&self) -> EntityKey;
}

/// One primary-key column value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyValue {
    Int(i64),
    Text(String),
    Uuid(Uuid),
}

impl KeyValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(value) => Some(*value),
            _ => None,
        }
    }
}

impl Display for KeyValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
            Self::Uuid(value) => write!(f, "{value}"),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for KeyValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Uuid> for KeyValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

/// Primary key of one entity instance; one value per key column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey(Vec<KeyValue>);

impl EntityKey {
    pub fn single(value: impl Into<KeyValue>) -> Self {
        Self(vec![value.into()])
    }

    pub fn composite(values: impl IntoIterator<Item = KeyValue>) -> Self {
        Self(values.into_iter().collect())
    }

    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the only value of a single-column key.
    pub fn as_single(&self) -> Option<&KeyValue> {
        match self.0.as_slice() {
            [value] => Some(value),
            _ => None,
        }
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, value) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, ",")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

macro_rules! single_key_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for EntityKey {
                fn from(value: $ty) -> Self {
                    Self::single(value)
                }
            }
        )*
    };
}

single_key_from!(KeyValue, i64, i32, u32, &str, String, Uuid);

#[cfg(test)]
mod tests {
    use super::{EntityKey, KeyValue};

    #[test]
    fn single_key_exposes_its_value() {
        let key = EntityKey::from(7_i64);
        assert_eq!(key.as_single(), Some(&KeyValue::Int(7)));
        assert_eq!(key.to_string(), "7");
    }

    #[test]
    fn composite_key_has_no_single_value() {
        let key = EntityKey::composite([KeyValue::Int(1), KeyValue::from("eu")]);
        assert_eq!(key.len(), 2);
        assert!(key.as_single().is_none());
        assert_eq!(key.to_string(), "1,eu");
    }

    #[test]
    fn text_and_int_keys_do_not_collide() {
        assert_ne!(EntityKey::from("1"), EntityKey::from(1_i64));
    }
}
