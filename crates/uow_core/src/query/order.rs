//! Composable multi-key ordering.

use std::cmp::Ordering;
use std::sync::Arc;

type Comparator<E> = Arc<dyn Fn(&E, &E) -> Ordering + Send + Sync>;

/// Ordering over one or more keys, applied as a stable sort.
///
/// Elements comparing equal on every key keep their store order.
pub struct OrderBy<E> {
    keys: Vec<Comparator<E>>,
}

impl<E> Clone for OrderBy<E> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
        }
    }
}

impl<E: 'static> OrderBy<E> {
    pub fn asc<K, F>(key: F) -> Self
    where
        K: Ord,
        F: Fn(&E) -> K + Send + Sync + 'static,
    {
        Self { keys: Vec::new() }.then_asc(key)
    }

    pub fn desc<K, F>(key: F) -> Self
    where
        K: Ord,
        F: Fn(&E) -> K + Send + Sync + 'static,
    {
        Self { keys: Vec::new() }.then_desc(key)
    }

    /// Arbitrary comparator, for keys that are not `Ord` (for example floats).
    pub fn by<F>(compare: F) -> Self
    where
        F: Fn(&E, &E) -> Ordering + Send + Sync + 'static,
    {
        Self {
            keys: vec![Arc::new(compare)],
        }
    }

    pub fn then_asc<K, F>(mut self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&E) -> K + Send + Sync + 'static,
    {
        self.keys.push(Arc::new(move |a: &E, b: &E| key(a).cmp(&key(b))));
        self
    }

    pub fn then_desc<K, F>(mut self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&E) -> K + Send + Sync + 'static,
    {
        self.keys.push(Arc::new(move |a: &E, b: &E| key(b).cmp(&key(a))));
        self
    }

    pub fn compare(&self, a: &E, b: &E) -> Ordering {
        self.keys
            .iter()
            .map(|compare| compare(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    pub(crate) fn sort(&self, items: &mut [E]) {
        items.sort_by(|a, b| self.compare(a, b));
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
