//! Ordered in-memory cache of revisioned items.
//!
//! The reducer is the only writer; protocol handlers may read concurrently.
//! Keys are ordered bytewise, which is what etcd range and prefix reads
//! expect.
//!
//! This cache is NOT durable - data is lost on process exit.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use crate::item::{Item, RevisionedItem};

/// Storage contract the reducer writes through.
///
/// Backends are replaceable; none of these operations can fail.
pub trait Cache<T: Item>: Send + Sync {
    /// Insert or overwrite the item under its key.
    fn put(&self, item: Arc<RevisionedItem<T>>);

    /// Look up an item by key.
    ///
    /// Returns `None` if the key does not exist.
    fn get(&self, key: &str) -> Option<Arc<RevisionedItem<T>>>;

    /// Remove the item's key.
    ///
    /// Returns the removed item, or `None` if the key was not present.
    fn delete(&self, item: &RevisionedItem<T>) -> Option<Arc<RevisionedItem<T>>>;

    /// All items whose key starts with `prefix`, in key order.
    fn range(&self, prefix: &str) -> Vec<Arc<RevisionedItem<T>>>;

    /// Number of cached keys.
    fn len(&self) -> usize;

    /// Check if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`Cache`] backed by a `BTreeMap`.
pub struct BTreeCache<T> {
    data: RwLock<BTreeMap<String, Arc<RevisionedItem<T>>>>,
}

impl<T> BTreeCache<T> {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Cached keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }
}

impl<T> Default for BTreeCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Cache<T> for BTreeCache<T> {
    fn put(&self, item: Arc<RevisionedItem<T>>) {
        let key = item.key().to_string();
        self.data.write().insert(key, item);
    }

    fn get(&self, key: &str) -> Option<Arc<RevisionedItem<T>>> {
        self.data.read().get(key).cloned()
    }

    fn delete(&self, item: &RevisionedItem<T>) -> Option<Arc<RevisionedItem<T>>> {
        self.data.write().remove(item.key())
    }

    fn range(&self, prefix: &str) -> Vec<Arc<RevisionedItem<T>>> {
        let data = self.data.read();
        data.range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| Arc::clone(v))
            .collect()
    }

    fn len(&self) -> usize {
        self.data.read().len()
    }
}
