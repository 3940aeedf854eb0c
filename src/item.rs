//! Cached items and their MVCC metadata.
//!
//! Producers hand the adapter values implementing [`Item`]. Once handed over
//! a value is never modified; an update replaces it wholesale. The cache
//! stores each value wrapped in a [`RevisionedItem`] carrying etcd's create
//! and modify revisions.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::revision::Revision;

/// A keyed object that can be cached and served.
///
/// `Serialize` is the structured encoding used both for [`Item::marshal`]
/// and for log output.
pub trait Item: Serialize + Send + Sync + 'static {
    /// The unique key of this object.
    fn key(&self) -> &str;

    /// Encode the value as it will be served to etcd clients.
    ///
    /// Defaults to JSON.
    fn marshal(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Into::into)
    }
}

/// A raw key and opaque value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// The key.
    pub key: String,
    /// The value (opaque bytes).
    pub value: Vec<u8>,
}

impl KeyValue {
    /// Create a new key/value item.
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Item for KeyValue {
    fn key(&self) -> &str {
        &self.key
    }

    /// Raw values are served as-is.
    fn marshal(&self) -> Result<Vec<u8>> {
        Ok(self.value.clone())
    }
}

/// An item together with the revisions etcd reports for it.
///
/// `create_revision <= modify_revision` always holds.
#[derive(Debug, Clone, Serialize)]
pub struct RevisionedItem<T> {
    create_revision: Revision,
    modify_revision: Revision,
    #[serde(rename = "value")]
    item: T,
}

impl<T: Item> RevisionedItem<T> {
    /// Wrap a freshly added item; both revisions are `revision`.
    pub fn created(item: T, revision: Revision) -> Self {
        Self {
            create_revision: revision,
            modify_revision: revision,
            item,
        }
    }

    /// Wrap a new version of an existing item, keeping its create revision.
    pub fn modified(item: T, previous: &RevisionedItem<T>, revision: Revision) -> Self {
        debug_assert!(revision >= previous.create_revision);
        Self {
            create_revision: previous.create_revision,
            modify_revision: revision,
            item,
        }
    }

    /// The key of the wrapped item.
    pub fn key(&self) -> &str {
        self.item.key()
    }

    pub fn create_revision(&self) -> Revision {
        self.create_revision
    }

    pub fn modify_revision(&self) -> Revision {
        self.modify_revision
    }

    /// The wrapped item.
    pub fn item(&self) -> &T {
        &self.item
    }

    /// Compact JSON rendering for log fields.
    pub fn log_value(&self) -> String {
        serde_json::to_string(&self.item)
            .unwrap_or_else(|err| format!("<unencodable: {err}>"))
    }
}
