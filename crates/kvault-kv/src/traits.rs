//! The [`KeyValueStore`] trait defining the key-value storage interface.

use std::collections::btree_map;

use kvault_fs::StorageResult;
use kvault_types::{NamespaceId, Value};

/// Snapshot of one namespace's entries, taken when the stream was created.
pub type EntryStream = btree_map::IntoIter<String, Value>;

/// Namespace ids present at listing time.
pub type IdStream = std::vec::IntoIter<NamespaceId>;

/// Namespaced key-value storage.
///
/// Implementations must be thread-safe. Mutations of one namespace are
/// linearizable: concurrent `put`/`remove` calls on the same namespace never
/// lose updates, and a `get` issued after a `put` returned on the same thread
/// observes it.
pub trait KeyValueStore: Send + Sync {
    /// Whether `key` is present in the namespace's current document.
    fn contains(&self, id: &NamespaceId, key: &str) -> StorageResult<bool>;

    /// The current value for `key`, or `None` if the key or the whole
    /// namespace is absent.
    fn get(&self, id: &NamespaceId, key: &str) -> StorageResult<Option<Value>>;

    /// Insert or overwrite `key`, returning the previous value.
    fn put(&self, id: &NamespaceId, key: &str, value: Value) -> StorageResult<Option<Value>>;

    /// Delete `key`, returning the previous value.
    fn remove(&self, id: &NamespaceId, key: &str) -> StorageResult<Option<Value>>;

    /// All entries of the namespace as of the call. Later mutations are not
    /// reflected; call again to restart.
    fn stream(&self, id: &NamespaceId) -> StorageResult<EntryStream>;

    /// All namespaces that currently have a backing document.
    fn id_stream(&self) -> StorageResult<IdStream>;

    /// Remove the namespace's document and every cached trace of it.
    ///
    /// Returns `true` if a document existed. Afterwards the namespace reads
    /// as absent.
    fn delete_storage(&self, id: &NamespaceId) -> StorageResult<bool>;
}
