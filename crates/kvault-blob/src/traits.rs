use std::path::Path;

use kvault_fs::StorageResult;
use kvault_types::{Digest, NamespaceId};

/// Content-addressed blob store.
///
/// All implementations must satisfy these invariants:
/// - Blobs are immutable once written. Content addressing guarantees that the
///   same digest always names the same bytes.
/// - `write` for a digest that already exists does nothing beyond the
///   existence check.
/// - `read` and `delete` of an absent blob fail with a not-found error, not an
///   I/O error.
/// - All I/O errors are propagated, never silently ignored.
pub trait BlobStore: Send + Sync {
    /// Check whether a blob exists.
    fn exists(&self, id: &NamespaceId, digest: &Digest) -> StorageResult<bool>;

    /// Copy a blob's content to `destination`.
    fn read(&self, id: &NamespaceId, digest: &Digest, destination: &Path) -> StorageResult<()>;

    /// Store the content of `source` under `digest`.
    ///
    /// Returns `true` if the blob was written, `false` if it already existed.
    fn write(&self, id: &NamespaceId, digest: &Digest, source: &Path) -> StorageResult<bool>;

    /// Delete a blob.
    fn delete(&self, id: &NamespaceId, digest: &Digest) -> StorageResult<()>;

    /// Recursively delete every blob of a namespace.
    ///
    /// Returns `true` if the namespace directory existed.
    fn delete_storage(&self, id: &NamespaceId) -> StorageResult<bool>;
}
