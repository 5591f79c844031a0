//! Namespace and digest to filesystem path mapping.
//!
//! Layout under the base directory:
//!
//! ```text
//! <base>/<namespace>.json                 key-value document
//! <base>/<namespace>.json.tmp             document being written
//! <base>/<namespace>/<dg>/<digest rest>   blob, fanned out on the first two digest chars
//! <base>/<namespace>/.tmp/                blob uploads in progress
//! ```
//!
//! Every path returned here has been lexically normalized and verified to be
//! a strict descendant of the base directory. Symlinks are not resolved: the
//! check guards against crafted ids, not against links planted inside the
//! storage root.

use std::path::{Component, Path, PathBuf};

use kvault_types::{Digest, NamespaceId, TypeError};

use crate::error::{IoResultExt, StorageError, StorageResult};

/// Extension of key-value document files.
pub const DOCUMENT_EXT: &str = "json";
/// Suffix appended to a document path while it is being written.
pub const TEMP_SUFFIX: &str = ".tmp";
/// Directory holding blob uploads in progress, inside a namespace directory.
pub const BLOB_TEMP_DIR: &str = ".tmp";

/// Maps namespace ids (and digests) to paths under one base directory.
#[derive(Clone, Debug)]
pub struct PathResolver {
    base: PathBuf,
}

impl PathResolver {
    /// Create a resolver rooted at `base`.
    ///
    /// A relative base is made absolute against the current directory so that
    /// containment checks compare like with like.
    pub fn new(base: impl AsRef<Path>) -> StorageResult<Self> {
        let base = base.as_ref();
        let absolute = std::path::absolute(base).at(base)?;
        Ok(Self {
            base: normalize(&absolute),
        })
    }

    /// The normalized base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// `<base>/<id>.json`.
    pub fn document_path(&self, id: &NamespaceId) -> StorageResult<PathBuf> {
        self.flat_entry(id, format!("{id}.{DOCUMENT_EXT}"))
    }

    /// `<base>/<id>.json.tmp`.
    pub fn temp_document_path(&self, id: &NamespaceId) -> StorageResult<PathBuf> {
        let doc = self.document_path(id)?;
        let mut name = doc.into_os_string();
        name.push(TEMP_SUFFIX);
        Ok(PathBuf::from(name))
    }

    /// `<base>/<id>`, the root of a namespace's blob tree.
    ///
    /// Blob namespaces are flat like documents: a nested id such as `x/ab`
    /// would land on the fan-out directory of namespace `x`.
    pub fn namespace_dir(&self, id: &NamespaceId) -> StorageResult<PathBuf> {
        self.flat_entry(id, id.as_str().to_string())
    }

    /// `<base>/<name>` for a namespace that must be a single path component.
    fn flat_entry(&self, id: &NamespaceId, name: String) -> StorageResult<PathBuf> {
        if !id.is_flat() {
            // Still report traversal attempts as escapes rather than as bad ids.
            self.contain(id, self.base.join(id.as_str()))?;
            return Err(TypeError::InvalidNamespace {
                id: id.to_string(),
                reason: "namespaces must be a single path component".into(),
            }
            .into());
        }
        self.contain(id, self.base.join(name))
    }

    /// `<base>/<id>/<digest[0:2]>/<digest[2:]>`.
    pub fn blob_path(&self, id: &NamespaceId, digest: &Digest) -> StorageResult<PathBuf> {
        let dir = self.namespace_dir(id)?;
        Ok(dir.join(digest.prefix()).join(digest.remainder()))
    }

    /// `<base>/<id>/.tmp`.
    pub fn blob_temp_dir(&self, id: &NamespaceId) -> StorageResult<PathBuf> {
        Ok(self.namespace_dir(id)?.join(BLOB_TEMP_DIR))
    }

    /// Normalize `path` and verify it lies strictly inside the base.
    pub fn contain(&self, id: &NamespaceId, path: PathBuf) -> StorageResult<PathBuf> {
        let normalized = normalize(&path);
        if normalized == self.base || !normalized.starts_with(&self.base) {
            return Err(StorageError::PathEscape {
                namespace: id.to_string(),
                path: normalized,
            });
        }
        Ok(normalized)
    }

    /// Inverse of [`PathResolver::document_path`].
    ///
    /// Returns `None` for anything that is not a document directly under the
    /// base, including in-flight `.json.tmp` files.
    pub fn namespace_from_document(&self, path: &Path) -> Option<NamespaceId> {
        let path = normalize(path);
        if path.parent()? != self.base {
            return None;
        }
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_suffix(&format!(".{DOCUMENT_EXT}"))?;
        let id = NamespaceId::new(stem).ok()?;
        id.is_flat().then_some(id)
    }
}

/// Lexically normalize a path: drop `.` segments and fold `..` into the
/// preceding component. A `..` at the root stays at the root; leading `..`
/// segments of a relative path are kept.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
