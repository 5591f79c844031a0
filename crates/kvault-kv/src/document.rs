use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use kvault_fs::atomic::{self, PreRenameHook};
use kvault_fs::{IoResultExt, PathResolver, StorageError, StorageResult};
use kvault_types::{NamespaceId, Value};

/// One namespace's full key-value content.
///
/// A `BTreeMap` keeps the on-disk JSON stable across rewrites; key order
/// carries no meaning.
pub type Document = BTreeMap<String, Value>;

/// Loads and replaces whole document files.
///
/// `store` always writes the complete document to `<id>.json.tmp` and renames
/// it over `<id>.json`. There is no incremental or append path.
#[derive(Clone)]
pub struct AtomicDocumentStore {
    resolver: PathResolver,
    pre_rename: Option<Arc<PreRenameHook>>,
}

impl AtomicDocumentStore {
    pub fn new(resolver: PathResolver) -> Self {
        Self {
            resolver,
            pre_rename: None,
        }
    }

    /// Run `hook` between the temp-file write and the rename of every store.
    ///
    /// Lets tests observe the target while a write is in flight.
    pub fn with_pre_rename_hook(mut self, hook: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.pre_rename = Some(Arc::new(hook));
        self
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Read and parse the document at `path`.
    ///
    /// Returns `Ok(None)` if the file does not exist. The returned timestamp
    /// is taken from the same open handle the content is read from, so the
    /// pair is consistent even if the file is replaced concurrently.
    /// Malformed content is a [`StorageError::Decode`], never an empty
    /// document.
    pub fn load(&self, path: &Path) -> StorageResult<Option<(Document, SystemTime)>> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).at(path),
        };
        let modified = file.metadata().and_then(|m| m.modified()).at(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).at(path)?;

        let document = serde_json::from_slice(&bytes).map_err(|e| StorageError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Some((document, modified)))
    }

    /// Replace the namespace's document file with `document`.
    ///
    /// Returns the new file's modification time. A value that cannot be
    /// read back (see [`Value::validate`]) fails the store before the file is
    /// touched.
    pub fn store(&self, id: &NamespaceId, document: &Document) -> StorageResult<SystemTime> {
        document.values().try_for_each(Value::validate)?;
        let target = self.resolver.document_path(id)?;
        let temp = self.resolver.temp_document_path(id)?;
        let bytes = serde_json::to_vec_pretty(document).map_err(|e| StorageError::Decode {
            path: target.clone(),
            reason: format!("cannot encode document: {e}"),
        })?;
        atomic::replace_file(&target, &temp, &bytes, self.pre_rename.as_deref())
    }
}

impl std::fmt::Debug for AtomicDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicDocumentStore")
            .field("base", &self.resolver.base())
            .field("pre_rename_hook", &self.pre_rename.is_some())
            .finish()
    }
}
