use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use kvault_fs::atomic::remove_if_exists;
use kvault_fs::resolver::BLOB_TEMP_DIR;
use kvault_fs::{
    IoResultExt, PathResolver, StorageError, StorageResult, StoreConfig, StripedLockRegistry,
};
use kvault_types::{Digest, NamespaceId};

use crate::traits::BlobStore;

/// Filesystem-backed [`BlobStore`].
///
/// Writes and deletes of one namespace are serialized by its stripe lock.
/// Reads take no lock: blobs are immutable and appear by rename, so a reader
/// sees either nothing or the whole blob.
#[derive(Debug)]
pub struct BlobEngine {
    resolver: PathResolver,
    locks: StripedLockRegistry,
}

impl BlobEngine {
    /// Open (or create) a blob store rooted at `config.directory`.
    pub fn open(config: &StoreConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.directory).at(&config.directory)?;
        Ok(Self {
            resolver: PathResolver::new(&config.directory)?,
            locks: StripedLockRegistry::new(config.lock_stripes),
        })
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Namespaces that currently have a blob directory.
    pub fn namespaces(&self) -> StorageResult<Vec<NamespaceId>> {
        let base = self.resolver.base();
        let entries = match fs::read_dir(base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).at(base),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.at(base)?;
            if !entry.file_type().at(&entry.path())?.is_dir() {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| NamespaceId::new(name).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Digests stored under a namespace, sorted.
    pub fn digests(&self, id: &NamespaceId) -> StorageResult<Vec<Digest>> {
        let dir = self.resolver.namespace_dir(id)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut digests = Vec::new();
        let walker = WalkDir::new(&dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_entry(|e| e.depth() != 1 || e.file_name() != BLOB_TEMP_DIR);
        for entry in walker {
            let entry = entry.map_err(|e| walk_error(&dir, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let prefix = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .and_then(|n| n.to_str());
            let remainder = entry.file_name().to_str();
            match (prefix, remainder) {
                (Some(p), Some(r)) => match Digest::from_parts(p, r) {
                    Ok(digest) => digests.push(digest),
                    Err(e) => warn!(path = %entry.path().display(), error = %e, "skipping foreign file"),
                },
                _ => warn!(path = %entry.path().display(), "skipping non-UTF-8 file name"),
            }
        }
        digests.sort();
        Ok(digests)
    }

    /// Remove temp files left behind by writers that crashed mid-upload.
    ///
    /// Only files last modified more than `older_than` ago are removed, so
    /// uploads in flight on other nodes sharing the directory survive.
    pub fn sweep_temp(&self, id: &NamespaceId, older_than: Duration) -> StorageResult<usize> {
        let _guard = self.locks.lock(id);
        let tmp_dir = self.resolver.blob_temp_dir(id)?;
        let entries = match fs::read_dir(&tmp_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).at(&tmp_dir),
        };

        let cutoff = SystemTime::now()
            .checked_sub(older_than)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        for entry in entries {
            let entry = entry.at(&tmp_dir)?;
            let path = entry.path();
            let modified = entry.metadata().and_then(|m| m.modified()).at(&path)?;
            if modified <= cutoff && remove_if_exists(&path)? {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(namespace = %id, removed, "swept stale blob uploads");
        }
        Ok(removed)
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> StorageError {
    let path = err.path().unwrap_or(root).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
    StorageError::Io { path, source }
}

impl BlobStore for BlobEngine {
    fn exists(&self, id: &NamespaceId, digest: &Digest) -> StorageResult<bool> {
        let path = self.resolver.blob_path(id, digest)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).at(&path),
        }
    }

    fn read(&self, id: &NamespaceId, digest: &Digest, destination: &Path) -> StorageResult<()> {
        let path = self.resolver.blob_path(id, digest)?;
        let mut source = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(format!("blob {id}/{digest}")));
            }
            Err(e) => return Err(e).at(&path),
        };
        // Copy beside the destination and rename, so a failed copy never
        // leaves a truncated file under the caller's name.
        let parent = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(parent).at(parent)?;
        io::copy(&mut source, tmp.as_file_mut()).at(tmp.path())?;
        tmp.persist(destination).map_err(|e| StorageError::Io {
            path: destination.to_path_buf(),
            source: e.error,
        })?;
        Ok(())
    }

    fn write(&self, id: &NamespaceId, digest: &Digest, source: &Path) -> StorageResult<bool> {
        let _guard = self.locks.lock(id);
        if self.exists(id, digest)? {
            debug!(namespace = %id, %digest, "blob already present");
            return Ok(false);
        }

        let mut input = File::open(source).at(source)?;
        let tmp_dir = self.resolver.blob_temp_dir(id)?;
        fs::create_dir_all(&tmp_dir).at(&tmp_dir)?;

        // Dropping the NamedTempFile on any early return deletes it.
        let mut tmp = NamedTempFile::new_in(&tmp_dir).at(&tmp_dir)?;
        let copied = io::copy(&mut input, tmp.as_file_mut()).at(tmp.path())?;
        tmp.as_file().sync_all().at(tmp.path())?;

        let target = self.resolver.blob_path(id, digest)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        tmp.persist(&target).map_err(|e| StorageError::Io {
            path: target.clone(),
            source: e.error,
        })?;

        debug!(namespace = %id, %digest, bytes = copied, "stored blob");
        Ok(true)
    }

    fn delete(&self, id: &NamespaceId, digest: &Digest) -> StorageResult<()> {
        let _guard = self.locks.lock(id);
        let path = self.resolver.blob_path(id, digest)?;
        if !remove_if_exists(&path)? {
            return Err(StorageError::not_found(format!("blob {id}/{digest}")));
        }
        // Drop the fan-out directory once its last blob is gone.
        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir(parent);
        }
        debug!(namespace = %id, %digest, "deleted blob");
        Ok(())
    }

    fn delete_storage(&self, id: &NamespaceId) -> StorageResult<bool> {
        let _guard = self.locks.lock(id);
        // Fails with PathEscape before anything is touched.
        let dir = self.resolver.namespace_dir(id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(namespace = %id, "deleted blob namespace");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).at(&dir),
        }
    }
}
