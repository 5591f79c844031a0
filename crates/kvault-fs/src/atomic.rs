//! Whole-file replacement via temp file and rename.
//!
//! A reader opening the target path sees either the previous content or the
//! new content, never a prefix of the new content. Files are always replaced
//! whole; nothing here appends.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::time::SystemTime;

use tracing::debug;

use crate::error::{IoResultExt, StorageResult};

/// Callback run after the temp file is durable and before it is renamed.
pub type PreRenameHook = dyn Fn(&Path) + Send + Sync;

/// Write `bytes` to `temp`, fsync it, then rename it over `target`.
///
/// Returns the modification time of the written file, read from its own
/// handle before the rename. Stating `target` afterwards could observe a
/// later replacement by another writer. On failure the temp file is removed
/// and `target` is left as it was.
pub fn replace_file(
    target: &Path,
    temp: &Path,
    bytes: &[u8],
    before_rename: Option<&PreRenameHook>,
) -> StorageResult<SystemTime> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }

    let result = write_then_rename(target, temp, bytes, before_rename);
    if result.is_err() {
        let _ = fs::remove_file(temp);
    }
    let modified = result?;

    if let Some(parent) = target.parent() {
        sync_dir(parent);
    }
    debug!(path = %target.display(), len = bytes.len(), "replaced file");
    Ok(modified)
}

fn write_then_rename(
    target: &Path,
    temp: &Path,
    bytes: &[u8],
    before_rename: Option<&PreRenameHook>,
) -> StorageResult<SystemTime> {
    let modified = {
        let mut file = File::create(temp).at(temp)?;
        file.write_all(bytes).at(temp)?;
        file.sync_all().at(temp)?;
        if let Some(hook) = before_rename {
            hook(temp);
        }
        file.metadata().and_then(|m| m.modified()).at(temp)?
    };
    // Rename preserves the inode, so this is the target's mtime once renamed.
    fs::rename(temp, target).at(target)?;
    Ok(modified)
}

/// Modification time of `path`, or `None` if it does not exist.
pub fn modified_time(path: &Path) -> StorageResult<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.modified().at(path)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).at(path),
    }
}

/// Remove a file, treating "already gone" as success. Returns whether a file
/// was removed.
pub fn remove_if_exists(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).at(path),
    }
}

/// Persist a rename in the parent directory entry. Best effort: not every
/// platform or filesystem supports syncing a directory handle.
fn sync_dir(dir: &Path) {
    if cfg!(unix) {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
}
