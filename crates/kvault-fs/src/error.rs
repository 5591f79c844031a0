use std::io;
use std::path::{Path, PathBuf};

use kvault_types::TypeError;

/// Errors from kvault storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Reading, writing, renaming or deleting a file or directory failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A namespace resolved to a path outside the storage root.
    #[error("namespace {namespace:?} resolves to {} outside the storage root", .path.display())]
    PathEscape { namespace: String, path: PathBuf },

    /// The requested key, blob or namespace does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// A document on disk could not be parsed.
    #[error("cannot decode {}: {reason}", .path.display())]
    Decode { path: PathBuf, reason: String },

    /// A namespace id or digest was rejected before touching the disk.
    #[error(transparent)]
    Invalid(#[from] TypeError),
}

/// Caller-facing category of a [`StorageError`].
///
/// Callers usually only need to tell "absent" apart from "broken": absent is
/// an expected outcome, the other two are infrastructure failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Any failure to read, write, rename or delete, including path-safety
    /// violations and rejected ids.
    StorageIo,
    /// The requested entity does not exist.
    NotFound,
    /// On-disk content is malformed.
    Decode,
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::PathEscape { .. } | Self::Invalid(_) => ErrorKind::StorageIo,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Decode { .. } => ErrorKind::Decode,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Attach the offending path to a raw `io::Result`.
pub trait IoResultExt<T> {
    fn at(self, path: &Path) -> StorageResult<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> StorageResult<T> {
        self.map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
