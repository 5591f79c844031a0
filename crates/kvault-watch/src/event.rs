use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Create,
    Modify,
    Delete,
}

impl fmt::Display for FsEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One filesystem change under a watched directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
    /// Modification time observed with the event. Always `None` for deletes.
    pub modified: Option<SystemTime>,
}

impl FsEvent {
    pub fn created(path: impl Into<PathBuf>, modified: SystemTime) -> Self {
        Self {
            kind: FsEventKind::Create,
            path: path.into(),
            modified: Some(modified),
        }
    }

    pub fn modified(path: impl Into<PathBuf>, modified: SystemTime) -> Self {
        Self {
            kind: FsEventKind::Modify,
            path: path.into(),
            modified: Some(modified),
        }
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Delete,
            path: path.into(),
            modified: None,
        }
    }
}

impl fmt::Display for FsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.path.display())
    }
}
