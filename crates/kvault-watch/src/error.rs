use kvault_fs::StorageError;

/// Errors produced by the change watcher.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Filesystem failure while scanning or reloading.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The cluster refused or failed to accept a task.
    #[error("cluster error: {0}")]
    Cluster(String),

    /// The watcher thread could not be started.
    #[error("cannot spawn watcher thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The event source can produce no further events.
    #[error("event source closed")]
    SourceClosed,
}

pub type WatchResult<T> = std::result::Result<T, WatchError>;
