//! Change watching for kvault stores shared between processes.
//!
//! A [`ChangeWatcher`] consumes create/modify/delete notifications for a
//! key-value store's base directory. For every document it has read or
//! written before, it either evicts the local cache entry (this node does not
//! own the namespace) or asks the [`ClusterGroup`] to reload the namespace
//! (this node owns it and the file changed behind its back).
//!
//! Notifications come from an [`EventSource`]: [`PollingEventSource`] scans
//! the directory, [`ChannelEventSource`] lets an embedder push events.

pub mod cluster;
pub mod config;
pub mod error;
pub mod event;
pub mod source;
pub mod watcher;

pub use cluster::{ClusterGroup, NodeId, ReloadTask, SingleNodeCluster, RECENT_TASK_LIMIT};
pub use config::WatchConfig;
pub use error::{WatchError, WatchResult};
pub use event::{FsEvent, FsEventKind};
pub use source::{ChannelEventSource, EventSource, PollingEventSource};
pub use watcher::{ChangeWatcher, WatchAction, WatcherHandle};
