//! The cluster membership seam.
//!
//! kvault does not implement membership or ownership itself. A deployment
//! plugs its own [`ClusterGroup`] in; [`SingleNodeCluster`] covers the
//! standalone case where the local process owns every namespace.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use kvault_types::NamespaceId;

use crate::error::WatchResult;

/// Identity of one cluster member.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh, time-ordered id (UUIDv7).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Request to re-read a namespace from disk on the node that owns it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReloadTask {
    pub namespace: NamespaceId,
    pub path: PathBuf,
    /// Modification time carried by the triggering event; `None` after a delete.
    pub observed: Option<SystemTime>,
}

/// Ownership and task dispatch for a group of cooperating nodes.
pub trait ClusterGroup: Send + Sync {
    /// The node currently responsible for `namespace`.
    fn service_owner(&self, namespace: &NamespaceId) -> NodeId;

    /// This process's identity.
    fn local_member(&self) -> NodeId;

    /// Hand a reload task to the cluster for execution.
    fn submit(&self, task: ReloadTask) -> WatchResult<()>;

    fn is_local_owner(&self, namespace: &NamespaceId) -> bool {
        self.service_owner(namespace) == self.local_member()
    }
}

type ReloadHandler = dyn Fn(&ReloadTask) -> WatchResult<()> + Send + Sync;

/// Number of recent tasks [`SingleNodeCluster`] keeps for inspection.
pub const RECENT_TASK_LIMIT: usize = 64;

/// A cluster of one: the local node owns every namespace.
///
/// Submitted tasks are run synchronously on the submitting thread if a
/// handler is installed. The last [`RECENT_TASK_LIMIT`] tasks are kept; older
/// ones are dropped so a long-running watcher stays bounded.
pub struct SingleNodeCluster {
    node: NodeId,
    handler: Option<Box<ReloadHandler>>,
    recent: Mutex<VecDeque<ReloadTask>>,
}

impl SingleNodeCluster {
    pub fn new() -> Self {
        Self::with_node(NodeId::generate())
    }

    pub fn with_node(node: NodeId) -> Self {
        Self {
            node,
            handler: None,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_TASK_LIMIT)),
        }
    }

    /// Run `handler` for every submitted task.
    pub fn with_handler(
        mut self,
        handler: impl Fn(&ReloadTask) -> WatchResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// The most recently submitted tasks, oldest first.
    pub fn submitted(&self) -> Vec<ReloadTask> {
        let recent = self.recent.lock().expect("task log poisoned");
        recent.iter().cloned().collect()
    }
}

impl Default for SingleNodeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SingleNodeCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleNodeCluster")
            .field("node", &self.node)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl ClusterGroup for SingleNodeCluster {
    fn service_owner(&self, _namespace: &NamespaceId) -> NodeId {
        self.node.clone()
    }

    fn local_member(&self) -> NodeId {
        self.node.clone()
    }

    fn submit(&self, task: ReloadTask) -> WatchResult<()> {
        debug!(namespace = %task.namespace, "reload task submitted");
        {
            let mut recent = self.recent.lock().expect("task log poisoned");
            if recent.len() == RECENT_TASK_LIMIT {
                recent.pop_front();
            }
            recent.push_back(task.clone());
        }
        match &self.handler {
            Some(handler) => handler(&task),
            None => Ok(()),
        }
    }
}
