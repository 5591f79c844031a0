use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use kvault_kv::KeyValueEngine;

use crate::cluster::{ClusterGroup, ReloadTask};
use crate::error::{WatchError, WatchResult};
use crate::event::{FsEvent, FsEventKind};
use crate::source::EventSource;

/// How long the watcher thread blocks per batch before checking for shutdown.
const DEFAULT_TICK: Duration = Duration::from_millis(200);

/// What [`ChangeWatcher::handle_event`] did with one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchAction {
    /// Not a document, never seen by this process, or this process's own write.
    Ignored,
    /// This node owns the namespace and asked the cluster to reload it.
    ReloadRequested,
    /// This node does not own the namespace and dropped its cached copy.
    Evicted,
}

/// Turns filesystem notifications into cache evictions or reload requests.
pub struct ChangeWatcher {
    engine: Arc<KeyValueEngine>,
    cluster: Arc<dyn ClusterGroup>,
    tick: Duration,
}

impl ChangeWatcher {
    pub fn new(engine: Arc<KeyValueEngine>, cluster: Arc<dyn ClusterGroup>) -> Self {
        Self {
            engine,
            cluster,
            tick: DEFAULT_TICK,
        }
    }

    /// Upper bound on how long shutdown waits for the thread to notice.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Decide and apply the response to one event.
    pub fn handle_event(&self, event: &FsEvent) -> WatchResult<WatchAction> {
        let Some(namespace) = self
            .engine
            .resolver()
            .namespace_from_document(&event.path)
        else {
            return Ok(WatchAction::Ignored);
        };
        let path = self.engine.resolver().document_path(&namespace)?;

        // Never read or written here: nothing cached to go stale.
        let Some(recorded) = self.engine.recorded_timestamp(&path) else {
            return Ok(WatchAction::Ignored);
        };

        if !self.cluster.is_local_owner(&namespace) {
            self.engine.evict(&path);
            debug!(%namespace, kind = %event.kind, "evicted after external change");
            return Ok(WatchAction::Evicted);
        }

        let changed = match (event.kind, event.modified) {
            (FsEventKind::Delete, _) => true,
            (_, Some(modified)) => modified > recorded,
            (_, None) => true,
        };
        if !changed {
            return Ok(WatchAction::Ignored);
        }

        self.cluster.submit(ReloadTask {
            namespace: namespace.clone(),
            path,
            observed: event.modified,
        })?;
        debug!(%namespace, kind = %event.kind, "requested reload");
        Ok(WatchAction::ReloadRequested)
    }

    /// Run the watch loop on a dedicated thread until the handle is shut down
    /// or dropped, or the source closes.
    pub fn spawn<S>(self, source: S) -> WatchResult<WatcherHandle>
    where
        S: EventSource + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("kvault-watch".into())
            .spawn(move || self.run(source, &flag))
            .map_err(WatchError::Spawn)?;
        Ok(WatcherHandle {
            stop,
            thread: Some(thread),
        })
    }

    fn run<S: EventSource>(&self, mut source: S, stop: &AtomicBool) {
        info!(base = %self.engine.resolver().base().display(), "change watcher started");
        while !stop.load(Ordering::Acquire) {
            let batch = match source.next_batch(self.tick) {
                Ok(batch) => batch,
                Err(WatchError::SourceClosed) => {
                    info!("event source closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read change events");
                    thread::sleep(self.tick);
                    continue;
                }
            };
            for event in &batch {
                if let Err(e) = self.handle_event(event) {
                    warn!(%event, error = %e, "failed to handle change event");
                }
            }
        }
        info!("change watcher stopped");
    }
}

impl fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("base", &self.engine.resolver().base())
            .field("local_member", &self.cluster.local_member())
            .field("tick", &self.tick)
            .finish()
    }
}

/// Owns the watcher thread. Dropping the handle stops and joins it.
#[derive(Debug)]
pub struct WatcherHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop and wait for the thread to exit.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("change watcher thread panicked");
            }
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
