use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use walkdir::WalkDir;

use kvault_fs::StorageError;

use crate::error::{WatchError, WatchResult};
use crate::event::FsEvent;

/// A stream of filesystem change notifications.
pub trait EventSource: Send {
    /// Block for up to `timeout` waiting for changes.
    ///
    /// Returns an empty batch if nothing changed in time, and
    /// [`WatchError::SourceClosed`] once no more events can arrive.
    fn next_batch(&mut self, timeout: Duration) -> WatchResult<Vec<FsEvent>>;
}

/// Detects changes by rescanning a directory tree and diffing modification
/// times against the previous scan.
///
/// Files present when the source is created are the baseline and are not
/// reported. Two writes to one file inside a single interval that leave the
/// same modification time are invisible.
#[derive(Debug)]
pub struct PollingEventSource {
    root: PathBuf,
    interval: Duration,
    snapshot: HashMap<PathBuf, SystemTime>,
}

impl PollingEventSource {
    pub fn new(root: impl Into<PathBuf>, interval: Duration) -> WatchResult<Self> {
        let root = root.into();
        let snapshot = scan(&root)?;
        Ok(Self {
            root,
            interval,
            snapshot,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan once and return what changed since the previous scan.
    pub fn poll(&mut self) -> WatchResult<Vec<FsEvent>> {
        let current = scan(&self.root)?;
        let events = diff(&self.snapshot, &current);
        self.snapshot = current;
        Ok(events)
    }
}

impl EventSource for PollingEventSource {
    fn next_batch(&mut self, timeout: Duration) -> WatchResult<Vec<FsEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            let events = self.poll()?;
            let now = Instant::now();
            if !events.is_empty() || now >= deadline {
                return Ok(events);
            }
            thread::sleep(self.interval.min(deadline - now));
        }
    }
}

fn scan(root: &Path) -> WatchResult<HashMap<PathBuf, SystemTime>> {
    let mut files = HashMap::new();
    if !root.is_dir() {
        return Ok(files);
    }
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            // Removed between listing and stat; the next scan reports it.
            Err(e) if vanished(&e) => continue,
            Err(e) => return Err(walk_error(root, e)),
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata().map_err(io::Error::from).and_then(|m| m.modified()) {
            Ok(modified) => {
                files.insert(entry.into_path(), modified);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StorageError::Io {
                    path: entry.into_path(),
                    source: e,
                }
                .into())
            }
        }
    }
    Ok(files)
}

fn vanished(err: &walkdir::Error) -> bool {
    err.io_error()
        .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}

fn walk_error(root: &Path, err: walkdir::Error) -> WatchError {
    let path = err.path().unwrap_or(root).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
    StorageError::Io { path, source }.into()
}

fn diff(old: &HashMap<PathBuf, SystemTime>, new: &HashMap<PathBuf, SystemTime>) -> Vec<FsEvent> {
    let mut events = Vec::new();
    for (path, &modified) in new {
        match old.get(path) {
            None => events.push(FsEvent::created(path.clone(), modified)),
            Some(&before) if before != modified => {
                events.push(FsEvent::modified(path.clone(), modified))
            }
            Some(_) => {}
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            events.push(FsEvent::deleted(path.clone()));
        }
    }
    events.sort_by(|a, b| a.path.cmp(&b.path));
    events
}

/// Events pushed through an `mpsc` channel, for embedders with their own
/// notification mechanism.
#[derive(Debug)]
pub struct ChannelEventSource {
    receiver: Receiver<FsEvent>,
}

impl ChannelEventSource {
    pub fn new(receiver: Receiver<FsEvent>) -> Self {
        Self { receiver }
    }
}

impl EventSource for ChannelEventSource {
    fn next_batch(&mut self, timeout: Duration) -> WatchResult<Vec<FsEvent>> {
        let first = match self.receiver.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => return Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => return Err(WatchError::SourceClosed),
        };
        let mut batch = vec![first];
        loop {
            match self.receiver.try_recv() {
                Ok(event) => batch.push(event),
                // Deliver what we have; a closed channel surfaces on the next call.
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FsEventKind;
    use std::fs::{self, File};
    use std::sync::mpsc;

    fn set_mtime(path: &Path, t: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(t)
            .unwrap();
    }

    #[test]
    fn baseline_is_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), b"{}").unwrap();
        let mut source = PollingEventSource::new(dir.path(), Duration::from_millis(5)).unwrap();
        assert!(source.poll().unwrap().is_empty());
    }

    #[test]
    fn create_modify_delete_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        let mut source = PollingEventSource::new(dir.path(), Duration::from_millis(5)).unwrap();

        fs::write(&path, b"{}").unwrap();
        let events = source.poll().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FsEventKind::Create);
        assert_eq!(events[0].path, path);

        let later = SystemTime::now() + Duration::from_secs(10);
        set_mtime(&path, later);
        let events = source.poll().unwrap();
        assert_eq!(events, vec![FsEvent::modified(path.clone(), later)]);

        fs::remove_file(&path).unwrap();
        assert_eq!(source.poll().unwrap(), vec![FsEvent::deleted(path)]);
    }

    #[test]
    fn nested_files_are_watched() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = PollingEventSource::new(dir.path(), Duration::from_millis(5)).unwrap();
        fs::create_dir_all(dir.path().join("ns/ab")).unwrap();
        fs::write(dir.path().join("ns/ab/cdef"), b"blob").unwrap();

        let events = source.poll().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].path.ends_with("ns/ab/cdef"));
    }

    #[test]
    fn next_batch_times_out_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = PollingEventSource::new(dir.path(), Duration::from_millis(5)).unwrap();
        let started = Instant::now();
        assert!(source.next_batch(Duration::from_millis(30)).unwrap().is_empty());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn missing_root_is_empty_until_created() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("later");
        let mut source = PollingEventSource::new(&root, Duration::from_millis(5)).unwrap();
        assert!(source.poll().unwrap().is_empty());

        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("x.json"), b"{}").unwrap();
        assert_eq!(source.poll().unwrap().len(), 1);
    }

    #[test]
    fn channel_source_batches_pending_events() {
        let (tx, rx) = mpsc::channel();
        let mut source = ChannelEventSource::new(rx);

        assert!(source.next_batch(Duration::from_millis(10)).unwrap().is_empty());

        tx.send(FsEvent::deleted("/a.json")).unwrap();
        tx.send(FsEvent::deleted("/b.json")).unwrap();
        assert_eq!(source.next_batch(Duration::from_millis(10)).unwrap().len(), 2);

        drop(tx);
        assert!(matches!(
            source.next_batch(Duration::from_millis(10)),
            Err(WatchError::SourceClosed)
        ));
    }
}
