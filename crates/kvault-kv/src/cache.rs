use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::document::Document;

struct CacheEntry {
    document: Arc<Document>,
    modified: SystemTime,
}

/// Parsed documents keyed by file path.
///
/// An entry answers a read only while its recorded modification time equals
/// the file's current one; a mismatch drops the entry. The map is shared by
/// all namespaces, but entries for one namespace are only inserted while
/// holding that namespace's stripe lock. Eviction from the change watcher
/// does not take the stripe lock: removing an entry never touches the file
/// and at worst costs one extra read.
#[derive(Default)]
pub struct DocumentCache {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached document for `path`, if it was parsed from a file with
    /// modification time `on_disk`. A stale entry is dropped.
    pub fn get_fresh(&self, path: &Path, on_disk: SystemTime) -> Option<Arc<Document>> {
        {
            let entries = self.entries.read().expect("cache lock poisoned");
            match entries.get(path) {
                Some(entry) if entry.modified == on_disk => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(Arc::clone(&entry.document));
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }
        self.evict(path);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, path: PathBuf, document: Arc<Document>, modified: SystemTime) {
        self.entries
            .write()
            .expect("cache lock poisoned")
            .insert(path, CacheEntry { document, modified });
    }

    /// Drop the entry for `path`. Returns `true` if one was present.
    pub fn evict(&self, path: &Path) -> bool {
        self.entries
            .write()
            .expect("cache lock poisoned")
            .remove(path)
            .is_some()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries
            .read()
            .expect("cache lock poisoned")
            .contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Reads that had to go to disk.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCache")
            .field("entries", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

/// Last modification time this process observed for each document file,
/// either by reading it or by writing it.
///
/// The change watcher compares notification timestamps against this table to
/// tell this process's own writes from external ones. A path with no entry
/// was never touched here, so there is nothing to invalidate for it.
#[derive(Debug, Default)]
pub struct TimestampTable {
    times: RwLock<HashMap<PathBuf, SystemTime>>,
}

impl TimestampTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, path: PathBuf, modified: SystemTime) {
        self.times
            .write()
            .expect("timestamp lock poisoned")
            .insert(path, modified);
    }

    pub fn get(&self, path: &Path) -> Option<SystemTime> {
        self.times
            .read()
            .expect("timestamp lock poisoned")
            .get(path)
            .copied()
    }

    pub fn forget(&self, path: &Path) -> Option<SystemTime> {
        self.times
            .write()
            .expect("timestamp lock poisoned")
            .remove(path)
    }

    pub fn len(&self) -> usize {
        self.times.read().expect("timestamp lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
