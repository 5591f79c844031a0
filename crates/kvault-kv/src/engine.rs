use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use kvault_fs::atomic::{modified_time, remove_if_exists};
use kvault_fs::{IoResultExt, PathResolver, StorageResult, StoreConfig, StripedLockRegistry};
use kvault_types::{NamespaceId, Value};

use crate::cache::{DocumentCache, TimestampTable};
use crate::document::{AtomicDocumentStore, Document};
use crate::traits::{EntryStream, IdStream, KeyValueStore};

/// Filesystem-backed [`KeyValueStore`].
///
/// Reads go through the [`DocumentCache`] whenever the cached copy's
/// modification time still matches the file. Writes load the current
/// document the same way, apply the change in memory, and replace the file
/// whole.
///
/// Empty documents are never cached. A namespace with no entries is re-read
/// from disk on every access, which keeps a concurrently created document on
/// a shared directory from being masked by a cached empty one.
#[derive(Debug)]
pub struct KeyValueEngine {
    store: AtomicDocumentStore,
    cache: DocumentCache,
    timestamps: TimestampTable,
    locks: StripedLockRegistry,
}

impl KeyValueEngine {
    /// Open (or create) a store rooted at `config.directory`.
    pub fn open(config: &StoreConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.directory).at(&config.directory)?;
        let resolver = PathResolver::new(&config.directory)?;
        Ok(Self {
            store: AtomicDocumentStore::new(resolver),
            cache: DocumentCache::new(),
            timestamps: TimestampTable::new(),
            locks: StripedLockRegistry::new(config.lock_stripes),
        })
    }

    /// Run `hook` between temp-file write and rename on every mutation.
    pub fn with_pre_rename_hook(mut self, hook: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.store = self.store.with_pre_rename_hook(hook);
        self
    }

    pub fn resolver(&self) -> &PathResolver {
        self.store.resolver()
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    pub fn locks(&self) -> &StripedLockRegistry {
        &self.locks
    }

    /// The modification time this process last read or wrote at `path`.
    pub fn recorded_timestamp(&self, path: &Path) -> Option<SystemTime> {
        self.timestamps.get(path)
    }

    /// Drop the cached document for `path`. Safe without the stripe lock.
    pub fn evict(&self, path: &Path) -> bool {
        let evicted = self.cache.evict(path);
        if evicted {
            debug!(path = %path.display(), "evicted cached document");
        }
        evicted
    }

    /// Discard any cached copy of the namespace and re-read it from disk.
    ///
    /// Returns the number of entries now in the document. This is what a
    /// cluster reload task runs on the owning node.
    pub fn reload(&self, id: &NamespaceId) -> StorageResult<usize> {
        let _guard = self.locks.lock(id);
        let path = self.resolver().document_path(id)?;
        self.cache.evict(&path);
        let (_, document) = self.load_locked(id)?;
        debug!(namespace = %id, entries = document.len(), "reloaded namespace");
        Ok(document.len())
    }

    /// Current document for `id`. Caller must hold the namespace's stripe.
    fn load_locked(&self, id: &NamespaceId) -> StorageResult<(PathBuf, Arc<Document>)> {
        let path = self.resolver().document_path(id)?;

        match modified_time(&path)? {
            None => {
                self.cache.evict(&path);
                return Ok((path, Arc::new(Document::new())));
            }
            Some(on_disk) => {
                if let Some(document) = self.cache.get_fresh(&path, on_disk) {
                    return Ok((path, document));
                }
            }
        }

        let Some((document, modified)) = self.store.load(&path)? else {
            // Deleted between the stat and the open.
            return Ok((path, Arc::new(Document::new())));
        };
        self.timestamps.record(path.clone(), modified);

        let document = Arc::new(document);
        if !document.is_empty() {
            self.cache
                .insert(path.clone(), Arc::clone(&document), modified);
        }
        Ok((path, document))
    }

    fn read<R>(&self, id: &NamespaceId, f: impl FnOnce(&Document) -> R) -> StorageResult<R> {
        let _guard = self.locks.lock(id);
        let (_, document) = self.load_locked(id)?;
        Ok(f(&document))
    }

    /// Apply `f` to the namespace's document and write the result back.
    ///
    /// `f` returns the operation's result and whether it changed anything; an
    /// unchanged document is not rewritten.
    fn mutate<R>(
        &self,
        id: &NamespaceId,
        f: impl FnOnce(&mut Document) -> (R, bool),
    ) -> StorageResult<R> {
        let _guard = self.locks.lock(id);
        let (path, current) = self.load_locked(id)?;
        let mut document = Arc::unwrap_or_clone(current);

        let (result, changed) = f(&mut document);
        if !changed {
            return Ok(result);
        }

        let modified = self.store.store(id, &document)?;
        self.timestamps.record(path.clone(), modified);
        if document.is_empty() {
            self.cache.evict(&path);
        } else {
            self.cache.insert(path, Arc::new(document), modified);
        }
        Ok(result)
    }
}

impl KeyValueStore for KeyValueEngine {
    fn contains(&self, id: &NamespaceId, key: &str) -> StorageResult<bool> {
        self.read(id, |doc| doc.contains_key(key))
    }

    fn get(&self, id: &NamespaceId, key: &str) -> StorageResult<Option<Value>> {
        self.read(id, |doc| doc.get(key).cloned())
    }

    fn put(&self, id: &NamespaceId, key: &str, value: Value) -> StorageResult<Option<Value>> {
        value.validate()?;
        let previous = self.mutate(id, |doc| (doc.insert(key.to_string(), value), true))?;
        debug!(namespace = %id, key, replaced = previous.is_some(), "put");
        Ok(previous)
    }

    fn remove(&self, id: &NamespaceId, key: &str) -> StorageResult<Option<Value>> {
        let previous = self.mutate(id, |doc| {
            let previous = doc.remove(key);
            let changed = previous.is_some();
            (previous, changed)
        })?;
        debug!(namespace = %id, key, removed = previous.is_some(), "remove");
        Ok(previous)
    }

    fn stream(&self, id: &NamespaceId) -> StorageResult<EntryStream> {
        let _guard = self.locks.lock(id);
        let (_, document) = self.load_locked(id)?;
        Ok(Arc::unwrap_or_clone(document).into_iter())
    }

    fn id_stream(&self) -> StorageResult<IdStream> {
        let base = self.resolver().base();
        let entries = match fs::read_dir(base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new().into_iter()),
            Err(e) => return Err(e).at(base),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.at(base)?;
            if !entry.file_type().at(&entry.path())?.is_file() {
                continue;
            }
            if let Some(id) = self.resolver().namespace_from_document(&entry.path()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids.into_iter())
    }

    fn delete_storage(&self, id: &NamespaceId) -> StorageResult<bool> {
        let _guard = self.locks.lock(id);
        let path = self.resolver().document_path(id)?;
        let temp = self.resolver().temp_document_path(id)?;

        let existed = remove_if_exists(&path)?;
        remove_if_exists(&temp)?;
        self.cache.evict(&path);
        self.timestamps.forget(&path);

        debug!(namespace = %id, existed, "deleted namespace storage");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvault_fs::ErrorKind;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn ns(s: &str) -> NamespaceId {
        NamespaceId::new(s).unwrap()
    }

    fn engine_in(dir: &Path) -> KeyValueEngine {
        KeyValueEngine::open(&StoreConfig::new(dir)).unwrap()
    }

    #[test]
    fn example_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine_in(dir.path());
        let cfg = ns("cfg");

        assert_eq!(kv.put(&cfg, "host", Value::from("db1")).unwrap(), None);
        assert_eq!(kv.put(&cfg, "port", Value::from("5432")).unwrap(), None);

        let entries: HashMap<String, Value> = kv.stream(&cfg).unwrap().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["host"], Value::from("db1"));
        assert_eq!(entries["port"], Value::from("5432"));

        assert!(kv.delete_storage(&cfg).unwrap());
        assert_eq!(kv.get(&cfg, "host").unwrap(), None);
        assert!(!dir.path().join("cfg.json").exists());
    }

    #[test]
    fn put_returns_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine_in(dir.path());
        let id = ns("cfg");

        kv.put(&id, "k", Value::from(1)).unwrap();
        let prev = kv.put(&id, "k", Value::from(2)).unwrap();
        assert_eq!(prev, Some(Value::from(1)));
        assert_eq!(kv.get(&id, "k").unwrap(), Some(Value::from(2)));
    }

    #[test]
    fn remove_and_contains() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine_in(dir.path());
        let id = ns("cfg");

        assert!(!kv.contains(&id, "k").unwrap());
        assert_eq!(kv.remove(&id, "k").unwrap(), None);
        // Removing from an absent namespace must not create it.
        assert!(!dir.path().join("cfg.json").exists());

        kv.put(&id, "k", Value::from(true)).unwrap();
        assert!(kv.contains(&id, "k").unwrap());
        assert_eq!(kv.remove(&id, "k").unwrap(), Some(Value::from(true)));
        assert!(!kv.contains(&id, "k").unwrap());
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = ns("flows");
        let value = Value::List(vec![Value::from("a"), Value::Bytes(vec![1, 2, 3])]);
        engine_in(dir.path()).put(&id, "k", value.clone()).unwrap();

        let reopened = engine_in(dir.path());
        assert_eq!(reopened.get(&id, "k").unwrap(), Some(value));
    }

    #[test]
    fn id_stream_lists_documents_only() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine_in(dir.path());
        kv.put(&ns("b"), "k", Value::Null).unwrap();
        kv.put(&ns("a"), "k", Value::Null).unwrap();
        fs::write(dir.path().join("stray.json.tmp"), b"{").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("dir.json")).unwrap();

        let ids: Vec<NamespaceId> = kv.id_stream().unwrap().collect();
        assert_eq!(ids, vec![ns("a"), ns("b")]);
    }

    #[test]
    fn id_stream_of_missing_base_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine_in(&dir.path().join("kv"));
        fs::remove_dir(dir.path().join("kv")).unwrap();
        assert_eq!(kv.id_stream().unwrap().count(), 0);
    }

    #[test]
    fn reads_are_cached_until_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine_in(dir.path());
        let id = ns("cfg");
        kv.put(&id, "k", Value::from(1)).unwrap();

        let misses = kv.cache().misses();
        for _ in 0..5 {
            kv.get(&id, "k").unwrap();
        }
        assert_eq!(kv.cache().misses(), misses);
        assert!(kv.cache().hits() >= 5);

        // Another engine on the same directory stands in for another node.
        let other = engine_in(dir.path());
        thread::sleep(Duration::from_millis(20));
        other.put(&id, "k", Value::from(2)).unwrap();
        assert_eq!(kv.get(&id, "k").unwrap(), Some(Value::from(2)));
    }

    #[test]
    fn empty_documents_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine_in(dir.path());
        let id = ns("empty");
        kv.put(&id, "k", Value::from(1)).unwrap();
        kv.remove(&id, "k").unwrap();
        assert!(dir.path().join("empty.json").exists());

        let path = kv.resolver().document_path(&id).unwrap();
        let (hits, misses) = (kv.cache().hits(), kv.cache().misses());
        for _ in 0..3 {
            assert_eq!(kv.get(&id, "k").unwrap(), None);
            assert!(!kv.cache().contains(&path));
        }
        assert_eq!(kv.cache().misses() - misses, 3);
        assert_eq!(kv.cache().hits(), hits);
    }

    #[test]
    fn malformed_document_fails_the_read() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine_in(dir.path());
        fs::write(dir.path().join("bad.json"), b"not json").unwrap();

        let err = kv.get(&ns("bad"), "k").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        let err = kv.put(&ns("bad"), "k", Value::Null).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(fs::read(dir.path().join("bad.json")).unwrap(), b"not json");
    }

    #[test]
    fn non_finite_float_is_rejected_and_namespace_stays_readable() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine_in(dir.path());
        kv.put(&ns("cfg"), "good", Value::from("keep")).unwrap();
        let before = fs::read(dir.path().join("cfg.json")).unwrap();

        for bad in [
            Value::Float(f64::NAN),
            Value::Float(f64::INFINITY),
            Value::List(vec![Value::Float(f64::NAN)]),
        ] {
            let err = kv.put(&ns("cfg"), "bad", bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::StorageIo);
        }
        assert_eq!(fs::read(dir.path().join("cfg.json")).unwrap(), before);

        // A fresh engine bypasses the cache and must still decode the file.
        let reopened = engine_in(dir.path());
        assert_eq!(
            reopened.get(&ns("cfg"), "good").unwrap(),
            Some(Value::from("keep"))
        );
        assert!(!reopened.contains(&ns("cfg"), "bad").unwrap());
        reopened.put(&ns("cfg"), "x", Value::from(1)).unwrap();
    }

    #[test]
    fn traversal_ids_are_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("kv");
        let kv = engine_in(&base);
        fs::write(dir.path().join("victim.json"), b"{}").unwrap();

        let err = kv.delete_storage(&ns("../victim")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageIo);
        assert!(dir.path().join("victim.json").exists());

        let err = kv.put(&ns("nested/id"), "k", Value::Null).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageIo);
    }

    #[test]
    fn concurrent_puts_form_a_linear_history() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(engine_in(dir.path()));
        let id = ns("race");
        let n = 16;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let kv = Arc::clone(&kv);
                let id = id.clone();
                thread::spawn(move || kv.put(&id, "k", Value::from(i as i64)).unwrap())
            })
            .collect();
        let previous: Vec<Option<Value>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let last = kv.get(&id, "k").unwrap().unwrap();

        // Every input is either some later writer's "previous" or the final
        // value, exactly once; exactly one writer saw an empty key.
        assert_eq!(previous.iter().filter(|p| p.is_none()).count(), 1);
        let mut seen: Vec<i64> = previous
            .iter()
            .flatten()
            .map(|v| v.as_i64().unwrap())
            .collect();
        seen.push(last.as_i64().unwrap());
        let seen_set: BTreeSet<i64> = seen.iter().copied().collect();
        assert_eq!(seen.len(), n);
        assert_eq!(seen_set, (0..n as i64).collect::<BTreeSet<i64>>());
    }

    #[test]
    fn concurrent_puts_to_distinct_keys_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(engine_in(dir.path()));
        let id = ns("many");

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let kv = Arc::clone(&kv);
                let id = id.clone();
                thread::spawn(move || {
                    for i in 0..10 {
                        kv.put(&id, &format!("t{t}-{i}"), Value::from(i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(kv.stream(&id).unwrap().count(), 80);
    }

    #[test]
    fn namespaces_on_other_stripes_are_not_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(engine_in(dir.path()));
        let a = ns("a");
        let b = (0..)
            .map(|i| ns(&format!("b{i}")))
            .find(|b| kv.locks().stripe_index(b) != kv.locks().stripe_index(&a))
            .unwrap();

        let held = kv.locks().lock(&a);

        let (tx, rx) = mpsc::channel();
        let kv2 = Arc::clone(&kv);
        let b2 = b.clone();
        let other = thread::spawn(move || {
            kv2.put(&b2, "k", Value::from(1)).unwrap();
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(5))
            .expect("put on an unrelated namespace should not wait");
        other.join().unwrap();

        let (tx, rx) = mpsc::channel();
        let kv3 = Arc::clone(&kv);
        let a2 = a.clone();
        let same = thread::spawn(move || {
            kv3.put(&a2, "k", Value::from(1)).unwrap();
            tx.send(()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        same.join().unwrap();
    }

    #[test]
    fn other_readers_never_see_a_partial_document() {
        let dir = tempfile::tempdir().unwrap();
        let id = ns("cfg");
        let reader = engine_in(dir.path());
        engine_in(dir.path()).put(&id, "v", Value::from(1)).unwrap();

        let reader_dir = dir.path().to_path_buf();
        let (tx, rx) = mpsc::channel();
        let writer = engine_in(dir.path()).with_pre_rename_hook(move |_| {
            // A separate engine has its own locks, like a process on another node.
            let observer = engine_in(&reader_dir);
            let seen = observer.get(&ns("cfg"), "v").unwrap();
            tx.send(seen).unwrap();
        });
        writer.put(&id, "v", Value::from(2)).unwrap();

        assert_eq!(rx.recv().unwrap(), Some(Value::from(1)));
        assert_eq!(reader.get(&id, "v").unwrap(), Some(Value::from(2)));
    }

    #[test]
    fn reload_rereads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine_in(dir.path());
        let id = ns("cfg");
        kv.put(&id, "a", Value::from(1)).unwrap();
        kv.put(&id, "b", Value::from(2)).unwrap();

        assert_eq!(kv.reload(&id).unwrap(), 2);
        assert_eq!(kv.reload(&ns("absent")).unwrap(), 0);
    }

    #[test]
    fn delete_storage_purges_cache_and_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let kv = engine_in(dir.path());
        let id = ns("cfg");
        kv.put(&id, "k", Value::from(1)).unwrap();
        let path = kv.resolver().document_path(&id).unwrap();
        assert!(kv.cache().contains(&path));
        assert!(kv.recorded_timestamp(&path).is_some());

        kv.delete_storage(&id).unwrap();
        assert!(!kv.cache().contains(&path));
        assert!(kv.recorded_timestamp(&path).is_none());
        assert!(!kv.delete_storage(&id).unwrap());
        assert_eq!(kv.id_stream().unwrap().count(), 0);
    }

    mod roundtrip {
        use super::*;
        use proptest::prelude::*;

        fn arb_scalar() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(Value::Int),
                (-1.0e12f64..1.0e12).prop_map(Value::Float),
                "[ -~]{0,16}".prop_map(Value::String),
                proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn get_returns_what_put_stored(key in "[a-z]{1,8}", value in arb_scalar()) {
                let dir = tempfile::tempdir().unwrap();
                let kv = engine_in(dir.path());
                let id = ns("prop");
                kv.put(&id, &key, value.clone()).unwrap();
                prop_assert_eq!(kv.get(&id, &key).unwrap(), Some(value.clone()));
                // A fresh engine has to decode it from disk.
                prop_assert_eq!(engine_in(dir.path()).get(&id, &key).unwrap(), Some(value));
            }
        }
    }
}
