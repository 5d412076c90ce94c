use crate::index::l2p::L2pHeader;
use crate::index::p2l::{P2lEntry, P2lHeader};
use crate::node::dirent::{DirEntry, Entries};
use crate::node::id::Revision;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hit/miss counters shared by all the keyed caches.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub inserts: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
}

impl CacheMetrics {
    #[must_use]
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
        }
    }
}

/// A small LRU keyed cache handing out `Arc` clones of immutable values.
pub struct KeyedCache<K: std::hash::Hash + Eq, V> {
    store: Mutex<LruCache<K, Arc<V>>>,
    pub metrics: CacheMetrics,
}

impl<K: std::hash::Hash + Eq, V> KeyedCache<K, V> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity >= 1");
        Self { store: Mutex::new(LruCache::new(capacity)), metrics: CacheMetrics::default() }
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let found = self.store.lock().get(key).cloned();
        match &found {
            Some(_) => self.metrics.hits.fetch_add(1, Ordering::Relaxed),
            None => self.metrics.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn contains(&self, key: &K) -> bool {
        self.store.lock().contains(key)
    }

    pub fn put(&self, key: K, value: Arc<V>) {
        self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
        self.store.lock().put(key, value);
    }

    /// Partial get: apply F to the cached value without materialising a
    /// copy. Index math over a shared immutable header goes through here.
    pub fn with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.get(key).map(|v| f(&v))
    }
}

/// Cache key for per-revision index data. The second component is the
/// is-packed flag; this build never packs, so it stays `false`.
pub type RevKey = (Revision, bool);
/// Cache key for a single index page of a revision.
pub type PageKey = (Revision, bool, u64);

/// All shared caches owned by a repository handle.
pub struct Caches {
    pub youngest: RwLock<Option<Revision>>,
    pub min_unpacked: RwLock<Revision>,
    pub l2p_headers: KeyedCache<RevKey, L2pHeader>,
    pub l2p_pages: KeyedCache<PageKey, Vec<u64>>,
    pub p2l_headers: KeyedCache<RevKey, P2lHeader>,
    pub p2l_pages: KeyedCache<PageKey, Vec<P2lEntry>>,
    /// Entry maps of directories mutated inside open transactions, keyed
    /// by the directory's node-revision id. Patched in place on changes.
    txn_dir_entries: Mutex<HashMap<String, Arc<RwLock<Entries>>>>,
}

impl Default for Caches {
    fn default() -> Self {
        Self::new()
    }
}

impl Caches {
    #[must_use]
    pub fn new() -> Self {
        Self {
            youngest: RwLock::new(None),
            min_unpacked: RwLock::new(0),
            l2p_headers: KeyedCache::new(64),
            l2p_pages: KeyedCache::new(512),
            p2l_headers: KeyedCache::new(64),
            p2l_pages: KeyedCache::new(512),
            txn_dir_entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir_entries(&self, id: &str) -> Option<Arc<RwLock<Entries>>> {
        self.txn_dir_entries.lock().get(id).cloned()
    }

    pub fn set_dir_entries(&self, id: &str, entries: Entries) -> Arc<RwLock<Entries>> {
        let shared = Arc::new(RwLock::new(entries));
        self.txn_dir_entries.lock().insert(id.to_string(), shared.clone());
        shared
    }

    /// Partial set: patch one name in a cached entry map instead of
    /// recomputing the whole directory.
    pub fn patch_dir_entry(&self, id: &str, name: &str, entry: Option<DirEntry>) {
        if let Some(shared) = self.dir_entries(id) {
            let mut entries = shared.write();
            match entry {
                Some(entry) => {
                    entries.insert(name.to_string(), entry);
                }
                None => {
                    entries.remove(name);
                }
            }
        }
    }

    pub fn forget_dir_entries(&self, id: &str) {
        self.txn_dir_entries.lock().remove(id);
    }

    /// Drop every cached entry map belonging to TXN (by id prefix).
    pub fn forget_txn(&self, txn_prefix: &str) {
        self.txn_dir_entries.lock().retain(|key, _| !key.starts_with(txn_prefix));
    }
}
