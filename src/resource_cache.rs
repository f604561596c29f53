//! Size-bounded LRU cache of derived pixel data.
//!
//! Records are addressed by a [`CacheKey`] made of a namespace tag, a shared
//! ID (usually derived from a source generation ID) and a few payload words.
//! The cache evicts the least recently used records whenever the bytes they
//! report exceed the configured limit.
//!
//! Invalidation requests can come from any thread: a [`PurgeHandle`] posts
//! shared IDs into an inbox that the cache drains the next time it is used.
//! Until then a stale record may still be found, which is fine because cached
//! sources are expected to be immutable.
//!
//! There is no process-wide instance. Callers create a cache and share it
//! through an `Arc`.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace, warn};

use crate::discardable::DiscardableFactory;

/// Default total budget: 32 MiB.
pub const DEFAULT_TOTAL_BYTE_LIMIT: usize = 32 * 1024 * 1024;

const ENV_TOTAL_LIMIT: &str = "BITMAP_SAMPLING_CACHE_LIMIT";
const ENV_SINGLE_ALLOC_LIMIT: &str = "BITMAP_SAMPLING_SINGLE_ALLOC_LIMIT";

// ============================================================================
// Keys and records
// ============================================================================

/// Identity of a cache record. Compared and hashed by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: u32,
    shared_id: u64,
    payload: Vec<u32>,
}

impl CacheKey {
    pub fn new(namespace: u32, shared_id: u64, payload: Vec<u32>) -> Self {
        Self {
            namespace,
            shared_id,
            payload,
        }
    }

    pub fn namespace(&self) -> u32 {
        self.namespace
    }

    pub fn shared_id(&self) -> u64 {
        self.shared_id
    }

    pub fn payload(&self) -> &[u32] {
        &self.payload
    }

    /// Bytes the key itself accounts for.
    pub fn size(&self) -> usize {
        std::mem::size_of::<u32>() + std::mem::size_of::<u64>() + self.payload.len() * 4
    }
}

/// A value stored in a [`ResourceCache`].
pub trait CacheRec: Send + Sync + Any {
    fn key(&self) -> &CacheKey;
    /// Bytes charged against the cache budget.
    fn bytes_used(&self) -> usize;
    /// Short name used in log output.
    fn category(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
}

// ============================================================================
// Configuration
// ============================================================================

/// Budget and allocation settings for a [`ResourceCache`].
#[derive(Clone)]
pub struct ResourceCacheConfig {
    pub total_byte_limit: usize,
    /// Largest single allocation worth caching. 0 means no limit.
    pub single_allocation_byte_limit: usize,
    /// Allocator for cached payloads; `None` uses the heap.
    pub discardable: Option<DiscardableFactory>,
}

impl Default for ResourceCacheConfig {
    fn default() -> Self {
        Self {
            total_byte_limit: DEFAULT_TOTAL_BYTE_LIMIT,
            single_allocation_byte_limit: 0,
            discardable: None,
        }
    }
}

impl ResourceCacheConfig {
    /// Defaults, overridden by `BITMAP_SAMPLING_CACHE_LIMIT` and
    /// `BITMAP_SAMPLING_SINGLE_ALLOC_LIMIT` when they hold byte counts.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(limit) = read_env_bytes(ENV_TOTAL_LIMIT) {
            config.total_byte_limit = limit;
        }
        if let Some(limit) = read_env_bytes(ENV_SINGLE_ALLOC_LIMIT) {
            config.single_allocation_byte_limit = limit;
        }
        config
    }

    pub fn with_discardable(mut self, factory: DiscardableFactory) -> Self {
        self.discardable = Some(factory);
        self
    }
}

fn read_env_bytes(name: &str) -> Option<usize> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse::<usize>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("ignoring {}={:?}: {}", name, value, e);
            None
        }
    }
}

impl fmt::Debug for ResourceCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCacheConfig")
            .field("total_byte_limit", &self.total_byte_limit)
            .field(
                "single_allocation_byte_limit",
                &self.single_allocation_byte_limit,
            )
            .field("discardable", &self.discardable.is_some())
            .finish()
    }
}

// ============================================================================
// Purge inbox
// ============================================================================

/// Posts purge requests to a [`ResourceCache`] from any thread.
#[derive(Clone)]
pub struct PurgeHandle {
    tx: Sender<u64>,
}

impl PurgeHandle {
    /// Ask the cache to drop every record with `shared_id`. Applied the next
    /// time the cache is used; a no-op once the cache is gone.
    pub fn post(&self, shared_id: u64) {
        let _ = self.tx.send(shared_id);
    }
}

impl fmt::Debug for PurgeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PurgeHandle")
    }
}

// ============================================================================
// ResourceCache
// ============================================================================

struct Entry {
    rec: Arc<dyn CacheRec>,
    tick: u64,
}

struct Inner {
    map: HashMap<CacheKey, Entry>,
    // Access tick -> key, oldest first.
    lru: BTreeMap<u64, CacheKey>,
    total_bytes: usize,
    total_byte_limit: usize,
    tick: u64,
    purge_rx: Receiver<u64>,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &CacheKey) {
        let tick = self.next_tick();
        if let Some(entry) = self.map.get_mut(key) {
            self.lru.remove(&entry.tick);
            entry.tick = tick;
            self.lru.insert(tick, key.clone());
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Arc<dyn CacheRec>> {
        let entry = self.map.remove(key)?;
        self.lru.remove(&entry.tick);
        self.total_bytes -= entry.rec.bytes_used();
        Some(entry.rec)
    }

    fn drain_purge_inbox(&mut self) -> Vec<Arc<dyn CacheRec>> {
        let ids: Vec<u64> = self.purge_rx.try_iter().collect();
        let mut removed = Vec::new();
        for id in ids {
            removed.extend(self.purge_shared_id(id));
        }
        removed
    }

    fn purge_shared_id(&mut self, shared_id: u64) -> Vec<Arc<dyn CacheRec>> {
        let keys: Vec<CacheKey> = self
            .map
            .keys()
            .filter(|k| k.shared_id == shared_id)
            .cloned()
            .collect();
        let removed: Vec<_> = keys.iter().filter_map(|k| self.remove(k)).collect();
        if !removed.is_empty() {
            debug!(
                "resource cache: purged {} records for shared id {:#x}",
                removed.len(),
                shared_id
            );
        }
        removed
    }

    fn purge_as_needed(&mut self) -> Vec<Arc<dyn CacheRec>> {
        let mut evicted = Vec::new();
        while self.total_bytes > self.total_byte_limit {
            let Some((_, key)) = self.lru.pop_first() else {
                break;
            };
            if let Some(entry) = self.map.remove(&key) {
                self.total_bytes -= entry.rec.bytes_used();
                debug!(
                    "resource cache: evicted {} ({} bytes), {} bytes in use",
                    entry.rec.category(),
                    entry.rec.bytes_used(),
                    self.total_bytes
                );
                evicted.push(entry.rec);
            }
        }
        evicted
    }
}

/// A shared, size-bounded LRU cache. See the module documentation.
pub struct ResourceCache {
    inner: Mutex<Inner>,
    purge_tx: Sender<u64>,
    single_allocation_byte_limit: usize,
    discardable: Option<DiscardableFactory>,
}

impl ResourceCache {
    pub fn new(config: ResourceCacheConfig) -> Self {
        let (purge_tx, purge_rx) = mpsc::channel();
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                lru: BTreeMap::new(),
                total_bytes: 0,
                total_byte_limit: config.total_byte_limit,
                tick: 0,
                purge_rx,
            }),
            purge_tx,
            single_allocation_byte_limit: config.single_allocation_byte_limit,
            discardable: config.discardable,
        }
    }

    /// A heap-backed cache with the given total budget.
    pub fn with_byte_limit(total_byte_limit: usize) -> Self {
        Self::new(ResourceCacheConfig {
            total_byte_limit,
            ..ResourceCacheConfig::default()
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `key` and hand the record to `visitor`.
    ///
    /// A visitor returning `None` means the record is no longer usable (for
    /// example its memory was reclaimed); the record is removed and the
    /// lookup counts as a miss.
    pub fn find<R, F>(&self, key: &CacheKey, visitor: F) -> Option<R>
    where
        F: FnOnce(&dyn CacheRec) -> Option<R>,
    {
        // Records are dropped after the lock is released.
        let mut _dropped = Vec::new();
        let mut inner = self.lock();
        _dropped.extend(inner.drain_purge_inbox());

        let Some(rec) = inner.map.get(key).map(|e| Arc::clone(&e.rec)) else {
            trace!("resource cache: miss {:?}", key);
            return None;
        };
        match visitor(rec.as_ref()) {
            Some(result) => {
                inner.touch(key);
                trace!("resource cache: hit {} {:?}", rec.category(), key);
                Some(result)
            }
            None => {
                _dropped.extend(inner.remove(key));
                trace!("resource cache: stale {} {:?}", rec.category(), key);
                None
            }
        }
    }

    /// Insert `rec`. Returns false, discarding `rec`, when a record with the
    /// same key is already cached.
    pub fn add(&self, rec: Arc<dyn CacheRec>) -> bool {
        let mut _dropped = Vec::new();
        let mut inner = self.lock();
        _dropped.extend(inner.drain_purge_inbox());

        let key = rec.key().clone();
        if inner.map.contains_key(&key) {
            debug!(
                "resource cache: {} already cached for {:?}",
                rec.category(),
                key
            );
            _dropped.push(rec);
            return false;
        }

        let tick = inner.next_tick();
        inner.total_bytes += rec.bytes_used();
        debug!(
            "resource cache: added {} ({} bytes), {} bytes in use",
            rec.category(),
            rec.bytes_used(),
            inner.total_bytes
        );
        inner.lru.insert(tick, key.clone());
        inner.map.insert(key, Entry { rec, tick });
        _dropped.extend(inner.purge_as_needed());
        true
    }

    /// Drop every record whose key carries `shared_id`.
    pub fn purge_shared_id(&self, shared_id: u64) {
        let mut _dropped = Vec::new();
        let mut inner = self.lock();
        _dropped.extend(inner.drain_purge_inbox());
        _dropped.extend(inner.purge_shared_id(shared_id));
    }

    /// Queue a purge of `shared_id` without taking the cache lock.
    pub fn post_purge_shared_id(&self, shared_id: u64) {
        let _ = self.purge_tx.send(shared_id);
    }

    /// A handle for posting purges from elsewhere.
    pub fn purge_handle(&self) -> PurgeHandle {
        PurgeHandle {
            tx: self.purge_tx.clone(),
        }
    }

    pub fn purge_all(&self) {
        let mut inner = self.lock();
        let _ = inner.drain_purge_inbox();
        let count = inner.map.len();
        let _dropped: Vec<_> = inner.map.drain().map(|(_, e)| e.rec).collect();
        inner.lru.clear();
        inner.total_bytes = 0;
        debug!("resource cache: purged all {} records", count);
    }

    /// Change the budget, evicting as needed. Returns the previous limit.
    pub fn set_total_byte_limit(&self, limit: usize) -> usize {
        let mut inner = self.lock();
        let previous = std::mem::replace(&mut inner.total_byte_limit, limit);
        let _dropped = inner.purge_as_needed();
        previous
    }

    pub fn total_byte_limit(&self) -> usize {
        self.lock().total_byte_limit
    }

    pub fn total_bytes_used(&self) -> usize {
        self.lock().total_bytes
    }

    /// Number of cached records.
    pub fn count(&self) -> usize {
        self.lock().map.len()
    }

    /// Largest allocation worth caching.
    ///
    /// Without a discardable allocator the answer is bounded by the total
    /// budget; a configured limit of 0 means the total budget. With one, the
    /// configured limit is returned as is.
    pub fn effective_single_allocation_byte_limit(&self) -> usize {
        let single = self.single_allocation_byte_limit;
        if self.discardable.is_some() {
            return single;
        }
        let total = self.total_byte_limit();
        if single == 0 {
            total
        } else {
            single.min(total)
        }
    }

    /// The allocator for cached payloads, if one is configured.
    pub fn discardable_factory(&self) -> Option<&DiscardableFactory> {
        self.discardable.as_ref()
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new(ResourceCacheConfig::default())
    }
}

impl fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ResourceCache")
            .field("count", &inner.map.len())
            .field("total_bytes", &inner.total_bytes)
            .field("total_byte_limit", &inner.total_byte_limit)
            .field("discardable", &self.discardable.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
