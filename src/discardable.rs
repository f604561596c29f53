//! Purgeable pixel memory.
//!
//! A [`DiscardableMemory`] hands out its bytes as a shared handle; holding
//! the handle pins the bytes, dropping it unlocks them. Unpinned memory may be
//! reclaimed at any time, after which [`DiscardableMemory::lock`] returns
//! `None` and the owner has to regenerate the data.
//!
//! [`HeapMemory`] never loses its bytes. [`DiscardablePool`] keeps track of
//! its allocations and reclaims every unpinned one on
//! [`DiscardablePool::purge_unlocked`], standing in for the operating system
//! under memory pressure.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use log::debug;

/// Memory that may be reclaimed while nobody holds a lock on it.
pub trait DiscardableMemory: Send + Sync {
    /// Pin the bytes and return them, or `None` if they were reclaimed.
    fn lock(&self) -> Option<Arc<Vec<u8>>>;
    /// Size of the allocation in bytes.
    fn size(&self) -> usize;
}

/// Allocates discardable memory initialised with the given bytes. `None`
/// means the allocation failed.
pub type DiscardableFactory =
    Arc<dyn Fn(Vec<u8>) -> Option<Arc<dyn DiscardableMemory>> + Send + Sync>;

// ============================================================================
// HeapMemory
// ============================================================================

/// Plain heap memory; locking always succeeds.
#[derive(Debug, Clone)]
pub struct HeapMemory {
    bytes: Arc<Vec<u8>>,
}

impl HeapMemory {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }

    /// A factory producing [`HeapMemory`].
    pub fn factory() -> DiscardableFactory {
        Arc::new(|bytes: Vec<u8>| {
            Some(Arc::new(HeapMemory::new(bytes)) as Arc<dyn DiscardableMemory>)
        })
    }
}

impl DiscardableMemory for HeapMemory {
    fn lock(&self) -> Option<Arc<Vec<u8>>> {
        Some(Arc::clone(&self.bytes))
    }

    fn size(&self) -> usize {
        self.bytes.len()
    }
}

// ============================================================================
// Pool
// ============================================================================

/// One allocation handed out by a [`DiscardablePool`].
pub struct PooledMemory {
    bytes: Mutex<Option<Arc<Vec<u8>>>>,
    size: usize,
}

impl PooledMemory {
    /// True while the bytes have not been reclaimed.
    pub fn is_resident(&self) -> bool {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    // Returns the number of bytes reclaimed.
    fn purge_if_unpinned(&self) -> usize {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        match bytes.as_ref() {
            Some(b) if Arc::strong_count(b) == 1 => {
                *bytes = None;
                self.size
            }
            _ => 0,
        }
    }
}

impl DiscardableMemory for PooledMemory {
    fn lock(&self) -> Option<Arc<Vec<u8>>> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
    }

    fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Debug for PooledMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledMemory")
            .field("size", &self.size)
            .field("resident", &self.is_resident())
            .finish()
    }
}

/// Tracks discardable allocations so they can be reclaimed together.
#[derive(Debug, Default)]
pub struct DiscardablePool {
    allocations: Mutex<Vec<Weak<PooledMemory>>>,
}

impl DiscardablePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, bytes: Vec<u8>) -> Arc<PooledMemory> {
        let size = bytes.len();
        let memory = Arc::new(PooledMemory {
            bytes: Mutex::new(Some(Arc::new(bytes))),
            size,
        });
        let mut allocations = self
            .allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        allocations.retain(|w| w.strong_count() > 0);
        allocations.push(Arc::downgrade(&memory));
        memory
    }

    /// Reclaim every allocation that is not pinned. Returns the number of
    /// bytes released.
    pub fn purge_unlocked(&self) -> usize {
        let mut allocations = self
            .allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        allocations.retain(|w| w.strong_count() > 0);
        let released: usize = allocations
            .iter()
            .filter_map(Weak::upgrade)
            .map(|m| m.purge_if_unpinned())
            .sum();
        debug!(
            "discardable pool: purged {} bytes from {} allocations",
            released,
            allocations.len()
        );
        released
    }

    /// Bytes currently resident across live allocations.
    pub fn resident_bytes(&self) -> usize {
        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|m| m.is_resident())
            .map(|m| m.size)
            .sum()
    }

    /// A factory allocating from this pool.
    pub fn factory(self: &Arc<Self>) -> DiscardableFactory {
        let pool = Arc::clone(self);
        Arc::new(move |bytes: Vec<u8>| {
            Some(pool.allocate(bytes) as Arc<dyn DiscardableMemory>)
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_memory_always_locks() {
        let m = HeapMemory::new(vec![1, 2, 3]);
        assert_eq!(m.size(), 3);
        assert_eq!(m.lock().unwrap().as_slice(), &[1, 2, 3]);
        assert!(m.lock().is_some());
    }

    #[test]
    fn test_pool_purges_only_unpinned() {
        let pool = DiscardablePool::new();
        let a = pool.allocate(vec![0; 100]);
        let b = pool.allocate(vec![0; 50]);
        let pin = b.lock().unwrap();
        assert_eq!(pool.resident_bytes(), 150);

        assert_eq!(pool.purge_unlocked(), 100);
        assert!(a.lock().is_none());
        assert!(!a.is_resident());
        assert_eq!(b.lock().unwrap().len(), 50);

        drop(pin);
        assert_eq!(pool.purge_unlocked(), 50);
        assert!(b.lock().is_none());
        assert_eq!(pool.resident_bytes(), 0);
    }

    #[test]
    fn test_pool_forgets_dropped_allocations() {
        let pool = DiscardablePool::new();
        drop(pool.allocate(vec![0; 10]));
        assert_eq!(pool.purge_unlocked(), 0);
    }

    #[test]
    fn test_pool_factory() {
        let pool = Arc::new(DiscardablePool::new());
        let factory = pool.factory();
        let m = factory(vec![9; 8]).unwrap();
        assert_eq!(m.size(), 8);
        assert_eq!(pool.resident_bytes(), 8);
        pool.purge_unlocked();
        assert!(m.lock().is_none());
    }
}
