//! Cache of decoded 8-bit YUV planes, keyed by source generation ID.

use std::any::Any;
use std::sync::Arc;

use crate::basics::four_byte_tag;
use crate::bitmap_cache::make_shared_id_for_bitmap;
use crate::discardable::{DiscardableMemory, HeapMemory};
use crate::resource_cache::{CacheKey, CacheRec, ResourceCache};

const YUV_PLANES_NAMESPACE: u32 = four_byte_tag(b'y', b'u', b'v', b'p');

/// Matrix used to convert the planes back to RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum YuvColorSpace {
    /// Full range BT.601.
    #[default]
    Jpeg,
    /// Limited range BT.601.
    Rec601,
    /// Limited range BT.709.
    Rec709,
}

/// Layout of the three planes (Y, U, V) stored back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct YuvPlanesInfo {
    /// `(width, height)` of each plane.
    pub sizes: [(u32, u32); 3],
    pub row_bytes: [usize; 3],
    pub color_space: YuvColorSpace,
}

impl YuvPlanesInfo {
    /// Byte offset of plane `i` and its length.
    fn plane_range(&self, i: usize) -> (usize, usize) {
        let offset = (0..i).map(|p| self.plane_bytes(p)).sum();
        (offset, self.plane_bytes(i))
    }

    fn plane_bytes(&self, i: usize) -> usize {
        self.row_bytes[i] * self.sizes[i].1 as usize
    }

    /// Bytes needed for all three planes.
    pub fn total_bytes(&self) -> usize {
        (0..3).map(|i| self.plane_bytes(i)).sum()
    }
}

/// Decoded planes together with their layout.
#[derive(Debug, Clone)]
pub struct YuvPlanes {
    info: YuvPlanesInfo,
    data: Arc<Vec<u8>>,
}

impl YuvPlanes {
    pub fn new(info: YuvPlanesInfo, data: Arc<Vec<u8>>) -> Self {
        Self { info, data }
    }

    pub fn info(&self) -> &YuvPlanesInfo {
        &self.info
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes of plane `i` (0 = Y, 1 = U, 2 = V). Empty when out of range.
    pub fn plane(&self, i: usize) -> &[u8] {
        if i >= 3 {
            return &[];
        }
        let (offset, len) = self.info.plane_range(i);
        self.data.get(offset..offset + len).unwrap_or(&[])
    }
}

struct YuvPlanesRec {
    key: CacheKey,
    info: YuvPlanesInfo,
    memory: Arc<dyn DiscardableMemory>,
}

impl CacheRec for YuvPlanesRec {
    fn key(&self) -> &CacheKey {
        &self.key
    }

    fn bytes_used(&self) -> usize {
        self.key.size() + self.memory.size()
    }

    fn category(&self) -> &'static str {
        "yuv-planes"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn make_key(gen_id: u32) -> CacheKey {
    CacheKey::new(
        YUV_PLANES_NAMESPACE,
        make_shared_id_for_bitmap(gen_id),
        vec![gen_id],
    )
}

/// YUV plane lookups against a [`ResourceCache`].
#[derive(Debug, Clone, Copy)]
pub struct YuvPlanesCache;

impl YuvPlanesCache {
    /// The cached planes for `gen_id`, if present and still resident.
    pub fn find_and_ref(cache: &ResourceCache, gen_id: u32) -> Option<YuvPlanes> {
        cache.find(&make_key(gen_id), |rec| {
            let rec = rec.as_any().downcast_ref::<YuvPlanesRec>()?;
            let data = rec.memory.lock()?;
            Some(YuvPlanes::new(rec.info, data))
        })
    }

    /// Cache `data` for `gen_id`, allocating through the cache's discardable
    /// factory when it has one. Returns the planes as stored, or `None` when
    /// `data` is shorter than `info` requires or the allocation failed.
    pub fn add(
        cache: &ResourceCache,
        gen_id: u32,
        data: Vec<u8>,
        info: YuvPlanesInfo,
    ) -> Option<YuvPlanes> {
        if data.len() < info.total_bytes() {
            return None;
        }
        let memory = match cache.discardable_factory() {
            Some(factory) => factory(data)?,
            None => Arc::new(HeapMemory::new(data)) as Arc<dyn DiscardableMemory>,
        };
        let planes = YuvPlanes::new(info, memory.lock()?);
        cache.add(Arc::new(YuvPlanesRec {
            key: make_key(gen_id),
            info,
            memory,
        }));
        Some(planes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discardable::DiscardablePool;
    use crate::resource_cache::ResourceCacheConfig;

    fn info_4x4() -> YuvPlanesInfo {
        YuvPlanesInfo {
            sizes: [(4, 4), (2, 2), (2, 2)],
            row_bytes: [4, 2, 2],
            color_space: YuvColorSpace::Rec601,
        }
    }

    fn planes_data() -> Vec<u8> {
        let mut data = vec![10u8; 16];
        data.extend([20u8; 4]);
        data.extend([30u8; 4]);
        data
    }

    #[test]
    fn test_plane_layout() {
        let info = info_4x4();
        assert_eq!(info.total_bytes(), 24);
        let planes = YuvPlanes::new(info, Arc::new(planes_data()));
        assert_eq!(planes.plane(0), &[10u8; 16][..]);
        assert_eq!(planes.plane(1), &[20u8; 4][..]);
        assert_eq!(planes.plane(2), &[30u8; 4][..]);
        assert!(planes.plane(3).is_empty());
    }

    #[test]
    fn test_add_then_find() {
        let cache = ResourceCache::with_byte_limit(1 << 20);
        assert!(YuvPlanesCache::find_and_ref(&cache, 8).is_none());
        assert!(YuvPlanesCache::add(&cache, 8, planes_data(), info_4x4()).is_some());

        let found = YuvPlanesCache::find_and_ref(&cache, 8).unwrap();
        assert_eq!(found.info(), &info_4x4());
        assert_eq!(found.plane(1), &[20u8; 4][..]);
        assert!(YuvPlanesCache::find_and_ref(&cache, 10).is_none());
    }

    #[test]
    fn test_short_data_rejected() {
        let cache = ResourceCache::with_byte_limit(1 << 20);
        assert!(YuvPlanesCache::add(&cache, 8, vec![0; 5], info_4x4()).is_none());
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn test_purged_memory_is_a_miss() {
        let pool = Arc::new(DiscardablePool::new());
        let cache = ResourceCache::new(
            ResourceCacheConfig::default().with_discardable(pool.factory()),
        );
        let planes = YuvPlanesCache::add(&cache, 4, planes_data(), info_4x4()).unwrap();
        drop(planes);
        pool.purge_unlocked();
        assert!(YuvPlanesCache::find_and_ref(&cache, 4).is_none());
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn test_purged_with_shared_id() {
        let cache = ResourceCache::with_byte_limit(1 << 20);
        YuvPlanesCache::add(&cache, 6, planes_data(), info_4x4());
        cache.purge_shared_id(make_shared_id_for_bitmap(6));
        assert!(YuvPlanesCache::find_and_ref(&cache, 6).is_none());
    }
}
