//! Bitmap and mipmap entries of a [`ResourceCache`].
//!
//! Both kinds are keyed by the source's generation ID and its bounds inside
//! its pixel ref, and share the source's shared ID so one purge drops every
//! entry derived from it. Adding an entry registers a listener on the
//! source's pixel ref that posts that purge once the pixels change or the
//! ref goes away.

use std::any::Any;
use std::sync::Arc;

use crate::basics::{four_byte_tag, RectI};
use crate::bitmap::Bitmap;
use crate::mipmap::{LockedMipMap, MipColorMode, MipMap};
use crate::resource_cache::{CacheKey, CacheRec, ResourceCache};

const BITMAP_NAMESPACE: u32 = four_byte_tag(b'b', b'k', b'e', b'y');
const MIPMAP_NAMESPACE: u32 = four_byte_tag(b'm', b'k', b'e', b'y');

/// Shared ID for everything cached on behalf of the bitmap with `gen_id`.
pub fn make_shared_id_for_bitmap(gen_id: u32) -> u64 {
    (four_byte_tag(b'b', b'm', b'a', b'p') as u64) << 32 | gen_id as u64
}

/// Bounds of `bm` inside its pixel ref; empty without one.
fn bounds_of(bm: &Bitmap) -> RectI {
    if bm.pixel_ref().is_none() {
        return RectI::EMPTY;
    }
    bm.bounds()
}

fn rect_words(r: &RectI) -> [u32; 4] {
    [r.x1 as u32, r.y1 as u32, r.x2 as u32, r.y2 as u32]
}

/// Ask `src`'s pixel ref to purge entries derived from it when it changes.
fn purge_on_change(cache: &ResourceCache, src: &Bitmap, shared_id: u64) {
    if let Some(pixel_ref) = src.pixel_ref() {
        let handle = cache.purge_handle();
        pixel_ref.add_gen_id_change_listener(Box::new(move || handle.post(shared_id)));
    }
}

// ============================================================================
// BitmapCacheDesc
// ============================================================================

/// What a cached bitmap was derived from, and at which size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitmapCacheDesc {
    pub image_id: u32,
    pub width: u32,
    pub height: u32,
    pub bounds: RectI,
}

impl BitmapCacheDesc {
    /// `bm` scaled to `width` x `height`.
    pub fn make(bm: &Bitmap, width: u32, height: u32) -> Self {
        Self {
            image_id: bm.generation_id(),
            width,
            height,
            bounds: bounds_of(bm),
        }
    }

    /// `bm` at its own size.
    pub fn from_bitmap(bm: &Bitmap) -> Self {
        Self::make(bm, bm.width(), bm.height())
    }

    fn to_key(self) -> CacheKey {
        let mut payload = vec![self.image_id, self.width, self.height];
        payload.extend(rect_words(&self.bounds));
        CacheKey::new(
            BITMAP_NAMESPACE,
            make_shared_id_for_bitmap(self.image_id),
            payload,
        )
    }
}

// ============================================================================
// BitmapCache
// ============================================================================

struct BitmapRec {
    key: CacheKey,
    bitmap: Bitmap,
}

impl CacheRec for BitmapRec {
    fn key(&self) -> &CacheKey {
        &self.key
    }

    fn bytes_used(&self) -> usize {
        let info = self.bitmap.info();
        self.key.size() + info.min_row_bytes() * info.height() as usize
    }

    fn category(&self) -> &'static str {
        "bitmap"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn find_bitmap(cache: &ResourceCache, key: &CacheKey) -> Option<Bitmap> {
    cache.find(key, |rec| {
        let rec = rec.as_any().downcast_ref::<BitmapRec>()?;
        // A result whose pixels cannot be locked any more is a miss.
        rec.bitmap.lock_pixels()?;
        Some(rec.bitmap.clone())
    })
}

/// Scaled copies of bitmaps.
#[derive(Debug, Clone, Copy)]
pub struct BitmapCache;

impl BitmapCache {
    /// The cached bitmap for `desc`. Zero sizes are never cached.
    pub fn find_wh(cache: &ResourceCache, desc: &BitmapCacheDesc) -> Option<Bitmap> {
        if desc.width == 0 || desc.height == 0 {
            return None;
        }
        find_bitmap(cache, &desc.to_key())
    }

    /// Cache `result` as `src` scaled to `width` x `height`.
    ///
    /// `result` must be immutable. Returns false for zero sizes, mutable
    /// results and keys that are already cached.
    pub fn add_wh(
        cache: &ResourceCache,
        src: &Bitmap,
        width: u32,
        height: u32,
        result: &Bitmap,
    ) -> bool {
        if width == 0 || height == 0 || !result.is_immutable() {
            return false;
        }
        let desc = BitmapCacheDesc::make(src, width, height);
        let key = desc.to_key();
        let shared_id = key.shared_id();
        let added = cache.add(Arc::new(BitmapRec {
            key,
            bitmap: result.clone(),
        }));
        if added {
            purge_on_change(cache, src, shared_id);
        }
        added
    }

    /// The bitmap cached for `gen_id` at its own size.
    pub fn find(cache: &ResourceCache, gen_id: u32) -> Option<Bitmap> {
        find_bitmap(cache, &legacy_desc(gen_id).to_key())
    }

    /// Cache `result` for `gen_id`. `result` must be immutable.
    pub fn add(cache: &ResourceCache, gen_id: u32, result: &Bitmap) -> bool {
        if !result.is_immutable() {
            return false;
        }
        cache.add(Arc::new(BitmapRec {
            key: legacy_desc(gen_id).to_key(),
            bitmap: result.clone(),
        }))
    }
}

// Generation-ID-only entries use a 1x1 size so they never collide with
// sized ones, which reject zero dimensions.
fn legacy_desc(gen_id: u32) -> BitmapCacheDesc {
    BitmapCacheDesc {
        image_id: gen_id,
        width: 1,
        height: 1,
        bounds: RectI::EMPTY,
    }
}

// ============================================================================
// MipMapCache
// ============================================================================

struct MipMapRec {
    key: CacheKey,
    mip: Arc<MipMap>,
}

impl CacheRec for MipMapRec {
    fn key(&self) -> &CacheKey {
        &self.key
    }

    fn bytes_used(&self) -> usize {
        self.key.size() + self.mip.size()
    }

    fn category(&self) -> &'static str {
        "mipmap"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn mipmap_key(gen_id: u32, color_mode: MipColorMode, bounds: &RectI) -> CacheKey {
    let mut payload = vec![gen_id, color_mode.as_u32()];
    payload.extend(rect_words(bounds));
    CacheKey::new(MIPMAP_NAMESPACE, make_shared_id_for_bitmap(gen_id), payload)
}

/// Mip chains of bitmaps.
#[derive(Debug, Clone, Copy)]
pub struct MipMapCache;

impl MipMapCache {
    /// The cached chain for `desc`, locked. The desc's size is ignored.
    pub fn find_and_ref(
        cache: &ResourceCache,
        desc: &BitmapCacheDesc,
        color_mode: MipColorMode,
    ) -> Option<LockedMipMap> {
        let key = mipmap_key(desc.image_id, color_mode, &desc.bounds);
        cache.find(&key, |rec| {
            let rec = rec.as_any().downcast_ref::<MipMapRec>()?;
            rec.mip.lock()
        })
    }

    /// Build a chain for `src` with the cache's allocator, cache it and
    /// return it locked. `None` if `src` cannot be locked or mipped.
    pub fn add_and_ref(
        cache: &ResourceCache,
        src: &Bitmap,
        color_mode: MipColorMode,
    ) -> Option<LockedMipMap> {
        let mip = {
            let locked = src.lock_pixels()?;
            let pixmap = locked.pixmap().ok()?;
            Arc::new(MipMap::build(
                &pixmap,
                color_mode,
                cache.discardable_factory(),
            )?)
        };
        let locked = mip.lock()?;
        let key = mipmap_key(src.generation_id(), color_mode, &bounds_of(src));
        let shared_id = key.shared_id();
        if cache.add(Arc::new(MipMapRec { key, mip })) {
            purge_on_change(cache, src, shared_id);
        }
        Some(locked)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{AlphaType, Rgba8};
    use crate::discardable::DiscardablePool;
    use crate::pixmap::ImageInfo;
    use crate::resource_cache::ResourceCacheConfig;

    fn make_rgba_bitmap(w: u32, h: u32) -> Bitmap {
        let info = ImageInfo::new_n32(w, h, AlphaType::Opaque);
        let px = [40u8, 80, 120, 255].repeat((w * h) as usize);
        Bitmap::from_pixels(info, px, info.min_row_bytes()).unwrap()
    }

    fn immutable_result(w: u32, h: u32) -> Bitmap {
        let bm = make_rgba_bitmap(w, h);
        bm.set_immutable();
        bm
    }

    #[test]
    fn test_shared_id() {
        assert_eq!(make_shared_id_for_bitmap(6), 0x626d_6170_0000_0006);
    }

    #[test]
    fn test_desc_determinism() {
        let bm = make_rgba_bitmap(4, 4);
        let a = BitmapCacheDesc::make(&bm, 2, 2);
        assert_eq!(a, BitmapCacheDesc::make(&bm, 2, 2));
        assert_eq!(a.to_key(), BitmapCacheDesc::make(&bm, 2, 2).to_key());
        assert_ne!(a.to_key(), BitmapCacheDesc::make(&bm, 2, 3).to_key());
        assert_ne!(a.to_key(), BitmapCacheDesc::make(&bm, 3, 2).to_key());

        let sub = bm.extract_subset(&RectI::from_xywh(0, 0, 4, 4)).unwrap();
        assert_eq!(a.to_key(), BitmapCacheDesc::make(&sub, 2, 2).to_key());
        let sub = bm.extract_subset(&RectI::from_xywh(1, 0, 3, 4)).unwrap();
        assert_ne!(a.to_key(), BitmapCacheDesc::make(&sub, 2, 2).to_key());

        let other = make_rgba_bitmap(4, 4);
        assert_ne!(a.to_key(), BitmapCacheDesc::make(&other, 2, 2).to_key());
    }

    #[test_log::test]
    fn test_find_wh_after_add_wh() {
        let cache = ResourceCache::with_byte_limit(1 << 20);
        let src = make_rgba_bitmap(8, 8);
        let desc = BitmapCacheDesc::make(&src, 4, 4);
        assert!(BitmapCache::find_wh(&cache, &desc).is_none());

        let result = immutable_result(4, 4);
        assert!(BitmapCache::add_wh(&cache, &src, 4, 4, &result));
        let found = BitmapCache::find_wh(&cache, &desc).unwrap();
        assert_eq!(found.generation_id(), result.generation_id());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let cache = ResourceCache::with_byte_limit(1 << 20);
        let src = make_rgba_bitmap(8, 8);
        let result = immutable_result(1, 1);
        assert!(!BitmapCache::add_wh(&cache, &src, 0, 4, &result));
        assert!(!BitmapCache::add_wh(&cache, &src, 4, 0, &result));
        assert!(BitmapCache::find_wh(&cache, &BitmapCacheDesc::make(&src, 0, 4)).is_none());
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn test_mutable_result_rejected() {
        let cache = ResourceCache::with_byte_limit(1 << 20);
        let src = make_rgba_bitmap(8, 8);
        assert!(!BitmapCache::add_wh(&cache, &src, 4, 4, &make_rgba_bitmap(4, 4)));
        assert!(!BitmapCache::add(&cache, 9, &make_rgba_bitmap(1, 1)));
    }

    #[test]
    fn test_legacy_find_and_add() {
        let cache = ResourceCache::with_byte_limit(1 << 20);
        let result = immutable_result(2, 2);
        assert!(BitmapCache::find(&cache, 42).is_none());
        assert!(BitmapCache::add(&cache, 42, &result));
        assert!(BitmapCache::find(&cache, 42).is_some());
        assert!(BitmapCache::find(&cache, 44).is_none());
    }

    #[test]
    fn test_pixels_changed_purges_entries() {
        let cache = ResourceCache::with_byte_limit(1 << 20);
        let src = make_rgba_bitmap(8, 8);
        let desc = BitmapCacheDesc::make(&src, 4, 4);
        BitmapCache::add_wh(&cache, &src, 4, 4, &immutable_result(4, 4));
        MipMapCache::add_and_ref(&cache, &src, MipColorMode::Legacy).unwrap();
        assert_eq!(cache.count(), 2);

        src.erase(Rgba8::new(0, 0, 0, 255)).unwrap();
        assert!(BitmapCache::find_wh(&cache, &desc).is_none());
        assert_eq!(cache.count(), 0);
        assert!(MipMapCache::find_and_ref(&cache, &desc, MipColorMode::Legacy).is_none());
    }

    #[test]
    fn test_dropping_source_purges_entries() {
        let cache = ResourceCache::with_byte_limit(1 << 20);
        let src = make_rgba_bitmap(8, 8);
        BitmapCache::add_wh(&cache, &src, 4, 4, &immutable_result(4, 4));
        assert_eq!(cache.count(), 1);
        drop(src);
        cache.purge_shared_id(0);
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn test_mipmap_reused() {
        let cache = ResourceCache::with_byte_limit(1 << 20);
        let src = make_rgba_bitmap(100, 100);
        let desc = BitmapCacheDesc::from_bitmap(&src);
        assert!(MipMapCache::find_and_ref(&cache, &desc, MipColorMode::Legacy).is_none());

        let built = MipMapCache::add_and_ref(&cache, &src, MipColorMode::Legacy).unwrap();
        let found = MipMapCache::find_and_ref(&cache, &desc, MipColorMode::Legacy).unwrap();
        assert!(Arc::ptr_eq(built.mipmap(), found.mipmap()));
        // The size in the desc does not take part in mip lookups.
        let resized = BitmapCacheDesc::make(&src, 10, 10);
        assert!(MipMapCache::find_and_ref(&cache, &resized, MipColorMode::Legacy).is_some());
        assert!(MipMapCache::find_and_ref(&cache, &desc, MipColorMode::GammaCorrect).is_none());
    }

    #[test]
    fn test_reclaimed_mipmap_is_a_miss() {
        let pool = Arc::new(DiscardablePool::new());
        let cache = ResourceCache::new(
            ResourceCacheConfig::default().with_discardable(pool.factory()),
        );
        let src = make_rgba_bitmap(16, 16);
        let desc = BitmapCacheDesc::from_bitmap(&src);
        drop(MipMapCache::add_and_ref(&cache, &src, MipColorMode::Legacy).unwrap());
        assert!(MipMapCache::find_and_ref(&cache, &desc, MipColorMode::Legacy).is_some());

        pool.purge_unlocked();
        assert!(MipMapCache::find_and_ref(&cache, &desc, MipColorMode::Legacy).is_none());
        assert_eq!(cache.count(), 0);
    }
}
