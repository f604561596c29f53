//! Controller and cache behaviour across draws.

use std::sync::Arc;

use bitmap_sampling::{
    AlphaType, Bitmap, BitmapCache, BitmapCacheDesc, BitmapController, BitmapShader,
    DiscardablePool, FilterQuality, ImageInfo, Matrix, MipColorMode, MipMapCache, Pm4f,
    ResourceCache, ResourceCacheConfig, Rgba8, StateSource, TileMode,
};

fn make_rgba_bitmap(w: u32, h: u32, color: [u8; 4]) -> Bitmap {
    let info = ImageInfo::new_n32(w, h, AlphaType::Premul);
    Bitmap::from_pixels(info, color.repeat((w * h) as usize), info.min_row_bytes()).unwrap()
}

fn shared_cache() -> Arc<ResourceCache> {
    Arc::new(ResourceCache::with_byte_limit(4 << 20))
}

#[test_log::test]
fn test_mip_extraction_is_cached_across_draws() {
    let cache = shared_cache();
    let controller = BitmapController::new(Arc::clone(&cache));
    let bm = make_rgba_bitmap(100, 100, [40, 80, 120, 255]);
    let inverse = Matrix::new_scale(4.0, 4.0);

    let first = controller
        .request_state(&bm, &inverse, FilterQuality::Medium)
        .unwrap();
    let pm = first.pixmap();
    assert_eq!((pm.width(), pm.height()), (25, 25));
    assert!((first.inv_matrix().sx - 1.0).abs() < 1e-9);

    let second = controller
        .request_state(&bm, &inverse, FilterQuality::Medium)
        .unwrap();
    assert_eq!(second.source(), first.source());
    assert!(Arc::ptr_eq(first.mipmap().unwrap(), second.mipmap().unwrap()));
}

#[test_log::test]
fn test_changing_pixels_invalidates_cached_results() {
    let cache = shared_cache();
    let controller = BitmapController::new(Arc::clone(&cache));
    let bm = make_rgba_bitmap(64, 64, [0, 0, 255, 255]);
    let old_desc = BitmapCacheDesc::from_bitmap(&bm);

    controller
        .request_state(&bm, &Matrix::new_scale(2.0, 2.0), FilterQuality::High)
        .unwrap();
    controller
        .request_state(&bm, &Matrix::new_scale(2.0, 2.0), FilterQuality::Medium)
        .unwrap();
    assert_eq!(cache.count(), 2);
    assert!(BitmapCache::find_wh(&cache, &BitmapCacheDesc::make(&bm, 32, 32)).is_some());

    bm.erase(Rgba8::new(255, 0, 0, 255)).unwrap();
    assert_ne!(bm.generation_id(), old_desc.image_id);
    assert!(MipMapCache::find_and_ref(&cache, &old_desc, MipColorMode::Legacy).is_none());
    assert_eq!(cache.count(), 0);

    // The next draw rebuilds from the new pixels.
    let state = controller
        .request_state(&bm, &Matrix::new_scale(2.0, 2.0), FilterQuality::Medium)
        .unwrap();
    assert_eq!(
        state.pixmap().pixel_rgba8(5, 5),
        Some(Rgba8::new(255, 0, 0, 255))
    );
}

#[test]
fn test_reclaimed_discardable_memory_is_rebuilt() {
    let pool = Arc::new(DiscardablePool::new());
    let config = ResourceCacheConfig::default().with_discardable(pool.factory());
    let cache = Arc::new(ResourceCache::new(config));
    let controller = BitmapController::new(Arc::clone(&cache));
    let bm = make_rgba_bitmap(32, 32, [9, 9, 9, 255]);
    let inverse = Matrix::new_scale(2.0, 2.0);

    let state = controller
        .request_state(&bm, &inverse, FilterQuality::Medium)
        .unwrap();
    assert_eq!(state.source(), StateSource::MipLevel(0));
    drop(state);

    assert!(pool.purge_unlocked() > 0);
    let state = controller
        .request_state(&bm, &inverse, FilterQuality::Medium)
        .unwrap();
    assert_eq!(state.source(), StateSource::MipLevel(0));
    assert_eq!(state.pixmap().pixel_rgba8(0, 0), Some(Rgba8::new(9, 9, 9, 255)));
}

#[test]
fn test_shader_draws_through_shared_cache_from_threads() {
    let cache = shared_cache();
    let bm = make_rgba_bitmap(64, 64, [30, 60, 90, 255]);
    let shader = Arc::new(BitmapShader::new(bm, TileMode::Clamp, TileMode::Clamp));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let shader = Arc::clone(&shader);
            std::thread::spawn(move || {
                let controller = BitmapController::new(cache);
                let ctx = shader
                    .make_context(
                        &controller,
                        &Matrix::new_scale(0.25, 0.25),
                        FilterQuality::Medium,
                        255,
                    )
                    .unwrap();
                let mut dst = [Pm4f::TRANSPARENT; 16];
                ctx.shade_span_4f(0, 3, &mut dst);
                dst.iter().map(|c| c.to_rgba8()).collect::<Vec<_>>()
            })
        })
        .collect();

    for h in handles {
        let row = h.join().unwrap();
        assert!(row.iter().all(|&c| c == Rgba8::new(30, 60, 90, 255)));
    }
    // Concurrent first draws may each build a chain, but only one is kept.
    assert_eq!(cache.count(), 1);
}
