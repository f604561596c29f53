//! Pre-pipeline policy: decide what to sample before building a pipeline.
//!
//! Filter quality only ever goes down:
//!
//! - **High** resizes the source once to the exact destination scale (cached
//!   by size) and continues at Low. If the source or matrix does not allow
//!   it, the request drops to Medium.
//! - **Medium** picks a mip level when the draw minifies and continues at
//!   Low, folding the level's actual scale into the inverse matrix.
//! - **Low** and **None** sample the source as is.
//!
//! The result is a [`ControllerState`]: locked pixels, the adjusted inverse
//! matrix and the final quality, ready for [`crate::LinearPipeline`].

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::basics::scalar_nearly_equal;
use crate::bitmap::Bitmap;
use crate::bitmap_cache::{BitmapCache, BitmapCacheDesc, MipMapCache};
use crate::bitmap_scaler::{BitmapScaler, ResizeMethod};
use crate::color::ColorType;
use crate::matrix::Matrix;
use crate::mipmap::{ExtractedLevel, LockedMipMap, MipColorMode, MipMap};
use crate::pipeline_filter::FilterQuality;
use crate::pixel_ref::LockedPixels;
use crate::pixmap::Pixmap;
use crate::resource_cache::ResourceCache;

/// Knobs of a [`BitmapController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerConfig {
    /// Kernel for High quality resizes.
    pub resize_method: ResizeMethod,
    pub mip_color_mode: MipColorMode,
}

/// What a [`ControllerState`] samples from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSource {
    Original,
    /// A High quality resize of the source.
    Resized,
    /// A mip level; 0 is half size.
    MipLevel(usize),
}

enum StatePixels {
    Locked(LockedPixels),
    Mip {
        mip: LockedMipMap,
        level: ExtractedLevel,
    },
}

/// Resolved sampling state. See the module documentation.
pub struct ControllerState {
    pixels: StatePixels,
    source: StateSource,
    inv_matrix: Matrix,
    quality: FilterQuality,
}

impl ControllerState {
    fn locked(locked: LockedPixels, source: StateSource, inv_matrix: Matrix, quality: FilterQuality) -> Option<Self> {
        // Only states with a usable pixmap are handed out.
        locked.pixmap().ok()?;
        Some(Self {
            pixels: StatePixels::Locked(locked),
            source,
            inv_matrix,
            quality,
        })
    }

    /// The pixels to sample.
    pub fn pixmap(&self) -> Pixmap<'_> {
        match &self.pixels {
            StatePixels::Locked(locked) => Pixmap::from_parts(
                *locked.info(),
                locked.pixels(),
                locked.row_bytes(),
                locked.color_table(),
            ),
            StatePixels::Mip { mip, level } => mip.pixmap_for(&level.level),
        }
    }

    /// Inverse matrix mapping device space into [`ControllerState::pixmap`].
    pub fn inv_matrix(&self) -> &Matrix {
        &self.inv_matrix
    }

    /// Remaining filter quality; never above Low.
    pub fn quality(&self) -> FilterQuality {
        self.quality
    }

    pub fn source(&self) -> StateSource {
        self.source
    }

    /// The mip chain in use, if a level was chosen.
    pub fn mipmap(&self) -> Option<&Arc<MipMap>> {
        match &self.pixels {
            StatePixels::Mip { mip, .. } => Some(mip.mipmap()),
            StatePixels::Locked(_) => None,
        }
    }
}

impl fmt::Debug for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pm = self.pixmap();
        f.debug_struct("ControllerState")
            .field("source", &self.source)
            .field("size", &(pm.width(), pm.height()))
            .field("inv_matrix", &self.inv_matrix)
            .field("quality", &self.quality)
            .finish()
    }
}

// ============================================================================
// BitmapController
// ============================================================================

/// Chooses resized or mipped sources through a shared [`ResourceCache`].
#[derive(Debug, Clone)]
pub struct BitmapController {
    cache: Arc<ResourceCache>,
    config: ControllerConfig,
}

fn valid_for_drawing(bm: &Bitmap) -> bool {
    if bm.width() == 0 || bm.height() == 0 {
        return false;
    }
    if bm.pixel_ref().is_none() {
        return false;
    }
    if bm.color_type() == ColorType::Index8 {
        return bm
            .lock_pixels()
            .map_or(false, |locked| locked.color_table().is_some());
    }
    true
}

impl BitmapController {
    pub fn new(cache: Arc<ResourceCache>) -> Self {
        Self::with_config(cache, ControllerConfig::default())
    }

    pub fn with_config(cache: Arc<ResourceCache>, config: ControllerConfig) -> Self {
        Self { cache, config }
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Resolve what to sample for drawing `bitmap` through `inverse` at
    /// `quality`. `None` means there is nothing to draw.
    pub fn request_state(
        &self,
        bitmap: &Bitmap,
        inverse: &Matrix,
        quality: FilterQuality,
    ) -> Option<ControllerState> {
        if !valid_for_drawing(bitmap) {
            debug!(
                "bitmap controller: {}x{} {:?} is not drawable",
                bitmap.width(),
                bitmap.height(),
                bitmap.color_type()
            );
            return None;
        }

        let mut inv = *inverse;
        let mut quality = quality;
        if let Some(state) = self.process_high(bitmap, &mut inv, &mut quality) {
            return Some(state);
        }
        if let Some(state) = self.process_medium(bitmap, &mut inv, &mut quality) {
            return Some(state);
        }
        let quality = quality.min(FilterQuality::Low);
        ControllerState::locked(bitmap.lock_pixels()?, StateSource::Original, inv, quality)
    }

    // Would the resized bitmap fit in one cache allocation?
    fn cache_size_okay(&self, bm: &Bitmap, inv: &Matrix) -> bool {
        let max = self.cache.effective_single_allocation_byte_limit();
        if max == 0 {
            return true;
        }
        let size = bm.info().compute_min_byte_size().unwrap_or(usize::MAX);
        (size as f64) < max as f64 * inv.sx * inv.sy
    }

    fn process_high(
        &self,
        bm: &Bitmap,
        inv: &mut Matrix,
        quality: &mut FilterQuality,
    ) -> Option<ControllerState> {
        if *quality != FilterQuality::High {
            return None;
        }
        *quality = FilterQuality::Medium;

        if bm.color_type() != ColorType::N32 {
            debug!("bitmap controller: high -> medium, color type {:?}", bm.color_type());
            return None;
        }
        if inv.has_perspective() {
            debug!("bitmap controller: high -> medium, perspective");
            return None;
        }
        if !self.cache_size_okay(bm, inv) {
            debug!("bitmap controller: high -> medium, result too large to cache");
            return None;
        }

        let (inv_sx, inv_sy) = if inv.has_skew() {
            inv.decompose_scale()?
        } else {
            (inv.sx.abs(), inv.sy.abs())
        };
        if scalar_nearly_equal(inv_sx, 1.0) && scalar_nearly_equal(inv_sy, 1.0) {
            debug!("bitmap controller: high -> medium, no scale");
            return None;
        }

        let dst_w = (bm.width() as f64 / inv_sx).round();
        let dst_h = (bm.height() as f64 / inv_sy).round();
        if !(1.0..=u32::MAX as f64).contains(&dst_w) || !(1.0..=u32::MAX as f64).contains(&dst_h)
        {
            return None;
        }
        let (dst_w, dst_h) = (dst_w as u32, dst_h as u32);

        let desc = BitmapCacheDesc::make(bm, dst_w, dst_h);
        let result = match BitmapCache::find_wh(&self.cache, &desc) {
            Some(result) => result,
            None => {
                let src = bm.lock_pixels()?;
                let pixmap = src.pixmap().ok()?;
                let result = BitmapScaler::resize(
                    &pixmap,
                    self.config.resize_method,
                    dst_w,
                    dst_h,
                    self.cache.discardable_factory(),
                )
                .map_err(|e| debug!("bitmap controller: high quality resize failed: {}", e))
                .ok()?;
                result.set_immutable();
                BitmapCache::add_wh(&self.cache, bm, dst_w, dst_h, &result);
                result
            }
        };
        let locked = result.lock_pixels()?;

        inv.post_scale(
            dst_w as f64 / bm.width() as f64,
            dst_h as f64 / bm.height() as f64,
        );
        *quality = FilterQuality::Low;
        debug!(
            "bitmap controller: high quality {}x{} -> {}x{}",
            bm.width(),
            bm.height(),
            dst_w,
            dst_h
        );
        ControllerState::locked(locked, StateSource::Resized, *inv, *quality)
    }

    fn process_medium(
        &self,
        bm: &Bitmap,
        inv: &mut Matrix,
        quality: &mut FilterQuality,
    ) -> Option<ControllerState> {
        if *quality != FilterQuality::Medium {
            return None;
        }
        *quality = FilterQuality::Low;

        let (sx, sy) = inv.decompose_scale()?;
        let inv_scale = (sx * sy).sqrt();
        if inv_scale <= 1.0 {
            return None;
        }

        let mode = self.config.mip_color_mode;
        let desc = BitmapCacheDesc::from_bitmap(bm);
        let mip = match MipMapCache::find_and_ref(&self.cache, &desc, mode) {
            Some(mip) => mip,
            None => MipMapCache::add_and_ref(&self.cache, bm, mode)?,
        };
        let Some(level) = mip.extract_level(1.0 / inv_scale) else {
            debug!("bitmap controller: no mip level for scale {}", 1.0 / inv_scale);
            return None;
        };
        inv.post_scale(level.scale, level.scale);
        debug!(
            "bitmap controller: mip level {} ({}x{}) for scale {}",
            level.index,
            level.level.width(),
            level.level.height(),
            1.0 / inv_scale
        );
        Some(ControllerState {
            pixels: StatePixels::Mip { mip, level },
            source: StateSource::MipLevel(level.index),
            inv_matrix: *inv,
            quality: *quality,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
