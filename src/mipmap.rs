//! Box-filtered mip chains.
//!
//! A [`MipMap`] holds every level below the source (half size, quarter
//! size, down to 1x1) in one allocation, which may be discardable. The bytes
//! are reached through [`MipMap::lock`]; a reclaimed chain cannot be locked
//! and has to be rebuilt.

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::color::{ColorProfile, ColorType};
use crate::discardable::{DiscardableFactory, DiscardableMemory, HeapMemory};
use crate::pixmap::{ImageInfo, Pixmap};

/// How channel values are averaged when building levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MipColorMode {
    /// Average the stored values directly.
    #[default]
    Legacy,
    /// Average sRGB sources in (approximately) linear space.
    GammaCorrect,
}

impl MipColorMode {
    pub(crate) fn as_u32(self) -> u32 {
        match self {
            MipColorMode::Legacy => 0,
            MipColorMode::GammaCorrect => 1,
        }
    }
}

/// Placement of one level inside the chain's allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipLevel {
    width: u32,
    height: u32,
    row_bytes: usize,
    offset: usize,
}

impl MipLevel {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    fn byte_size(&self) -> usize {
        self.row_bytes * self.height as usize
    }
}

/// A mip chain for one source image.
pub struct MipMap {
    src_info: ImageInfo,
    color_mode: MipColorMode,
    levels: Vec<MipLevel>,
    memory: Arc<dyn DiscardableMemory>,
}

// ============================================================================
// Building
// ============================================================================

/// Number of levels below a `width` x `height` source.
pub fn compute_level_count(width: u32, height: u32) -> usize {
    let (mut w, mut h) = (width.max(1), height.max(1));
    let mut count = 0;
    while w > 1 || h > 1 {
        w = (w / 2).max(1);
        h = (h / 2).max(1);
        count += 1;
    }
    count
}

/// Channel count of the color types a mip chain can be built for.
fn channels_for(color_type: ColorType) -> Option<usize> {
    match color_type {
        ColorType::Rgba8888 | ColorType::Bgra8888 => Some(4),
        ColorType::Alpha8 | ColorType::Gray8 => Some(1),
        _ => None,
    }
}

#[inline]
fn to_linear(v: u8) -> u32 {
    let v = v as u32;
    v * v
}

#[inline]
fn from_linear(v: u32) -> u8 {
    ((v as f32).sqrt() + 0.5).min(255.0) as u8
}

/// Average 2x2 blocks of `src` into `dst`. Taps past an odd edge are clamped
/// to the last row or column.
#[allow(clippy::too_many_arguments)]
fn downsample(
    src: &[u8],
    src_w: u32,
    src_h: u32,
    src_row_bytes: usize,
    dst: &mut [u8],
    dst_w: u32,
    dst_h: u32,
    dst_row_bytes: usize,
    channels: usize,
    gamma_correct: bool,
) {
    for y in 0..dst_h as usize {
        let y0 = (2 * y).min(src_h as usize - 1);
        let y1 = (2 * y + 1).min(src_h as usize - 1);
        let row0 = &src[y0 * src_row_bytes..];
        let row1 = &src[y1 * src_row_bytes..];
        let out = &mut dst[y * dst_row_bytes..];
        for x in 0..dst_w as usize {
            let x0 = (2 * x).min(src_w as usize - 1) * channels;
            let x1 = (2 * x + 1).min(src_w as usize - 1) * channels;
            for c in 0..channels {
                let taps = [row0[x0 + c], row0[x1 + c], row1[x0 + c], row1[x1 + c]];
                // Alpha is always averaged as stored.
                out[x * channels + c] = if gamma_correct && c != 3 {
                    let sum: u32 = taps.iter().map(|&t| to_linear(t)).sum();
                    from_linear((sum + 2) / 4)
                } else {
                    let sum: u32 = taps.iter().map(|&t| t as u32).sum();
                    ((sum + 2) / 4) as u8
                };
            }
        }
    }
}

impl MipMap {
    /// Build the chain below `src`.
    ///
    /// `None` when `src` is already 1x1, when its color type has no mip
    /// support, or when allocation fails. Memory comes from `factory`, or
    /// the heap when there is none.
    pub fn build(
        src: &Pixmap<'_>,
        color_mode: MipColorMode,
        factory: Option<&DiscardableFactory>,
    ) -> Option<Self> {
        let channels = channels_for(src.color_type())?;
        let count = compute_level_count(src.width(), src.height());
        if count == 0 {
            return None;
        }

        let mut levels = Vec::with_capacity(count);
        let (mut w, mut h) = (src.width(), src.height());
        let mut size = 0usize;
        for _ in 0..count {
            w = (w / 2).max(1);
            h = (h / 2).max(1);
            let level = MipLevel {
                width: w,
                height: h,
                row_bytes: w as usize * channels,
                offset: size,
            };
            size = size.checked_add(level.byte_size())?;
            levels.push(level);
        }

        let mut bytes = Vec::new();
        bytes.try_reserve_exact(size).ok()?;
        bytes.resize(size, 0);

        // Alpha8 holds coverage, which is linear in every color mode.
        let gamma_correct = color_mode == MipColorMode::GammaCorrect
            && src.profile() == ColorProfile::Srgb
            && src.color_type() != ColorType::Alpha8;
        let (mut prev_w, mut prev_h, mut prev_row_bytes) =
            (src.width(), src.height(), src.row_bytes());
        for (i, level) in levels.iter().enumerate() {
            let (done, rest) = bytes.split_at_mut(level.offset);
            let dst = &mut rest[..level.byte_size()];
            let prev: &[u8] = if i == 0 {
                src.pixels()
            } else {
                &done[levels[i - 1].offset..]
            };
            downsample(
                prev,
                prev_w,
                prev_h,
                prev_row_bytes,
                dst,
                level.width,
                level.height,
                level.row_bytes,
                channels,
                gamma_correct,
            );
            (prev_w, prev_h, prev_row_bytes) = (level.width, level.height, level.row_bytes);
        }

        let memory = match factory {
            Some(factory) => factory(bytes)?,
            None => Arc::new(HeapMemory::new(bytes)) as Arc<dyn DiscardableMemory>,
        };
        debug!(
            "mipmap: built {} levels below {}x{} ({} bytes)",
            count,
            src.width(),
            src.height(),
            size
        );
        Some(Self {
            src_info: *src.info(),
            color_mode,
            levels,
            memory,
        })
    }

    /// Number of levels below the source.
    pub fn count(&self) -> usize {
        self.levels.len()
    }

    /// Level `i`; level 0 is half the source size.
    pub fn level(&self, i: usize) -> Option<&MipLevel> {
        self.levels.get(i)
    }

    /// Bytes allocated for all levels.
    pub fn size(&self) -> usize {
        self.memory.size()
    }

    pub fn src_info(&self) -> &ImageInfo {
        &self.src_info
    }

    pub fn color_mode(&self) -> MipColorMode {
        self.color_mode
    }

    /// Pin the level memory. `None` if it was reclaimed.
    pub fn lock(self: &Arc<Self>) -> Option<LockedMipMap> {
        let data = self.memory.lock()?;
        Some(LockedMipMap {
            mip: Arc::clone(self),
            data,
        })
    }
}

impl fmt::Debug for MipMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MipMap")
            .field("src", &(self.src_info.width(), self.src_info.height()))
            .field("color_mode", &self.color_mode)
            .field("levels", &self.levels.len())
            .finish()
    }
}

// ============================================================================
// Locked access
// ============================================================================

/// A level chosen for a requested scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractedLevel {
    pub index: usize,
    pub level: MipLevel,
    /// Actual scale of the level relative to the source.
    pub scale: f64,
}

/// A mip chain whose memory is pinned for as long as this value lives.
#[derive(Clone)]
pub struct LockedMipMap {
    mip: Arc<MipMap>,
    data: Arc<Vec<u8>>,
}

impl LockedMipMap {
    pub fn mipmap(&self) -> &Arc<MipMap> {
        &self.mip
    }

    /// Pick the level for drawing the source at `scale` (< 1).
    ///
    /// Level `n` (1-based) is used for scales in `[2^-(n+1), 2^-n)`, clamped
    /// to the smallest level. Fails for scales that are not minifications.
    pub fn extract_level(&self, scale: f64) -> Option<ExtractedLevel> {
        if !scale.is_finite() || scale >= 1.0 || scale <= 0.0 {
            return None;
        }
        let l = -scale.log2();
        if !l.is_finite() {
            return None;
        }
        let n = (l.floor() as usize).min(self.mip.count());
        if n == 0 {
            return None;
        }
        let level = self.mip.levels[n - 1];
        Some(ExtractedLevel {
            index: n - 1,
            level,
            scale: level.width as f64 / self.mip.src_info.width() as f64,
        })
    }

    /// Pixels of level `i`.
    pub fn level_pixmap(&self, i: usize) -> Option<Pixmap<'_>> {
        self.mip.level(i).map(|level| self.pixmap_for(level))
    }

    /// Pixels of `level`, which must belong to this chain.
    pub(crate) fn pixmap_for(&self, level: &MipLevel) -> Pixmap<'_> {
        let pixels = self
            .data
            .get(level.offset..level.offset + level.byte_size())
            .unwrap_or_default();
        Pixmap::from_parts(self.level_info(level), pixels, level.row_bytes, None)
    }

    /// The source's format at the level's dimensions.
    pub fn level_info(&self, level: &MipLevel) -> ImageInfo {
        self.mip
            .src_info
            .with_dimensions(level.width, level.height)
    }
}

impl fmt::Debug for LockedMipMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedMipMap").field("mip", &self.mip).finish()
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

    fn solid(w: u32, h: u32, px: [u8; 4]) -> (ImageInfo, Vec<u8>) {
        let info = ImageInfo::new_n32_premul(w, h);
        (info, px.repeat((w * h) as usize))
    }

    fn build(info: ImageInfo, px: &[u8], mode: MipColorMode) -> Arc<MipMap> {
        let pm = Pixmap::new(info, px, info.min_row_bytes()).unwrap();
        Arc::new(MipMap::build(&pm, mode, None).unwrap())
    }

    #[test]
    fn test_level_count() {
        assert_eq!(compute_level_count(1, 1), 0);
        assert_eq!(compute_level_count(2, 1), 1);
        assert_eq!(compute_level_count(100, 100), 6);
        assert_eq!(compute_level_count(256, 4), 8);
    }

    #[test]
    fn test_level_sizes() {
        let (info, px) = solid(100, 100, [10, 20, 30, 255]);
        let mip = build(info, &px, MipColorMode::Legacy);
        let sizes: Vec<_> = (0..mip.count())
            .map(|i| {
                let l = mip.level(i).unwrap();
                (l.width(), l.height())
            })
            .collect();
        assert_eq!(
            sizes,
            vec![(50, 50), (25, 25), (12, 12), (6, 6), (3, 3), (1, 1)]
        );
        let locked = mip.lock().unwrap();
        let pm = locked.level_pixmap(5).unwrap();
        assert_eq!(pm.pixel_rgba8(0, 0), Some(Rgba8::new(10, 20, 30, 255)));
    }

    #[test]
    fn test_box_filter_and_odd_edge() {
        // 3x1: [0, 100, 200] -> level 0 is 1x1 averaging columns 0 and 1.
        let info = ImageInfo::new_n32(3, 1, AlphaType::Opaque);
        let px: Vec<u8> = [0u8, 100, 200]
            .iter()
            .flat_map(|&r| [r, 0, 0, 255])
            .collect();
        let mip = build(info, &px, MipColorMode::Legacy);
        assert_eq!(mip.count(), 1);
        let locked = mip.lock().unwrap();
        let pm = locked.level_pixmap(0).unwrap();
        assert_eq!(pm.pixel_rgba8(0, 0).unwrap().r, 50);

        // 1x3 column with the odd bottom row clamped.
        let info = ImageInfo::new_n32(1, 3, AlphaType::Opaque);
        let mip = build(info, &px, MipColorMode::Legacy);
        let locked = mip.lock().unwrap();
        assert_eq!(locked.level_pixmap(0).unwrap().pixel_rgba8(0, 0).unwrap().r, 50);
    }

    #[test]
    fn test_gamma_correct_averages_linear() {
        let info = ImageInfo::new_n32(2, 1, AlphaType::Opaque).with_profile(ColorProfile::Srgb);
        let px = [0u8, 0, 0, 255, 255, 255, 255, 255];
        let legacy = build(info, &px, MipColorMode::Legacy);
        let gamma = build(info, &px, MipColorMode::GammaCorrect);
        let l = legacy.lock().unwrap();
        let g = gamma.lock().unwrap();
        let lp = l.level_pixmap(0).unwrap().pixel_rgba8(0, 0).unwrap();
        let gp = g.level_pixmap(0).unwrap().pixel_rgba8(0, 0).unwrap();
        assert_eq!(lp.r, 128);
        // sqrt((0 + 255^2) / 2) = 180.3
        assert_eq!(gp.r, 180);
        assert_eq!(gp.a, 255);
    }

    #[test]
    fn test_gamma_correct_keeps_alpha8_linear() {
        let px = [0u8, 255];
        let alpha = ImageInfo::new(2, 1, ColorType::Alpha8, AlphaType::Premul)
            .with_profile(ColorProfile::Srgb);
        let mip = build(alpha, &px, MipColorMode::GammaCorrect);
        let locked = mip.lock().unwrap();
        assert_eq!(locked.level_pixmap(0).unwrap().pixels()[0], 128);

        // Gray8 is a color channel and still averages in linear light.
        let gray = ImageInfo::new(2, 1, ColorType::Gray8, AlphaType::Opaque)
            .with_profile(ColorProfile::Srgb);
        let mip = build(gray, &px, MipColorMode::GammaCorrect);
        let locked = mip.lock().unwrap();
        assert_eq!(locked.level_pixmap(0).unwrap().pixels()[0], 180);
    }

    #[test]
    fn test_extract_level() {
        let (info, px) = solid(100, 100, [0, 0, 0, 255]);
        let mip = build(info, &px, MipColorMode::Legacy);
        let locked = mip.lock().unwrap();

        let level = locked.extract_level(0.25).unwrap();
        assert_eq!(level.index, 1);
        assert_eq!((level.level.width(), level.level.height()), (25, 25));
        assert_eq!(level.scale, 0.25);

        // 0.3 is between 1/4 and 1/2 and still picks the half-size level.
        assert_eq!(locked.extract_level(0.3).unwrap().index, 0);
        assert_eq!(locked.extract_level(0.5).unwrap().index, 0);
        // Tiny scales clamp to the last level.
        assert_eq!(locked.extract_level(1e-6).unwrap().index, 5);

        assert!(locked.extract_level(0.75).is_none());
        assert!(locked.extract_level(1.0).is_none());
        assert!(locked.extract_level(0.0).is_none());
        assert!(locked.extract_level(f64::NAN).is_none());
    }

    #[test]
    fn test_unsupported_sources() {
        let (info, px) = solid(1, 1, [0, 0, 0, 255]);
        let pm = Pixmap::new(info, &px, 4).unwrap();
        assert!(MipMap::build(&pm, MipColorMode::Legacy, None).is_none());

        let info = ImageInfo::new(2, 2, ColorType::Rgb565, AlphaType::Opaque);
        let px = [0u8; 8];
        let pm = Pixmap::new(info, &px, 4).unwrap();
        assert!(MipMap::build(&pm, MipColorMode::Legacy, None).is_none());
    }

    #[test]
    fn test_discardable_chain() {
        let pool = Arc::new(DiscardablePool::new());
        let factory = pool.factory();
        let (info, px) = solid(8, 8, [1, 2, 3, 4]);
        let pm = Pixmap::new(info, &px, 32).unwrap();
        let mip = Arc::new(MipMap::build(&pm, MipColorMode::Legacy, Some(&factory)).unwrap());
        // 4x4 + 2x2 + 1x1 levels, four bytes per pixel.
        assert_eq!(mip.size(), (16 + 4 + 1) * 4);

        let locked = mip.lock().unwrap();
        pool.purge_unlocked();
        assert!(locked.level_pixmap(2).is_some());
        drop(locked);
        pool.purge_unlocked();
        assert!(mip.lock().is_none());
    }
}
