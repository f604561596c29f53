//! A view of (part of) a [`PixelRef`].
//!
//! A [`Bitmap`] pairs an [`ImageInfo`] with a shared pixel ref and the
//! position of its top-left pixel inside that ref, so subsets share storage
//! with the bitmap they were cut from.

use std::sync::Arc;

use crate::basics::RectI;
use crate::color::{AlphaType, ColorType, Rgba8};
use crate::discardable::DiscardableFactory;
use crate::error::{Error, Result};
use crate::pixel_ref::{DiscardablePixels, LockedPixels, MallocPixels, PixelRef};
use crate::pixmap::ImageInfo;

#[derive(Debug, Clone)]
pub struct Bitmap {
    info: ImageInfo,
    pixel_ref: Option<Arc<PixelRef>>,
    origin: (u32, u32),
}

/// Zeroed pixel memory with a packed stride.
pub(crate) fn alloc_zeroed(info: &ImageInfo) -> Result<Vec<u8>> {
    let size = info
        .compute_min_byte_size()
        .ok_or(Error::AllocationFailed(usize::MAX))?;
    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(size)
        .map_err(|_| Error::AllocationFailed(size))?;
    pixels.resize(size, 0);
    Ok(pixels)
}

impl Bitmap {
    /// A bitmap without pixels.
    pub fn new(info: ImageInfo) -> Self {
        Self {
            info,
            pixel_ref: None,
            origin: (0, 0),
        }
    }

    /// Allocate zeroed heap pixels for `info`.
    pub fn alloc_pixels(info: ImageInfo) -> Result<Self> {
        let pixels = alloc_zeroed(&info)?;
        Self::from_pixels(info, pixels, info.min_row_bytes())
    }

    /// Allocate pixels through `factory`, or on the heap when there is none.
    pub fn alloc_pixels_with(info: ImageInfo, factory: Option<&DiscardableFactory>) -> Result<Self> {
        let pixels = alloc_zeroed(&info)?;
        Self::install_pixels(info, pixels, factory)
    }

    /// Take ownership of tightly packed `pixels`, moving them into memory
    /// from `factory` when one is given.
    pub fn install_pixels(
        info: ImageInfo,
        pixels: Vec<u8>,
        factory: Option<&DiscardableFactory>,
    ) -> Result<Self> {
        let Some(factory) = factory else {
            return Self::from_pixels(info, pixels, info.min_row_bytes());
        };
        let required = info
            .compute_min_byte_size()
            .ok_or(Error::AllocationFailed(usize::MAX))?;
        if pixels.len() < required {
            return Err(Error::BufferTooSmall {
                len: pixels.len(),
                required,
            });
        }
        let size = pixels.len();
        let memory = factory(pixels).ok_or(Error::AllocationFailed(size))?;
        let pixel_ref = PixelRef::new(
            info,
            Box::new(DiscardablePixels::new(memory, info.min_row_bytes())),
        );
        Ok(Self::with_pixel_ref(info, pixel_ref, (0, 0)))
    }

    /// Take ownership of `pixels`.
    pub fn from_pixels(info: ImageInfo, pixels: Vec<u8>, row_bytes: usize) -> Result<Self> {
        let provider = MallocPixels::new(&info, pixels, row_bytes, None)?;
        Ok(Self::with_pixel_ref(
            info,
            PixelRef::new(info, Box::new(provider)),
            (0, 0),
        ))
    }

    /// View `info`-sized pixels of `pixel_ref` starting at `origin`.
    pub fn with_pixel_ref(info: ImageInfo, pixel_ref: Arc<PixelRef>, origin: (u32, u32)) -> Self {
        Self {
            info,
            pixel_ref: Some(pixel_ref),
            origin,
        }
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width()
    }

    pub fn height(&self) -> u32 {
        self.info.height()
    }

    pub fn color_type(&self) -> ColorType {
        self.info.color_type()
    }

    pub fn alpha_type(&self) -> AlphaType {
        self.info.alpha_type()
    }

    pub fn is_opaque(&self) -> bool {
        self.info.is_opaque()
    }

    pub fn pixel_ref(&self) -> Option<&Arc<PixelRef>> {
        self.pixel_ref.as_ref()
    }

    pub fn pixel_origin(&self) -> (u32, u32) {
        self.origin
    }

    /// This bitmap's area within its pixel ref.
    pub fn bounds(&self) -> RectI {
        RectI::from_xywh(
            self.origin.0 as i32,
            self.origin.1 as i32,
            self.info.width() as i32,
            self.info.height() as i32,
        )
    }

    /// True when there is nothing to draw: empty dimensions or no pixels.
    pub fn draws_nothing(&self) -> bool {
        self.info.is_empty() || self.pixel_ref.is_none()
    }

    /// Generation ID of the pixel ref, or 0 without one.
    pub fn generation_id(&self) -> u32 {
        self.pixel_ref.as_ref().map_or(0, |pr| pr.generation_id())
    }

    pub fn is_immutable(&self) -> bool {
        self.pixel_ref.as_ref().map_or(false, |pr| pr.is_immutable())
    }

    pub fn set_immutable(&self) {
        if let Some(pr) = &self.pixel_ref {
            pr.set_immutable();
        }
    }

    /// Lock the pixels covered by this bitmap.
    pub fn lock_pixels(&self) -> Option<LockedPixels> {
        let locked = self.pixel_ref.as_ref()?.lock_pixels()?;
        Some(locked.into_subset(self.origin.0, self.origin.1, self.info))
    }

    /// A bitmap sharing this one's pixels, restricted to `subset` (in this
    /// bitmap's coordinates). `None` if the intersection is empty or there
    /// are no pixels.
    pub fn extract_subset(&self, subset: &RectI) -> Option<Bitmap> {
        let pixel_ref = self.pixel_ref.as_ref()?;
        let mut r = *subset;
        if !r.clip(&RectI::from_wh(self.width() as i32, self.height() as i32)) {
            return None;
        }
        let info = self
            .info
            .with_dimensions(r.width() as u32, r.height() as u32);
        Some(Self::with_pixel_ref(
            info,
            Arc::clone(pixel_ref),
            (self.origin.0 + r.x1 as u32, self.origin.1 + r.y1 as u32),
        ))
    }

    /// Fill this bitmap's area with `color`, premultiplied unless the bitmap
    /// is unpremultiplied. Only 32-bit color types can be erased.
    pub fn erase(&self, color: Rgba8) -> Result<()> {
        let pixel_ref = self.pixel_ref.as_ref().ok_or(Error::LockFailed)?;
        let mut c = color;
        if self.alpha_type() != AlphaType::Unpremul {
            c.premultiply();
        }
        let bytes = match self.color_type() {
            ColorType::Rgba8888 => [c.r, c.g, c.b, c.a],
            ColorType::Bgra8888 => [c.b, c.g, c.r, c.a],
            other => return Err(Error::UnsupportedColorType(other)),
        };
        let (x0, y0) = (self.origin.0 as usize, self.origin.1 as usize);
        let (w, h) = (self.width() as usize, self.height() as usize);
        // Keep the pixel ref locked so lazy providers stay resident.
        let _lock = pixel_ref.lock_pixels().ok_or(Error::LockFailed)?;
        pixel_ref.write_pixels(|pixels, row_bytes| {
            for y in y0..y0 + h {
                let start = y * row_bytes + x0 * 4;
                if let Some(row) = pixels.get_mut(start..start + w * 4) {
                    for px in row.chunks_exact_mut(4) {
                        px.copy_from_slice(&bytes);
                    }
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
