//! Image descriptors and the read-only pixel view.
//!
//! [`ImageInfo`] describes dimensions and pixel format. [`Pixmap`] borrows
//! pixel bytes laid out row by row with a fixed stride; it never owns memory.
//! Pixmaps are usually obtained from a locked [`crate::pixel_ref::PixelRef`].

use crate::color::{AlphaType, ColorProfile, ColorTable, ColorType, Rgba8};
use crate::error::{Error, Result};

// ============================================================================
// ImageInfo
// ============================================================================

/// Dimensions and pixel format of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageInfo {
    width: u32,
    height: u32,
    color_type: ColorType,
    alpha_type: AlphaType,
    profile: ColorProfile,
}

impl ImageInfo {
    pub fn new(width: u32, height: u32, color_type: ColorType, alpha_type: AlphaType) -> Self {
        Self {
            width,
            height,
            color_type,
            alpha_type,
            profile: ColorProfile::Linear,
        }
    }

    /// Native 32-bit layout with the given alpha type.
    pub fn new_n32(width: u32, height: u32, alpha_type: AlphaType) -> Self {
        Self::new(width, height, ColorType::N32, alpha_type)
    }

    pub fn new_n32_premul(width: u32, height: u32) -> Self {
        Self::new_n32(width, height, AlphaType::Premul)
    }

    pub fn with_profile(mut self, profile: ColorProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_alpha_type(mut self, alpha_type: AlphaType) -> Self {
        self.alpha_type = alpha_type;
        self
    }

    /// Same format, new dimensions.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color_type(&self) -> ColorType {
        self.color_type
    }

    pub fn alpha_type(&self) -> AlphaType {
        self.alpha_type
    }

    pub fn profile(&self) -> ColorProfile {
        self.profile
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.color_type.bytes_per_pixel()
    }

    /// True when there is nothing to draw.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.color_type == ColorType::Unknown
    }

    pub fn is_opaque(&self) -> bool {
        self.alpha_type == AlphaType::Opaque || self.color_type.is_always_opaque()
    }

    /// Tightly packed row size in bytes.
    pub fn min_row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel()
    }

    /// Bytes required to hold the image with the given stride: every row
    /// but the last is `row_bytes` long, the last only needs its pixels.
    /// `None` on overflow.
    pub fn compute_byte_size(&self, row_bytes: usize) -> Option<usize> {
        if self.height == 0 {
            return Some(0);
        }
        (self.height as usize - 1)
            .checked_mul(row_bytes)?
            .checked_add(self.min_row_bytes())
    }

    /// Byte size with a tightly packed stride.
    pub fn compute_min_byte_size(&self) -> Option<usize> {
        self.compute_byte_size(self.min_row_bytes())
    }
}

// ============================================================================
// Pixmap
// ============================================================================

/// Borrowed, read-only pixels.
#[derive(Debug, Clone, Copy)]
pub struct Pixmap<'a> {
    info: ImageInfo,
    pixels: &'a [u8],
    row_bytes: usize,
    color_table: Option<&'a ColorTable>,
}

impl<'a> Pixmap<'a> {
    /// Wrap `pixels`, validating the stride and buffer length against `info`.
    pub fn new(info: ImageInfo, pixels: &'a [u8], row_bytes: usize) -> Result<Self> {
        if row_bytes < info.min_row_bytes() {
            return Err(Error::RowBytesTooSmall {
                row_bytes,
                min_row_bytes: info.min_row_bytes(),
            });
        }
        let required = info
            .compute_byte_size(row_bytes)
            .ok_or(Error::AllocationFailed(usize::MAX))?;
        if pixels.len() < required {
            return Err(Error::BufferTooSmall {
                len: pixels.len(),
                required,
            });
        }
        Ok(Self {
            info,
            pixels,
            row_bytes,
            color_table: None,
        })
    }

    /// Wrap pixels whose layout was already validated against `info`.
    pub(crate) fn from_parts(
        info: ImageInfo,
        pixels: &'a [u8],
        row_bytes: usize,
        color_table: Option<&'a ColorTable>,
    ) -> Self {
        debug_assert!(row_bytes >= info.min_row_bytes());
        debug_assert!(info
            .compute_byte_size(row_bytes)
            .map_or(false, |size| pixels.len() >= size));
        Self {
            info,
            pixels,
            row_bytes,
            color_table,
        }
    }

    pub fn with_color_table(mut self, table: Option<&'a ColorTable>) -> Self {
        self.color_table = table;
        self
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn color_type(&self) -> ColorType {
        self.info.color_type
    }

    pub fn alpha_type(&self) -> AlphaType {
        self.info.alpha_type
    }

    pub fn profile(&self) -> ColorProfile {
        self.info.profile
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    pub fn pixels(&self) -> &'a [u8] {
        self.pixels
    }

    pub fn color_table(&self) -> Option<&'a ColorTable> {
        self.color_table
    }

    pub fn is_opaque(&self) -> bool {
        self.info.is_opaque()
    }

    /// The pixel bytes of row `y`, exactly `min_row_bytes` long.
    #[inline]
    pub fn row(&self, y: u32) -> &'a [u8] {
        debug_assert!(y < self.info.height);
        let start = y as usize * self.row_bytes;
        &self.pixels[start..start + self.info.min_row_bytes()]
    }

    /// Decode the pixel at `(x, y)` into 8-bit RGBA as stored (no alpha
    /// conversion). `None` when out of bounds or the format is unknown.
    pub fn pixel_rgba8(&self, x: u32, y: u32) -> Option<Rgba8> {
        if x >= self.info.width || y >= self.info.height {
            return None;
        }
        let row = self.row(y);
        let bpp = self.info.bytes_per_pixel();
        let p = &row[x as usize * bpp..(x as usize + 1) * bpp];
        match self.info.color_type {
            ColorType::Rgba8888 => Some(Rgba8 {
                r: p[0],
                g: p[1],
                b: p[2],
                a: p[3],
            }),
            ColorType::Bgra8888 => Some(Rgba8 {
                r: p[2],
                g: p[1],
                b: p[0],
                a: p[3],
            }),
            ColorType::Gray8 => Some(Rgba8 {
                r: p[0],
                g: p[0],
                b: p[0],
                a: 255,
            }),
            ColorType::Alpha8 => Some(Rgba8 {
                r: 0,
                g: 0,
                b: 0,
                a: p[0],
            }),
            ColorType::Rgb565 => {
                let v = u16::from_ne_bytes([p[0], p[1]]);
                let r = ((v >> 11) & 0x1f) as u32;
                let g = ((v >> 5) & 0x3f) as u32;
                let b = (v & 0x1f) as u32;
                Some(Rgba8::new_opaque(
                    (r << 3) | (r >> 2),
                    (g << 2) | (g >> 4),
                    (b << 3) | (b >> 2),
                ))
            }
            ColorType::Index8 => self.color_table.map(|t| t.get(p[0])),
            ColorType::Unknown => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_info_sizes() {
        let info = ImageInfo::new_n32_premul(10, 3);
        assert_eq!(info.min_row_bytes(), 40);
        assert_eq!(info.compute_byte_size(48), Some(2 * 48 + 40));
        assert_eq!(info.compute_min_byte_size(), Some(120));
        assert!(!info.is_empty());
        assert!(info.with_dimensions(0, 3).is_empty());
    }

    #[test]
    fn test_image_info_opaque() {
        assert!(ImageInfo::new_n32(1, 1, AlphaType::Opaque).is_opaque());
        assert!(!ImageInfo::new_n32_premul(1, 1).is_opaque());
        assert!(ImageInfo::new(1, 1, ColorType::Gray8, AlphaType::Premul).is_opaque());
    }

    #[test]
    fn test_pixmap_rejects_short_stride() {
        let buf = [0u8; 64];
        let err = Pixmap::new(ImageInfo::new_n32_premul(4, 4), &buf, 8).unwrap_err();
        assert_eq!(
            err,
            Error::RowBytesTooSmall {
                row_bytes: 8,
                min_row_bytes: 16
            }
        );
    }

    #[test]
    fn test_pixmap_rejects_short_buffer() {
        let buf = [0u8; 60];
        let err = Pixmap::new(ImageInfo::new_n32_premul(4, 4), &buf, 16).unwrap_err();
        assert_eq!(
            err,
            Error::BufferTooSmall {
                len: 60,
                required: 64
            }
        );
    }

    #[test]
    fn test_pixmap_row_with_padding() {
        let mut buf = vec![0u8; 2 * 12];
        buf[12] = 7;
        let pm = Pixmap::new(ImageInfo::new_n32_premul(2, 2), &buf, 12).unwrap();
        assert_eq!(pm.row(1).len(), 8);
        assert_eq!(pm.row(1)[0], 7);
    }

    #[test]
    fn test_pixel_rgba8_orders() {
        let buf = [1u8, 2, 3, 4];
        let rgba = Pixmap::new(ImageInfo::new_n32_premul(1, 1), &buf, 4).unwrap();
        assert_eq!(rgba.pixel_rgba8(0, 0), Some(Rgba8::new(1, 2, 3, 4)));
        let bgra = Pixmap::new(
            ImageInfo::new(1, 1, ColorType::Bgra8888, AlphaType::Premul),
            &buf,
            4,
        )
        .unwrap();
        assert_eq!(bgra.pixel_rgba8(0, 0), Some(Rgba8::new(3, 2, 1, 4)));
        assert_eq!(bgra.pixel_rgba8(1, 0), None);
    }

    #[test]
    fn test_pixel_rgba8_index8() {
        let buf = [1u8];
        let table = ColorTable::new(vec![Rgba8::new_opaque(0, 0, 0), Rgba8::new_opaque(9, 8, 7)]);
        let info = ImageInfo::new(1, 1, ColorType::Index8, AlphaType::Premul);
        let pm = Pixmap::new(info, &buf, 1).unwrap();
        assert_eq!(pm.pixel_rgba8(0, 0), None);
        let pm = pm.with_color_table(Some(&table));
        assert_eq!(pm.pixel_rgba8(0, 0), Some(Rgba8::new_opaque(9, 8, 7)));
    }
}
