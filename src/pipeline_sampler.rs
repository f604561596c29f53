//! Sample stage: reads source pixels at integer coordinates.
//!
//! Incoming coordinates have been tiled into the source rectangle; the
//! sampler floors them and pins them to the last row and column so that
//! rounding at a tile edge can never read outside the pixmap.
//!
//! Spans are dispatched by rate:
//!
//! - slower than one source pixel per destination pixel (zoomed in): walk in
//!   16.16 fixed point and reuse the last pixel while the index is unchanged;
//! - exactly one: read contiguous pixels;
//! - faster: fall back to point batches.

use crate::basics::{fixed_floor_to_int, float_to_fixed};
use crate::color::{Color4f, ColorProfile, ColorType, Rgba8};
use crate::error::{Error, Result};
use crate::pipeline_stage::{
    bilerp_span_fallback, span_fallback, BilerpProcessor, PixelPlacer, PointProcessor,
};
use crate::pixmap::{ImageInfo, Pixmap};
use crate::span::{BilerpSpan, Lanes, Span};

// Largest coordinate the 16.16 walk can represent.
const FIXED_COORD_LIMIT: f32 = 32767.0;

// ============================================================================
// Pixel access
// ============================================================================

/// Reads normalised float pixels from a source.
pub(crate) trait PixelGetter {
    fn width(&self) -> i32;
    fn height(&self) -> i32;
    /// The bytes of row `iy`, `0 <= iy < height`.
    fn row(&self, iy: i32) -> &[u8];
    /// Pixel `ix` of `row`, `0 <= ix < width`.
    fn get_pixel(&self, row: &[u8], ix: i32) -> Color4f;

    #[inline]
    fn pin_x(&self, x: f32) -> i32 {
        (x.floor() as i32).clamp(0, self.width() - 1)
    }

    #[inline]
    fn pin_y(&self, y: f32) -> i32 {
        (y.floor() as i32).clamp(0, self.height() - 1)
    }

    #[inline]
    fn get_pixel_at(&self, x: f32, y: f32) -> Color4f {
        let row = self.row(self.pin_y(y));
        self.get_pixel(row, self.pin_x(x))
    }
}

/// 32-bit pixels, RGBA or BGRA byte order, linear or sRGB encoded.
pub(crate) struct Pixel8888<'a, const BGRA: bool, const SRGB: bool> {
    pixmap: Pixmap<'a>,
    width: i32,
    height: i32,
}

impl<'a, const BGRA: bool, const SRGB: bool> Pixel8888<'a, BGRA, SRGB> {
    pub(crate) fn new(pixmap: Pixmap<'a>) -> Self {
        debug_assert_eq!(pixmap.info().bytes_per_pixel(), 4);
        Self {
            width: pixmap.width() as i32,
            height: pixmap.height() as i32,
            pixmap,
        }
    }
}

impl<const BGRA: bool, const SRGB: bool> PixelGetter for Pixel8888<'_, BGRA, SRGB> {
    #[inline]
    fn width(&self) -> i32 {
        self.width
    }

    #[inline]
    fn height(&self) -> i32 {
        self.height
    }

    #[inline]
    fn row(&self, iy: i32) -> &[u8] {
        self.pixmap.row(iy as u32)
    }

    #[inline]
    fn get_pixel(&self, row: &[u8], ix: i32) -> Color4f {
        let i = ix as usize * 4;
        let p = &row[i..i + 4];
        let c = if BGRA {
            Rgba8 {
                r: p[2],
                g: p[1],
                b: p[0],
                a: p[3],
            }
        } else {
            Rgba8 {
                r: p[0],
                g: p[1],
                b: p[2],
                a: p[3],
            }
        };
        let pixel = Color4f::from_rgba8(c);
        if SRGB {
            pixel.srgb_to_linear_approx()
        } else {
            pixel
        }
    }
}

/// Which [`Pixel8888`] variant reads a pixmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    LinearRgba,
    SrgbRgba,
    LinearBgra,
    SrgbBgra,
}

impl PixelFormat {
    pub(crate) fn choose(info: &ImageInfo) -> Result<Self> {
        let srgb = info.profile() == ColorProfile::Srgb;
        match (info.color_type(), srgb) {
            (ColorType::Rgba8888, false) => Ok(PixelFormat::LinearRgba),
            (ColorType::Rgba8888, true) => Ok(PixelFormat::SrgbRgba),
            (ColorType::Bgra8888, false) => Ok(PixelFormat::LinearBgra),
            (ColorType::Bgra8888, true) => Ok(PixelFormat::SrgbBgra),
            (other, _) => Err(Error::UnsupportedColorType(other)),
        }
    }
}

// ============================================================================
// Bilinear blend
// ============================================================================

//              1 - fx     fx
//           +--------+--------+
//   1 - fy  |  px00  |  px10  |
//           +--------+--------+
//     fy    |  px01  |  px11  |
//           +--------+--------+
//
// px00 -> (1 - fx)(1 - fy) = 1 - fx - fy + fxy
// px10 -> fx(1 - fy)       = fx - fxy
// px01 -> (1 - fx)fy       = fy - fxy
// px11 -> fxy
//
// The fractions come from the px00 tap. The other taps may have been wrapped
// to the far side of the tile, so their coordinates say nothing about the
// blend position.
#[inline]
fn bilerp4(
    xs: &Lanes,
    ys: &Lanes,
    px00: Color4f,
    px10: Color4f,
    px01: Color4f,
    px11: Color4f,
) -> Color4f {
    let fx = xs[0] - xs[0].floor();
    let fy = ys[0] - ys[0].floor();
    let fxy = fx * fy;
    px11 * fxy + px01 * (fy - fxy) + px10 * (fx - fxy) + px00 * (1.0 - fx - fy + fxy)
}

// ============================================================================
// Sampler
// ============================================================================

/// Reads pixels through `getter` and hands them to the placer.
pub(crate) struct Sampler<'n, G, P: ?Sized> {
    getter: G,
    next: &'n mut P,
}

impl<'n, G: PixelGetter, P: PixelPlacer + ?Sized> Sampler<'n, G, P> {
    pub(crate) fn new(getter: G, next: &'n mut P) -> Self {
        Self { getter, next }
    }

    /// Zoomed in: several destination pixels per source pixel.
    fn point_span_slow_rate(&mut self, span: Span) {
        let start = span.start();
        let mut count = span.count();
        let dx = if count > 1 {
            span.length() / (count as f32 - 1.0)
        } else {
            0.0
        };
        let mut fx = float_to_fixed(start.x);
        let fdx = float_to_fixed(dx);

        let getter = &self.getter;
        let row = getter.row(getter.pin_y(start.y));
        let pin = |ix: i32| ix.clamp(0, getter.width() - 1);

        let mut ix = fixed_floor_to_int(fx);
        let mut prev_ix = ix;
        let mut pixel = getter.get_pixel(row, pin(ix));

        let mut next_pixel = || {
            if ix != prev_ix {
                pixel = getter.get_pixel(row, pin(ix));
                prev_ix = ix;
            }
            fx = fx.wrapping_add(fdx);
            ix = fixed_floor_to_int(fx);
            pixel
        };

        while count >= 4 {
            let p0 = next_pixel();
            let p1 = next_pixel();
            let p2 = next_pixel();
            let p3 = next_pixel();
            self.next.place_4_pixels(p0, p1, p2, p3);
            count -= 4;
        }
        while count > 0 {
            self.next.place_pixel(next_pixel());
            count -= 1;
        }
    }

    /// One source pixel per destination pixel: contiguous reads.
    fn point_span_unit_rate(&mut self, span: Span) {
        let start = span.start();
        let mut count = span.count();
        let getter = &self.getter;
        let row = getter.row(getter.pin_y(start.y));
        let last = getter.width() - 1;
        let mut ix = start.x.floor() as i32;
        let get = |ix: i32| getter.get_pixel(row, ix.clamp(0, last));

        while count >= 4 {
            let (p0, p1, p2, p3) = (get(ix), get(ix + 1), get(ix + 2), get(ix + 3));
            self.next.place_4_pixels(p0, p1, p2, p3);
            ix += 4;
            count -= 4;
        }
        while count > 0 {
            self.next.place_pixel(get(ix));
            ix += 1;
            count -= 1;
        }
    }
}

impl<G: PixelGetter, P: PixelPlacer + ?Sized> PointProcessor for Sampler<'_, G, P> {
    fn point_list_few(&mut self, n: usize, xs: Lanes, ys: Lanes) {
        debug_assert!(0 < n && n < 4);
        for i in 0..n {
            let pixel = self.getter.get_pixel_at(xs[i], ys[i]);
            self.next.place_pixel(pixel);
        }
    }

    fn point_list4(&mut self, xs: Lanes, ys: Lanes) {
        let g = &self.getter;
        let p0 = g.get_pixel_at(xs[0], ys[0]);
        let p1 = g.get_pixel_at(xs[1], ys[1]);
        let p2 = g.get_pixel_at(xs[2], ys[2]);
        let p3 = g.get_pixel_at(xs[3], ys[3]);
        self.next.place_4_pixels(p0, p1, p2, p3);
    }

    fn point_span(&mut self, span: Span) {
        debug_assert!(!span.is_empty());
        let length = span.length();
        let full = span.count() as f32 - 1.0;
        let start_x = span.start_x();
        let in_fixed_range =
            start_x.abs() < FIXED_COORD_LIMIT && span.end_x().abs() < FIXED_COORD_LIMIT;

        if length < full && in_fixed_range {
            self.point_span_slow_rate(span);
        } else if length == full {
            self.point_span_unit_rate(span);
        } else {
            span_fallback(span, self);
        }
    }
}

impl<G: PixelGetter, P: PixelPlacer + ?Sized> BilerpProcessor for Sampler<'_, G, P> {
    fn bilerp_list(&mut self, xs: Lanes, ys: Lanes) {
        let g = &self.getter;
        let px00 = g.get_pixel_at(xs[0], ys[0]);
        let px10 = g.get_pixel_at(xs[1], ys[1]);
        let px01 = g.get_pixel_at(xs[2], ys[2]);
        let px11 = g.get_pixel_at(xs[3], ys[3]);
        self.next.place_pixel(bilerp4(&xs, &ys, px00, px10, px01, px11));
    }

    fn bilerp_span(&mut self, span: BilerpSpan) {
        bilerp_span_fallback(span, self);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::PointF;
    use crate::color::{AlphaType, Pm4f};
    use crate::pipeline_placer::FloatPixelPlacer;

    // A 4x2 RGBA source: row 0 has red levels 0, 64, 128, 192; row 1 has
    // green 255 everywhere.
    fn source() -> Vec<u8> {
        let mut px = Vec::new();
        for i in 0..4u8 {
            px.extend_from_slice(&[i * 64, 0, 0, 255]);
        }
        for _ in 0..4 {
            px.extend_from_slice(&[0, 255, 0, 255]);
        }
        px
    }

    fn info() -> ImageInfo {
        ImageInfo::new(4, 2, ColorType::Rgba8888, AlphaType::Premul)
    }

    fn reds(dst: &[Pm4f]) -> Vec<u8> {
        dst.iter().map(|p| p.to_rgba8().r).collect()
    }

    fn sample_span(span: Span, n: usize) -> Vec<Pm4f> {
        let px = source();
        let pixmap = Pixmap::new(info(), &px, 16).unwrap();
        let mut dst = vec![Pm4f::TRANSPARENT; n];
        let mut placer = FloatPixelPlacer::new(&mut dst, AlphaType::Premul);
        let mut sampler = Sampler::new(Pixel8888::<false, false>::new(pixmap), &mut placer);
        sampler.point_span(span);
        assert_eq!(placer.placed(), n);
        dst
    }

    #[test]
    fn test_choose_format() {
        assert_eq!(PixelFormat::choose(&info()).unwrap(), PixelFormat::LinearRgba);
        let bgra = ImageInfo::new(1, 1, ColorType::Bgra8888, AlphaType::Premul)
            .with_profile(ColorProfile::Srgb);
        assert_eq!(PixelFormat::choose(&bgra).unwrap(), PixelFormat::SrgbBgra);
        let gray = ImageInfo::new(1, 1, ColorType::Gray8, AlphaType::Opaque);
        assert_eq!(
            PixelFormat::choose(&gray),
            Err(Error::UnsupportedColorType(ColorType::Gray8))
        );
    }

    #[test]
    fn test_unit_rate() {
        let dst = sample_span(Span::new(PointF::new(0.5, 0.5), 3.0, 4), 4);
        assert_eq!(reds(&dst), vec![0, 64, 128, 192]);
    }

    #[test]
    fn test_slow_rate_reuses_pixels() {
        // Samples at 0.5, 1.0, 1.5, 2.0, 2.5.
        let dst = sample_span(Span::new(PointF::new(0.5, 0.5), 2.0, 5), 5);
        assert_eq!(reds(&dst), vec![0, 64, 64, 128, 128]);
    }

    #[test]
    fn test_slow_rate_zero_length() {
        let dst = sample_span(Span::new(PointF::new(3.0, 0.0), 0.0, 6), 6);
        assert_eq!(reds(&dst), vec![192; 6]);
    }

    #[test]
    fn test_fast_rate() {
        // Samples at 0.5, 2.5.
        let dst = sample_span(Span::new(PointF::new(0.5, 0.5), 2.0, 2), 2);
        assert_eq!(reds(&dst), vec![0, 128]);
    }

    #[test]
    fn test_second_row() {
        let dst = sample_span(Span::new(PointF::new(0.5, 1.5), 3.0, 4), 4);
        assert!(dst.iter().all(|p| p.to_rgba8().g == 255));
    }

    #[test]
    fn test_indices_are_pinned() {
        let dst = sample_span(Span::new(PointF::new(3.0, 2.5), 1.0, 2), 2);
        assert_eq!(dst[1].to_rgba8().g, 255);
    }

    #[test]
    fn test_bgra_swizzle() {
        let px = [10u8, 20, 30, 255];
        let info = ImageInfo::new(1, 1, ColorType::Bgra8888, AlphaType::Premul);
        let pixmap = Pixmap::new(info, &px, 4).unwrap();
        let getter = Pixel8888::<true, false>::new(pixmap);
        let c = getter.get_pixel_at(0.5, 0.5).to_rgba8();
        assert_eq!((c.r, c.g, c.b, c.a), (30, 20, 10, 255));
    }

    #[test]
    fn test_srgb_squares_color_not_alpha() {
        let px = [255u8, 0, 0, 255];
        let pixmap = Pixmap::new(
            ImageInfo::new(1, 1, ColorType::Rgba8888, AlphaType::Premul),
            &px,
            4,
        )
        .unwrap();
        let getter = Pixel8888::<false, true>::new(pixmap);
        let c = getter.get_pixel_at(0.0, 0.0);
        assert_eq!(c, Color4f::new(1.0, 0.0, 0.0, 1.0));

        let half = [128u8, 0, 0, 128];
        let pixmap = Pixmap::new(
            ImageInfo::new(1, 1, ColorType::Rgba8888, AlphaType::Premul),
            &half,
            4,
        )
        .unwrap();
        let c = Pixel8888::<false, true>::new(pixmap).get_pixel_at(0.0, 0.0);
        let v = 128.0f32 / 255.0;
        assert!((c.r - v * v).abs() < 1e-6);
        assert!((c.a - v).abs() < 1e-6);
    }

    #[test]
    fn test_bilerp_weights() {
        let px = source();
        let pixmap = Pixmap::new(info(), &px, 16).unwrap();
        let mut dst = vec![Pm4f::TRANSPARENT; 1];
        let mut placer = FloatPixelPlacer::new(&mut dst, AlphaType::Premul);
        let mut sampler = Sampler::new(Pixel8888::<false, false>::new(pixmap), &mut placer);
        // Halfway between red 0 and red 64, a quarter of the way down to the
        // green row.
        sampler.bilerp_list([0.5, 1.5, 0.5, 1.5], [0.25, 0.25, 1.25, 1.25]);
        let c = dst[0];
        let red64 = 64.0 / 255.0;
        assert!((c.r - 0.75 * 0.5 * red64).abs() < 1e-6);
        assert!((c.g - 0.25).abs() < 1e-6);
        assert!((c.a - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_bilerp_wrapped_taps_use_px00_fraction() {
        let px = source();
        let pixmap = Pixmap::new(info(), &px, 16).unwrap();
        let mut dst = vec![Pm4f::TRANSPARENT; 1];
        let mut placer = FloatPixelPlacer::new(&mut dst, AlphaType::Premul);
        let mut sampler = Sampler::new(Pixel8888::<false, false>::new(pixmap), &mut placer);
        // px10 wrapped from 4.25 to 0.25: blend pixel 3 with pixel 0.
        sampler.bilerp_list([3.25, 0.25, 3.25, 0.25], [0.0, 0.0, 0.0, 0.0]);
        let expected = 0.75 * (192.0 / 255.0);
        assert!((dst[0].r - expected).abs() < 1e-6);
    }
}
