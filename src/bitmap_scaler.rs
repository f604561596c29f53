//! High-quality bitmap resizing.
//!
//! A separable convolution: rows are resampled into an intermediate buffer,
//! then columns into the result. Filters are evaluated in source pixel units
//! and stretched by the minification factor so every source pixel
//! contributes when shrinking. All arithmetic is done on premultiplied
//! floats; the result is 32-bit RGBA, premultiplied.

use std::f64::consts::PI;

use log::debug;

use crate::bitmap::Bitmap;
use crate::color::{AlphaType, Color4f, ColorType, Rgba8};
use crate::discardable::DiscardableFactory;
use crate::error::{Error, Result};
use crate::pixmap::{ImageInfo, Pixmap};

// ============================================================================
// Filter shapes
// ============================================================================

/// A resampling kernel.
pub trait ResizeFilter {
    /// Distance from the center beyond which the weight is zero.
    fn radius(&self) -> f64;
    /// Weight at signed distance `x` from the center.
    fn weight(&self, x: f64) -> f64;
}

/// Nearest-neighbour box of width 1.
pub struct BoxFilter;
impl ResizeFilter for BoxFilter {
    fn radius(&self) -> f64 {
        0.5
    }
    fn weight(&self, x: f64) -> f64 {
        if (-0.5..0.5).contains(&x) {
            1.0
        } else {
            0.0
        }
    }
}

/// Linear interpolation.
pub struct TriangleFilter;
impl ResizeFilter for TriangleFilter {
    fn radius(&self) -> f64 {
        1.0
    }
    fn weight(&self, x: f64) -> f64 {
        (1.0 - x.abs()).max(0.0)
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-9 {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}

/// Windowed sinc with three lobes.
pub struct Lanczos3Filter;
impl ResizeFilter for Lanczos3Filter {
    fn radius(&self) -> f64 {
        3.0
    }
    fn weight(&self, x: f64) -> f64 {
        if x.abs() >= 3.0 {
            return 0.0;
        }
        sinc(x) * sinc(x / 3.0)
    }
}

/// Sinc under a Hamming window.
pub struct HammingFilter;
impl ResizeFilter for HammingFilter {
    fn radius(&self) -> f64 {
        1.0
    }
    fn weight(&self, x: f64) -> f64 {
        let x = x.abs();
        if x >= 1.0 {
            return 0.0;
        }
        sinc(x) * (0.54 + 0.46 * (PI * x).cos())
    }
}

/// Mitchell-Netravali cubic, parameterized by `b` and `c`.
///
/// Defaults to b = c = 1/3.
pub struct MitchellFilter {
    p0: f64,
    p2: f64,
    p3: f64,
    q0: f64,
    q1: f64,
    q2: f64,
    q3: f64,
}

impl MitchellFilter {
    pub fn new(b: f64, c: f64) -> Self {
        Self {
            p0: (6.0 - 2.0 * b) / 6.0,
            p2: (-18.0 + 12.0 * b + 6.0 * c) / 6.0,
            p3: (12.0 - 9.0 * b - 6.0 * c) / 6.0,
            q0: (8.0 * b + 24.0 * c) / 6.0,
            q1: (-12.0 * b - 48.0 * c) / 6.0,
            q2: (6.0 * b + 30.0 * c) / 6.0,
            q3: (-b - 6.0 * c) / 6.0,
        }
    }
}

impl Default for MitchellFilter {
    fn default() -> Self {
        Self::new(1.0 / 3.0, 1.0 / 3.0)
    }
}

impl ResizeFilter for MitchellFilter {
    fn radius(&self) -> f64 {
        2.0
    }
    fn weight(&self, x: f64) -> f64 {
        let x = x.abs();
        if x < 1.0 {
            return self.p0 + x * x * (self.p2 + x * self.p3);
        }
        if x < 2.0 {
            return self.q0 + x * (self.q1 + x * (self.q2 + x * self.q3));
        }
        0.0
    }
}

/// Kernel used by [`BitmapScaler::resize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResizeMethod {
    Box,
    Triangle,
    Lanczos3,
    Hamming,
    #[default]
    Mitchell,
}

impl ResizeMethod {
    fn filter(self) -> Box<dyn ResizeFilter> {
        match self {
            ResizeMethod::Box => Box::new(BoxFilter),
            ResizeMethod::Triangle => Box::new(TriangleFilter),
            ResizeMethod::Lanczos3 => Box::new(Lanczos3Filter),
            ResizeMethod::Hamming => Box::new(HammingFilter),
            ResizeMethod::Mitchell => Box::new(MitchellFilter::default()),
        }
    }
}

// ============================================================================
// Convolution
// ============================================================================

/// Source taps contributing to one output sample.
#[derive(Debug, Clone)]
struct Contribution {
    start: usize,
    weights: Vec<f32>,
}

fn contributions(src_len: u32, dst_len: u32, filter: &dyn ResizeFilter) -> Vec<Contribution> {
    let scale = dst_len as f64 / src_len as f64;
    let clamped = scale.min(1.0);
    let support = filter.radius() / clamped;

    (0..dst_len)
        .map(|i| {
            let center = (i as f64 + 0.5) / scale;
            let left = (center - support).floor().max(0.0) as usize;
            let right = ((center + support).ceil() as usize).min(src_len as usize);
            let mut weights: Vec<f32> = (left..right)
                .map(|j| filter.weight((j as f64 + 0.5 - center) * clamped) as f32)
                .collect();
            let sum: f32 = weights.iter().sum();
            if sum.abs() > f32::EPSILON {
                weights.iter_mut().for_each(|w| *w /= sum);
                Contribution {
                    start: left,
                    weights,
                }
            } else {
                // Degenerate kernel: fall back to the nearest pixel.
                let nearest = (center.floor() as usize).min(src_len as usize - 1);
                Contribution {
                    start: nearest,
                    weights: vec![1.0],
                }
            }
        })
        .collect()
}

fn try_buffer(len: usize) -> Result<Vec<Color4f>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::AllocationFailed(len * std::mem::size_of::<Color4f>()))?;
    buf.resize(len, Color4f::TRANSPARENT);
    Ok(buf)
}

fn load_premul(src: &Pixmap<'_>) -> Result<Vec<Color4f>> {
    let (w, h) = (src.width(), src.height());
    let mut out = try_buffer(w as usize * h as usize)?;
    let unpremul = src.alpha_type() == AlphaType::Unpremul;
    for y in 0..h {
        for x in 0..w {
            let c = src.pixel_rgba8(x, y).unwrap_or(Rgba8::TRANSPARENT);
            let c = Color4f::from_rgba8(c);
            out[(y * w + x) as usize] = if unpremul { c.premultiply() } else { c };
        }
    }
    Ok(out)
}

fn clamp_premul(c: Color4f) -> Color4f {
    let a = c.a.clamp(0.0, 1.0);
    Color4f::new(c.r.clamp(0.0, a), c.g.clamp(0.0, a), c.b.clamp(0.0, a), a)
}

/// High-quality resizing entry point.
#[derive(Debug, Clone, Copy)]
pub struct BitmapScaler;

impl BitmapScaler {
    /// Resize `src` to `width` x `height` with `method`.
    ///
    /// The result is N32 premultiplied (opaque if the source is), keeps the
    /// source's color profile and is allocated through `factory` when given.
    pub fn resize(
        src: &Pixmap<'_>,
        method: ResizeMethod,
        width: u32,
        height: u32,
        factory: Option<&DiscardableFactory>,
    ) -> Result<Bitmap> {
        if src.color_type() == ColorType::Unknown {
            return Err(Error::UnsupportedColorType(src.color_type()));
        }
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimensions { width, height });
        }
        if src.info().is_empty() {
            return Err(Error::EmptySource);
        }

        let filter = method.filter();
        let (src_w, src_h) = (src.width() as usize, src.height() as usize);
        let (dst_w, dst_h) = (width as usize, height as usize);
        let pixels = load_premul(src)?;

        // Rows: src_w x src_h -> dst_w x src_h.
        let x_contrib = contributions(src.width(), width, filter.as_ref());
        let mut rows = try_buffer(dst_w * src_h)?;
        for y in 0..src_h {
            let src_row = &pixels[y * src_w..(y + 1) * src_w];
            for (x, c) in x_contrib.iter().enumerate() {
                let mut acc = Color4f::TRANSPARENT;
                for (k, &w) in c.weights.iter().enumerate() {
                    acc += src_row[c.start + k] * w;
                }
                rows[y * dst_w + x] = acc;
            }
        }

        // Columns: dst_w x src_h -> dst_w x dst_h.
        let y_contrib = contributions(src.height(), height, filter.as_ref());
        let out_info = ImageInfo::new(
            width,
            height,
            ColorType::Rgba8888,
            if src.is_opaque() {
                AlphaType::Opaque
            } else {
                AlphaType::Premul
            },
        )
        .with_profile(src.profile());
        let mut out = crate::bitmap::alloc_zeroed(&out_info)?;
        for (y, c) in y_contrib.iter().enumerate() {
            for x in 0..dst_w {
                let mut acc = Color4f::TRANSPARENT;
                for (k, &w) in c.weights.iter().enumerate() {
                    acc += rows[(c.start + k) * dst_w + x] * w;
                }
                let px = clamp_premul(acc).to_rgba8();
                let i = (y * dst_w + x) * 4;
                out[i..i + 4].copy_from_slice(&[px.r, px.g, px.b, px.a]);
            }
        }

        debug!(
            "bitmap scaler: {:?} {}x{} -> {}x{}",
            method, src_w, src_h, dst_w, dst_h
        );
        Bitmap::install_pixels(out_info, out, factory)
    }
}

// ============================================================================
// Tests
// ============================================================================
