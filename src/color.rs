//! Color types and pixel format descriptors.
//!
//! - `Rgba8`: u8 components, as stored in 8888 pixels
//! - `Color4f`: f32 components, the pipeline's working format
//! - `ColorType` / `AlphaType` / `ColorProfile`: describe how a pixmap's
//!   bytes are laid out and interpreted
//! - `ColorTable`: palette for `Index8` pixmaps

// ============================================================================
// Rgba8 (8-bit per channel)
// ============================================================================

/// RGBA color with u8 components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const BASE_SHIFT: u32 = 8;
    pub const BASE_MASK: u32 = (1 << Self::BASE_SHIFT) - 1;
    pub const BASE_MSB: u32 = 1 << (Self::BASE_SHIFT - 1);

    pub const TRANSPARENT: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    pub fn new(r: u32, g: u32, b: u32, a: u32) -> Self {
        Self {
            r: r as u8,
            g: g as u8,
            b: b as u8,
            a: a as u8,
        }
    }

    pub fn new_opaque(r: u32, g: u32, b: u32) -> Self {
        Self::new(r, g, b, Self::BASE_MASK)
    }

    pub fn is_opaque(&self) -> bool {
        self.a as u32 == Self::BASE_MASK
    }

    /// Fixed-point multiply, exact over u8.
    /// `(a * b + 128) >> 8`, with rounding correction.
    #[inline]
    pub fn multiply(a: u8, b: u8) -> u8 {
        let t: u32 = a as u32 * b as u32 + Self::BASE_MSB;
        (((t >> Self::BASE_SHIFT) + t) >> Self::BASE_SHIFT) as u8
    }

    pub fn premultiply(&mut self) -> &mut Self {
        if self.a != Self::BASE_MASK as u8 {
            if self.a == 0 {
                self.r = 0;
                self.g = 0;
                self.b = 0;
            } else {
                self.r = Self::multiply(self.r, self.a);
                self.g = Self::multiply(self.g, self.a);
                self.b = Self::multiply(self.b, self.a);
            }
        }
        self
    }

    /// Pack into a native-endian `u32` whose bytes in memory are R,G,B,A.
    #[inline]
    pub fn to_ne_u32(self) -> u32 {
        u32::from_ne_bytes([self.r, self.g, self.b, self.a])
    }

    /// Inverse of [`Rgba8::to_ne_u32`].
    #[inline]
    pub fn from_ne_u32(v: u32) -> Self {
        let [r, g, b, a] = v.to_ne_bytes();
        Self { r, g, b, a }
    }
}

// ============================================================================
// Color4f (float per channel)
// ============================================================================

/// RGBA color with f32 components, nominally in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color4f {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// A premultiplied [`Color4f`], the pipeline's output format.
pub type Pm4f = Color4f;

impl Color4f {
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Normalise 8-bit components to `[0, 1]`.
    #[inline]
    pub fn from_rgba8(c: Rgba8) -> Self {
        const INV: f32 = 1.0 / 255.0;
        Self::new(
            c.r as f32 * INV,
            c.g as f32 * INV,
            c.b as f32 * INV,
            c.a as f32 * INV,
        )
    }

    /// Multiply r, g, b by alpha. Alpha is unchanged.
    #[inline]
    pub fn premultiply(self) -> Self {
        Self::new(self.r * self.a, self.g * self.a, self.b * self.a, self.a)
    }

    /// Square r, g, b. This is the fast approximation of the sRGB to linear
    /// transfer function used by the sampler.
    #[inline]
    pub fn srgb_to_linear_approx(self) -> Self {
        Self::new(self.r * self.r, self.g * self.g, self.b * self.b, self.a)
    }

    /// Clamp to `[0, 1]` and round to 8 bits.
    #[inline]
    pub fn to_rgba8(self) -> Rgba8 {
        #[inline]
        fn q(v: f32) -> u8 {
            (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
        }
        Rgba8 {
            r: q(self.r),
            g: q(self.g),
            b: q(self.b),
            a: q(self.a),
        }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl core::ops::Add for Color4f {
    type Output = Self;
    #[inline]
    fn add(self, c: Self) -> Self {
        Self::new(self.r + c.r, self.g + c.g, self.b + c.b, self.a + c.a)
    }
}

impl core::ops::AddAssign for Color4f {
    #[inline]
    fn add_assign(&mut self, c: Self) {
        *self = *self + c;
    }
}

impl core::ops::Mul<f32> for Color4f {
    type Output = Self;
    #[inline]
    fn mul(self, k: f32) -> Self {
        Self::new(self.r * k, self.g * k, self.b * k, self.a * k)
    }
}

// ============================================================================
// Pixel format descriptors
// ============================================================================

/// How the bytes of one pixel are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorType {
    Unknown,
    Alpha8,
    Rgb565,
    Rgba8888,
    Bgra8888,
    Gray8,
    /// Palette index; requires a [`ColorTable`].
    Index8,
}

impl ColorType {
    /// The platform's native 32-bit color type.
    pub const N32: ColorType = ColorType::Rgba8888;

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorType::Unknown => 0,
            ColorType::Alpha8 | ColorType::Gray8 | ColorType::Index8 => 1,
            ColorType::Rgb565 => 2,
            ColorType::Rgba8888 | ColorType::Bgra8888 => 4,
        }
    }

    /// True for color types that carry no alpha channel.
    pub fn is_always_opaque(self) -> bool {
        matches!(self, ColorType::Rgb565 | ColorType::Gray8)
    }
}

/// How a pixel's color channels relate to its alpha channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlphaType {
    Opaque,
    Premul,
    Unpremul,
}

/// Transfer function tag of a pixmap's color values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorProfile {
    #[default]
    Linear,
    Srgb,
}

/// Palette for [`ColorType::Index8`] pixels. Entries are premultiplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorTable {
    colors: Vec<Rgba8>,
}

impl ColorTable {
    /// At most 256 entries are kept.
    pub fn new(mut colors: Vec<Rgba8>) -> Self {
        colors.truncate(256);
        Self { colors }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Entry for `index`, or transparent when out of range.
    pub fn get(&self, index: u8) -> Rgba8 {
        self.colors
            .get(index as usize)
            .copied()
            .unwrap_or(Rgba8::TRANSPARENT)
    }
}

// ============================================================================
// Tests
// ============================================================================
