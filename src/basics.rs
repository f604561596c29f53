//! Foundation types shared by the sampling pipeline and the caches.
//!
//! Scalar helpers, 16.16 fixed point, points, integer rectangles and
//! four-byte tags.

// ============================================================================
// Scalar helpers
// ============================================================================

/// Tolerance used when deciding whether a scale factor is "one".
pub const SCALAR_NEARLY_ZERO: f64 = 1.0 / (1 << 12) as f64;

/// True if `a` and `b` differ by no more than [`SCALAR_NEARLY_ZERO`].
#[inline]
pub fn scalar_nearly_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= SCALAR_NEARLY_ZERO
}

/// Returns the largest `f32` strictly less than `v`, for finite positive `v`.
///
/// Used to express the half-open upper edge `[0, v)` of a tile as a closed
/// boundary for span breaking.
#[inline]
pub fn f32_below(v: f32) -> f32 {
    debug_assert!(v.is_finite() && v > 0.0);
    f32::from_bits(v.to_bits() - 1)
}

// ============================================================================
// Fixed point (16.16)
// ============================================================================

/// Signed 16.16 fixed-point value.
pub type Fixed = i32;

pub const FIXED_SHIFT: u32 = 16;
pub const FIXED_ONE: Fixed = 1 << FIXED_SHIFT;

/// Convert a float to 16.16, truncating toward zero and saturating on
/// overflow.
#[inline]
pub fn float_to_fixed(v: f32) -> Fixed {
    (v * FIXED_ONE as f32) as Fixed
}

/// Integer part of a 16.16 value, rounded toward negative infinity.
#[inline]
pub fn fixed_floor_to_int(v: Fixed) -> i32 {
    v >> FIXED_SHIFT
}

// ============================================================================
// Tags
// ============================================================================

/// Pack four ASCII bytes into a big-endian `u32`, e.g. `b"bmap"`.
#[inline]
pub const fn four_byte_tag(a: u8, b: u8, c: u8, d: u8) -> u32 {
    ((a as u32) << 24) | ((b as u32) << 16) | ((c as u32) << 8) | d as u32
}

// ============================================================================
// Point
// ============================================================================

/// A 2D point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointBase<T: Copy> {
    pub x: T,
    pub y: T,
}

impl<T: Copy> PointBase<T> {
    pub fn new(x: T, y: T) -> Self {
        Self { x, y }
    }
}

pub type PointF = PointBase<f32>;

// ============================================================================
// Rect
// ============================================================================

/// A rectangle given by its left/top and right/bottom edges.
///
/// The right and bottom edges are exclusive: `Rect::new(0, 0, 4, 4)` covers
/// sixteen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect<T: Copy> {
    pub x1: T,
    pub y1: T,
    pub x2: T,
    pub y2: T,
}

impl<T: Copy + PartialOrd> Rect<T> {
    pub fn new(x1: T, y1: T, x2: T, y2: T) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// True when the rectangle covers no area.
    pub fn is_empty(&self) -> bool {
        !(self.x1 < self.x2 && self.y1 < self.y2)
    }

    /// Clip this rectangle to the intersection with `r`.
    /// Returns `true` if the result is non-empty.
    pub fn clip(&mut self, r: &Self) -> bool {
        if self.x2 > r.x2 {
            self.x2 = r.x2;
        }
        if self.y2 > r.y2 {
            self.y2 = r.y2;
        }
        if self.x1 < r.x1 {
            self.x1 = r.x1;
        }
        if self.y1 < r.y1 {
            self.y1 = r.y1;
        }
        !self.is_empty()
    }

    /// Returns `true` if `r` lies entirely inside this rectangle.
    pub fn contains(&self, r: &Self) -> bool {
        !r.is_empty() && r.x1 >= self.x1 && r.y1 >= self.y1 && r.x2 <= self.x2 && r.y2 <= self.y2
    }
}

impl Rect<i32> {
    /// Rectangle at `(x, y)` with the given size.
    pub fn from_xywh(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self::new(x, y, x + w, y + h)
    }

    /// Rectangle at the origin with the given size.
    pub fn from_wh(w: i32, h: i32) -> Self {
        Self::new(0, 0, w, h)
    }

    /// The all-zero rectangle.
    pub const EMPTY: Self = Self {
        x1: 0,
        y1: 0,
        x2: 0,
        y2: 0,
    };

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

/// Rectangle with `i32` coordinates.
pub type RectI = Rect<i32>;

// ============================================================================
// Tests
// ============================================================================
