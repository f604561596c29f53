//! 3×3 projective transformation matrix.
//!
//! Points are column vectors: `x' = (sx*x + shx*y + tx) / w`,
//! `y' = (shy*x + sy*y + ty) / w` with `w = w0*x + w1*y + w2`.
//!
//! The sampling pipeline only accepts matrices without perspective; the full
//! projective form is kept so callers can hand over whatever transform they
//! have and get a clean setup-time rejection.

use crate::basics::SCALAR_NEARLY_ZERO;

// ============================================================================
// MatrixKind
// ============================================================================

/// Coarse classification of a matrix, ordered from cheapest to most general.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatrixKind {
    Identity,
    Translate,
    /// Scale on the axes, possibly with translation.
    ScaleTranslate,
    /// Any non-perspective matrix with rotation or skew.
    Affine,
    Perspective,
}

// ============================================================================
// Matrix
// ============================================================================

/// Projective 2D transformation.
///
/// ```text
/// | sx  shx  tx |
/// | shy  sy  ty |
/// | w0   w1  w2 |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub sx: f64,
    pub shy: f64,
    pub w0: f64,
    pub shx: f64,
    pub sy: f64,
    pub w1: f64,
    pub tx: f64,
    pub ty: f64,
    pub w2: f64,
}

impl Matrix {
    /// Identity matrix.
    pub const IDENTITY: Self = Self {
        sx: 1.0,
        shy: 0.0,
        w0: 0.0,
        shx: 0.0,
        sy: 1.0,
        w1: 0.0,
        tx: 0.0,
        ty: 0.0,
        w2: 1.0,
    };

    pub fn new() -> Self {
        Self::IDENTITY
    }

    /// Affine matrix from its six components.
    pub fn new_affine(sx: f64, shy: f64, shx: f64, sy: f64, tx: f64, ty: f64) -> Self {
        Self {
            sx,
            shy,
            shx,
            sy,
            tx,
            ty,
            ..Self::IDENTITY
        }
    }

    pub fn new_translate(tx: f64, ty: f64) -> Self {
        Self::new_affine(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn new_scale(sx: f64, sy: f64) -> Self {
        Self::new_affine(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    pub fn new_scale_translate(sx: f64, sy: f64, tx: f64, ty: f64) -> Self {
        Self::new_affine(sx, 0.0, 0.0, sy, tx, ty)
    }

    /// Rotation by `a` radians about the origin.
    pub fn new_rotation(a: f64) -> Self {
        let (sa, ca) = a.sin_cos();
        Self::new_affine(ca, sa, -sa, ca, 0.0, 0.0)
    }

    pub fn new_skew(kx: f64, ky: f64) -> Self {
        Self::new_affine(1.0, ky, kx, 1.0, 0.0, 0.0)
    }

    /// Full projective matrix, row by row.
    #[allow(clippy::too_many_arguments)]
    pub fn new_perspective(
        sx: f64,
        shx: f64,
        tx: f64,
        shy: f64,
        sy: f64,
        ty: f64,
        w0: f64,
        w1: f64,
        w2: f64,
    ) -> Self {
        Self {
            sx,
            shy,
            w0,
            shx,
            sy,
            w1,
            tx,
            ty,
            w2,
        }
    }

    // -----------------------------------------------------------------------
    // Classification
    // -----------------------------------------------------------------------

    pub fn has_perspective(&self) -> bool {
        self.w0 != 0.0 || self.w1 != 0.0 || self.w2 != 1.0
    }

    pub fn has_skew(&self) -> bool {
        self.shx != 0.0 || self.shy != 0.0
    }

    pub fn has_scale(&self) -> bool {
        self.sx != 1.0 || self.sy != 1.0
    }

    pub fn has_translate(&self) -> bool {
        self.tx != 0.0 || self.ty != 0.0
    }

    pub fn kind(&self) -> MatrixKind {
        if self.has_perspective() {
            MatrixKind::Perspective
        } else if self.has_skew() {
            MatrixKind::Affine
        } else if self.has_scale() {
            MatrixKind::ScaleTranslate
        } else if self.has_translate() {
            MatrixKind::Translate
        } else {
            MatrixKind::Identity
        }
    }

    pub fn is_identity(&self) -> bool {
        self.kind() == MatrixKind::Identity
    }

    /// True when the matrix only scales and translates.
    pub fn is_scale_translate(&self) -> bool {
        self.kind() <= MatrixKind::ScaleTranslate
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Determinant of the 3×3 matrix.
    pub fn determinant(&self) -> f64 {
        self.sx * (self.sy * self.w2 - self.ty * self.w1)
            + self.shx * (self.ty * self.w0 - self.shy * self.w2)
            + self.tx * (self.shy * self.w1 - self.sy * self.w0)
    }

    /// The inverse matrix, or `None` if degenerate.
    pub fn invert(&self) -> Option<Matrix> {
        let a = self;
        let d0 = a.sy * a.w2 - a.w1 * a.ty;
        let d1 = a.w0 * a.ty - a.shy * a.w2;
        let d2 = a.shy * a.w1 - a.w0 * a.sy;
        let d = a.sx * d0 + a.shx * d1 + a.tx * d2;
        if d == 0.0 || !d.is_finite() {
            return None;
        }
        let d = 1.0 / d;
        let inv = Matrix {
            sx: d * d0,
            shy: d * d1,
            w0: d * d2,
            shx: d * (a.w1 * a.tx - a.shx * a.w2),
            sy: d * (a.sx * a.w2 - a.w0 * a.tx),
            w1: d * (a.w0 * a.shx - a.sx * a.w1),
            tx: d * (a.shx * a.ty - a.sy * a.tx),
            ty: d * (a.shy * a.tx - a.sx * a.ty),
            w2: d * (a.sx * a.sy - a.shy * a.shx),
        };
        if !self.has_perspective() {
            // Keep the affine form exact so classification stays stable.
            return Some(Matrix {
                w0: 0.0,
                w1: 0.0,
                w2: 1.0,
                ..inv
            });
        }
        Some(inv)
    }

    /// Matrix that applies `self` first, then `b`.
    pub fn then(&self, b: &Matrix) -> Matrix {
        let a = self;
        Matrix {
            sx: b.sx * a.sx + b.shx * a.shy + b.tx * a.w0,
            shx: b.sx * a.shx + b.shx * a.sy + b.tx * a.w1,
            tx: b.sx * a.tx + b.shx * a.ty + b.tx * a.w2,
            shy: b.shy * a.sx + b.sy * a.shy + b.ty * a.w0,
            sy: b.shy * a.shx + b.sy * a.sy + b.ty * a.w1,
            ty: b.shy * a.tx + b.sy * a.ty + b.ty * a.w2,
            w0: b.w0 * a.sx + b.w1 * a.shy + b.w2 * a.w0,
            w1: b.w0 * a.shx + b.w1 * a.sy + b.w2 * a.w1,
            w2: b.w0 * a.tx + b.w1 * a.ty + b.w2 * a.w2,
        }
    }

    /// `self = self then b`.
    pub fn post_concat(&mut self, b: &Matrix) {
        *self = self.then(b);
    }

    /// `self = b then self`.
    pub fn pre_concat(&mut self, b: &Matrix) {
        *self = b.then(self);
    }

    /// Scale the output of this matrix.
    pub fn post_scale(&mut self, sx: f64, sy: f64) {
        self.post_concat(&Matrix::new_scale(sx, sy));
    }

    /// Translate the output of this matrix.
    pub fn post_translate(&mut self, tx: f64, ty: f64) {
        self.post_concat(&Matrix::new_translate(tx, ty));
    }

    /// Lengths of the transformed unit vectors `(1,0)` and `(0,1)`.
    ///
    /// `None` for perspective matrices and when either scale is non-finite
    /// or nearly zero.
    pub fn decompose_scale(&self) -> Option<(f64, f64)> {
        if self.has_perspective() {
            return None;
        }
        let sx = self.sx.hypot(self.shy);
        let sy = self.shx.hypot(self.sy);
        if !sx.is_finite() || !sy.is_finite() || sx <= SCALAR_NEARLY_ZERO || sy <= SCALAR_NEARLY_ZERO
        {
            return None;
        }
        Some((sx, sy))
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn map(m: &Matrix, x: f64, y: f64) -> (f64, f64) {
        (
            x * m.sx + y * m.shx + m.tx,
            x * m.shy + y * m.sy + m.ty,
        )
    }

    fn assert_point(p: (f64, f64), x: f64, y: f64) {
        assert!((p.0 - x).abs() < 1e-10, "x: {} != {}", p.0, x);
        assert!((p.1 - y).abs() < 1e-10, "y: {} != {}", p.1, y);
    }

    #[test]
    fn test_identity() {
        let m = Matrix::new();
        assert!(m.is_identity());
        assert_point(map(&m, 5.0, 10.0), 5.0, 10.0);
    }

    #[test]
    fn test_kind() {
        assert_eq!(Matrix::new_translate(1.0, 0.0).kind(), MatrixKind::Translate);
        assert_eq!(Matrix::new_scale(2.0, 1.0).kind(), MatrixKind::ScaleTranslate);
        assert_eq!(
            Matrix::new_scale_translate(2.0, 2.0, 3.0, 4.0).kind(),
            MatrixKind::ScaleTranslate
        );
        assert_eq!(Matrix::new_rotation(0.3).kind(), MatrixKind::Affine);
        assert_eq!(Matrix::new_skew(0.5, 0.0).kind(), MatrixKind::Affine);
        let p = Matrix::new_perspective(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.001, 0.0, 1.0);
        assert_eq!(p.kind(), MatrixKind::Perspective);
        assert!(Matrix::new_scale(3.0, 3.0).is_scale_translate());
        assert!(!Matrix::new_rotation(0.3).is_scale_translate());
    }

    #[test]
    fn test_invert_translate() {
        let inv = Matrix::new_translate(10.0, 20.0).invert().unwrap();
        assert_point(map(&inv, 10.0, 20.0), 0.0, 0.0);
        assert_eq!(inv.kind(), MatrixKind::Translate);
    }

    #[test]
    fn test_invert_affine_roundtrip() {
        let m = Matrix::new_rotation(0.7).then(&Matrix::new_scale_translate(2.0, 3.0, 5.0, -1.0));
        let inv = m.invert().unwrap();
        let (x, y) = map(&m, 3.5, -2.25);
        assert_point(map(&inv, x, y), 3.5, -2.25);
    }

    #[test]
    fn test_invert_singular() {
        assert!(Matrix::new_scale(0.0, 1.0).invert().is_none());
    }

    #[test]
    fn test_then_order() {
        // Scale by 2, then translate by 10.
        let m = Matrix::new_scale(2.0, 2.0).then(&Matrix::new_translate(10.0, 0.0));
        assert_point(map(&m, 1.0, 1.0), 12.0, 2.0);
        let mut n = Matrix::new_translate(10.0, 0.0);
        n.pre_concat(&Matrix::new_scale(2.0, 2.0));
        assert_eq!(m, n);
    }

    #[test]
    fn test_post_scale() {
        let mut m = Matrix::new_translate(1.0, 1.0);
        m.post_scale(0.5, 0.25);
        assert_point(map(&m, 3.0, 3.0), 2.0, 1.0);
    }

    #[test]
    fn test_decompose_scale() {
        let (sx, sy) = Matrix::new_scale(4.0, 2.0).decompose_scale().unwrap();
        assert!((sx - 4.0).abs() < 1e-12 && (sy - 2.0).abs() < 1e-12);
        let r = Matrix::new_rotation(1.1).then(&Matrix::new_scale(3.0, 3.0));
        let (sx, sy) = r.decompose_scale().unwrap();
        assert!((sx - 3.0).abs() < 1e-9 && (sy - 3.0).abs() < 1e-9);
        assert!(Matrix::new_scale(0.0, 1.0).decompose_scale().is_none());
        let p = Matrix::new_perspective(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.1, 0.0, 1.0);
        assert!(p.decompose_scale().is_none());
    }
}
