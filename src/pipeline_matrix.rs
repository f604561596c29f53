//! Matrix stage: maps destination sample points into source space.
//!
//! The inverse matrix is classified once when the pipeline is built. Translate
//! and scale matrices map a whole span in O(1) by moving its start and
//! scaling its length; a general affine matrix has no closed form for spans
//! and maps point batches only.

use crate::basics::PointF;
use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::pipeline_stage::{PointProcessor, SpanHandling, Strategy};
use crate::span::{Lanes, Span};

/// The mapping applied by the matrix stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum MatrixStrategy {
    Translate {
        tx: f32,
        ty: f32,
    },
    Scale {
        sx: f32,
        sy: f32,
        tx: f32,
        ty: f32,
    },
    Affine {
        sx: f32,
        sy: f32,
        kx: f32,
        ky: f32,
        tx: f32,
        ty: f32,
    },
}

impl MatrixStrategy {
    /// Pick the cheapest strategy for `inverse`. `Ok(None)` means identity:
    /// the stage is left out of the pipeline entirely.
    pub(crate) fn choose(inverse: &Matrix) -> Result<Option<Self>> {
        if inverse.has_perspective() {
            return Err(Error::PerspectiveNotSupported);
        }
        let m = inverse;
        let strategy = if m.has_skew() {
            MatrixStrategy::Affine {
                sx: m.sx as f32,
                sy: m.sy as f32,
                kx: m.shx as f32,
                ky: m.shy as f32,
                tx: m.tx as f32,
                ty: m.ty as f32,
            }
        } else if m.has_scale() {
            MatrixStrategy::Scale {
                sx: m.sx as f32,
                sy: m.sy as f32,
                tx: m.tx as f32,
                ty: m.ty as f32,
            }
        } else if m.has_translate() {
            MatrixStrategy::Translate {
                tx: m.tx as f32,
                ty: m.ty as f32,
            }
        } else {
            return Ok(None);
        };
        Ok(Some(strategy))
    }
}

impl Strategy for MatrixStrategy {
    #[inline]
    fn process_points(&self, xs: &mut Lanes, ys: &mut Lanes) {
        match *self {
            MatrixStrategy::Translate { tx, ty } => {
                for i in 0..4 {
                    xs[i] += tx;
                    ys[i] += ty;
                }
            }
            MatrixStrategy::Scale { sx, sy, tx, ty } => {
                for i in 0..4 {
                    xs[i] = xs[i] * sx + tx;
                    ys[i] = ys[i] * sy + ty;
                }
            }
            MatrixStrategy::Affine {
                sx,
                sy,
                kx,
                ky,
                tx,
                ty,
            } => {
                for i in 0..4 {
                    let (x, y) = (xs[i], ys[i]);
                    xs[i] = sx * x + kx * y + tx;
                    ys[i] = ky * x + sy * y + ty;
                }
            }
        }
    }

    fn maybe_process_span<N: PointProcessor + ?Sized>(
        &self,
        span: Span,
        next: &mut N,
    ) -> SpanHandling {
        let start = span.start();
        match *self {
            MatrixStrategy::Translate { tx, ty } => {
                next.point_span(Span::new(
                    PointF::new(start.x + tx, start.y + ty),
                    span.length(),
                    span.count(),
                ));
                SpanHandling::Handled
            }
            MatrixStrategy::Scale { sx, sy, tx, ty } => {
                next.point_span(Span::new(
                    PointF::new(start.x * sx + tx, start.y * sy + ty),
                    span.length() * sx,
                    span.count(),
                ));
                SpanHandling::Handled
            }
            MatrixStrategy::Affine { .. } => SpanHandling::Fallback,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
