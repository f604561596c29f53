//! Filter stage: expands each sample point into a 2×2 bilinear tap group.
//!
//! With nearest-neighbour filtering the stage is left out of the pipeline.

use crate::pipeline_stage::{BilerpProcessor, PointProcessor};
use crate::span::{BilerpSpan, Lanes, Span};

/// Requested sampling quality, lowest to highest.
///
/// The pipeline itself only distinguishes nearest-neighbour (`None`) from
/// bilinear (everything else). `Medium` and `High` are resolved into
/// mipmapped or prescaled sources by the bitmap controller beforehand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum FilterQuality {
    #[default]
    None,
    Low,
    Medium,
    High,
}

//                          px00  px10  px01  px11
const X_OFFSETS: Lanes = [-0.5, 0.5, -0.5, 0.5];
const Y_OFFSETS: Lanes = [-0.5, -0.5, 0.5, 0.5];

/// Turns points into bilinear tap groups for the next stage.
pub(crate) struct ExpandBilerp<'n, N: ?Sized> {
    next: &'n mut N,
}

impl<'n, N: BilerpProcessor + ?Sized> ExpandBilerp<'n, N> {
    pub(crate) fn new(next: &'n mut N) -> Self {
        Self { next }
    }

    #[inline]
    fn expand(&mut self, x: f32, y: f32) {
        let xs = X_OFFSETS.map(|o| x + o);
        let ys = Y_OFFSETS.map(|o| y + o);
        self.next.bilerp_list(xs, ys);
    }
}

impl<N: BilerpProcessor + ?Sized> PointProcessor for ExpandBilerp<'_, N> {
    fn point_list_few(&mut self, n: usize, xs: Lanes, ys: Lanes) {
        debug_assert!(0 < n && n < 4);
        for i in 0..n {
            self.expand(xs[i], ys[i]);
        }
    }

    fn point_list4(&mut self, xs: Lanes, ys: Lanes) {
        for i in 0..4 {
            self.expand(xs[i], ys[i]);
        }
    }

    fn point_span(&mut self, span: Span) {
        debug_assert!(!span.is_empty());
        let start = span.start();
        // Shift into phase with the pixel grid.
        self.next.bilerp_span(BilerpSpan::new(
            start.x - 0.5,
            start.y - 0.5,
            start.y + 0.5,
            span.length(),
            span.count(),
        ));
    }
}
