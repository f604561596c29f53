//! Stage interfaces of the linear pipeline and the shared fallback paths.
//!
//! A pipeline is a chain of stages. Each stage receives either batches of up
//! to four points or a whole [`Span`], transforms them and forwards the
//! result to the next stage:
//!
//! ```text
//! matrix → filter → tile (x or both) → [tile y] → sampler → placer
//! ```
//!
//! Matrix and tile stages are a generic wrapper ([`PointStage`] or
//! [`BilerpStage`]) around a [`Strategy`]. A strategy always knows how to move
//! points; when it cannot map a span analytically it answers
//! [`SpanHandling::Fallback`] and the wrapper decomposes the span into point
//! batches with [`span_fallback`].

use crate::color::Color4f;
use crate::span::{BilerpSpan, Lanes, Span};

// ============================================================================
// Stage interfaces
// ============================================================================

/// A stage that consumes sample points.
pub(crate) trait PointProcessor {
    /// `n` (1..=3) points in the first lanes of `xs`/`ys`.
    fn point_list_few(&mut self, n: usize, xs: Lanes, ys: Lanes);
    /// Four points.
    fn point_list4(&mut self, xs: Lanes, ys: Lanes);
    /// A non-empty span of points.
    fn point_span(&mut self, span: Span);
}

/// A stage that also consumes bilinear tap groups.
///
/// The four lanes of a tap group are ordered px00, px10, px01, px11:
///
/// ```text
/// +------+------+
/// | px00 | px10 |
/// +------+------+
/// | px01 | px11 |
/// +------+------+
/// ```
pub(crate) trait BilerpProcessor: PointProcessor {
    fn bilerp_list(&mut self, xs: Lanes, ys: Lanes);
    /// A non-empty bilinear span.
    fn bilerp_span(&mut self, span: BilerpSpan);
}

/// The final stage: stores pixels and advances its destination cursor.
pub(crate) trait PixelPlacer {
    fn place_pixel(&mut self, pixel: Color4f);
    fn place_4_pixels(&mut self, p0: Color4f, p1: Color4f, p2: Color4f, p3: Color4f);
}

/// Result of asking a strategy to map a span in closed form.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpanHandling {
    /// The span was forwarded; nothing left to do.
    Handled,
    /// Decompose the span into point batches instead.
    Fallback,
}

/// Coordinate rewriting rule plugged into [`PointStage`] / [`BilerpStage`].
pub(crate) trait Strategy {
    fn process_points(&self, xs: &mut Lanes, ys: &mut Lanes);

    /// Rewrite one bilinear tap group (lanes px00, px10, px01, px11). The
    /// sampler blends with the fraction of lane 0, so a strategy that flips
    /// an axis must also flip the lane order on that axis.
    fn process_bilerp_points(&self, xs: &mut Lanes, ys: &mut Lanes) {
        self.process_points(xs, ys);
    }

    fn maybe_process_span<N: PointProcessor + ?Sized>(
        &self,
        span: Span,
        next: &mut N,
    ) -> SpanHandling;

    fn maybe_process_bilerp_span<N: BilerpProcessor + ?Sized>(
        &self,
        _span: BilerpSpan,
        _next: &mut N,
    ) -> SpanHandling {
        SpanHandling::Fallback
    }
}

// ============================================================================
// Fallbacks
// ============================================================================

/// Feed `span` to `stage` as point batches of four, then the remainder.
pub(crate) fn span_fallback<P: PointProcessor + ?Sized>(span: Span, stage: &mut P) {
    let start = span.start();
    let mut count = span.count();
    let mut xs = [start.x; 4];
    let ys = [start.y; 4];

    let mut four_dx = 0.0f32;
    if count > 1 {
        let dx = span.dx();
        for (i, x) in xs.iter_mut().enumerate() {
            *x += i as f32 * dx;
        }
        four_dx = 4.0 * dx;
    }

    while count >= 4 {
        stage.point_list4(xs, ys);
        for x in xs.iter_mut() {
            *x += four_dx;
        }
        count -= 4;
    }
    if count > 0 {
        stage.point_list_few(count, xs, ys);
    }
}

/// Feed `span` to `stage` one tap group per sample.
pub(crate) fn bilerp_span_fallback<P: BilerpProcessor + ?Sized>(span: BilerpSpan, stage: &mut P) {
    debug_assert!(!span.is_empty());
    let x = span.x();
    let (y0, y1) = (span.y0(), span.y1());
    let count = span.count();
    let dx = if count > 1 {
        span.length() / (count as f32 - 1.0)
    } else {
        0.0
    };

    let ys = [y0, y0, y1, y1];
    for i in 0..count {
        let x0 = x + i as f32 * dx;
        stage.bilerp_list([x0, x0 + 1.0, x0, x0 + 1.0], ys);
    }
}

// ============================================================================
// Generic stage wrappers
// ============================================================================

/// A strategy driving a point stage.
pub(crate) struct PointStage<'s, 'n, S, N: ?Sized> {
    strategy: &'s S,
    next: &'n mut N,
}

impl<'s, 'n, S: Strategy, N: PointProcessor + ?Sized> PointStage<'s, 'n, S, N> {
    pub(crate) fn new(strategy: &'s S, next: &'n mut N) -> Self {
        Self { strategy, next }
    }
}

impl<S: Strategy, N: PointProcessor + ?Sized> PointProcessor for PointStage<'_, '_, S, N> {
    fn point_list_few(&mut self, n: usize, mut xs: Lanes, mut ys: Lanes) {
        self.strategy.process_points(&mut xs, &mut ys);
        self.next.point_list_few(n, xs, ys);
    }

    fn point_list4(&mut self, mut xs: Lanes, mut ys: Lanes) {
        self.strategy.process_points(&mut xs, &mut ys);
        self.next.point_list4(xs, ys);
    }

    fn point_span(&mut self, span: Span) {
        debug_assert!(!span.is_empty());
        if self.strategy.maybe_process_span(span, &mut *self.next) == SpanHandling::Fallback {
            span_fallback(span, self);
        }
    }
}

/// A strategy driving a stage that also forwards bilinear taps.
pub(crate) struct BilerpStage<'s, 'n, S, N: ?Sized> {
    strategy: &'s S,
    next: &'n mut N,
}

impl<'s, 'n, S: Strategy, N: BilerpProcessor + ?Sized> BilerpStage<'s, 'n, S, N> {
    pub(crate) fn new(strategy: &'s S, next: &'n mut N) -> Self {
        Self { strategy, next }
    }
}

impl<S: Strategy, N: BilerpProcessor + ?Sized> PointProcessor for BilerpStage<'_, '_, S, N> {
    fn point_list_few(&mut self, n: usize, mut xs: Lanes, mut ys: Lanes) {
        self.strategy.process_points(&mut xs, &mut ys);
        self.next.point_list_few(n, xs, ys);
    }

    fn point_list4(&mut self, mut xs: Lanes, mut ys: Lanes) {
        self.strategy.process_points(&mut xs, &mut ys);
        self.next.point_list4(xs, ys);
    }

    fn point_span(&mut self, span: Span) {
        debug_assert!(!span.is_empty());
        if self.strategy.maybe_process_span(span, &mut *self.next) == SpanHandling::Fallback {
            span_fallback(span, self);
        }
    }
}

impl<S: Strategy, N: BilerpProcessor + ?Sized> BilerpProcessor for BilerpStage<'_, '_, S, N> {
    fn bilerp_list(&mut self, mut xs: Lanes, mut ys: Lanes) {
        self.strategy.process_bilerp_points(&mut xs, &mut ys);
        self.next.bilerp_list(xs, ys);
    }

    fn bilerp_span(&mut self, span: BilerpSpan) {
        debug_assert!(!span.is_empty());
        if self.strategy.maybe_process_bilerp_span(span, &mut *self.next)
            == SpanHandling::Fallback
        {
            bilerp_span_fallback(span, self);
        }
    }
}

// ============================================================================
// Test support
// ============================================================================

/// Records everything it receives. Used by the stage tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    pub points: Vec<(f32, f32)>,
    pub spans: Vec<Span>,
    pub bilerp_taps: Vec<(Lanes, Lanes)>,
    pub bilerp_spans: Vec<BilerpSpan>,
}

#[cfg(test)]
impl Recorder {
    /// Every sample point, with spans expanded.
    pub fn all_points(&self) -> Vec<(f32, f32)> {
        let mut out = self.points.clone();
        for s in &self.spans {
            let dx = if s.count() > 1 { s.dx() } else { 0.0 };
            for i in 0..s.count() {
                out.push((s.start_x() + i as f32 * dx, s.start().y));
            }
        }
        out
    }
}

#[cfg(test)]
impl PointProcessor for Recorder {
    fn point_list_few(&mut self, n: usize, xs: Lanes, ys: Lanes) {
        for i in 0..n {
            self.points.push((xs[i], ys[i]));
        }
    }

    fn point_list4(&mut self, xs: Lanes, ys: Lanes) {
        self.point_list_few(4, xs, ys);
    }

    fn point_span(&mut self, span: Span) {
        self.spans.push(span);
    }
}

#[cfg(test)]
impl BilerpProcessor for Recorder {
    fn bilerp_list(&mut self, xs: Lanes, ys: Lanes) {
        self.bilerp_taps.push((xs, ys));
    }

    fn bilerp_span(&mut self, span: BilerpSpan) {
        self.bilerp_spans.push(span);
    }
}

// ============================================================================
// Tests
// ============================================================================
