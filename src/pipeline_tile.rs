//! Tile stage: brings source coordinates into `[0, width) × [0, height)`.
//!
//! Points are always wrapped one by one. Spans are cut at tile edges where a
//! closed form exists (clamp, repeat); mirror spans and degenerate spans go
//! through the point fallback.
//!
//! When both axes share a tile mode a single stage handles both. Otherwise an
//! x-only stage feeds a y-only stage; each single-axis strategy leaves the
//! other axis untouched.

use crate::basics::{f32_below, PointF};
use crate::pipeline_stage::{PointProcessor, SpanHandling, Strategy};
use crate::span::{Lanes, Span};

/// How coordinates outside the source are mapped back into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TileMode {
    /// Repeat the edge pixels.
    #[default]
    Clamp,
    /// Wrap around.
    Repeat,
    /// Wrap around, flipping every other copy.
    Mirror,
}

#[inline]
fn tile_mod(x: f32, base: f32) -> f32 {
    x - (x / base).floor() * base
}

#[inline]
fn mirror(x: f32, base: f32) -> f32 {
    let period = 2.0 * base;
    let m = tile_mod(x, period);
    let r = if m >= base { period - m } else { m };
    r.min(f32_below(base))
}

/// True when `x` falls in a flipped copy of the source.
#[inline]
fn is_reflected(x: f32, base: f32) -> bool {
    tile_mod(x, 2.0 * base) >= base
}

#[inline]
fn swap_lanes(xs: &mut Lanes, ys: &mut Lanes, a: usize, b: usize) {
    xs.swap(a, b);
    ys.swap(a, b);
}

// ============================================================================
// Clamp
// ============================================================================

/// Clamp to the edge pixels. Bounds hold the last valid pixel coordinate
/// (`dimension - 1`); `None` leaves the axis alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ClampStrategy {
    x_max: Option<f32>,
    y_max: Option<f32>,
}

impl ClampStrategy {
    pub(crate) fn new(width: Option<f32>, height: Option<f32>) -> Self {
        Self {
            x_max: width.map(|w| w - 1.0),
            y_max: height.map(|h| h - 1.0),
        }
    }
}

impl Strategy for ClampStrategy {
    #[inline]
    fn process_points(&self, xs: &mut Lanes, ys: &mut Lanes) {
        if let Some(x_max) = self.x_max {
            for x in xs.iter_mut() {
                *x = x.max(0.0).min(x_max);
            }
        }
        if let Some(y_max) = self.y_max {
            for y in ys.iter_mut() {
                *y = y.max(0.0).min(y_max);
            }
        }
    }

    fn maybe_process_span<N: PointProcessor + ?Sized>(
        &self,
        original: Span,
        next: &mut N,
    ) -> SpanHandling {
        debug_assert!(!original.is_empty());
        let start = original.start();
        let y = match self.y_max {
            Some(y_max) => start.y.max(0.0).min(y_max),
            None => start.y,
        };
        let mut span = Span::new(PointF::new(start.x, y), original.length(), original.count());

        let Some(x_last) = self.x_max else {
            next.point_span(span);
            return SpanHandling::Handled;
        };
        let x_min = 0.0f32;
        let x_max = x_last + 1.0;

        if span.completely_within(x_min, f32_below(x_max)) {
            next.point_span(span);
            return SpanHandling::Handled;
        }
        if span.count() == 1 || span.length() == 0.0 {
            return SpanHandling::Fallback;
        }

        // Under: samples left of the source read pixel 0.
        // Middle: samples inside the source are passed on unchanged.
        // Over: samples right of the source read the last pixel.
        let dx = span.dx();
        if dx > 0.0 {
            let mut under = span.break_at(x_min, dx);
            if !under.is_empty() {
                under.clamp_to_single_pixel(PointF::new(x_min, y));
                next.point_span(under);
            }
            let middle = span.break_at(f32_below(x_max), dx);
            if !middle.is_empty() {
                next.point_span(middle);
            }
            if !span.is_empty() {
                span.clamp_to_single_pixel(PointF::new(x_last, y));
                next.point_span(span);
            }
        } else {
            let mut over = span.break_at(x_max, dx);
            if !over.is_empty() {
                over.clamp_to_single_pixel(PointF::new(x_last, y));
                next.point_span(over);
            }
            let middle = span.break_at(x_min, dx);
            if !middle.is_empty() {
                next.point_span(middle);
            }
            if !span.is_empty() {
                span.clamp_to_single_pixel(PointF::new(x_min, y));
                next.point_span(span);
            }
        }
        SpanHandling::Handled
    }
}

// ============================================================================
// Repeat
// ============================================================================

/// Wrap modulo the source size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RepeatStrategy {
    x_max: Option<f32>,
    y_max: Option<f32>,
}

impl RepeatStrategy {
    pub(crate) fn new(width: Option<f32>, height: Option<f32>) -> Self {
        Self {
            x_max: width,
            y_max: height,
        }
    }
}

impl Strategy for RepeatStrategy {
    #[inline]
    fn process_points(&self, xs: &mut Lanes, ys: &mut Lanes) {
        if let Some(x_max) = self.x_max {
            for x in xs.iter_mut() {
                *x = tile_mod(*x, x_max);
            }
        }
        if let Some(y_max) = self.y_max {
            for y in ys.iter_mut() {
                *y = tile_mod(*y, y_max);
            }
        }
    }

    fn maybe_process_span<N: PointProcessor + ?Sized>(
        &self,
        original: Span,
        next: &mut N,
    ) -> SpanHandling {
        debug_assert!(!original.is_empty());
        let start = original.start();
        let y = match self.y_max {
            Some(y_max) => tile_mod(start.y, y_max),
            None => start.y,
        };

        let Some(x_max) = self.x_max else {
            next.point_span(Span::new(
                PointF::new(start.x, y),
                original.length(),
                original.count(),
            ));
            return SpanHandling::Handled;
        };

        // One sample, or steps longer than a tile: nothing to gain.
        if original.count() <= 1 {
            return SpanHandling::Fallback;
        }
        let dx = original.dx();
        if dx.abs() >= x_max {
            return SpanHandling::Fallback;
        }

        let x = tile_mod(start.x, x_max);
        let mut span = Span::new(PointF::new(x, y), original.length(), original.count());

        // While the span hangs over the tile edge, emit the part on this tile
        // and slide the rest back by one tile.
        if dx > 0.0 {
            let edge = f32_below(x_max);
            while !span.is_empty() && span.end_x() >= x_max {
                let to_draw = span.break_at(edge, dx);
                if !to_draw.is_empty() {
                    next.point_span(to_draw);
                }
                span.offset(-x_max);
            }
        } else {
            while !span.is_empty() && span.end_x() < 0.0 {
                let to_draw = span.break_at(0.0, dx);
                if !to_draw.is_empty() {
                    next.point_span(to_draw);
                }
                span.offset(x_max);
            }
        }

        if !span.is_empty() {
            next.point_span(span);
        }
        SpanHandling::Handled
    }
}

// ============================================================================
// Mirror
// ============================================================================

/// Reflect at every tile edge: a triangle wave of period `2 * dimension`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct MirrorStrategy {
    x_max: Option<f32>,
    y_max: Option<f32>,
}

impl MirrorStrategy {
    pub(crate) fn new(width: Option<f32>, height: Option<f32>) -> Self {
        Self {
            x_max: width,
            y_max: height,
        }
    }
}

impl Strategy for MirrorStrategy {
    #[inline]
    fn process_points(&self, xs: &mut Lanes, ys: &mut Lanes) {
        if let Some(x_max) = self.x_max {
            for x in xs.iter_mut() {
                *x = mirror(*x, x_max);
            }
        }
        if let Some(y_max) = self.y_max {
            for y in ys.iter_mut() {
                *y = mirror(*y, y_max);
            }
        }
    }

    fn process_bilerp_points(&self, xs: &mut Lanes, ys: &mut Lanes) {
        // In a flipped copy the right-hand tap lands on the lower pixel.
        let flip_x = self.x_max.is_some_and(|w| is_reflected(xs[0], w));
        let flip_y = self.y_max.is_some_and(|h| is_reflected(ys[0], h));
        self.process_points(xs, ys);
        if flip_x {
            swap_lanes(xs, ys, 0, 1);
            swap_lanes(xs, ys, 2, 3);
        }
        if flip_y {
            swap_lanes(xs, ys, 0, 2);
            swap_lanes(xs, ys, 1, 3);
        }
    }

    fn maybe_process_span<N: PointProcessor + ?Sized>(
        &self,
        _span: Span,
        _next: &mut N,
    ) -> SpanHandling {
        SpanHandling::Fallback
    }
}

// ============================================================================
// Tiler selection
// ============================================================================

/// One tiling rule, chosen when the pipeline is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum TileStrategy {
    Clamp(ClampStrategy),
    Repeat(RepeatStrategy),
    Mirror(MirrorStrategy),
}

impl TileStrategy {
    fn new(mode: TileMode, width: Option<f32>, height: Option<f32>) -> Self {
        match mode {
            TileMode::Clamp => TileStrategy::Clamp(ClampStrategy::new(width, height)),
            TileMode::Repeat => TileStrategy::Repeat(RepeatStrategy::new(width, height)),
            TileMode::Mirror => TileStrategy::Mirror(MirrorStrategy::new(width, height)),
        }
    }
}

impl Strategy for TileStrategy {
    #[inline]
    fn process_points(&self, xs: &mut Lanes, ys: &mut Lanes) {
        match self {
            TileStrategy::Clamp(s) => s.process_points(xs, ys),
            TileStrategy::Repeat(s) => s.process_points(xs, ys),
            TileStrategy::Mirror(s) => s.process_points(xs, ys),
        }
    }

    #[inline]
    fn process_bilerp_points(&self, xs: &mut Lanes, ys: &mut Lanes) {
        match self {
            TileStrategy::Clamp(s) => s.process_bilerp_points(xs, ys),
            TileStrategy::Repeat(s) => s.process_bilerp_points(xs, ys),
            TileStrategy::Mirror(s) => s.process_bilerp_points(xs, ys),
        }
    }

    fn maybe_process_span<N: PointProcessor + ?Sized>(
        &self,
        span: Span,
        next: &mut N,
    ) -> SpanHandling {
        match self {
            TileStrategy::Clamp(s) => s.maybe_process_span(span, next),
            TileStrategy::Repeat(s) => s.maybe_process_span(span, next),
            TileStrategy::Mirror(s) => s.maybe_process_span(span, next),
        }
    }
}

/// The tile stages of a pipeline: one for both axes, or an x stage followed
/// by a y stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Tiler {
    pub(crate) x_or_both: TileStrategy,
    pub(crate) y: Option<TileStrategy>,
}

impl Tiler {
    pub(crate) fn new(width: u32, height: u32, x_mode: TileMode, y_mode: TileMode) -> Self {
        let (w, h) = (width as f32, height as f32);
        if x_mode == y_mode {
            Self {
                x_or_both: TileStrategy::new(x_mode, Some(w), Some(h)),
                y: None,
            }
        } else {
            Self {
                x_or_both: TileStrategy::new(x_mode, Some(w), None),
                y: Some(TileStrategy::new(y_mode, None, Some(h))),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline_stage::{BilerpProcessor, BilerpStage, Recorder};

    fn run<S: Strategy>(strategy: &S, span: Span) -> Recorder {
        let mut rec = Recorder::default();
        BilerpStage::new(strategy, &mut rec).point_span(span);
        rec
    }

    fn span(x: f32, y: f32, length: f32, count: usize) -> Span {
        Span::new(PointF::new(x, y), length, count)
    }

    #[test]
    fn test_clamp_span_inside_passes_through() {
        let s = ClampStrategy::new(Some(4.0), Some(4.0));
        let rec = run(&s, span(0.5, 0.5, 3.0, 4));
        assert_eq!(rec.spans, vec![span(0.5, 0.5, 3.0, 4)]);
    }

    #[test]
    fn test_clamp_span_overflow() {
        let s = ClampStrategy::new(Some(4.0), Some(4.0));
        // Samples at -2, 0, 2, 4.
        let rec = run(&s, span(-2.0, 0.5, 6.0, 4));
        assert_eq!(rec.spans.len(), 3);
        assert_eq!(rec.spans[0], span(0.0, 0.5, 0.0, 2));
        assert_eq!(rec.spans[1], span(2.0, 0.5, 0.0, 1));
        assert_eq!(rec.spans[2], span(3.0, 0.5, 0.0, 1));
    }

    #[test]
    fn test_clamp_span_reverse() {
        let s = ClampStrategy::new(Some(4.0), Some(4.0));
        // Samples at 6, 4, 2, 0, -2.
        let rec = run(&s, span(6.0, 0.5, -8.0, 5));
        let xs: Vec<f32> = rec.all_points().iter().map(|p| p.0.floor()).collect();
        assert_eq!(xs, vec![3.0, 3.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_clamp_span_clamps_y() {
        let s = ClampStrategy::new(Some(4.0), Some(4.0));
        let rec = run(&s, span(0.5, 9.5, 3.0, 4));
        assert_eq!(rec.spans[0].start().y, 3.0);
    }

    #[test]
    fn test_clamp_single_sample_falls_back() {
        let s = ClampStrategy::new(Some(4.0), Some(4.0));
        let rec = run(&s, span(-7.0, 0.5, 0.0, 1));
        assert!(rec.spans.is_empty());
        assert_eq!(rec.points, vec![(0.0, 0.5)]);
    }

    #[test]
    fn test_clamp_every_sample_lands_in_bounds() {
        let s = ClampStrategy::new(Some(5.0), Some(3.0));
        for &(x, length, count) in &[
            (-3.5f32, 9.0f32, 10usize),
            (-10.0, 20.0, 5),
            (7.5, -12.0, 7),
            (4.75, 0.5, 3),
            (-0.25, 5.5, 12),
        ] {
            let rec = run(&s, span(x, -4.0, length, count));
            let pts = rec.all_points();
            assert_eq!(pts.len(), count);
            for (px, py) in pts {
                let ix = px.floor();
                assert!((0.0..=4.0).contains(&ix), "x {px} from span at {x}");
                assert!((0.0..=2.0).contains(&py.floor()));
            }
        }
    }

    #[test]
    fn test_repeat_points_modulo_invariant() {
        let s = RepeatStrategy::new(Some(3.0), Some(5.0));
        for &x in &[0.0f32, 0.25, 1.5, 2.75, -0.5, -2.25] {
            let mut base_x = [x; 4];
            let mut base_y = [x; 4];
            s.process_points(&mut base_x, &mut base_y);
            for n in [-4i32, -1, 1, 2, 7] {
                let mut xs = [x + n as f32 * 3.0; 4];
                let mut ys = [x + n as f32 * 5.0; 4];
                s.process_points(&mut xs, &mut ys);
                assert_eq!(xs[0], base_x[0], "x={x} n={n}");
                assert_eq!(ys[0], base_y[0], "y={x} n={n}");
            }
        }
    }

    #[test]
    fn test_repeat_span_wraps() {
        let s = RepeatStrategy::new(Some(2.0), Some(2.0));
        // Samples at 1.5, 2.5, 3.5.
        let rec = run(&s, span(1.5, 0.5, 2.0, 3));
        let xs: Vec<f32> = rec.all_points().iter().map(|p| p.0.floor()).collect();
        assert_eq!(xs, vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_repeat_span_sample_on_edge_wraps_to_zero() {
        let s = RepeatStrategy::new(Some(4.0), Some(4.0));
        // Samples at 1, 2, 3, 4, 5.
        let rec = run(&s, span(1.0, 0.5, 4.0, 5));
        let xs: Vec<f32> = rec.all_points().iter().map(|p| p.0).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0, 0.0, 1.0]);
    }

    #[test]
    fn test_repeat_span_reverse() {
        let s = RepeatStrategy::new(Some(4.0), Some(4.0));
        // Samples at 1.5, 0.5, -0.5, -1.5.
        let rec = run(&s, span(1.5, 0.5, -3.0, 4));
        let xs: Vec<f32> = rec.all_points().iter().map(|p| p.0).collect();
        assert_eq!(xs, vec![1.5, 0.5, 3.5, 2.5]);
    }

    #[test]
    fn test_repeat_large_step_falls_back() {
        let s = RepeatStrategy::new(Some(2.0), Some(2.0));
        let rec = run(&s, span(0.5, 0.5, 9.0, 4));
        assert!(rec.spans.is_empty());
        let xs: Vec<f32> = rec.points.iter().map(|p| p.0).collect();
        assert_eq!(xs, vec![0.5, 1.5, 0.5, 1.5]);
    }

    #[test]
    fn test_single_axis_leaves_other_axis() {
        let s = RepeatStrategy::new(None, Some(4.0));
        let rec = run(&s, span(-7.5, 5.5, 3.0, 4));
        assert_eq!(rec.spans, vec![span(-7.5, 1.5, 3.0, 4)]);
        let c = ClampStrategy::new(Some(4.0), None);
        let mut xs = [-1.0, 9.0, 2.0, 0.0];
        let mut ys = [-100.0; 4];
        c.process_points(&mut xs, &mut ys);
        assert_eq!(xs, [0.0, 3.0, 2.0, 0.0]);
        assert_eq!(ys, [-100.0; 4]);
    }

    #[test]
    fn test_mirror_points() {
        let s = MirrorStrategy::new(Some(4.0), Some(4.0));
        let mut xs = [4.5, 5.2, -0.5, 7.9];
        let mut ys = [0.0; 4];
        s.process_points(&mut xs, &mut ys);
        let ix: Vec<f32> = xs.iter().map(|x| x.floor()).collect();
        assert_eq!(ix, vec![3.0, 2.0, 0.0, 0.0]);
        let mut edge = [4.0, 8.0, 0.0, 12.0];
        s.process_points(&mut edge, &mut ys);
        assert!(edge.iter().all(|x| (0.0..4.0).contains(x)));
    }

    #[test]
    fn test_mirror_span_falls_back() {
        let s = MirrorStrategy::new(Some(2.0), Some(2.0));
        let rec = run(&s, span(0.5, 0.5, 3.0, 4));
        assert!(rec.spans.is_empty());
        let xs: Vec<f32> = rec.points.iter().map(|p| p.0).collect();
        assert_eq!(xs, vec![0.5, 1.5, 1.5, 0.5]);
    }

    #[test]
    fn test_mirror_bilerp_taps_keep_left_to_right_order() {
        let s = MirrorStrategy::new(Some(2.0), Some(2.0));
        let mut rec = Recorder::default();
        // Taps straddle x = 2.8 and y = 2.8, inside the flipped copy on both axes.
        BilerpStage::new(&s, &mut rec).bilerp_list([2.3, 3.3, 2.3, 3.3], [2.3, 2.3, 3.3, 3.3]);
        let (xs, ys) = rec.bilerp_taps[0];
        let ix: Vec<f32> = xs.iter().map(|x| x.floor()).collect();
        let iy: Vec<f32> = ys.iter().map(|y| y.floor()).collect();
        assert_eq!(ix, vec![0.0, 1.0, 0.0, 1.0]);
        assert_eq!(iy, vec![0.0, 0.0, 1.0, 1.0]);
        assert!((xs[0].fract() - 0.7).abs() < 1e-5);
        assert!((ys[0].fract() - 0.7).abs() < 1e-5);
    }

    #[test]
    fn test_mirror_bilerp_taps_unflipped_copy() {
        let s = MirrorStrategy::new(Some(2.0), None);
        let mut rec = Recorder::default();
        BilerpStage::new(&s, &mut rec).bilerp_list([4.25, 5.25, 4.25, 5.25], [0.0, 0.0, 1.0, 1.0]);
        let (xs, ys) = rec.bilerp_taps[0];
        assert_eq!(xs, [0.25, 1.25, 0.25, 1.25]);
        assert_eq!(ys, [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_tiler_split_axes() {
        let t = Tiler::new(4, 8, TileMode::Clamp, TileMode::Repeat);
        assert!(matches!(t.x_or_both, TileStrategy::Clamp(_)));
        assert!(matches!(t.y, Some(TileStrategy::Repeat(_))));
        let same = Tiler::new(4, 8, TileMode::Mirror, TileMode::Mirror);
        assert!(same.y.is_none());
    }
}
