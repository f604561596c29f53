//! Spans: runs of evenly spaced sample points in source space.
//!
//! A destination scanline of `count` pixels starts at the center of its
//! first pixel and ends at the center of its last, so it covers a length of
//! `count - 1`. The matrix stage maps start and length into source space; the
//! tilers may then cut the span into pieces at tile edges.
//!
//! The clamp tiler can produce spans of length 0, meaning "repeat one edge
//! pixel". Spans traversed right to left have a negative length.

use crate::basics::PointF;

/// Four lanes of coordinates processed together.
pub type Lanes = [f32; 4];

// ============================================================================
// Span
// ============================================================================

/// `count` samples from `start`, evenly spread over `length` along x.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    start: PointF,
    length: f32,
    count: usize,
}

impl Span {
    pub fn new(start: PointF, length: f32, count: usize) -> Self {
        debug_assert!(length.is_finite());
        Self {
            start,
            length,
            count,
        }
    }

    pub fn empty() -> Self {
        Self::new(PointF::new(0.0, 0.0), 0.0, 0)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn start(&self) -> PointF {
        self.start
    }

    pub fn length(&self) -> f32 {
        self.length
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn start_x(&self) -> f32 {
        self.start.x
    }

    pub fn end_x(&self) -> f32 {
        self.start.x + self.length
    }

    /// Distance between consecutive samples. Only meaningful for `count > 1`.
    pub fn dx(&self) -> f32 {
        self.length / (self.count as f32 - 1.0)
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }

    /// True if both endpoints lie in `[x_min, x_max]`.
    pub fn completely_within(&self, x_min: f32, x_max: f32) -> bool {
        let (s_min, s_max) = if self.start_x() <= self.end_x() {
            (self.start_x(), self.end_x())
        } else {
            (self.end_x(), self.start_x())
        };
        x_min <= s_min && s_max <= x_max
    }

    pub fn offset(&mut self, offset_x: f32) {
        self.start.x += offset_x;
    }

    /// Cut off the samples that lie on the near side of `break_x`, walking in
    /// the direction of `dx`, and return them. `self` keeps the rest.
    ///
    /// A sample exactly on `break_x` belongs to the returned prefix. Applying
    /// the same break again to the remainder returns an empty span.
    pub fn break_at(&mut self, break_x: f32, dx: f32) -> Span {
        debug_assert!(break_x.is_finite());
        debug_assert!(dx.is_finite());
        debug_assert!(dx != 0.0);

        if self.is_empty() {
            return Span::empty();
        }

        let steps = ((break_x - self.start_x()) / dx).floor();
        if steps < 0.0 {
            // Wholly after break_x.
            return Span::empty();
        }
        if steps >= (self.count - 1) as f32 {
            // Wholly before break_x.
            let answer = *self;
            self.clear();
            return answer;
        }

        let steps = steps as usize;
        let new_start = self.start;
        let new_length = steps as f32 * dx;
        let new_count = steps + 1;

        let length_to_start = new_length + dx;
        self.length -= length_to_start;
        self.count -= new_count;
        self.start.x += length_to_start;

        Span::new(new_start, new_length, new_count)
    }

    /// Make every sample of this span read `pixel`.
    pub fn clamp_to_single_pixel(&mut self, pixel: PointF) {
        self.start = pixel;
        self.length = 0.0;
    }
}

// ============================================================================
// BilerpSpan
// ============================================================================

/// A span of bilinear samples. Each sample reads the 2×2 block whose top-left
/// tap is at `(x + i*dx, y0)` and whose bottom row is at `y1`.
///
/// The rows are carried separately because tiling may put `y0` on the last
/// row of a tile and `y1` on the first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BilerpSpan {
    x: f32,
    y0: f32,
    y1: f32,
    length: f32,
    count: usize,
}

impl BilerpSpan {
    pub fn new(x: f32, y0: f32, y1: f32, length: f32, count: usize) -> Self {
        debug_assert!(length.is_finite());
        debug_assert!(x.is_finite() && y0.is_finite() && y1.is_finite());
        Self {
            x,
            y0,
            y1,
            length,
            count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y0(&self) -> f32 {
        self.y0
    }

    pub fn y1(&self) -> f32 {
        self.y1
    }

    pub fn length(&self) -> f32 {
        self.length
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn span(x: f32, length: f32, count: usize) -> Span {
        Span::new(PointF::new(x, 0.5), length, count)
    }

    #[test]
    fn test_end_x_and_dx() {
        let s = span(0.5, 3.0, 4);
        assert_eq!(s.end_x(), 3.5);
        assert_eq!(s.dx(), 1.0);
    }

    #[test]
    fn test_completely_within_handles_reverse() {
        assert!(span(0.5, 3.0, 4).completely_within(0.0, 4.0));
        assert!(span(3.5, -3.0, 4).completely_within(0.0, 4.0));
        assert!(!span(-0.5, 3.0, 4).completely_within(0.0, 4.0));
        assert!(!span(3.5, 1.0, 2).completely_within(0.0, 4.0));
    }

    #[test]
    fn test_break_at_middle() {
        // Samples at 0, 1, 2, 3, 4, 5.
        let mut s = span(0.0, 5.0, 6);
        let prefix = s.break_at(2.5, 1.0);
        assert_eq!(prefix.count(), 3);
        assert_eq!(prefix.start_x(), 0.0);
        assert_eq!(prefix.length(), 2.0);
        assert_eq!(s.count(), 3);
        assert_eq!(s.start_x(), 3.0);
        assert_eq!(s.length(), 2.0);
    }

    #[test]
    fn test_break_at_sample_on_boundary_goes_to_prefix() {
        let mut s = span(0.0, 5.0, 6);
        let prefix = s.break_at(2.0, 1.0);
        assert_eq!(prefix.count(), 3);
        assert_eq!(s.start_x(), 3.0);
    }

    #[test]
    fn test_break_at_wholly_after() {
        let mut s = span(10.0, 5.0, 6);
        let prefix = s.break_at(2.0, 1.0);
        assert!(prefix.is_empty());
        assert_eq!(s.count(), 6);
    }

    #[test]
    fn test_break_at_wholly_before() {
        let mut s = span(0.0, 5.0, 6);
        let prefix = s.break_at(100.0, 1.0);
        assert_eq!(prefix.count(), 6);
        assert!(s.is_empty());
        // Boundary on the last sample also takes everything.
        let mut s = span(0.0, 5.0, 6);
        assert_eq!(s.break_at(5.0, 1.0).count(), 6);
        assert!(s.is_empty());
    }

    #[test]
    fn test_break_at_empty() {
        let mut s = Span::empty();
        assert!(s.break_at(1.0, 1.0).is_empty());
        assert!(s.is_empty());
    }

    #[test]
    fn test_break_at_negative_dx() {
        // Samples at 5, 4, 3, 2, 1, 0.
        let mut s = span(5.0, -5.0, 6);
        let prefix = s.break_at(2.5, -1.0);
        assert_eq!(prefix.count(), 3);
        assert_eq!(prefix.end_x(), 3.0);
        assert_eq!(s.start_x(), 2.0);
        assert_eq!(s.count(), 3);
    }

    #[test]
    fn test_break_at_conserves_count_and_is_idempotent() {
        let starts = [-7.25f32, -1.0, 0.0, 0.5, 3.75];
        let steps = [0.25f32, 0.5, 1.0, 2.0, 3.0];
        let bounds = [-3.0f32, 0.0, 1.5, 4.0, 9.0];
        for &x in &starts {
            for &dx in &steps {
                for count in 1..9usize {
                    for &b in &bounds {
                        let mut s = span(x, dx * (count as f32 - 1.0), count);
                        let prefix = s.break_at(b, dx);
                        assert_eq!(prefix.count() + s.count(), count);
                        let again = s.break_at(b, dx);
                        assert!(again.is_empty(), "x={x} dx={dx} count={count} b={b}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_clamp_to_single_pixel() {
        let mut s = span(-3.0, 2.0, 3);
        s.clamp_to_single_pixel(PointF::new(0.0, 1.5));
        assert_eq!(s.start(), PointF::new(0.0, 1.5));
        assert_eq!(s.length(), 0.0);
        assert_eq!(s.count(), 3);
    }

    #[test]
    fn test_offset() {
        let mut s = span(4.5, 1.0, 2);
        s.offset(-4.0);
        assert_eq!(s.start_x(), 0.5);
        assert_eq!(s.start().y, 0.5);
    }
}
