//! Placer stage: writes sampled pixels into the destination buffer.

use crate::color::{AlphaType, Color4f, Pm4f};
use crate::pipeline_stage::PixelPlacer;

/// Stores float pixels into a [`Pm4f`] slice, premultiplying first when the
/// source is unpremultiplied. Opaque sources are stored as they come.
pub(crate) struct FloatPixelPlacer<'d> {
    dst: &'d mut [Pm4f],
    cursor: usize,
    premultiply: bool,
}

impl<'d> FloatPixelPlacer<'d> {
    pub(crate) fn new(dst: &'d mut [Pm4f], alpha_type: AlphaType) -> Self {
        Self {
            dst,
            cursor: 0,
            premultiply: alpha_type == AlphaType::Unpremul,
        }
    }

    /// Number of pixels placed so far.
    pub(crate) fn placed(&self) -> usize {
        self.cursor
    }

    #[inline]
    fn store(&mut self, pixel: Color4f) {
        let pixel = if self.premultiply {
            pixel.premultiply()
        } else {
            pixel
        };
        debug_assert!(self.cursor < self.dst.len(), "placer overran its destination");
        if let Some(slot) = self.dst.get_mut(self.cursor) {
            *slot = pixel;
        }
        self.cursor += 1;
    }
}

impl PixelPlacer for FloatPixelPlacer<'_> {
    #[inline]
    fn place_pixel(&mut self, pixel: Color4f) {
        self.store(pixel);
    }

    #[inline]
    fn place_4_pixels(&mut self, p0: Color4f, p1: Color4f, p2: Color4f, p3: Color4f) {
        self.store(p0);
        self.store(p1);
        self.store(p2);
        self.store(p3);
    }
}
