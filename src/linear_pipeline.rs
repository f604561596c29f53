//! The linear bitmap pipeline: samples a source pixmap through an inverse
//! matrix, a filter and per-axis tiling into premultiplied float pixels.
//!
//! Construction validates the inputs and picks one strategy per stage. Stages
//! that would do nothing (identity matrix, nearest-neighbour filter) are left
//! out. Each call to [`LinearPipeline::shade_span_4f`] then wires the chosen
//! stages into a chain on the stack and pushes one span through it:
//!
//! ```text
//! matrix → [bilerp expand] → tile x|both → [tile y] → sampler → placer
//! ```
//!
//! A built pipeline is immutable and never fails; running the same pipeline
//! twice over the same span produces bit-identical output.

use log::debug;

use crate::basics::PointF;
use crate::color::Pm4f;
use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::pipeline_filter::{ExpandBilerp, FilterQuality};
use crate::pipeline_matrix::MatrixStrategy;
use crate::pipeline_placer::FloatPixelPlacer;
use crate::pipeline_sampler::{Pixel8888, PixelFormat, PixelGetter, Sampler};
use crate::pipeline_stage::{BilerpProcessor, BilerpStage, PointProcessor, PointStage};
use crate::pipeline_tile::{TileMode, Tiler};
use crate::pixmap::{ImageInfo, Pixmap};
use crate::span::Span;

/// A configured sampling pipeline over one source pixmap.
#[derive(Debug, Clone)]
pub struct LinearPipeline<'a> {
    stages: Stages,
    pixmap: Pixmap<'a>,
}

impl<'a> LinearPipeline<'a> {
    /// Build a pipeline mapping destination pixels through `inverse` into
    /// `pixmap`.
    ///
    /// Fails for perspective matrices, for sources that are not 32-bit RGBA
    /// or BGRA and for empty sources.
    pub fn new(
        inverse: &Matrix,
        quality: FilterQuality,
        tile_x: TileMode,
        tile_y: TileMode,
        pixmap: Pixmap<'a>,
    ) -> Result<Self> {
        let stages = Stages::choose(inverse, quality, tile_x, tile_y, pixmap.info())?;
        Ok(Self { stages, pixmap })
    }

    /// True if points are expanded into 2×2 bilinear taps.
    pub fn is_bilinear(&self) -> bool {
        self.stages.bilerp
    }

    /// True if the matrix stage was left out.
    pub fn is_identity(&self) -> bool {
        self.stages.matrix.is_none()
    }

    /// Shade `dst.len()` pixels of destination row `y`, starting at column
    /// `x`. Samples are taken at pixel centers.
    pub fn shade_span_4f(&self, x: i32, y: i32, dst: &mut [Pm4f]) {
        self.stages.shade(self.pixmap, x, y, dst);
    }

    /// The stage choices, detached from the pixel borrow.
    pub(crate) fn into_stages(self) -> Stages {
        self.stages
    }
}

// ============================================================================
// Stages
// ============================================================================

/// The per-stage strategies of a pipeline. They depend on the source's
/// dimensions and format but not on its pixels, so they can be kept while the
/// pixels are re-borrowed for every span.
#[derive(Debug, Clone)]
pub(crate) struct Stages {
    matrix: Option<MatrixStrategy>,
    bilerp: bool,
    tiler: Tiler,
    format: PixelFormat,
    info: ImageInfo,
}

impl Stages {
    fn choose(
        inverse: &Matrix,
        quality: FilterQuality,
        tile_x: TileMode,
        tile_y: TileMode,
        info: &ImageInfo,
    ) -> Result<Self> {
        let matrix = MatrixStrategy::choose(inverse)?;
        let format = PixelFormat::choose(info)?;
        if info.is_empty() {
            return Err(Error::EmptySource);
        }
        let tiler = Tiler::new(info.width(), info.height(), tile_x, tile_y);
        let bilerp = quality != FilterQuality::None;

        debug!(
            "linear pipeline: {}x{} {:?}, matrix {:?}, bilerp {}, tile {:?}/{:?}",
            info.width(),
            info.height(),
            format,
            matrix,
            bilerp,
            tile_x,
            tile_y
        );

        Ok(Self {
            matrix,
            bilerp,
            tiler,
            format,
            info: *info,
        })
    }

    /// Shade one span out of `pixmap`, which must have the info the stages
    /// were chosen for.
    pub(crate) fn shade(&self, pixmap: Pixmap<'_>, x: i32, y: i32, dst: &mut [Pm4f]) {
        debug_assert_eq!(pixmap.info(), &self.info);
        let count = dst.len();
        if count == 0 {
            return;
        }
        let span = Span::new(
            PointF::new(x as f32 + 0.5, y as f32 + 0.5),
            count as f32 - 1.0,
            count,
        );
        let mut placer = FloatPixelPlacer::new(dst, self.info.alpha_type());
        match self.format {
            PixelFormat::LinearRgba => {
                self.shade_with(Pixel8888::<false, false>::new(pixmap), span, &mut placer)
            }
            PixelFormat::SrgbRgba => {
                self.shade_with(Pixel8888::<false, true>::new(pixmap), span, &mut placer)
            }
            PixelFormat::LinearBgra => {
                self.shade_with(Pixel8888::<true, false>::new(pixmap), span, &mut placer)
            }
            PixelFormat::SrgbBgra => {
                self.shade_with(Pixel8888::<true, true>::new(pixmap), span, &mut placer)
            }
        }
        debug_assert_eq!(placer.placed(), count);
    }

    fn shade_with<G: PixelGetter>(&self, getter: G, span: Span, placer: &mut FloatPixelPlacer<'_>) {
        let mut sampler = Sampler::new(getter, placer);
        match &self.tiler.y {
            None => {
                let mut tile = BilerpStage::new(&self.tiler.x_or_both, &mut sampler);
                self.run_front(&mut tile, span);
            }
            Some(tile_y) => {
                let mut tile_y = BilerpStage::new(tile_y, &mut sampler);
                let mut tile_x = BilerpStage::new(&self.tiler.x_or_both, &mut tile_y);
                self.run_front(&mut tile_x, span);
            }
        }
    }

    fn run_front<T: BilerpProcessor + ?Sized>(&self, tiler: &mut T, span: Span) {
        if self.bilerp {
            let mut filter = ExpandBilerp::new(tiler);
            self.run_matrix(&mut filter, span);
        } else {
            self.run_matrix(tiler, span);
        }
    }

    fn run_matrix<N: PointProcessor + ?Sized>(&self, next: &mut N, span: Span) {
        match &self.matrix {
            None => next.point_span(span),
            Some(strategy) => PointStage::new(strategy, next).point_span(span),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
