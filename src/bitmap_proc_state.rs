//! Per-draw bitmap sampling state and the shader that produces it.
//!
//! [`BitmapShader::make_context`] resolves a bitmap through the
//! [`BitmapController`] once per draw and builds the pipeline stages for the
//! result. The [`ShaderContext`] then shades any number of spans.

use std::fmt;
use std::ops::BitOr;

use log::debug;

use crate::bitmap::Bitmap;
use crate::bitmap_controller::{BitmapController, ControllerState};
use crate::color::{Pm4f, Rgba8};
use crate::linear_pipeline::{LinearPipeline, Stages};
use crate::matrix::Matrix;
use crate::pipeline_filter::FilterQuality;
use crate::pipeline_tile::TileMode;
use crate::pixmap::Pixmap;

// ============================================================================
// BitmapProcState
// ============================================================================

/// A resolved source together with the pipeline stages chosen for it.
pub struct BitmapProcState {
    state: ControllerState,
    stages: Stages,
    tile_x: TileMode,
    tile_y: TileMode,
}

impl BitmapProcState {
    /// Resolve `bitmap` for drawing through `inverse`. `None` when there is
    /// nothing to draw or the resolved source cannot be sampled.
    pub fn new(
        controller: &BitmapController,
        bitmap: &Bitmap,
        inverse: &Matrix,
        quality: FilterQuality,
        tile_x: TileMode,
        tile_y: TileMode,
    ) -> Option<Self> {
        let state = controller.request_state(bitmap, inverse, quality)?;
        let stages = match LinearPipeline::new(
            state.inv_matrix(),
            state.quality(),
            tile_x,
            tile_y,
            state.pixmap(),
        ) {
            Ok(pipeline) => pipeline.into_stages(),
            Err(e) => {
                debug!("bitmap proc state: cannot sample {:?}: {}", state, e);
                return None;
            }
        };
        Some(Self {
            state,
            stages,
            tile_x,
            tile_y,
        })
    }

    pub fn pixmap(&self) -> Pixmap<'_> {
        self.state.pixmap()
    }

    pub fn inv_matrix(&self) -> &Matrix {
        self.state.inv_matrix()
    }

    pub fn quality(&self) -> FilterQuality {
        self.state.quality()
    }

    pub fn tile_modes(&self) -> (TileMode, TileMode) {
        (self.tile_x, self.tile_y)
    }

    pub fn controller_state(&self) -> &ControllerState {
        &self.state
    }

    /// Shade `dst.len()` premultiplied pixels of row `y` from column `x`.
    pub fn shade_span_4f(&self, x: i32, y: i32, dst: &mut [Pm4f]) {
        self.stages.shade(self.state.pixmap(), x, y, dst);
    }
}

impl fmt::Debug for BitmapProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitmapProcState")
            .field("state", &self.state)
            .field("stages", &self.stages)
            .field("tile_x", &self.tile_x)
            .field("tile_y", &self.tile_y)
            .finish()
    }
}

// ============================================================================
// ShaderFlags
// ============================================================================

/// Properties of a shader's output that let callers take shortcuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShaderFlags(u32);

impl ShaderFlags {
    pub const NONE: Self = Self(0);
    /// Every pixel produced has alpha 255.
    pub const OPAQUE_ALPHA: Self = Self(1 << 0);
    /// Every row of output is the same.
    pub const CONST_IN_Y: Self = Self(1 << 1);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ShaderFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ============================================================================
// ShaderContext
// ============================================================================

/// Shades spans of one bitmap draw.
#[derive(Debug)]
pub struct ShaderContext {
    proc_state: BitmapProcState,
    paint_alpha: u8,
    flags: ShaderFlags,
    /// Float pixels for [`ShaderContext::shade_span`]; grows, never shrinks.
    scratch: Vec<Pm4f>,
}

impl ShaderContext {
    fn new(proc_state: BitmapProcState, paint_alpha: u8) -> Self {
        let mut flags = ShaderFlags::NONE;
        let pixmap = proc_state.pixmap();
        if pixmap.is_opaque() && paint_alpha == 255 {
            flags = flags | ShaderFlags::OPAQUE_ALPHA;
        }
        if pixmap.height() == 1 && proc_state.inv_matrix().is_scale_translate() {
            flags = flags | ShaderFlags::CONST_IN_Y;
        }
        Self {
            proc_state,
            paint_alpha,
            flags,
            scratch: Vec::new(),
        }
    }

    pub fn flags(&self) -> ShaderFlags {
        self.flags
    }

    pub fn paint_alpha(&self) -> u8 {
        self.paint_alpha
    }

    pub fn proc_state(&self) -> &BitmapProcState {
        &self.proc_state
    }

    /// Premultiplied float pixels, without paint alpha.
    pub fn shade_span_4f(&self, x: i32, y: i32, dst: &mut [Pm4f]) {
        self.proc_state.shade_span_4f(x, y, dst);
    }

    /// Premultiplied 8-bit pixels scaled by paint alpha, packed with
    /// [`Rgba8::to_ne_u32`].
    pub fn shade_span(&mut self, x: i32, y: i32, dst: &mut [u32]) {
        if dst.is_empty() {
            return;
        }
        if dst.len() > self.scratch.len() {
            // Round up to a multiple of 256.
            let new_len = ((dst.len() + 255) >> 8) << 8;
            self.scratch.resize(new_len, Pm4f::TRANSPARENT);
        }
        let tmp = &mut self.scratch[..dst.len()];
        self.proc_state.shade_span_4f(x, y, tmp);
        let scale = self.paint_alpha as f32 * (1.0 / 255.0);
        if self.paint_alpha == 255 {
            for (d, c) in dst.iter_mut().zip(tmp.iter()) {
                *d = c.to_rgba8().to_ne_u32();
            }
        } else {
            for (d, c) in dst.iter_mut().zip(tmp.iter()) {
                *d = (*c * scale).to_rgba8().to_ne_u32();
            }
        }
    }
}

// ============================================================================
// BitmapShader
// ============================================================================

/// Fills with a bitmap mapped through a local matrix and tiled per axis.
#[derive(Debug, Clone)]
pub struct BitmapShader {
    pub bitmap: Bitmap,
    pub tile_x: TileMode,
    pub tile_y: TileMode,
    pub local_matrix: Matrix,
}

impl BitmapShader {
    pub fn new(bitmap: Bitmap, tile_x: TileMode, tile_y: TileMode) -> Self {
        Self {
            bitmap,
            tile_x,
            tile_y,
            local_matrix: Matrix::new(),
        }
    }

    pub fn with_local_matrix(mut self, local_matrix: Matrix) -> Self {
        self.local_matrix = local_matrix;
        self
    }

    /// Prepare to draw with the device matrix `ctm`. `None` means the draw
    /// produces nothing.
    pub fn make_context(
        &self,
        controller: &BitmapController,
        ctm: &Matrix,
        quality: FilterQuality,
        paint_alpha: u8,
    ) -> Option<ShaderContext> {
        let total = self.local_matrix.then(ctm);
        let Some(inverse) = total.invert() else {
            debug!("bitmap shader: singular matrix {:?}", total);
            return None;
        };
        let proc_state = BitmapProcState::new(
            controller,
            &self.bitmap,
            &inverse,
            quality,
            self.tile_x,
            self.tile_y,
        )?;
        Some(ShaderContext::new(proc_state, paint_alpha))
    }
}

/// Unpack a word written by [`ShaderContext::shade_span`].
pub fn unpack_pixel(v: u32) -> Rgba8 {
    Rgba8::from_ne_u32(v)
}

// ============================================================================
// Tests
// ============================================================================
