//! # bitmap-sampling
//!
//! Bitmap sampling for a 2D raster engine: everything between "draw this
//! image through this matrix" and a row of premultiplied destination pixels.
//!
//! ## Architecture
//!
//! Drawing a bitmap happens in two phases:
//!
//! 1. **Policy**: the [`BitmapController`] looks at the requested filter
//!    quality and the inverse matrix and decides what to sample. High quality
//!    resizes the source once to the destination scale; Medium picks a mip
//!    level. Both results live in a shared, size-bounded [`ResourceCache`]
//!    keyed by the source's generation ID.
//! 2. **Sampling**: a [`LinearPipeline`] pushes spans of destination pixels
//!    through a chain of stages chosen once per draw:
//!
//!    ```text
//!    matrix → [bilerp expand] → tile → sampler → placer
//!    ```
//!
//! [`BitmapShader`] ties the two together. Pixel storage is owned by
//! [`PixelRef`]s, which hand out generation IDs and tell the cache when their
//! pixels change.

// Foundation types
pub mod basics;
pub mod color;
pub mod error;
pub mod matrix;
pub mod pixmap;
pub mod span;

// Linear pipeline
pub mod linear_pipeline;
mod pipeline_filter;
mod pipeline_matrix;
mod pipeline_placer;
mod pipeline_sampler;
mod pipeline_stage;
mod pipeline_tile;

// Pixel storage
pub mod bitmap;
pub mod discardable;
pub mod pixel_ref;

// Caches and derived pixel data
pub mod bitmap_cache;
pub mod bitmap_scaler;
pub mod mipmap;
pub mod resource_cache;
pub mod yuv_planes_cache;

// Per-draw policy
pub mod bitmap_controller;
pub mod bitmap_proc_state;

pub use basics::{PointF, RectI};
pub use bitmap::Bitmap;
pub use bitmap_cache::{BitmapCache, BitmapCacheDesc, MipMapCache};
pub use bitmap_controller::{BitmapController, ControllerConfig, ControllerState, StateSource};
pub use bitmap_proc_state::{BitmapProcState, BitmapShader, ShaderContext, ShaderFlags};
pub use bitmap_scaler::{BitmapScaler, ResizeMethod};
pub use color::{AlphaType, Color4f, ColorProfile, ColorTable, ColorType, Pm4f, Rgba8};
pub use discardable::{DiscardableFactory, DiscardableMemory, DiscardablePool, HeapMemory};
pub use error::{Error, Result};
pub use linear_pipeline::LinearPipeline;
pub use matrix::Matrix;
pub use mipmap::{LockedMipMap, MipColorMode, MipMap};
pub use pipeline_filter::FilterQuality;
pub use pipeline_tile::TileMode;
pub use pixel_ref::{LockedPixels, PixelProvider, PixelRef};
pub use pixmap::{ImageInfo, Pixmap};
pub use resource_cache::{ResourceCache, ResourceCacheConfig};
pub use span::Span;
pub use yuv_planes_cache::{YuvPlanes, YuvPlanesCache, YuvPlanesInfo};
