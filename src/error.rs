//! Crate-wide error type.

use crate::color::ColorType;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors reported at setup time.
///
/// Nothing on the per-pixel path returns an error; once a pipeline or a
/// controller state exists, sampling cannot fail.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("perspective matrices are not supported by the linear pipeline")]
    PerspectiveNotSupported,
    #[error("color type {0:?} is not supported by the linear pipeline")]
    UnsupportedColorType(ColorType),
    #[error("source pixmap is empty")]
    EmptySource,
    #[error("row bytes {row_bytes} is smaller than the minimum {min_row_bytes}")]
    RowBytesTooSmall {
        row_bytes: usize,
        min_row_bytes: usize,
    },
    #[error("pixel buffer holds {len} bytes but {required} are required")]
    BufferTooSmall { len: usize, required: usize },
    #[error("pixel allocation of {0} bytes failed")]
    AllocationFailed(usize),
    #[error("pixels are immutable")]
    ImmutablePixels,
    #[error("pixels could not be locked")]
    LockFailed,
    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("matrix is not invertible")]
    SingularMatrix,
}
