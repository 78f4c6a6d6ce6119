//! Error types for amg-rs.

use thiserror::Error;

/// Result alias for amg-rs operations.
pub type AmgResult<T> = std::result::Result<T, AmgError>;

/// Errors reported by the codec, the box helpers, the batch iterator and
/// [`MaskData`](crate::MaskData).
#[derive(Debug, Error)]
pub enum AmgError {
    /// A field value is not one of the supported kinds, or does not match the
    /// kind the field was first assigned with.
    #[error("field '{key}' has an unsupported type: {kind}")]
    UnsupportedType { key: String, kind: String },
    /// Parallel sequences (or fields) disagree on their leading length.
    #[error("length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },
    /// Degenerate or malformed box coordinates.
    #[error("invalid box {coords:?}: {reason}")]
    InvalidBox {
        coords: Vec<f32>,
        reason: &'static str,
    },
    /// RLE counts do not cover exactly `height * width` pixels.
    #[error("malformed RLE: counts sum to {got}, size implies {expected}")]
    MalformedRle { expected: u64, got: u64 },
    /// A selection index points past the end of a field.
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    /// Two arrays cannot be concatenated because their trailing shapes differ.
    #[error("field '{key}' shape mismatch: expected trailing shape {expected:?}, got {got:?}")]
    ShapeMismatch {
        key: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// The input data or parameters are invalid.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
