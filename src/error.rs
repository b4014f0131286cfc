//! Error types for coordinate transformations.

use thiserror::Error;

/// Errors raised by transform construction and the checked transform methods.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    /// A point, or an adjacent pair of stages, has the wrong dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality required by the transform.
        expected: usize,
        /// Dimensionality actually supplied.
        actual: usize,
    },

    /// The transform is only defined for a specific point representation.
    #[error("unsupported point type: transform requires {expected}D points, got {actual}D")]
    UnsupportedPointType {
        /// Dimensionality the transform is defined for.
        expected: usize,
        /// Dimensionality actually supplied.
        actual: usize,
    },

    /// The transform is not one-to-one.
    #[error("transform is not invertible: {0}")]
    NonInvertible(String),

    /// The operation is intentionally unimplemented.
    #[error("{0} is not supported")]
    NotSupported(&'static str),

    /// Rejected constructor input.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The transform has no well-defined value or derivative at this point.
    #[error("point is outside the valid domain of the transform")]
    PointOutsideDomain,
}

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;

/// Fail with [TransformError::DimensionMismatch] unless `actual == expected`.
pub(crate) fn check_ndim(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(TransformError::DimensionMismatch { expected, actual });
    }
    Ok(())
}
