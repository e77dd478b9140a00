//! Error types for canopy.

use thiserror::Error;

/// Errors that can occur while loading points or building a tree.
#[derive(Debug, Error)]
pub enum CoverError {
    /// Invalid build or query parameter.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Coordinate count does not match the point set's dimension.
    #[error("dimension mismatch: point has {got} coordinates, set holds {want}")]
    DimensionMismatch { got: usize, want: usize },

    /// Point file failed header or shape validation.
    #[error("malformed point file: {0}")]
    BadPointFile(String),

    /// Underlying I/O failure, tagged with the failing operation.
    #[error("i/o failure during {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Empty point set (nothing to build).
    #[error("point set is empty")]
    EmptyIndex,
}

/// Result type alias for canopy operations.
pub type Result<T> = std::result::Result<T, CoverError>;
