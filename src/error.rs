//! Error types for plant model and AFE operations.

use thiserror::Error;

/// Result type alias for simulator operations.
pub type Result<T> = std::result::Result<T, SimError>;

/// Errors surfaced synchronously to the calling test harness.
///
/// Physical quantities (SOC, temperature, terminal voltage) are clamped rather
/// than rejected, so none of these variants are produced by the numeric
/// update paths.
#[derive(Error, Debug)]
pub enum SimError {
    /// Cell index outside the pack
    #[error("Cell index {index} out of range (pack has {len} cells)")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of cells in the pack
        len: usize,
    },

    /// Argument rejected by validation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration, profile or checkpoint file I/O
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON document
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SimError::InvalidArgument(msg.into())
    }
}
