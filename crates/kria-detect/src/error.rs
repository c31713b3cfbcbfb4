//! Error types for postprocessing

use thiserror::Error;

/// Result type alias for postprocessing operations
pub type Result<T> = std::result::Result<T, DetectError>;

/// Errors raised while decoding tensors or packing results
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectError {
    /// Tensor holds fewer values than its geometry requires
    #[error("Tensor too short: got {got} values, expected {expected}")]
    TensorTooShort {
        /// Values available
        got: usize,
        /// Values required
        expected: usize,
    },

    /// Result buffer cannot hold the records to be written
    #[error("Result buffer too small: got {got} words, need {needed}")]
    ResultBufferTooSmall {
        /// Words available
        got: usize,
        /// Words required
        needed: usize,
    },

    /// Result buffer contents are inconsistent
    #[error("Malformed result buffer: {reason}")]
    MalformedResult {
        /// What was wrong
        reason: String,
    },
}

impl DetectError {
    /// Create a malformed result error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResult {
            reason: reason.into(),
        }
    }
}
