//! Error types for host and co-processor operations

use thiserror::Error;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, KriaError>;

/// Errors that can occur while driving the board
#[derive(Debug, Error)]
pub enum KriaError {
    /// Register window or arena mapping could not be established
    #[error("Hardware unavailable: {reason}")]
    HardwareUnavailable {
        /// Reason for failure
        reason: String,
    },

    /// Target device reported busy; no register was written
    #[error("Device busy: {device}")]
    DeviceBusy {
        /// Device that rejected the command
        device: &'static str,
    },

    /// Accelerator done bit not observed within the poll budget
    #[error("Accelerator timeout after {polls} polls ({duration_ms}ms)")]
    AcceleratorTimeout {
        /// Polls performed
        polls: u32,
        /// Elapsed time in milliseconds
        duration_ms: u64,
    },

    /// Arena configuration is inconsistent
    #[error("Invalid arena layout: {reason}")]
    ArenaLayout {
        /// Reason for failure
        reason: String,
    },

    /// Access outside a mapped window or arena region
    #[error("Out of bounds: addr={addr:#x}, len={len}, limit={limit:#x}")]
    OutOfBounds {
        /// Requested address
        addr: u64,
        /// Requested length in bytes
        len: usize,
        /// End of the valid range
        limit: u64,
    },

    /// Register or word access at an unaligned address
    #[error("Misaligned access at {addr:#x}")]
    Misaligned {
        /// Requested address
        addr: u64,
    },

    /// Frame cannot be handed to the accelerator
    #[error("Invalid frame: {reason}")]
    InvalidFrame {
        /// Reason for rejection
        reason: String,
    },

    /// Postprocessing failed on the co-processor
    #[error("Postprocess failed: {source}")]
    Postprocess {
        /// Underlying postprocessing error
        #[from]
        source: kria_detect::DetectError,
    },
}

impl KriaError {
    /// Create a hardware unavailable error
    pub fn hardware_unavailable(reason: impl Into<String>) -> Self {
        Self::HardwareUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a device busy error
    pub const fn device_busy(device: &'static str) -> Self {
        Self::DeviceBusy { device }
    }

    /// Create an arena layout error
    pub fn arena_layout(reason: impl Into<String>) -> Self {
        Self::ArenaLayout {
            reason: reason.into(),
        }
    }

    /// Create an invalid frame error
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }

    /// True for [`KriaError::DeviceBusy`]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::DeviceBusy { .. })
    }

    /// True for [`KriaError::AcceleratorTimeout`]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::AcceleratorTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kria_detect::DetectError;

    #[test]
    fn postprocess_errors_convert() {
        let err: KriaError = DetectError::TensorTooShort { got: 1, expected: 2 }.into();
        assert!(matches!(err, KriaError::Postprocess { .. }));
        assert!(!err.is_busy() && !err.is_timeout());
    }

    #[test]
    fn open_failures_are_hardware_unavailable() {
        let err = KriaError::hardware_unavailable("cannot open /dev/mem");
        assert_eq!(err.to_string(), "Hardware unavailable: cannot open /dev/mem");
    }
}
