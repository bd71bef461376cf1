//! Error types for octet.

use thiserror::Error;

/// Result type alias for octet operations.
pub type Result<T> = std::result::Result<T, OctetError>;

/// Main error type for octet operations.
///
/// Shape and configuration problems are reported before any parallel work is
/// launched, so a call that returns one of them has not modified its buffers.
#[derive(Error, Debug)]
pub enum OctetError {
    /// Buffer lengths are inconsistent with the element count or block size.
    #[error("Invalid shape for {what}: expected {expected}, got {actual}")]
    InvalidShape {
        /// Which buffer or quantity was checked.
        what: &'static str,
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// A scalar argument is out of range (step 0, non-finite values, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested optimizer/precision/block-size combination is not supported.
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfig(String),

    /// The parallel substrate failed to launch or run a kernel.
    #[error("Execution fault in {kernel}: {message}")]
    ExecutionFault {
        /// Kernel name.
        kernel: &'static str,
        /// Failure description.
        message: String,
    },

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OctetError {
    /// Shorthand for a length mismatch.
    pub fn shape(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::InvalidShape {
            what,
            expected,
            actual,
        }
    }

    /// Whether this error was raised by validation rather than execution.
    #[must_use]
    pub fn is_rejected_call(&self) -> bool {
        matches!(
            self,
            Self::InvalidShape { .. } | Self::InvalidArgument(_) | Self::UnsupportedConfig(_)
        )
    }
}

impl From<serde_json::Error> for OctetError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for OctetError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_error_message() {
        let err = OctetError::shape("absmax", 3, 2);
        assert_eq!(err.to_string(), "Invalid shape for absmax: expected 3, got 2");
        assert!(err.is_rejected_call());
    }

    #[test]
    fn test_execution_fault_is_not_rejection() {
        let err = OctetError::ExecutionFault {
            kernel: "quantize_blockwise",
            message: "worker panicked".into(),
        };
        assert!(!err.is_rejected_call());
        assert!(err.to_string().contains("quantize_blockwise"));
    }
}
