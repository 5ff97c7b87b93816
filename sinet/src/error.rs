use thiserror::Error;

/// The error type for `SINet-Burn` operations.
#[derive(Error, Debug)]
pub enum SINetError {
    /// A binarization threshold outside `[0, 1]` (or NaN).
    #[error("Invalid threshold: {value} is outside [0, 1]")]
    InvalidThreshold {
        /// The rejected value.
        value: f32,
    },

    /// The input bytes could not be decoded as an image.
    #[error("Invalid image: {reason}")]
    InvalidImage {
        /// Why decoding failed.
        reason: String,
    },

    /// Logically inconsistent configuration values.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Reading or decoding a checkpoint failed.
    #[error("Failed to load weights: {reason}")]
    WeightLoadingFailed {
        /// The reason for the weight loading failure.
        reason: String,
    },

    /// A checkpoint parameter does not fit the current architecture.
    #[error("Parameter shape mismatch at index {index}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Position of the parameter in module traversal order.
        index: usize,
        /// Shape required by the architecture.
        expected: Vec<usize>,
        /// Shape found in the checkpoint.
        actual: Vec<usize>,
    },

    /// Dataset discovery or pairing failed.
    #[error("Dataset error: {message}")]
    DatasetError {
        /// The error message.
        message: String,
    },

    /// A tensor could not be converted or had an unexpected layout.
    #[error("Tensor operation failed: {operation}")]
    TensorOperationFailed {
        /// A description of the failed tensor operation.
        operation: String,
    },

    /// Underlying filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SINetError {
    /// Whether the error was caused by caller input rather than by the model
    /// or its environment.
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidThreshold { .. } | Self::InvalidImage { .. }
        )
    }
}

/// A specialized `Result` type for `SINet-Burn` operations.
pub type SINetResult<T> = Result<T, SINetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(SINetError::InvalidThreshold { value: 1.5 }.is_client_error());
        assert!(SINetError::InvalidImage {
            reason: "truncated".to_string()
        }
        .is_client_error());
        assert!(!SINetError::WeightLoadingFailed {
            reason: "missing".to_string()
        }
        .is_client_error());
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = SINetError::ShapeMismatch {
            index: 3,
            expected: vec![32, 64, 1, 1],
            actual: vec![32, 128, 1, 1],
        };
        let message = err.to_string();
        assert!(message.contains("index 3"));
        assert!(message.contains("[32, 64, 1, 1]"));
    }
}
