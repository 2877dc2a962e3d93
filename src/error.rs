use thiserror::Error;

/// Error types for the lmsvd-rs library.
#[derive(Error, Debug)]
pub enum LmSvdError {
    /// Error indicating a mismatch in vector or matrix dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error for invalid parameter values or parameter controls.
    #[error("Invalid parameter value: {0}")]
    InvalidParameter(String),

    /// Error for an invalid bound, cap or scale in a parameter control.
    #[error("Bounds error: {0}")]
    BoundsError(String),

    /// Error for an inconsistent solver configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The model evaluation callback reported a failure.
    #[error("Model evaluation failed: {0}")]
    CallbackFailure(String),

    /// Linear algebra error.
    #[error("Linear algebra error: {0}")]
    LinearAlgebraError(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Generic error for cases that don't fit the other categories.
    #[error("Error: {0}")]
    Other(String),
}

impl From<crate::parameters::control::BoundsError> for LmSvdError {
    fn from(err: crate::parameters::control::BoundsError) -> Self {
        LmSvdError::BoundsError(format!("{}", err))
    }
}

/// Result type alias for lmsvd-rs operations.
pub type Result<T> = std::result::Result<T, LmSvdError>;

impl From<String> for LmSvdError {
    fn from(s: String) -> Self {
        LmSvdError::Other(s)
    }
}

impl From<&str> for LmSvdError {
    fn from(s: &str) -> Self {
        LmSvdError::Other(s.to_string())
    }
}
