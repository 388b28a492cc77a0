//! Transform error types.

use thiserror::Error;

/// Failure of a single bitmap transform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum TransformError {
    #[error("invalid {transform} parameter: {reason}")]
    InvalidParameter { transform: String, reason: String },

    #[error("transform failed: {0}")]
    Failed(String),
}

impl TransformError {
    /// Creates invalid parameter error.
    #[must_use]
    pub fn invalid(transform: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            transform: transform.into(),
            reason: reason.into(),
        }
    }

    /// Creates generic failure.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}
