//! Errors surfaced to load waiters.

use thiserror::Error;

use super::{FetchError, TransformError};

/// Failure of a logical image load.
///
/// Cloned to every waiter attached to the failing task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum LoadError {
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("invalid image data received")]
    InvalidImageData,

    #[error("network error: {cause}")]
    NetworkError { cause: String },

    /// `stage` is the 1-based position of the failing transform.
    #[error("image processing failed at stage {stage}: {cause}")]
    ProcessingFailed { cause: String, stage: usize },

    #[error("invalid server response (HTTP {status})")]
    InvalidResponse { status: u16 },

    #[error("no data received")]
    NoData,

    #[error("request was cancelled")]
    Cancelled,
}

impl LoadError {
    /// Creates invalid URL error.
    #[must_use]
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates network error.
    #[must_use]
    pub fn network(cause: impl Into<String>) -> Self {
        Self::NetworkError {
            cause: cause.into(),
        }
    }

    /// Creates processing error for the given 1-based stage.
    #[must_use]
    pub fn processing(cause: impl Into<String>, stage: usize) -> Self {
        Self::ProcessingFailed {
            cause: cause.into(),
            stage,
        }
    }

    /// Returns whether a caller-side retry could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError { .. } | Self::InvalidResponse { .. } | Self::NoData
        )
    }
}

impl From<FetchError> for LoadError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Transport(cause) => Self::NetworkError { cause },
            FetchError::Timeout => Self::network("request timed out"),
            FetchError::Status(status) => Self::InvalidResponse { status },
            FetchError::EmptyBody => Self::NoData,
            FetchError::Cancelled => Self::Cancelled,
        }
    }
}

impl From<(TransformError, usize)> for LoadError {
    fn from((error, stage): (TransformError, usize)) -> Self {
        Self::processing(error.to_string(), stage)
    }
}
