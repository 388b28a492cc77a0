//! Fetcher error types.

use thiserror::Error;

/// Failure kinds a fetcher must distinguish.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected status: HTTP {0}")]
    Status(u16),

    #[error("response body was empty")]
    EmptyBody,

    #[error("fetch was cancelled")]
    Cancelled,
}
