//! Port definition for network byte fetching.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::FetchError;

/// Port for downloading raw image bytes.
/// Implementations must be thread-safe.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Downloads the body at `url`, bounded by `timeout`.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Bytes, FetchError>;

    /// Cancels every in-flight fetch for `url`. Best-effort.
    fn cancel(&self, url: &str);

    /// Cancels every in-flight fetch.
    fn cancel_all(&self);
}
