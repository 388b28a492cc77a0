use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::domain::errors::LoadError;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay; retry `n` waits `base * 2^n`.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

type DelayFn = dyn Fn(u32) -> Duration + Send + Sync;

/// Bounded retry policy applied by callers around a load.
///
/// Only transient failures are retried: network errors, error statuses
/// and empty bodies.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Arc<DelayFn>,
}

impl RetryPolicy {
    /// Creates a policy with a custom delay; `delay(n)` is the wait before retry `n` (1-based).
    #[must_use]
    pub fn new(max_retries: u32, delay: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            max_retries,
            delay: Arc::new(delay),
        }
    }

    /// Exponential backoff: retry `n` waits `base * 2^n`.
    #[must_use]
    pub fn exponential(max_retries: u32, base: Duration) -> Self {
        Self::new(max_retries, move |attempt| {
            base.saturating_mul(2u32.saturating_pow(attempt))
        })
    }

    /// Never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::new(0, |_| Duration::ZERO)
    }

    /// Maximum retries after the first attempt.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Wait before retry `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        (self.delay)(attempt)
    }

    /// Runs `op`, retrying retryable failures.
    ///
    /// # Errors
    /// Returns the last error once retries are exhausted, or the first
    /// non-retryable error.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, LoadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LoadError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    debug!(attempt, delay_ms = delay.as_millis(), error = %e, "Retrying load");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use test_case::test_case;

    fn immediate(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, |_| Duration::ZERO)
    }

    #[test]
    fn test_default_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = immediate(3)
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(LoadError::network("reset"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = immediate(2)
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LoadError::NoData) }
            })
            .await;

        assert_eq!(result, Err(LoadError::NoData));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test_case(LoadError::Cancelled ; "cancelled")]
    #[test_case(LoadError::InvalidImageData ; "invalid_data")]
    #[test_case(LoadError::processing("bad", 1) ; "processing")]
    #[test_case(LoadError::invalid_url("x") ; "invalid_url")]
    #[tokio::test]
    async fn test_permanent_errors_not_retried(error: LoadError) {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = immediate(3)
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                let error = error.clone();
                async move { Err(error) }
            })
            .await;

        assert_eq!(result, Err(error));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_none_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), _> = RetryPolicy::none()
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LoadError::network("down")) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
