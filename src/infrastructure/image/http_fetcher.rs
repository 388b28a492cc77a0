//! HTTP implementation of the fetcher port.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{Client, header};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::domain::errors::FetchError;
use crate::domain::ports::Fetcher;

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = concat!("imgkit/", env!("CARGO_PKG_VERSION"));

/// Downloads image bytes over HTTP(S) with per-URL cancellation.
pub struct HttpFetcher {
    client: Client,
    active: Mutex<HashMap<u64, ActiveFetch>>,
    next_id: AtomicU64,
}

struct ActiveFetch {
    url: String,
    cancel: oneshot::Sender<()>,
}

/// Unregisters a fetch when its future completes or is dropped.
struct ActiveGuard<'a> {
    fetcher: &'a HttpFetcher,
    id: u64,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.fetcher.active.lock().remove(&self.id);
    }
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl HttpFetcher {
    /// Creates a fetcher sending the given `User-Agent`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            active: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.active.lock().len()
    }

    async fn download(&self, url: &str, timeout: Duration) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "image/*")
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            debug!(url, status = status.as_u16(), "Image request returned error status");
            return Err(FetchError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        trace!(url, size = bytes.len(), "Downloaded image bytes");
        Ok(bytes)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Bytes, FetchError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = oneshot::channel();
        self.active.lock().insert(
            id,
            ActiveFetch {
                url: url.to_string(),
                cancel,
            },
        );
        let _guard = ActiveGuard { fetcher: self, id };

        tokio::select! {
            result = self.download(url, timeout) => result,
            _ = cancelled => {
                debug!(url, "Fetch cancelled");
                Err(FetchError::Cancelled)
            }
        }
    }

    fn cancel(&self, url: &str) {
        let mut active = self.active.lock();
        let ids: Vec<u64> = active
            .iter()
            .filter(|(_, fetch)| fetch.url == url)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(fetch) = active.remove(&id) {
                let _ = fetch.cancel.send(());
            }
        }
    }

    fn cancel_all(&self) {
        let mut active = self.active.lock();
        let count = active.len();
        for (_, fetch) in active.drain() {
            let _ = fetch.cancel.send(());
        }
        if count > 0 {
            debug!(count, "Cancelled all in-flight fetches");
        }
    }
}

fn map_reqwest_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `response` verbatim to every connection; `None` never answers.
    async fn serve(response: Option<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    match response {
                        Some(body) => {
                            let _ = socket.write_all(body.as_bytes()).await;
                            let _ = socket.shutdown().await;
                        }
                        None => tokio::time::sleep(Duration::from_secs(30)).await,
                    }
                });
            }
        });
        format!("http://{addr}/image.png")
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(DEFAULT_USER_AGENT).unwrap()
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let url = serve(Some(
            "HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\nabcd",
        ))
        .await;

        let bytes = fetcher().fetch(&url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(&bytes[..], b"abcd");
    }

    #[tokio::test]
    async fn test_error_status() {
        let url = serve(Some(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ))
        .await;

        let result = fetcher().fetch(&url, Duration::from_secs(5)).await;
        assert_eq!(result, Err(FetchError::Status(404)));
    }

    #[tokio::test]
    async fn test_empty_body() {
        let url = serve(Some(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ))
        .await;

        let result = fetcher().fetch(&url, Duration::from_secs(5)).await;
        assert_eq!(result, Err(FetchError::EmptyBody));
    }

    #[tokio::test]
    async fn test_timeout() {
        let url = serve(None).await;

        let result = fetcher().fetch(&url, Duration::from_millis(100)).await;
        assert_eq!(result, Err(FetchError::Timeout));
    }

    #[tokio::test]
    async fn test_cancel_by_url() {
        let url = serve(None).await;
        let fetcher = Arc::new(fetcher());

        let handle = {
            let fetcher = Arc::clone(&fetcher);
            let url = url.clone();
            tokio::spawn(async move { fetcher.fetch(&url, Duration::from_secs(10)).await })
        };

        while fetcher.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        fetcher.cancel("http://127.0.0.1:1/other.png");
        assert_eq!(fetcher.in_flight(), 1);

        fetcher.cancel(&url);

        assert_eq!(handle.await.unwrap(), Err(FetchError::Cancelled));
        assert_eq!(fetcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let url = serve(None).await;
        let fetcher = Arc::new(fetcher());

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let fetcher = Arc::clone(&fetcher);
                let url = url.clone();
                tokio::spawn(async move { fetcher.fetch(&url, Duration::from_secs(10)).await })
            })
            .collect();

        while fetcher.in_flight() < 3 {
            tokio::task::yield_now().await;
        }
        fetcher.cancel_all();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err(FetchError::Cancelled));
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = fetcher()
            .fetch(&format!("http://{addr}/a.png"), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(FetchError::Transport(_))));
    }
}
