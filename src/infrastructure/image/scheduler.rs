//! Priority-ordered admission to the network pool.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::domain::entities::Priority;

/// Default number of concurrent network operations.
pub const DEFAULT_MAX_CONCURRENT_NETWORK: usize = 6;

struct PermitRequest {
    priority: Priority,
    seq: u64,
    reply: oneshot::Sender<OwnedSemaphorePermit>,
}

impl PartialEq for PermitRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for PermitRequest {}

impl PartialOrd for PermitRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PermitRequest {
    // Max-heap: higher priority first, then lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Grants network permits in priority order, FIFO within a priority.
///
/// Holding the returned permit occupies one slot of the pool.
pub struct NetworkScheduler {
    requests: mpsc::UnboundedSender<(Priority, oneshot::Sender<OwnedSemaphorePermit>)>,
    max_concurrent: usize,
    worker: JoinHandle<()>,
}

impl std::fmt::Debug for NetworkScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkScheduler")
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl NetworkScheduler {
    /// Spawns the scheduler worker. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let (requests, rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let worker = tokio::spawn(Self::run(rx, semaphore));

        Self {
            requests,
            max_concurrent,
            worker,
        }
    }

    /// Configured pool size.
    #[must_use]
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Waits for a permit. Returns `None` once the scheduler has shut down.
    pub async fn acquire(&self, priority: Priority) -> Option<OwnedSemaphorePermit> {
        let (tx, rx) = oneshot::channel();
        self.requests.send((priority, tx)).ok()?;
        rx.await.ok()
    }

    /// Stops the worker; pending and future `acquire` calls return `None`.
    pub fn shutdown(&self) {
        self.worker.abort();
    }

    async fn run(
        mut rx: mpsc::UnboundedReceiver<(Priority, oneshot::Sender<OwnedSemaphorePermit>)>,
        semaphore: Arc<Semaphore>,
    ) {
        let mut queue = BinaryHeap::new();
        let mut seq = 0u64;

        loop {
            tokio::select! {
                biased;

                msg = rx.recv() => {
                    let Some((priority, reply)) = msg else {
                        break;
                    };
                    queue.push(PermitRequest { priority, seq, reply });
                    seq += 1;
                }
                Ok(permit) = semaphore.clone().acquire_owned(), if !queue.is_empty() => {
                    let mut permit = Some(permit);
                    while let Some(request) = queue.pop() {
                        let Some(p) = permit.take() else { break };
                        // A dropped receiver hands the permit back for the next waiter.
                        match request.reply.send(p) {
                            Ok(()) => {
                                trace!(priority = ?request.priority, "Granted network permit");
                                break;
                            }
                            Err(p) => permit = Some(p),
                        }
                    }
                }
            }
        }
    }
}

impl Drop for NetworkScheduler {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready};

    #[tokio::test]
    async fn test_permits_bounded() {
        let scheduler = NetworkScheduler::new(2);
        let a = scheduler.acquire(Priority::Normal).await;
        let b = scheduler.acquire(Priority::Normal).await;
        assert!(a.is_some() && b.is_some());

        let mut third = tokio_test::task::spawn(scheduler.acquire(Priority::Normal));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_pending!(third.poll());

        drop(a);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(third.is_woken());
        let permit = assert_ready!(third.poll());
        assert!(permit.is_some());
    }

    #[tokio::test]
    async fn test_priority_order_then_fifo() {
        let scheduler = Arc::new(NetworkScheduler::new(1));
        let held = scheduler.acquire(Priority::Normal).await;

        let (order_tx, mut order_rx) = mpsc::unbounded_channel();
        let mut handles = Vec::new();
        for (label, priority) in [
            ("low", Priority::Low),
            ("high-1", Priority::High),
            ("normal", Priority::Normal),
            ("high-2", Priority::High),
            ("very-high", Priority::VeryHigh),
        ] {
            let scheduler = Arc::clone(&scheduler);
            let order_tx = order_tx.clone();
            handles.push(tokio::spawn(async move {
                let permit = scheduler.acquire(priority).await;
                order_tx.send(label).unwrap();
                drop(permit);
            }));
            // Let each request reach the queue before the next is issued.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        drop(order_tx);

        let mut order = Vec::new();
        while let Some(label) = order_rx.recv().await {
            order.push(label);
        }
        assert_eq!(order, ["very-high", "high-1", "high-2", "normal", "low"]);
    }

    #[tokio::test]
    async fn test_abandoned_request_does_not_leak_permit() {
        let scheduler = NetworkScheduler::new(1);
        let held = scheduler.acquire(Priority::Normal).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            scheduler.acquire(Priority::VeryHigh),
        )
        .await;
        assert!(abandoned.is_err());

        drop(held);
        let next = tokio::time::timeout(Duration::from_secs(1), scheduler.acquire(Priority::Low))
            .await
            .unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_acquire() {
        let scheduler = NetworkScheduler::new(1);
        scheduler.shutdown();
        tokio::task::yield_now().await;

        assert!(scheduler.acquire(Priority::Normal).await.is_none());
    }
}
