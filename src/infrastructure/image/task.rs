//! Handle for one logical in-flight load.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::domain::entities::{CacheKey, ImageResponse, Request};
use crate::domain::errors::LoadError;

/// Outcome delivered to every waiter of a task.
pub type LoadResult = Result<ImageResponse, LoadError>;

/// Completion callback attached to a task.
pub type Completion = Box<dyn FnOnce(LoadResult) + Send>;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// Pipeline running, waiters may still attach.
    Pending,
    /// Waiters have been handed the result.
    Completed,
    /// Cancelled; no waiter will be called.
    Cancelled,
}

struct TaskState {
    waiters: Vec<Completion>,
    abort: Option<AbortHandle>,
}

struct TaskShared {
    id: TaskId,
    key: CacheKey,
    request: Request,
    state: Mutex<TaskState>,
    phase: watch::Sender<TaskPhase>,
}

/// Cancellable handle to a load. Cloning shares the same task.
///
/// Coalesced callers receive clones of the one task registered for the key.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskShared>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Task {
    pub(crate) fn new(key: CacheKey, request: Request) -> Self {
        Self {
            inner: Arc::new(TaskShared {
                id: TaskId::new(),
                key,
                request,
                state: Mutex::new(TaskState {
                    waiters: Vec::new(),
                    abort: None,
                }),
                phase: watch::Sender::new(TaskPhase::Pending),
            }),
        }
    }

    /// Task identifier.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Cache key this task loads.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.inner.key
    }

    /// Request that started the task.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> TaskPhase {
        *self.inner.phase.borrow()
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.phase() == TaskPhase::Cancelled
    }

    /// Returns true once completed or cancelled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.phase() != TaskPhase::Pending
    }

    /// Number of callbacks still waiting.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// Waits until the task completes or is cancelled.
    pub async fn wait(&self) -> TaskPhase {
        let mut rx = self.inner.phase.subscribe();
        let result = rx.wait_for(|phase| *phase != TaskPhase::Pending).await;
        result.map_or(TaskPhase::Cancelled, |phase| *phase)
    }

    /// Attaches a waiter. Returns the callback back if the task already finished.
    pub(crate) fn attach(&self, completion: Completion) -> Result<(), Completion> {
        let mut state = self.inner.state.lock();
        if self.is_finished() {
            return Err(completion);
        }
        state.waiters.push(completion);
        Ok(())
    }

    /// Marks the task completed and hands back its waiters in attachment order.
    ///
    /// Returns `None` if the task was already cancelled or completed.
    pub(crate) fn complete(&self) -> Option<Vec<Completion>> {
        let mut state = self.inner.state.lock();
        if self.is_finished() {
            return None;
        }
        state.abort = None;
        self.inner.phase.send_replace(TaskPhase::Completed);
        Some(std::mem::take(&mut state.waiters))
    }

    /// Cancels the task, dropping every waiter and aborting its pipeline.
    ///
    /// Returns false if the task had already finished.
    pub(crate) fn cancel(&self) -> bool {
        let abort = {
            let mut state = self.inner.state.lock();
            if self.is_finished() {
                return false;
            }
            self.inner.phase.send_replace(TaskPhase::Cancelled);
            state.waiters.clear();
            state.abort.take()
        };
        if let Some(abort) = abort {
            abort.abort();
        }
        true
    }

    /// Registers the pipeline to abort on cancel.
    pub(crate) fn set_abort(&self, handle: AbortHandle) {
        let mut state = self.inner.state.lock();
        if self.is_cancelled() {
            handle.abort();
        } else if !self.is_finished() {
            state.abort = Some(handle);
        }
    }

    /// Returns true if both handles refer to the same task.
    pub(crate) fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task() -> Task {
        let request = Request::new("https://example.com/a.png").unwrap();
        Task::new(request.cache_key(), request)
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Completion {
        let counter = Arc::clone(counter);
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_clones_share_identity() {
        let a = task();
        let b = task();

        assert_eq!(a.id(), a.clone().id());
        assert_ne!(a.id(), b.id());
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }

    #[test]
    fn test_complete_hands_back_waiters_in_order() {
        let task = task();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            assert!(task.attach(Box::new(move |_| order.lock().push(i))).is_ok());
        }

        let waiters = task.complete().unwrap();
        for waiter in waiters {
            waiter(Err(LoadError::NoData));
        }

        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(task.phase(), TaskPhase::Completed);
        assert_eq!(task.waiter_count(), 0);
    }

    #[test]
    fn test_complete_only_once() {
        let task = task();
        assert!(task.complete().is_some());
        assert!(task.complete().is_none());
    }

    #[test]
    fn test_cancel_drops_waiters() {
        let task = task();
        let counter = Arc::new(AtomicUsize::new(0));
        task.attach(counting(&counter)).ok();

        assert!(task.cancel());
        assert!(task.is_cancelled());
        assert_eq!(task.waiter_count(), 0);
        assert!(task.complete().is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_is_idempotent_and_noop_after_complete() {
        let cancelled = task();
        assert!(cancelled.cancel());
        assert!(!cancelled.cancel());

        let completed = task();
        completed.complete();
        assert!(!completed.cancel());
        assert_eq!(completed.phase(), TaskPhase::Completed);
    }

    #[test]
    fn test_attach_after_finish_is_rejected() {
        let task = task();
        task.complete();
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(task.attach(counting(&counter)).is_err());
    }

    #[tokio::test]
    async fn test_cancel_aborts_pipeline() {
        let task = task();
        let pipeline = tokio::spawn(std::future::pending::<()>());
        task.set_abort(pipeline.abort_handle());

        task.cancel();

        assert!(pipeline.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_set_abort_after_cancel_aborts_immediately() {
        let task = task();
        task.cancel();

        let pipeline = tokio::spawn(std::future::pending::<()>());
        task.set_abort(pipeline.abort_handle());

        assert!(pipeline.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_observes_completion() {
        let task = task();
        let waiter = {
            let task = task.clone();
            tokio::spawn(async move { task.wait().await })
        };

        tokio::task::yield_now().await;
        task.complete();

        assert_eq!(waiter.await.unwrap(), TaskPhase::Completed);
        assert!(task.same_as(&task.clone()));
        assert!(!task.same_as(&self::task()));
    }
}
