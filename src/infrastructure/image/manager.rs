//! Load orchestration: coalescing, tier lookup, fetch and processing.
//!
//! One pipeline runs per cache key. Callers asking for a key that is
//! already in flight attach to the existing [`Task`]. Lookups go memory,
//! then disk, then network; results are written back to both caches and
//! handed to a single delivery worker that runs callbacks in order.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{
    CacheKey, ImageResponse, ImageSource, Priority, Request, bitmap_cost,
};
use crate::domain::errors::{FetchError, LoadError};
use crate::domain::format::ImageFormat;
use crate::domain::ports::{Fetcher, Transform};
use crate::infrastructure::config::ImageKitConfig;

use super::disk_cache::{DiskCache, DiskCacheError};
use super::http_fetcher::HttpFetcher;
use super::memory_cache::MemoryCache;
use super::scheduler::{DEFAULT_MAX_CONCURRENT_NETWORK, NetworkScheduler};
use super::task::{Completion, LoadResult, Task};

/// Default fetch timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of concurrent decode/transform jobs.
pub const DEFAULT_MAX_CONCURRENT_PROCESSING: usize = 4;

/// Settings consumed by the load manager.
///
/// The enable flags and timeout are read on every call; pool sizes are
/// fixed when the manager is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Consult and populate the memory cache.
    pub memory_cache_enabled: bool,
    /// Consult and populate the disk cache.
    pub disk_cache_enabled: bool,
    /// Maximum concurrent network fetches.
    pub max_concurrent_network: usize,
    /// Maximum concurrent decode/transform jobs.
    pub max_concurrent_processing: usize,
    /// Timeout for requests that do not set one.
    pub default_timeout: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            memory_cache_enabled: true,
            disk_cache_enabled: true,
            max_concurrent_network: DEFAULT_MAX_CONCURRENT_NETWORK,
            max_concurrent_processing: DEFAULT_MAX_CONCURRENT_PROCESSING,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl From<&ImageKitConfig> for LoaderConfig {
    fn from(config: &ImageKitConfig) -> Self {
        Self {
            memory_cache_enabled: config.memory_cache.enabled,
            disk_cache_enabled: config.disk_cache.enabled,
            max_concurrent_network: config.network.max_concurrent,
            max_concurrent_processing: config.processing.max_concurrent,
            default_timeout: Duration::from_secs(config.network.timeout_secs),
        }
    }
}

/// Errors building a manager from configuration.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Disk cache could not be opened.
    #[error(transparent)]
    DiskCache(#[from] DiskCacheError),
    /// HTTP client could not be created.
    #[error("failed to create fetcher: {0}")]
    Fetcher(#[from] FetchError),
}

/// Coalescing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Calls to `load`.
    pub requests: u64,
    /// Calls that attached to an in-flight task.
    pub coalesced: u64,
    /// Pipelines started.
    pub started: u64,
}

struct Delivery {
    waiters: Vec<Completion>,
    result: LoadResult,
}

struct Inner {
    config: RwLock<LoaderConfig>,
    memory: Arc<MemoryCache>,
    disk: Option<Arc<DiskCache>>,
    fetcher: Arc<dyn Fetcher>,
    scheduler: NetworkScheduler,
    processing: Arc<Semaphore>,
    active: Mutex<HashMap<CacheKey, Task>>,
    deliveries: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    runtime: Handle,
    requests: AtomicU64,
    coalesced: AtomicU64,
    started: AtomicU64,
}

/// Coordinates image loads across the memory cache, disk cache and network.
pub struct LoadManager {
    inner: Arc<Inner>,
    delivery_worker: JoinHandle<()>,
}

impl std::fmt::Debug for LoadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadManager")
            .field("config", &*self.inner.config.read())
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl LoadManager {
    /// Creates a manager over the given caches and fetcher.
    ///
    /// Must be called within a Tokio runtime; `load` may afterwards be
    /// called from any thread.
    #[must_use]
    pub fn new(
        config: LoaderConfig,
        memory: Arc<MemoryCache>,
        disk: Option<Arc<DiskCache>>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let delivery_worker = tokio::spawn(run_delivery(rx));

        let inner = Inner {
            scheduler: NetworkScheduler::new(config.max_concurrent_network),
            processing: Arc::new(Semaphore::new(config.max_concurrent_processing.max(1))),
            config: RwLock::new(config),
            memory,
            disk,
            fetcher,
            active: Mutex::new(HashMap::new()),
            deliveries: Mutex::new(Some(tx)),
            runtime: Handle::current(),
            requests: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            started: AtomicU64::new(0),
        };

        Self {
            inner: Arc::new(inner),
            delivery_worker,
        }
    }

    /// Builds a manager with an HTTP fetcher and caches sized from `config`.
    ///
    /// # Errors
    /// Returns error if the disk cache directory or HTTP client cannot be created.
    pub async fn from_config(config: &ImageKitConfig) -> Result<Self, BuildError> {
        let memory = Arc::new(MemoryCache::new(
            config.memory_cache.max_items,
            config.memory_cache.max_cost,
        ));

        let disk = if config.disk_cache.enabled {
            let dir = config.disk_cache.resolved_directory();
            Some(Arc::new(
                DiskCache::open(dir, config.disk_cache.max_size).await?,
            ))
        } else {
            None
        };

        let fetcher = Arc::new(HttpFetcher::new(&config.network.user_agent)?);

        info!(
            memory_items = config.memory_cache.max_items,
            memory_cost = config.memory_cache.max_cost,
            disk = disk.is_some(),
            "Load manager ready"
        );

        Ok(Self::new(LoaderConfig::from(config), memory, disk, fetcher))
    }

    /// Starts (or joins) the load for `request`.
    ///
    /// `callback` runs exactly once on the delivery worker unless the
    /// returned task is cancelled first.
    pub fn load<F>(&self, request: Request, callback: F) -> Task
    where
        F: FnOnce(LoadResult) + Send + 'static,
    {
        self.load_boxed(request, Box::new(callback))
    }

    fn load_boxed(&self, request: Request, mut completion: Completion) -> Task {
        let inner = &self.inner;
        let config = inner.config.read().clone();
        let key = request.cache_key();
        inner.requests.fetch_add(1, Ordering::Relaxed);

        let mut active = inner.active.lock();

        if let Some(task) = active.get(&key) {
            match task.attach(completion) {
                Ok(()) => {
                    inner.coalesced.fetch_add(1, Ordering::Relaxed);
                    trace!(key = %key, waiters = task.waiter_count(), "Joined in-flight load");
                    return task.clone();
                }
                Err(returned) => completion = returned,
            }
        }

        let task = Task::new(key.clone(), request);
        let _ = task.attach(completion);

        if config.memory_cache_enabled
            && let Some(image) = inner.memory.get(&key)
        {
            drop(active);
            trace!(key = %key, source = %ImageSource::MemoryCache, "Loaded image");
            inner.finish(&task, Ok(ImageResponse::new(key, image, ImageSource::MemoryCache)));
            return task;
        }

        active.insert(key.clone(), task.clone());
        drop(active);
        inner.started.fetch_add(1, Ordering::Relaxed);
        debug!(
            task = %task.id(),
            key = %key,
            priority = ?task.request().priority(),
            "Starting load pipeline"
        );

        let pipeline = {
            let runtime = inner.runtime.clone();
            let inner = Arc::clone(inner);
            let task = task.clone();
            runtime.spawn(async move {
                let result = inner.run_pipeline(&task, &config).await;
                inner.finish(&task, result);
            })
        };
        task.set_abort(pipeline.abort_handle());

        task
    }

    /// Loads `request` and waits for the result.
    ///
    /// # Errors
    /// Returns the load failure, or `LoadError::Cancelled` if the task is
    /// cancelled before completing.
    pub async fn fetch(&self, request: Request) -> LoadResult {
        let (tx, rx) = oneshot::channel();
        let _task = self.load(request, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(LoadError::Cancelled))
    }

    /// Warms the caches for `urls` without delivering results.
    ///
    /// Invalid URLs are skipped.
    pub fn prefetch<I, S>(&self, urls: I, priority: Priority) -> Vec<Task>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        urls.into_iter()
            .filter_map(|url| match Request::new(url.as_ref()) {
                Ok(request) => Some(self.load(request.with_priority(priority), |_| {})),
                Err(e) => {
                    warn!(error = %e, "Skipping prefetch");
                    None
                }
            })
            .collect()
    }

    /// Cancels `task`. No callback attached to it will run.
    ///
    /// Idempotent and a no-op once the task has completed. The fetch for
    /// its URL is cancelled when no other active task needs it.
    pub fn cancel(&self, task: &Task) {
        let url = task.request().url();
        let url_unused = {
            let mut active = self.inner.active.lock();
            if !task.cancel() {
                return;
            }
            if active.get(task.key()).is_some_and(|t| t.same_as(task)) {
                active.remove(task.key());
            }
            !active.values().any(|t| t.request().url() == url)
        };

        debug!(task = %task.id(), key = %task.key(), "Cancelled load");
        if url_unused {
            self.inner.fetcher.cancel(url);
        }
    }

    /// Cancels every active task.
    pub fn cancel_all(&self) {
        let tasks: Vec<Task> = {
            let mut active = self.inner.active.lock();
            active.drain().map(|(_, task)| task).collect()
        };
        for task in &tasks {
            task.cancel();
        }
        self.inner.fetcher.cancel_all();
        if !tasks.is_empty() {
            debug!(count = tasks.len(), "Cancelled all loads");
        }
    }

    /// Low-memory hook: drops every bitmap held in memory.
    pub fn handle_memory_warning(&self) {
        info!(
            items = self.inner.memory.len(),
            cost = self.inner.memory.total_cost(),
            "Memory warning, clearing memory cache"
        );
        self.inner.memory.clear();
    }

    /// Clears the memory and disk caches.
    pub async fn clear_caches(&self) {
        self.inner.memory.clear();
        if let Some(disk) = &self.inner.disk {
            disk.clear().await;
        }
        info!("Cleared image caches");
    }

    /// Number of in-flight tasks.
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Returns true if a pipeline for `key` is in flight.
    pub fn is_loading(&self, key: &CacheKey) -> bool {
        self.inner.active.lock().contains_key(key)
    }

    /// Coalescing counters.
    pub fn stats(&self) -> LoadStats {
        LoadStats {
            requests: self.inner.requests.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            started: self.inner.started.load(Ordering::Relaxed),
        }
    }

    /// Current settings.
    pub fn config(&self) -> LoaderConfig {
        self.inner.config.read().clone()
    }

    /// Replaces the enable flags and default timeout for subsequent loads.
    pub fn set_config(&self, config: LoaderConfig) {
        *self.inner.config.write() = config;
    }

    /// Memory tier.
    pub fn memory_cache(&self) -> &Arc<MemoryCache> {
        &self.inner.memory
    }

    /// Disk tier, if one is attached.
    pub fn disk_cache(&self) -> Option<&Arc<DiskCache>> {
        self.inner.disk.as_ref()
    }

    /// Cancels everything, waits for queued deliveries and pending disk writes.
    pub async fn shutdown(self) {
        self.cancel_all();
        self.inner.scheduler.shutdown();
        self.inner.deliveries.lock().take();
        if let Err(e) = self.delivery_worker.await {
            warn!(error = %e, "Delivery worker ended abnormally");
        }
        if let Some(disk) = &self.inner.disk {
            disk.flush().await;
        }
        info!("Load manager shut down");
    }
}

impl Inner {
    async fn run_pipeline(&self, task: &Task, config: &LoaderConfig) -> LoadResult {
        let request = task.request();
        let key = task.key();
        let policy = request.cache_policy();

        if config.disk_cache_enabled
            && policy.reads_disk()
            && let Some(disk) = &self.disk
            && let Some(bytes) = disk.get(key).await
        {
            let format = ImageFormat::detect(&bytes);
            match self.decode_and_transform(bytes, request.transforms()).await {
                Ok(image) => {
                    let image = Arc::new(image);
                    if config.memory_cache_enabled {
                        self.memory.set(key.clone(), Arc::clone(&image), bitmap_cost(&image));
                    }
                    debug!(key = %key, source = %ImageSource::DiskCache, "Loaded image");
                    return Ok(ImageResponse::new(key.clone(), image, ImageSource::DiskCache)
                        .with_format(format));
                }
                Err(LoadError::InvalidImageData) => {
                    warn!(key = %key, "Corrupt disk cache entry, removing");
                    disk.remove(key.clone());
                }
                Err(e) => return Err(e),
            }
        }

        if !policy.allows_network() {
            debug!(key = %key, "Cache-only request missed");
            return Err(LoadError::NoData);
        }

        let timeout = request.timeout().unwrap_or(config.default_timeout);
        let bytes = {
            let _permit = self
                .scheduler
                .acquire(request.priority())
                .await
                .ok_or(LoadError::Cancelled)?;
            trace!(key = %key, url = request.url(), "Fetching");
            self.fetcher.fetch(request.url(), timeout).await?
        };

        let format = ImageFormat::detect(&bytes);
        let image = Arc::new(
            self.decode_and_transform(bytes.clone(), request.transforms())
                .await?,
        );

        if config.memory_cache_enabled {
            self.memory.set(key.clone(), Arc::clone(&image), bitmap_cost(&image));
        }
        if config.disk_cache_enabled
            && let Some(disk) = &self.disk
        {
            disk.set(key.clone(), bytes);
        }

        debug!(key = %key, source = %ImageSource::Network, "Loaded image");
        Ok(ImageResponse::new(key.clone(), image, ImageSource::Network).with_format(format))
    }

    async fn decode_and_transform(
        &self,
        bytes: Bytes,
        transforms: &[Arc<dyn Transform>],
    ) -> Result<image::DynamicImage, LoadError> {
        let permit = Arc::clone(&self.processing)
            .acquire_owned()
            .await
            .map_err(|_| LoadError::Cancelled)?;
        let transforms = transforms.to_vec();

        // Held by the blocking job, which outlives an aborted pipeline.
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            apply_pipeline(&bytes, &transforms)
        })
        .await
        .map_err(|e| LoadError::processing(e.to_string(), 0))?
    }

    /// Unregisters `task` and queues its waiters for delivery.
    fn finish(&self, task: &Task, result: LoadResult) {
        let waiters = {
            let mut active = self.active.lock();
            if active.get(task.key()).is_some_and(|t| t.same_as(task)) {
                active.remove(task.key());
            }
            task.complete()
        };

        let Some(waiters) = waiters else {
            trace!(key = %task.key(), "Dropping result of cancelled load");
            return;
        };

        if let Err(e) = &result {
            debug!(key = %task.key(), error = %e, "Load failed");
        }

        let sent = self
            .deliveries
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(Delivery { waiters, result }).is_ok());
        if !sent {
            warn!(key = %task.key(), "Delivery worker stopped, result dropped");
        }
    }
}

/// Decodes `bytes` and applies `transforms` in order.
fn apply_pipeline(
    bytes: &[u8],
    transforms: &[Arc<dyn Transform>],
) -> Result<image::DynamicImage, LoadError> {
    let mut image = image::load_from_memory(bytes).map_err(|_| LoadError::InvalidImageData)?;
    for (index, transform) in transforms.iter().enumerate() {
        image = transform
            .process(image)
            .map_err(|e| LoadError::from((e, index + 1)))?;
    }
    Ok(image)
}

async fn run_delivery(mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(Delivery { waiters, result }) = rx.recv().await {
        for waiter in waiters {
            waiter(result.clone());
        }
    }
    trace!("Delivery worker stopped");
}
