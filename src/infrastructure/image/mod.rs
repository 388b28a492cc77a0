//! Image loading infrastructure.
//!
//! This module provides:
//! - Memory caching of decoded bitmaps with cost-bounded LRU eviction
//! - Disk caching of encoded bytes with size-bounded eviction
//! - An HTTP fetcher with per-URL cancellation
//! - Built-in transforms
//! - The coalescing load manager

pub mod disk_cache;
pub mod http_fetcher;
pub mod manager;
pub mod memory_cache;
pub mod scheduler;
pub mod task;
pub mod transforms;

pub use disk_cache::{DiskCache, DiskCacheError, DiskUsage, EvictionResult};
pub use http_fetcher::HttpFetcher;
pub use manager::{BuildError, LoadManager, LoadStats, LoaderConfig};
pub use memory_cache::{CacheStats, MemoryCache};
pub use scheduler::NetworkScheduler;
pub use task::{LoadResult, Task, TaskId, TaskPhase};
pub use transforms::{Blur, Corners, Resize, ResizeMode, RoundedCorners};
