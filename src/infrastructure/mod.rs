//! Infrastructure layer with caches, fetchers and configuration.

/// Application configuration.
pub mod config;
/// Image loading, caching and processing.
pub mod image;

pub use config::{CliArgs, ConfigStorage, ImageKitConfig, LogLevel};
pub use image::{
    CacheStats, DiskCache, HttpFetcher, LoadManager, LoaderConfig, MemoryCache, Task,
};
