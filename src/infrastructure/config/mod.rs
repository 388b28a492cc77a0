//! Application configuration.

/// Configuration model and defaults.
pub mod app_config;
/// Command-line arguments.
pub mod args;
/// Configuration file persistence.
pub mod storage;

pub use app_config::{
    DiskCacheConfig, ImageKitConfig, LogLevel, MemoryCacheConfig, NetworkConfig, ProcessingConfig,
};
pub use args::{CliArgs, Command, LoadArgs};
pub use storage::{ConfigError, ConfigStorage};
