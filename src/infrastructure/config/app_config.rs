//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::infrastructure::image::disk_cache::{DEFAULT_MAX_CACHE_SIZE, default_cache_dir};
use crate::infrastructure::image::http_fetcher::DEFAULT_USER_AGENT;
use crate::infrastructure::image::manager::{DEFAULT_MAX_CONCURRENT_PROCESSING, DEFAULT_TIMEOUT};
use crate::infrastructure::image::memory_cache::{DEFAULT_MAX_COST, DEFAULT_MAX_ITEMS};
use crate::infrastructure::image::scheduler::DEFAULT_MAX_CONCURRENT_NETWORK;

pub(crate) const APP_NAME: &str = "imgkit";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Top-level configuration, read from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageKitConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path. Logs go to stderr when unset.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// In-memory bitmap cache.
    #[serde(default)]
    pub memory_cache: MemoryCacheConfig,

    /// On-disk byte cache.
    #[serde(default)]
    pub disk_cache: DiskCacheConfig,

    /// Network fetching.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Decode and transform pool.
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Memory cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    /// Consult and populate the memory cache.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached bitmaps.
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Cost ceiling in bytes of decoded pixels.
    #[serde(default = "default_max_cost")]
    pub max_cost: u64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_items: DEFAULT_MAX_ITEMS,
            max_cost: DEFAULT_MAX_COST,
        }
    }
}

/// Disk cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskCacheConfig {
    /// Consult and populate the disk cache.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Size ceiling in bytes.
    #[serde(default = "default_max_size")]
    pub max_size: u64,

    /// Cache directory; the platform cache dir when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl DiskCacheConfig {
    /// Configured directory or the platform default.
    #[must_use]
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(default_cache_dir)
    }
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: DEFAULT_MAX_CACHE_SIZE,
            directory: None,
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Maximum concurrent fetches.
    #[serde(default = "default_max_concurrent_network")]
    pub max_concurrent: usize,

    /// Default fetch timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// `User-Agent` header value.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_NETWORK,
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// Processing pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum concurrent decode/transform jobs.
    #[serde(default = "default_max_concurrent_processing")]
    pub max_concurrent: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_PROCESSING,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}

fn default_max_cost() -> u64 {
    DEFAULT_MAX_COST
}

fn default_max_size() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

fn default_max_concurrent_network() -> usize {
    DEFAULT_MAX_CONCURRENT_NETWORK
}

fn default_max_concurrent_processing() -> usize {
    DEFAULT_MAX_CONCURRENT_PROCESSING
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

use super::args::CliArgs;

impl ImageKitConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.disk_cache.directory = Some(cache_dir.clone());
        }
        if args.no_disk_cache {
            self.disk_cache.enabled = false;
        }
        if args.no_memory_cache {
            self.memory_cache.enabled = false;
        }
        if let Some(max_concurrent) = args.max_concurrent {
            self.network.max_concurrent = max_concurrent;
        }
        if let Some(timeout) = args.timeout {
            self.network.timeout_secs = timeout;
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Returns effective config path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
            log_level = "debug"

            [memory_cache]
            max_items = 10

            [disk_cache]
            enabled = false
            directory = "/tmp/imgkit-test"

            [network]
            timeout_secs = 5
        "#;

        let config: ImageKitConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.memory_cache.max_items, 10);
        assert_eq!(config.memory_cache.max_cost, DEFAULT_MAX_COST);
        assert!(config.memory_cache.enabled);
        assert!(!config.disk_cache.enabled);
        assert_eq!(
            config.disk_cache.resolved_directory(),
            PathBuf::from("/tmp/imgkit-test")
        );
        assert_eq!(config.network.timeout_secs, 5);
        assert_eq!(config.network.max_concurrent, DEFAULT_MAX_CONCURRENT_NETWORK);
        assert_eq!(config.processing.max_concurrent, DEFAULT_MAX_CONCURRENT_PROCESSING);
    }

    #[test]
    fn test_default_config() {
        let config = ImageKitConfig::default();

        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.memory_cache.enabled);
        assert_eq!(config.memory_cache.max_items, 100);
        assert_eq!(config.memory_cache.max_cost, 150 * 1024 * 1024);
        assert_eq!(config.disk_cache.max_size, 200 * 1024 * 1024);
        assert_eq!(config.network.timeout_secs, 30);
        assert!(config.network.user_agent.starts_with("imgkit/"));
    }

    #[test]
    fn test_merge_with_args() {
        let args = CliArgs::parse_from([
            "imgkit",
            "--log-level",
            "trace",
            "--cache-dir",
            "/var/cache/imgs",
            "--no-disk-cache",
            "--max-concurrent",
            "2",
            "--timeout",
            "9",
            "clear",
        ]);
        let mut config = ImageKitConfig::default();
        config.merge_with_args(&args);

        assert_eq!(config.log_level, LogLevel::Trace);
        assert_eq!(config.disk_cache.directory, Some(PathBuf::from("/var/cache/imgs")));
        assert!(!config.disk_cache.enabled);
        assert!(config.memory_cache.enabled);
        assert_eq!(config.network.max_concurrent, 2);
        assert_eq!(config.network.timeout_secs, 9);
    }

    #[test]
    fn test_serialized_defaults_round_trip() {
        let text = toml::to_string_pretty(&ImageKitConfig::default()).unwrap();
        let parsed: ImageKitConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(parsed.disk_cache.directory, None);
    }
}
