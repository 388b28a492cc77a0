use super::app_config::LogLevel;
use crate::domain::entities::{CachePolicy, Priority};
use crate::infrastructure::image::ResizeMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[allow(missing_docs)]
#[command(
    name = "imgkit",
    version,
    about = "Image loader with request coalescing and memory/disk caching",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Disable the disk cache.
    #[arg(long, global = true)]
    pub no_disk_cache: bool,

    /// Disable the memory cache.
    #[arg(long, global = true)]
    pub no_memory_cache: bool,

    /// Maximum concurrent network fetches.
    #[arg(long, value_name = "N", global = true)]
    pub max_concurrent: Option<usize>,

    /// Default fetch timeout in seconds.
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
#[allow(missing_docs)]
pub enum Command {
    /// Load one image and report where it came from.
    Load(LoadArgs),

    /// Warm the caches for a list of URLs.
    Prefetch {
        /// URLs to fetch.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Network priority.
        #[arg(long, value_enum, default_value_t = Priority::Low)]
        priority: Priority,
    },

    /// Remove every entry from the disk cache.
    Clear,

    /// Show disk cache usage.
    Stats,
}

#[derive(Debug, clap::Args)]
#[allow(missing_docs)]
pub struct LoadArgs {
    /// Image URL.
    pub url: String,

    /// Resize to WIDTHxHEIGHT.
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    pub resize: Option<(u32, u32)>,

    /// How the resize maps onto the target box.
    #[arg(long, value_enum, default_value_t = ResizeMode::Fill)]
    pub resize_mode: ResizeMode,

    /// Gaussian blur sigma.
    #[arg(long, value_name = "SIGMA")]
    pub blur: Option<f32>,

    /// Corner radius in pixels.
    #[arg(long, value_name = "PX")]
    pub rounded: Option<u32>,

    /// Cache policy.
    #[arg(long, value_enum, default_value_t = CachePolicy::CacheThenLoad)]
    pub policy: CachePolicy,

    /// Network priority.
    #[arg(long, value_enum, default_value_t = Priority::Normal)]
    pub priority: Priority,

    /// Retry transient failures up to this many times.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub retries: u32,

    /// Write the resulting bitmap as PNG.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let width = w.trim().parse().map_err(|e| format!("invalid width: {e}"))?;
    let height = h.trim().parse().map_err(|e| format!("invalid height: {e}"))?;
    Ok((width, height))
}
