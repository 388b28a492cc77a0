use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use imgkit::application::RetryPolicy;
use imgkit::application::services::retry::DEFAULT_BASE_DELAY;
use imgkit::domain::{ImageFormat, ImageResponse, ImageSource, Priority, Request};
use imgkit::infrastructure::config::{Command, LoadArgs};
use imgkit::infrastructure::image::{Blur, Resize, RoundedCorners};
use imgkit::infrastructure::{CliArgs, ConfigStorage, DiskCache, ImageKitConfig, LoadManager};

fn init_logging(config: &ImageKitConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<ImageKitConfig> {
    let storage = ConfigStorage::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

#[derive(Serialize)]
struct LoadReport<'a> {
    url: &'a str,
    key: &'a str,
    source: ImageSource,
    width: u32,
    height: u32,
    format: Option<ImageFormat>,
}

fn build_request(args: &LoadArgs) -> Result<Request> {
    let mut request = Request::new(&args.url)?
        .with_cache_policy(args.policy)
        .with_priority(args.priority);

    if let Some((width, height)) = args.resize {
        request = request.with_transform(Resize::new(width, height, args.resize_mode));
    }
    if let Some(sigma) = args.blur {
        request = request.with_transform(Blur::new(sigma));
    }
    if let Some(radius) = args.rounded {
        request = request.with_transform(RoundedCorners::new(radius));
    }

    Ok(request)
}

fn report(args: &LoadArgs, response: &ImageResponse) -> Result<()> {
    if args.json {
        let report = LoadReport {
            url: &args.url,
            key: response.key.as_str(),
            source: response.source,
            width: response.width(),
            height: response.height(),
            format: response.format,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let format = response.format.map_or("unknown", ImageFormat::mime_type);
        println!(
            "{} {}x{} from {} ({format})",
            args.url,
            response.width(),
            response.height(),
            response.source,
        );
    }
    Ok(())
}

async fn run_load(config: &ImageKitConfig, args: LoadArgs) -> Result<()> {
    let request = build_request(&args)?;
    let manager = LoadManager::from_config(config).await?;

    let policy = if args.retries > 0 {
        RetryPolicy::exponential(args.retries, DEFAULT_BASE_DELAY)
    } else {
        RetryPolicy::none()
    };

    let result = {
        let manager = &manager;
        policy.run(move || manager.fetch(request.clone())).await
    };
    manager.shutdown().await;
    let response = result.wrap_err_with(|| format!("failed to load {}", args.url))?;

    if let Some(path) = &args.output {
        response
            .image
            .save_with_format(path, image::ImageFormat::Png)
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Wrote output");
    }

    report(&args, &response)
}

async fn run_prefetch(config: &ImageKitConfig, urls: Vec<String>, priority: Priority) -> Result<()> {
    let manager = LoadManager::from_config(config).await?;

    let requests = urls.iter().filter_map(|url| match Request::new(url) {
        Ok(request) => Some(request.with_priority(priority)),
        Err(e) => {
            warn!(error = %e, "Skipping prefetch");
            None
        }
    });
    let results = join_all(requests.map(|request| manager.fetch(request))).await;

    let loaded = results.iter().filter(|result| result.is_ok()).count();
    for error in results.iter().filter_map(|result| result.as_ref().err()) {
        warn!(error = %error, "Prefetch failed");
    }
    manager.shutdown().await;

    println!("prefetched {loaded}/{} images", urls.len());
    Ok(())
}

async fn open_disk_cache(config: &ImageKitConfig) -> Result<DiskCache> {
    let dir = config.disk_cache.resolved_directory();
    Ok(DiskCache::open(dir, config.disk_cache.max_size).await?)
}

async fn run_clear(config: &ImageKitConfig) -> Result<()> {
    let disk = open_disk_cache(config).await?;
    disk.clear().await;
    println!("cleared {}", disk.cache_dir().display());
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
async fn run_stats(config: &ImageKitConfig) -> Result<()> {
    let disk = open_disk_cache(config).await?;
    let usage = disk.usage().await;
    let percent = if disk.max_size() > 0 {
        usage.bytes as f64 / disk.max_size() as f64 * 100.0
    } else {
        0.0
    };
    println!(
        "{}: {} files, {} of {} bytes ({percent:.1}%)",
        disk.cache_dir().display(),
        usage.files,
        usage.bytes,
        disk.max_size(),
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = imgkit::VERSION, "Starting imgkit");

    match args.command {
        Command::Load(load) => run_load(&config, load).await,
        Command::Prefetch { urls, priority } => run_prefetch(&config, urls, priority).await,
        Command::Clear => run_clear(&config).await,
        Command::Stats => run_stats(&config).await,
    }
}
