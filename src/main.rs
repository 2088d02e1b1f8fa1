use std::path::Path;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use post_image_cache::domain::CacheKey;
use post_image_cache::infrastructure::{
    AppConfig, CliArgs, Command, DiskImageCache, ImageCache, StorageManager,
};

fn init_logging(config: &AppConfig) -> Result<()> {
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
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let mut config = if let Some(path) = &args.config {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        StorageManager::with_dir(dir).load_config(Some(path.as_path()))?
    } else {
        match StorageManager::new() {
            Ok(storage) => storage.load_config(None)?,
            Err(_) => AppConfig::default(),
        }
    };

    config.merge_with_args(args);
    Ok(config)
}

async fn run_get(cache: &ImageCache, urls: &[String], repeat: usize) -> Result<()> {
    let mut failures = 0usize;

    for url in urls {
        for _ in 0..repeat.max(1) {
            match cache.get_image(url).await {
                Ok(loaded) => {
                    let (width, height) = loaded.dimensions();
                    println!(
                        "{url}\t{}\t{width}x{height}\t{} bytes",
                        loaded.source, loaded.cost
                    );
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to load image");
                    println!("{url}\terror\t{e}");
                    failures += 1;
                }
            }
        }
    }

    info!(stats = %cache.memory_stats(), "Done");

    if failures > 0 {
        return Err(eyre!("{failures} request(s) failed"));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;

    info!(version = post_image_cache::VERSION, "Starting post-image-cache");

    match &args.command {
        Command::Get { urls, repeat } => {
            let cache = ImageCache::with_http_fetcher(&config.cache)?;
            info!(cache = ?cache, "Image cache ready");
            run_get(&cache, urls, *repeat).await?;
        }
        Command::Key { url } => {
            let disk = DiskImageCache::new(config.cache.effective_cache_dir());
            let key = CacheKey::new(url.as_str());
            println!("{}", key.disk_key());
            println!("{}", disk.path_for(&key).display());
        }
        Command::DecodeKey { key } => {
            let key = CacheKey::from_disk_key(key)
                .ok_or_else(|| eyre!("not a valid disk key: {key}"))?;
            println!("{}", key.url());
        }
    }

    Ok(())
}
