use std::collections::HashSet;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use futures_util::future::join_all;
use image::DynamicImage;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tiered_image_cache::domain::SharedImage;
use tiered_image_cache::infrastructure::image::{ChannelTarget, Delivery, Dispatch};
use tiered_image_cache::infrastructure::{
    AppConfig, CacheCoordinator, CacheEvent, CliArgs, ImageLoadedEvent, StorageManager,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level.to_tracing_level()).into())
        .from_env_lossy();

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), level = %config.log_level, "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let mut config = StorageManager::new(args.config.as_deref())?.load_config()?;
    config.merge_with_args(args);
    config.cache.validate()?;
    Ok(config)
}

/// Loads every URL once and prints where each delivery came from.
///
/// Targets are named by position so repeated URLs report separately.
async fn run_pass(coordinator: &CacheCoordinator, urls: &[String], pass: usize) {
    let placeholder: SharedImage = Arc::new(DynamicImage::new_rgba8(1, 1));
    let (tx, mut rx) = mpsc::unbounded_channel::<ImageLoadedEvent>();

    let dispatches = join_all(urls.iter().enumerate().map(|(index, url)| {
        let target = Arc::new(ChannelTarget::new(index.to_string(), tx.clone()));
        coordinator
            .load(url.clone())
            .placeholder(Arc::clone(&placeholder))
            .into_target(target)
    }))
    .await;
    drop(tx);
    join_all(dispatches.into_iter().map(Dispatch::finished)).await;

    let mut delivered = HashSet::new();
    while let Some(event) = rx.recv().await {
        let Some((index, url)) = event
            .target
            .parse::<usize>()
            .ok()
            .and_then(|index| urls.get(index).map(|url| (index, url)))
        else {
            continue;
        };
        match event.delivery {
            Delivery::Placeholder(_) => println!("[pass {pass}] #{index} {url} <- placeholder"),
            Delivery::Image(loaded) => {
                let (width, height) = loaded.dimensions();
                println!(
                    "[pass {pass}] #{index} {url} <- {} ({width}x{height})",
                    loaded.source
                );
                delivered.insert(index);
            }
        }
    }
    for (index, url) in urls.iter().enumerate() {
        if !delivered.contains(&index) {
            println!("[pass {pass}] #{index} {url} <- no image");
        }
    }
}

fn report_failures(events: &mut mpsc::UnboundedReceiver<CacheEvent>) {
    while let Ok(event) = events.try_recv() {
        if let Some(cause) = event.cause() {
            match event.key() {
                Some(key) => eprintln!("{key}: {cause}"),
                None => eprintln!("{cause}"),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = tiered_image_cache::VERSION, "Starting {}", tiered_image_cache::NAME);

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let coordinator = CacheCoordinator::from_config(&config.cache)?.with_diagnostics(events_tx);

    if args.clear {
        coordinator.clear_all().await;
        println!("Cleared image caches");
    }

    for pass in 1..=2 {
        run_pass(&coordinator, &args.urls, pass).await;
    }

    report_failures(&mut events);
    println!("{}", coordinator.stats());

    Ok(())
}
