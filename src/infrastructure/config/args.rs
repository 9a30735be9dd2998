use super::app_config::LogLevel;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "tiered-image-cache",
    version,
    about = "Load remote images through a memory and disk cache",
    long_about = None
)]
pub struct CliArgs {
    /// Image URLs to load.
    #[arg(value_name = "URL", required_unless_present = "clear")]
    pub urls: Vec<String>,

    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH", env = "TIERED_IMAGE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Disk cache budget in bytes.
    #[arg(long, value_name = "BYTES")]
    pub disk_cache_bytes: Option<u64>,

    /// Memory cache capacity in KB.
    #[arg(long, value_name = "KB")]
    pub memory_cache_kb: Option<usize>,

    /// Maximum concurrent network fetches.
    #[arg(long, value_name = "N")]
    pub max_concurrent_fetches: Option<usize>,

    /// Clear both cache tiers before loading.
    #[arg(long)]
    pub clear: bool,
}
