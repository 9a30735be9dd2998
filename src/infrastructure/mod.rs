//! Infrastructure layer with cache tiers and external service adapters.

/// Application configuration.
pub mod config;
/// Image caching (memory, disk, network, coordination).
pub mod image;

pub use config::{AppConfig, CacheConfig, CliArgs, LogLevel, StorageManager};
pub use image::{
    CacheCoordinator, CacheEvent, CacheStats, CoordinatorStats, DiskCacheState, DiskImageCache,
    Dispatch, FetchClient, FsBlobStore, HttpTransport, ImageLoadedEvent, ImageSlot,
    MemoryImageCache, select_cache_dir,
};
