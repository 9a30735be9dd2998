//! Image cache infrastructure.
//!
//! This module provides:
//! - Memory caching with cost-based LRU eviction
//! - Disk caching on a bounded, transactional blob store
//! - Network fetching and decoding
//! - The coordinator tying the tiers together

pub mod blob_store;
pub mod codec;
pub mod coordinator;
pub mod disk_cache;
pub mod events;
pub mod fetch_client;
pub mod http_transport;
pub mod location;
pub mod memory_cache;
pub mod request;
pub mod targets;

pub use blob_store::FsBlobStore;
pub use codec::DefaultCodec;
pub use coordinator::{CacheCoordinator, CoordinatorStats, DEFAULT_MAX_CONCURRENT_FETCHES};
pub use disk_cache::{DiskCacheState, DiskImageCache};
pub use events::{CacheEvent, Diagnostics};
pub use fetch_client::{FetchClient, FetchOutcome};
pub use http_transport::HttpTransport;
pub use location::{DEFAULT_CACHE_NAME, select_cache_dir};
pub use memory_cache::{CacheStats, MemoryImageCache};
pub use request::{Dispatch, ImageRequest, RequestBuilder};
pub use targets::{ChannelTarget, Delivery, ImageLoadedEvent, ImageSlot, SlotContent};
