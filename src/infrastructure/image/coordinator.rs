//! Request orchestration across the cache tiers.
//!
//! Implements a three-tier lookup: Memory -> Disk -> Network

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{CacheKey, ImageSource, LoadedImage, SharedImage};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::DISK_ENCODE_QUALITY;
use crate::infrastructure::config::CacheConfig;

use super::codec::DefaultCodec;
use super::disk_cache::{DiskCacheState, DiskImageCache};
use super::events::{CacheEvent, Diagnostics};
use super::fetch_client::{FetchClient, FetchOutcome};
use super::http_transport::HttpTransport;
use super::memory_cache::{CacheStats, MemoryImageCache};
use super::request::{Dispatch, ImageRequest, RequestBuilder};

/// Default maximum concurrent network fetches.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;

/// Owns both cache tiers and serves image requests.
///
/// Build one per cache namespace at startup and share it behind an `Arc`.
/// Concurrent requests for the same uncached URL are not merged: each one
/// runs its own fetch.
pub struct CacheCoordinator {
    memory: Arc<MemoryImageCache>,
    disk: Arc<DiskImageCache>,
    fetcher: FetchClient,
    fetch_permits: Arc<Semaphore>,
    diagnostics: Diagnostics,
    reported_disk_unavailable: AtomicBool,
}

impl std::fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("memory", &self.memory)
            .field("disk", &self.disk)
            .finish_non_exhaustive()
    }
}

impl CacheCoordinator {
    /// Creates a coordinator over existing tiers.
    ///
    /// A disk tier whose open was never started is settled as disabled, so
    /// loads skip it instead of waiting forever.
    #[must_use]
    pub fn new(
        memory: Arc<MemoryImageCache>,
        disk: Arc<DiskImageCache>,
        fetcher: FetchClient,
        max_concurrent_fetches: usize,
    ) -> Self {
        if disk.disable(CacheError::io("disk cache was never opened")) {
            debug!("Disk tier handed over unopened, running without it");
        }
        Self {
            memory,
            disk,
            fetcher,
            fetch_permits: Arc::new(Semaphore::new(max_concurrent_fetches.max(1))),
            diagnostics: Diagnostics::disabled(),
            reported_disk_unavailable: AtomicBool::new(false),
        }
    }

    /// Creates a coordinator with an HTTP transport, the default codec and
    /// a file-backed disk tier, as described by `config`.
    ///
    /// The disk tier starts opening immediately on a background task, so
    /// this must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        let transport = HttpTransport::new(Duration::from_secs(config.timeout_secs))?;
        let fetcher = FetchClient::new(Arc::new(transport), Arc::new(DefaultCodec));
        let memory = Arc::new(MemoryImageCache::new(config.memory_capacity_kb()));

        let cache_dir = config.effective_cache_dir();
        debug!(dir = %cache_dir.display(), "Opening disk cache");
        let disk = DiskImageCache::spawn_open(
            cache_dir,
            config.disk_format_version,
            config.disk_cache_bytes,
        );

        Ok(Self::new(memory, disk, fetcher, config.max_concurrent_fetches))
    }

    /// Sends diagnostic events to `tx`.
    #[must_use]
    pub fn with_diagnostics(mut self, tx: mpsc::UnboundedSender<CacheEvent>) -> Self {
        self.diagnostics = Diagnostics::new(tx);
        self
    }

    /// Starts a request for `url`.
    pub fn load(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request().source(url)
    }

    /// Starts a request with no source set.
    pub fn request(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(self)
    }

    /// Serves `request`: memory, then disk, then a background fetch.
    ///
    /// Hits are delivered before this returns. On a full miss the
    /// placeholder (if any) is delivered and the fetch is spawned. A fetched
    /// image reaches the target only after both tiers hold it; the returned
    /// [`Dispatch::Fetching`] handle tracks the whole job.
    pub async fn submit(&self, request: ImageRequest) -> Dispatch {
        let key = CacheKey::from_url(request.url());
        let target = request.target();

        if let Some(image) = self.memory.get(&key) {
            trace!(key = %key, target_name = %target.name(), "Serving from memory cache");
            self.diagnostics.emit(CacheEvent::MemoryHit { key: key.clone() });
            target.set_image(LoadedImage::new(key, image, ImageSource::MemoryCache));
            return Dispatch::Memory;
        }

        if let Some(image) = self.load_from_disk(&key).await {
            trace!(key = %key, target_name = %target.name(), "Serving from disk cache");
            self.memory.put(key.clone(), image.clone());
            self.diagnostics.emit(CacheEvent::DiskHit { key: key.clone() });
            target.set_image(LoadedImage::new(key, image, ImageSource::DiskCache));
            return Dispatch::Disk;
        }

        if let Some(placeholder) = request.placeholder() {
            target.set_placeholder(placeholder.clone());
        }

        let job = FetchJob {
            memory: Arc::clone(&self.memory),
            disk: Arc::clone(&self.disk),
            fetcher: self.fetcher.clone(),
            permits: Arc::clone(&self.fetch_permits),
            diagnostics: self.diagnostics.clone(),
            key,
            request,
        };
        Dispatch::Fetching(tokio::spawn(job.run()))
    }

    async fn load_from_disk(&self, key: &CacheKey) -> Option<SharedImage> {
        self.disk.await_ready().await;
        self.report_disk_unavailable();

        let bytes = match self.disk.try_get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(cause) => {
                warn!(key = %key, error = %cause, "Failed to read from disk cache");
                self.diagnostics.emit(CacheEvent::DiskReadFailed {
                    key: key.clone(),
                    cause,
                });
                return None;
            }
        };

        let codec = Arc::clone(self.fetcher.codec());
        let decoded = tokio::task::spawn_blocking(move || codec.decode(&bytes))
            .await
            .map_err(|e| CacheError::decode(format!("Decode task panicked: {e}")))
            .and_then(|result| result);

        match decoded {
            Ok(image) => {
                debug!(key = %key, "Decoded image from disk cache");
                Some(Arc::new(image))
            }
            Err(cause) => {
                warn!(key = %key, error = %cause, "Failed to decode cached image");
                self.diagnostics.emit(CacheEvent::DiskReadFailed {
                    key: key.clone(),
                    cause,
                });
                None
            }
        }
    }

    fn report_disk_unavailable(&self) {
        let Some(cause) = self.disk.open_error() else {
            return;
        };
        if !self.reported_disk_unavailable.swap(true, Ordering::Relaxed) {
            self.diagnostics.emit(CacheEvent::DiskUnavailable {
                cause: cause.clone(),
            });
        }
    }

    /// Returns the memory tier.
    #[must_use]
    pub fn memory_cache(&self) -> &Arc<MemoryImageCache> {
        &self.memory
    }

    /// Returns the disk tier.
    #[must_use]
    pub fn disk_cache(&self) -> &Arc<DiskImageCache> {
        &self.disk
    }

    /// Returns statistics for both tiers.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            memory: self.memory.stats(),
            disk_state: self.disk.state(),
            disk_entries: self.disk.len(),
            disk_size: self.disk.current_size(),
            disk_max_size: self.disk.max_size(),
        }
    }

    /// Clears all caches.
    pub async fn clear_all(&self) {
        self.memory.clear();
        if let Err(e) = self.disk.clear().await {
            warn!(error = %e, "Failed to clear disk cache");
        }
        info!("Cleared all image caches");
    }
}

/// Statistics for both tiers.
#[derive(Debug, Clone)]
pub struct CoordinatorStats {
    /// Memory tier statistics.
    pub memory: CacheStats,
    /// Disk tier lifecycle state.
    pub disk_state: DiskCacheState,
    /// Number of disk entries.
    pub disk_entries: usize,
    /// Bytes stored on disk.
    pub disk_size: u64,
    /// Disk byte budget.
    pub disk_max_size: u64,
}

impl std::fmt::Display for CoordinatorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}; Disk ({}): {} entries, {}/{} bytes",
            self.memory, self.disk_state, self.disk_entries, self.disk_size, self.disk_max_size
        )
    }
}

/// Everything a background fetch needs, detached from the coordinator.
struct FetchJob {
    memory: Arc<MemoryImageCache>,
    disk: Arc<DiskImageCache>,
    fetcher: FetchClient,
    permits: Arc<Semaphore>,
    diagnostics: Diagnostics,
    key: CacheKey,
    request: ImageRequest,
}

impl FetchJob {
    async fn run(self) -> bool {
        let permit = Arc::clone(&self.permits).acquire_owned().await;
        let outcome = self.fetcher.fetch(self.request.url()).await;
        drop(permit);

        let image = match outcome {
            FetchOutcome::Success(image) => image,
            FetchOutcome::Failure(cause) => {
                warn!(key = %self.key, url = %self.request.url(), error = %cause, "Failed to load image");
                self.diagnostics.emit(CacheEvent::FetchFailed {
                    key: self.key,
                    cause,
                });
                return false;
            }
        };

        self.memory.put(self.key.clone(), image.clone());
        self.write_back(image.clone()).await;

        debug!(key = %self.key, source = "network", "Image loaded successfully");
        self.request.target().set_image(LoadedImage::new(
            self.key.clone(),
            image,
            ImageSource::Network,
        ));
        self.diagnostics.emit(CacheEvent::Fetched { key: self.key });
        true
    }

    /// Encodes `image` and stores it on disk. Failures are reported, never
    /// returned.
    async fn write_back(&self, image: SharedImage) {
        let codec = Arc::clone(self.fetcher.codec());
        let encoded =
            tokio::task::spawn_blocking(move || codec.encode(&image, DISK_ENCODE_QUALITY))
                .await
                .map_err(|e| CacheError::disk_write(format!("Encode task panicked: {e}")))
                .and_then(|result| result);

        let result = match encoded {
            Ok(bytes) => self.disk.try_put(&self.key, &bytes).await.map(|_| ()),
            Err(e) => Err(e),
        };

        if let Err(cause) = result {
            warn!(key = %self.key, error = %cause, "Failed to cache to disk");
            self.diagnostics.emit(CacheEvent::DiskWriteFailed {
                key: self.key.clone(),
                cause,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::{MockBlobStore, MockTransport};
    use crate::domain::ports::{BlobStore, ImageCodec, ImageTarget, Transport};
    use crate::infrastructure::image::targets::ImageSlot;
    use image::DynamicImage;
    use tokio::sync::oneshot;

    const URL: &str = "https://x/a.png";

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        DefaultCodec
            .encode(&DynamicImage::new_rgb8(width, height), DISK_ENCODE_QUALITY)
            .unwrap()
    }

    fn ready_disk(store: MockBlobStore) -> Arc<DiskImageCache> {
        DiskImageCache::open_with(async move {
            Ok::<_, CacheError>(Arc::new(store) as Arc<dyn BlobStore>)
        })
    }

    struct Harness {
        coordinator: CacheCoordinator,
        transport: Arc<MockTransport>,
        events: mpsc::UnboundedReceiver<CacheEvent>,
    }

    fn harness_with_disk(transport: MockTransport, disk: Arc<DiskImageCache>) -> Harness {
        let transport = Arc::new(transport);
        let fetcher = FetchClient::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(DefaultCodec),
        );
        let (tx, events) = mpsc::unbounded_channel();
        let coordinator = CacheCoordinator::new(
            Arc::new(MemoryImageCache::new(1024)),
            disk,
            fetcher,
            DEFAULT_MAX_CONCURRENT_FETCHES,
        )
        .with_diagnostics(tx);
        Harness {
            coordinator,
            transport,
            events,
        }
    }

    fn harness(transport: MockTransport, store: MockBlobStore) -> Harness {
        harness_with_disk(transport, ready_disk(store))
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<CacheEvent>) -> Vec<CacheEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_fetch_populates_both_tiers_then_memory_hit() {
        let store = MockBlobStore::new();
        let h = harness(
            MockTransport::new().with_response(URL, png_bytes(8, 6)),
            store.clone(),
        );
        let slot = Arc::new(ImageSlot::new("hero"));

        let dispatch = h.coordinator.load(URL).into_target(slot.clone()).await;
        assert!(dispatch.is_fetching());
        assert!(dispatch.finished().await);

        let delivered = slot.image().unwrap();
        assert_eq!(delivered.source, ImageSource::Network);
        assert_eq!(delivered.dimensions(), (8, 6));
        assert_eq!(store.commits(), 1);

        let again = Arc::new(ImageSlot::new("hero-again"));
        let dispatch = h.coordinator.load(URL).into_target(again.clone()).await;
        assert!(matches!(dispatch, Dispatch::Memory));
        assert_eq!(again.image().unwrap().source, ImageSource::MemoryCache);
        assert_eq!(h.transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_disk_hit_skips_fetch_and_promotes() {
        let key = CacheKey::from_url(URL);
        let store = MockBlobStore::new().with_entry(&key, png_bytes(3, 2));
        let mut h = harness(MockTransport::new(), store);
        let slot = Arc::new(ImageSlot::new("thumb"));

        let dispatch = h.coordinator.load(URL).into_target(slot.clone()).await;

        assert!(matches!(dispatch, Dispatch::Disk));
        assert_eq!(slot.image().unwrap().source, ImageSource::DiskCache);
        assert_eq!(slot.image().unwrap().dimensions(), (3, 2));
        assert_eq!(h.transport.calls(), 0);
        assert!(h.coordinator.memory_cache().contains(&key));
        assert!(matches!(
            drain(&mut h.events).as_slice(),
            [CacheEvent::DiskHit { .. }]
        ));
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_placeholder() {
        let mut h = harness(MockTransport::new(), MockBlobStore::new());
        let slot = Arc::new(ImageSlot::new("avatar"));
        let placeholder = Arc::new(DynamicImage::new_rgb8(1, 1));

        let dispatch = h
            .coordinator
            .load("https://x/missing.png")
            .placeholder(placeholder)
            .into_target(slot.clone())
            .await;

        assert!(slot.shows_placeholder());
        assert!(!dispatch.finished().await);
        assert!(slot.shows_placeholder());
        assert!(h.coordinator.memory_cache().is_empty());

        let events = drain(&mut h.events);
        assert!(matches!(
            events.as_slice(),
            [CacheEvent::FetchFailed {
                cause: CacheError::NetworkFailure { .. },
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn test_fetch_failure_without_placeholder_delivers_nothing() {
        let h = harness(
            MockTransport::new().with_response(URL, &b"not an image"[..]),
            MockBlobStore::new(),
        );
        let slot = Arc::new(ImageSlot::new("empty"));

        let dispatch = h.coordinator.load(URL).into_target(slot.clone()).await;

        assert!(!dispatch.finished().await);
        assert!(slot.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_loads_are_not_deduplicated() {
        let h = harness(
            MockTransport::new()
                .with_response(URL, png_bytes(4, 4))
                .with_delay(Duration::from_millis(50)),
            MockBlobStore::new(),
        );
        let first = Arc::new(ImageSlot::new("first"));
        let second = Arc::new(ImageSlot::new("second"));

        let a = h.coordinator.load(URL).into_target(first.clone()).await;
        let b = h.coordinator.load(URL).into_target(second.clone()).await;
        assert!(a.is_fetching() && b.is_fetching());

        assert!(a.finished().await);
        assert!(b.finished().await);
        assert_eq!(h.transport.calls(), 2);
        assert!(first.image().is_some());
        assert!(second.image().is_some());
    }

    #[tokio::test]
    async fn test_disk_write_failure_does_not_block_delivery() {
        let store = MockBlobStore::new().failing_writes();
        let mut h = harness(
            MockTransport::new().with_response(URL, png_bytes(5, 5)),
            store.clone(),
        );
        let slot = Arc::new(ImageSlot::new("tile"));

        let dispatch = h.coordinator.load(URL).into_target(slot.clone()).await;

        assert!(dispatch.finished().await);
        assert_eq!(slot.image().unwrap().source, ImageSource::Network);
        assert!(h.coordinator.memory_cache().contains(&CacheKey::from_url(URL)));
        assert!(store.raw(&CacheKey::from_url(URL)).is_none());
        assert!(
            drain(&mut h.events)
                .iter()
                .any(|e| matches!(e, CacheEvent::DiskWriteFailed { .. }))
        );
    }

    #[tokio::test]
    async fn test_corrupt_disk_entry_falls_back_to_network() {
        let key = CacheKey::from_url(URL);
        let store = MockBlobStore::new().with_entry(&key, &b"corrupt"[..]);
        let mut h = harness(
            MockTransport::new().with_response(URL, png_bytes(2, 2)),
            store.clone(),
        );
        let slot = Arc::new(ImageSlot::new("fallback"));

        let dispatch = h.coordinator.load(URL).into_target(slot.clone()).await;

        assert!(dispatch.finished().await);
        assert_eq!(slot.image().unwrap().source, ImageSource::Network);
        assert_eq!(h.transport.calls(), 1);
        // Write-back replaced the corrupt blob
        assert_ne!(store.raw(&key).unwrap(), &b"corrupt"[..]);
        assert!(matches!(
            drain(&mut h.events).first(),
            Some(CacheEvent::DiskReadFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_waits_for_disk_initialization() {
        let key = CacheKey::from_url(URL);
        let store = MockBlobStore::new().with_entry(&key, png_bytes(6, 1));
        let (tx, rx) = oneshot::channel::<()>();
        let disk = DiskImageCache::open_with(async move {
            let _ = rx.await;
            Ok::<_, CacheError>(Arc::new(store) as Arc<dyn BlobStore>)
        });
        let Harness {
            coordinator,
            transport,
            ..
        } = harness_with_disk(MockTransport::new(), disk);
        let coordinator = Arc::new(coordinator);
        let slot = Arc::new(ImageSlot::new("late"));

        let pending = {
            let coordinator = Arc::clone(&coordinator);
            let slot = Arc::clone(&slot);
            tokio::spawn(async move { coordinator.load(URL).into_target(slot).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());
        assert!(slot.is_empty());

        tx.send(()).unwrap();
        let dispatch = pending.await.unwrap();
        assert!(matches!(dispatch, Dispatch::Disk));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_disk_reported_once_and_fetch_still_works() {
        let disk = DiskImageCache::open_with(async {
            Err::<Arc<dyn BlobStore>, _>(CacheError::io("read-only filesystem"))
        });
        let mut h = harness_with_disk(
            MockTransport::new().with_response(URL, png_bytes(2, 3)),
            disk,
        );

        for name in ["one", "two"] {
            let slot = Arc::new(ImageSlot::new(name));
            let url = format!("{URL}?{name}");
            let dispatch = h.coordinator.load(url).into_target(slot).await;
            let _ = dispatch.finished().await;
        }
        let slot = Arc::new(ImageSlot::new("ok"));
        let dispatch = h.coordinator.load(URL).into_target(slot.clone()).await;
        assert!(dispatch.finished().await);
        assert_eq!(slot.image().unwrap().source, ImageSource::Network);

        let unavailable = drain(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, CacheEvent::DiskUnavailable { .. }))
            .count();
        assert_eq!(unavailable, 1);
    }

    /// Records, at delivery time, whether the disk tier already held the key.
    struct DiskCheckingTarget {
        store: MockBlobStore,
        on_disk_at_delivery: parking_lot::Mutex<Option<bool>>,
    }

    impl ImageTarget for DiskCheckingTarget {
        fn name(&self) -> &str {
            "disk-check"
        }

        fn set_placeholder(&self, _placeholder: SharedImage) {}

        fn set_image(&self, image: LoadedImage) {
            *self.on_disk_at_delivery.lock() = Some(self.store.raw(&image.key).is_some());
        }
    }

    #[tokio::test]
    async fn test_fetched_image_is_on_disk_before_delivery() {
        let store = MockBlobStore::new();
        let h = harness(
            MockTransport::new().with_response(URL, png_bytes(4, 2)),
            store.clone(),
        );
        let target = Arc::new(DiskCheckingTarget {
            store,
            on_disk_at_delivery: parking_lot::Mutex::new(None),
        });

        let dispatch = h.coordinator.load(URL).into_target(target.clone()).await;

        assert!(dispatch.finished().await);
        assert_eq!(*target.on_disk_at_delivery.lock(), Some(true));
    }

    #[tokio::test]
    async fn test_unopened_disk_tier_does_not_block_loads() {
        let disk = DiskImageCache::uninitialized();
        let mut h = harness_with_disk(
            MockTransport::new().with_response(URL, png_bytes(3, 3)),
            Arc::clone(&disk),
        );
        let slot = Arc::new(ImageSlot::new("unopened"));

        let delivered = tokio::time::timeout(Duration::from_secs(2), async {
            h.coordinator.load(URL).into_target(slot.clone()).await.finished().await
        })
        .await
        .unwrap();

        assert!(delivered);
        assert_eq!(disk.state(), DiskCacheState::Ready);
        assert_eq!(slot.image().unwrap().source, ImageSource::Network);
        assert!(
            drain(&mut h.events)
                .iter()
                .any(|e| matches!(e, CacheEvent::DiskUnavailable { .. }))
        );
    }

    #[tokio::test]
    #[should_panic(expected = "no source url")]
    async fn test_missing_source_panics() {
        let h = harness(MockTransport::new(), MockBlobStore::new());
        let slot: Arc<dyn ImageTarget> = Arc::new(ImageSlot::new("nowhere"));
        let _ = h.coordinator.request().into_target(slot);
    }

    #[tokio::test]
    async fn test_build_without_source_is_error() {
        let h = harness(MockTransport::new(), MockBlobStore::new());
        let result = h
            .coordinator
            .request()
            .build(Arc::new(ImageSlot::new("nowhere")));
        assert!(matches!(result, Err(CacheError::MissingSource)));
    }

    #[tokio::test]
    async fn test_clear_all_and_stats() {
        let store = MockBlobStore::new();
        let h = harness(
            MockTransport::new().with_response(URL, png_bytes(32, 32)),
            store.clone(),
        );
        let slot = Arc::new(ImageSlot::new("stats"));
        let dispatch = h.coordinator.load(URL).into_target(slot).await;
        assert!(dispatch.finished().await);

        let stats = h.coordinator.stats();
        assert_eq!(stats.memory.size, 1);
        assert_eq!(stats.disk_entries, 1);
        assert_eq!(stats.disk_state, DiskCacheState::Ready);
        assert!(stats.to_string().contains("Disk (ready): 1 entries"));

        h.coordinator.clear_all().await;
        assert!(h.coordinator.memory_cache().is_empty());
        assert!(store.is_empty());
    }
}
