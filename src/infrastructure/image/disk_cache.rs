//! Disk-based image cache for persistence across sessions.
//!
//! The backing store is opened on a background task. Until that finishes
//! the cache is `Initializing`, and every read or write waits for `Ready`.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::BlobStore;

use super::blob_store::FsBlobStore;

/// Maximum disk cache size in bytes (10 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 10 * 1024 * 1024;

/// Format version written into the store; bump to discard old entries.
pub const DISK_FORMAT_VERSION: u32 = 1;

/// Each key holds a single encoded image.
const VALUES_PER_ENTRY: usize = 1;
const IMAGE_SLOT: usize = 0;

/// Lifecycle of the disk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskCacheState {
    /// Created, open not yet started.
    Uninitialized,
    /// Store is being opened on a background task.
    Initializing,
    /// Open finished. Reads and writes proceed.
    Ready,
}

impl std::fmt::Display for DiskCacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Disk-based image cache that persists encoded image bytes.
///
/// If the store fails to open, the cache still becomes `Ready` but stays
/// disabled: reads miss and writes are skipped.
pub struct DiskImageCache {
    state: watch::Sender<DiskCacheState>,
    store: OnceLock<Arc<dyn BlobStore>>,
    open_error: OnceLock<CacheError>,
}

impl std::fmt::Debug for DiskImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImageCache")
            .field("state", &self.state())
            .field("enabled", &self.store.get().is_some())
            .finish_non_exhaustive()
    }
}

impl DiskImageCache {
    /// Creates a cache in the `Uninitialized` state.
    #[must_use]
    pub fn uninitialized() -> Arc<Self> {
        let (state, _) = watch::channel(DiskCacheState::Uninitialized);
        Arc::new(Self {
            state,
            store: OnceLock::new(),
            open_error: OnceLock::new(),
        })
    }

    /// Creates a cache and starts opening its store with `opener`.
    #[must_use]
    pub fn open_with<F>(opener: F) -> Arc<Self>
    where
        F: Future<Output = CacheResult<Arc<dyn BlobStore>>> + Send + 'static,
    {
        let cache = Self::uninitialized();
        cache.start(opener);
        cache
    }

    /// Creates a cache backed by an [`FsBlobStore`] in `dir`.
    ///
    /// Entries written under a different `format_version` are discarded.
    #[must_use]
    pub fn spawn_open(dir: PathBuf, format_version: u32, max_size: u64) -> Arc<Self> {
        Self::open_with(async move {
            let store = FsBlobStore::open(dir, format_version, VALUES_PER_ENTRY, max_size).await?;
            Ok::<_, CacheError>(Arc::new(store) as Arc<dyn BlobStore>)
        })
    }

    /// Moves `Uninitialized → Initializing` and opens the store on a
    /// background task. Later calls are ignored.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<F>(self: &Arc<Self>, opener: F)
    where
        F: Future<Output = CacheResult<Arc<dyn BlobStore>>> + Send + 'static,
    {
        let started = self.state.send_if_modified(|state| {
            if *state == DiskCacheState::Uninitialized {
                *state = DiskCacheState::Initializing;
                true
            } else {
                false
            }
        });
        if !started {
            debug!("Disk cache already started");
            return;
        }

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let result = opener.await;
            cache.finish_open(result);
        });
    }

    /// Settles a cache whose open was never started: it becomes `Ready`
    /// with the tier disabled and `cause` as its open error. Returns false
    /// and changes nothing if the open had already started.
    pub fn disable(&self, cause: CacheError) -> bool {
        let claimed = self.state.send_if_modified(|state| {
            if *state == DiskCacheState::Uninitialized {
                *state = DiskCacheState::Initializing;
                true
            } else {
                false
            }
        });
        if claimed {
            self.finish_open(Err(cause));
        }
        claimed
    }

    fn finish_open(&self, result: CacheResult<Arc<dyn BlobStore>>) {
        match result {
            Ok(store) => {
                info!(
                    entries = store.len(),
                    size = store.size(),
                    max_size = store.max_size(),
                    "Disk cache ready"
                );
                let _ = self.store.set(store);
            }
            Err(e) => {
                warn!(error = %e, "Failed to open disk cache, continuing without it");
                let _ = self.open_error.set(e);
            }
        }
        self.state.send_replace(DiskCacheState::Ready);
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DiskCacheState {
        *self.state.borrow()
    }

    /// Returns true once the open has finished.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == DiskCacheState::Ready
    }

    /// Returns the error the open failed with, if it failed.
    #[must_use]
    pub fn open_error(&self) -> Option<&CacheError> {
        self.open_error.get()
    }

    /// Waits until the cache is `Ready`. Returns immediately if it already is.
    ///
    /// Never returns for a cache that was neither started nor disabled.
    pub async fn await_ready(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this only ends on Ready
        let _ = rx.wait_for(|state| *state == DiskCacheState::Ready).await;
    }

    async fn ready_store(&self) -> Option<&Arc<dyn BlobStore>> {
        self.await_ready().await;
        self.store.get()
    }

    /// Reads the encoded image for `key`, waiting for readiness first.
    ///
    /// # Errors
    /// Returns `DiskReadFailure` if the store fails to read the entry.
    pub async fn try_get(&self, key: &CacheKey) -> CacheResult<Option<Bytes>> {
        let Some(store) = self.ready_store().await else {
            return Ok(None);
        };
        let snapshot = store.get(key).await?;
        Ok(snapshot.and_then(|s| s.into_value(IMAGE_SLOT)))
    }

    /// Reads the encoded image for `key`; failures are logged and reported
    /// as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        match self.try_get(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read from disk cache");
                None
            }
        }
    }

    /// Writes `bytes` under `key` in one transaction.
    ///
    /// Returns `Ok(false)` when the write was skipped because the cache is
    /// disabled or another writer holds the key. On failure the
    /// transaction is aborted, so no partial entry becomes visible.
    ///
    /// # Errors
    /// Returns `DiskWriteFailure` if the entry could not be written.
    pub async fn try_put(&self, key: &CacheKey, bytes: &[u8]) -> CacheResult<bool> {
        let Some(store) = self.ready_store().await else {
            return Ok(false);
        };
        let Some(mut editor) = store.edit(key).await? else {
            debug!(key = %key, "Disk entry busy, skipping write");
            return Ok(false);
        };

        if let Err(e) = editor.write(IMAGE_SLOT, bytes).await {
            if let Err(abort_err) = editor.abort().await {
                trace!(key = %key, error = %abort_err, "Abort after failed write also failed");
            }
            return Err(e);
        }
        editor.commit().await?;

        if let Err(e) = store.flush().await {
            warn!(key = %key, error = %e, "Failed to flush disk cache");
        }
        debug!(key = %key, size = bytes.len(), "Stored image in disk cache");
        Ok(true)
    }

    /// Writes `bytes` under `key`; failures are logged and swallowed.
    pub async fn put(&self, key: &CacheKey, bytes: &[u8]) {
        if let Err(e) = self.try_put(key, bytes).await {
            warn!(key = %key, error = %e, "Failed to cache to disk");
        }
    }

    /// Removes every entry.
    ///
    /// # Errors
    /// Returns error if the store cannot be cleared.
    pub async fn clear(&self) -> CacheResult<()> {
        if let Some(store) = self.ready_store().await {
            store.clear().await?;
            debug!("Cleared disk cache");
        }
        Ok(())
    }

    /// Returns the current cache size in bytes, or 0 before `Ready`.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.store.get().map_or(0, |s| s.size())
    }

    /// Returns the byte budget, or 0 before `Ready`.
    #[must_use]
    pub fn max_size(&self) -> u64 {
        self.store.get().map_or(0, |s| s.max_size())
    }

    /// Returns the number of cached entries, or 0 before `Ready`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.get().map_or(0, |s| s.len())
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
