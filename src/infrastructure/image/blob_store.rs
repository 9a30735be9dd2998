//! Bounded on-disk blob store with transactional writes.
//!
//! Each entry is stored as one file per value slot, named `<key>.<slot>`.
//! Writes go to `<key>.<slot>.tmp` and are renamed into place on commit, so
//! a reader only ever sees complete values. An in-memory LRU index tracks
//! entry sizes; it is rebuilt from file modification times when the store
//! is opened.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{BlobEditor, BlobStore, Snapshot};

/// Name of the marker file recording the store format.
pub const VERSION_FILE: &str = "version";

const TMP_SUFFIX: &str = ".tmp";

struct Index {
    entries: LruCache<CacheKey, u64>,
    size: u64,
}

struct Shared {
    dir: PathBuf,
    value_count: usize,
    max_size: u64,
    index: Mutex<Index>,
    editing: Mutex<HashSet<CacheKey>>,
}

impl Shared {
    fn value_path(&self, key: &CacheKey, slot: usize) -> PathBuf {
        self.dir.join(format!("{}.{slot}", key.as_str()))
    }

    fn tmp_path(&self, key: &CacheKey, slot: usize) -> PathBuf {
        self.dir.join(format!("{}.{slot}{TMP_SUFFIX}", key.as_str()))
    }

    /// Records a committed entry and returns the entries evicted to stay
    /// within budget.
    fn record(&self, key: CacheKey, size: u64) -> Vec<CacheKey> {
        let mut index = self.index.lock();
        if let Some(old) = index.entries.pop(&key) {
            index.size -= old;
        }
        index.entries.push(key, size);
        index.size += size;

        let mut evicted = Vec::new();
        while index.size > self.max_size {
            let Some((victim, victim_size)) = index.entries.pop_lru() else {
                break;
            };
            index.size -= victim_size;
            evicted.push(victim);
        }
        evicted
    }

    fn forget(&self, key: &CacheKey) -> bool {
        let mut index = self.index.lock();
        match index.entries.pop(key) {
            Some(size) => {
                index.size -= size;
                true
            }
            None => false,
        }
    }

    async fn delete_files(&self, key: &CacheKey) {
        for slot in 0..self.value_count {
            let path = self.value_path(key, slot);
            if let Err(e) = fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "Failed to remove cache file");
            }
        }
    }

    fn release(&self, key: &CacheKey) {
        self.editing.lock().remove(key);
    }
}

/// File-backed [`BlobStore`] bounded by total bytes.
#[derive(Clone)]
pub struct FsBlobStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for FsBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsBlobStore")
            .field("dir", &self.shared.dir)
            .field("value_count", &self.shared.value_count)
            .field("max_size", &self.shared.max_size)
            .finish_non_exhaustive()
    }
}

impl FsBlobStore {
    /// Opens (or creates) a store in `dir`.
    ///
    /// If the directory holds a store written with a different
    /// `app_version` or `value_count`, its entries are discarded. Leftover
    /// temporary files and incomplete entries are removed, and the store is
    /// trimmed to `max_size`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or read.
    pub async fn open(
        dir: impl Into<PathBuf>,
        app_version: u32,
        value_count: usize,
        max_size: u64,
    ) -> CacheResult<Self> {
        let dir = dir.into();
        if value_count == 0 {
            return Err(CacheError::io("value count must be at least 1"));
        }
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io(format!("Failed to create cache dir: {e}")))?;

        let expected_marker = format!("{app_version}\n{value_count}\n");
        let marker_path = dir.join(VERSION_FILE);
        let marker = fs::read_to_string(&marker_path).await.ok();
        if marker.as_deref() != Some(expected_marker.as_str()) {
            if marker.is_some() {
                info!(dir = %dir.display(), "Cache format changed, discarding entries");
            }
            remove_store_files(&dir).await?;
            fs::write(&marker_path, &expected_marker)
                .await
                .map_err(|e| CacheError::io(format!("Failed to write version marker: {e}")))?;
        }

        let shared = Shared {
            dir,
            value_count,
            max_size,
            index: Mutex::new(Index {
                entries: LruCache::unbounded(),
                size: 0,
            }),
            editing: Mutex::new(HashSet::new()),
        };
        let store = Self {
            shared: Arc::new(shared),
        };
        store.rebuild_index().await?;
        Ok(store)
    }

    /// Returns the directory backing this store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    async fn rebuild_index(&self) -> CacheResult<()> {
        let shared = &self.shared;
        let mut found: HashMap<CacheKey, ScannedEntry> = HashMap::new();

        let mut entries = fs::read_dir(&shared.dir)
            .await
            .map_err(|e| CacheError::io(format!("Failed to read cache dir: {e}")))?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(TMP_SUFFIX) {
                let _ = fs::remove_file(&path).await;
                continue;
            }
            if name == VERSION_FILE {
                continue;
            }
            let Some((key, slot)) = parse_value_file(name, shared.value_count) else {
                if entry.file_type().await.is_ok_and(|t| t.is_file()) {
                    debug!(file = %name, "Removing unrecognized cache file");
                    let _ = fs::remove_file(&path).await;
                }
                continue;
            };
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let scanned = found.entry(key).or_default();
            scanned.size += meta.len();
            scanned.slots.insert(slot);
            scanned.modified = scanned.modified.max(Some(modified));
        }

        let mut complete = Vec::with_capacity(found.len());
        for (key, scanned) in found {
            if scanned.slots.len() == shared.value_count {
                complete.push((key, scanned));
            } else {
                debug!(key = %key, "Removing incomplete cache entry");
                shared.delete_files(&key).await;
            }
        }
        complete.sort_by_key(|(_, scanned)| scanned.modified);

        let mut evicted = Vec::new();
        for (key, scanned) in complete {
            evicted.extend(shared.record(key, scanned.size));
        }
        for key in &evicted {
            shared.delete_files(key).await;
        }

        debug!(
            dir = %shared.dir.display(),
            entries = self.len(),
            size = self.size(),
            evicted = evicted.len(),
            "Opened disk blob store"
        );
        Ok(())
    }
}

#[derive(Default)]
struct ScannedEntry {
    size: u64,
    slots: HashSet<usize>,
    modified: Option<SystemTime>,
}

fn parse_value_file(name: &str, value_count: usize) -> Option<(CacheKey, usize)> {
    let (key, slot) = name.rsplit_once('.')?;
    let slot: usize = slot.parse().ok()?;
    if slot >= value_count {
        return None;
    }
    Some((CacheKey::from_normalized(key)?, slot))
}

async fn remove_store_files(dir: &Path) -> CacheResult<()> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| CacheError::io(format!("Failed to read cache dir: {e}")))?;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if entry.file_type().await.is_ok_and(|t| t.is_file())
            && let Err(e) = fs::remove_file(&path).await
        {
            warn!(path = %path.display(), error = %e, "Failed to remove stale cache file");
        }
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Snapshot>> {
        let shared = &self.shared;
        if shared.index.lock().entries.get(key).is_none() {
            trace!(key = %key, "Disk store miss");
            return Ok(None);
        }

        let mut values = Vec::with_capacity(shared.value_count);
        for slot in 0..shared.value_count {
            let path = shared.value_path(key, slot);
            match fs::read(&path).await {
                Ok(bytes) => values.push(Bytes::from(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Evicted or removed between the index check and the read
                    shared.forget(key);
                    return Ok(None);
                }
                Err(e) => {
                    return Err(CacheError::disk_read(format!(
                        "Failed to read {}: {e}",
                        path.display()
                    )));
                }
            }
        }

        trace!(key = %key, "Disk store hit");
        Ok(Some(Snapshot::new(values)))
    }

    async fn edit(&self, key: &CacheKey) -> CacheResult<Option<Box<dyn BlobEditor>>> {
        if key.as_str().is_empty() {
            return Err(CacheError::disk_write("cannot store an empty key"));
        }
        if !self.shared.editing.lock().insert(key.clone()) {
            debug!(key = %key, "Entry already being edited");
            return Ok(None);
        }
        Ok(Some(Box::new(FsEditor {
            shared: self.shared.clone(),
            key: key.clone(),
            written: vec![None; self.shared.value_count],
            finished: false,
        })))
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        let existed = self.shared.forget(key);
        if existed {
            self.shared.delete_files(key).await;
            debug!(key = %key, "Removed entry from disk store");
        }
        Ok(existed)
    }

    async fn flush(&self) -> CacheResult<()> {
        #[cfg(unix)]
        {
            let dir = fs::File::open(&self.shared.dir)
                .await
                .map_err(|e| CacheError::io(format!("Failed to open cache dir: {e}")))?;
            dir.sync_all()
                .await
                .map_err(|e| CacheError::io(format!("Failed to sync cache dir: {e}")))?;
        }
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        let keys: Vec<CacheKey> = {
            let mut index = self.shared.index.lock();
            let keys = index.entries.iter().map(|(k, _)| k.clone()).collect();
            index.entries.clear();
            index.size = 0;
            keys
        };
        for key in &keys {
            self.shared.delete_files(key).await;
        }
        debug!(count = keys.len(), "Cleared disk blob store");
        Ok(())
    }

    fn size(&self) -> u64 {
        self.shared.index.lock().size
    }

    fn max_size(&self) -> u64 {
        self.shared.max_size
    }

    fn len(&self) -> usize {
        self.shared.index.lock().entries.len()
    }
}

struct FsEditor {
    shared: Arc<Shared>,
    key: CacheKey,
    written: Vec<Option<u64>>,
    finished: bool,
}

impl FsEditor {
    async fn discard_tmp_files(&self) {
        for (slot, written) in self.written.iter().enumerate() {
            if written.is_some() {
                let _ = fs::remove_file(self.shared.tmp_path(&self.key, slot)).await;
            }
        }
    }
}

#[async_trait]
impl BlobEditor for FsEditor {
    async fn write(&mut self, index: usize, bytes: &[u8]) -> CacheResult<()> {
        if index >= self.written.len() {
            return Err(CacheError::disk_write(format!(
                "slot {index} out of range for {} values",
                self.written.len()
            )));
        }

        // Mark before touching the file so a failed write still gets cleaned up
        self.written[index] = Some(0);
        let path = self.shared.tmp_path(&self.key, index);
        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| CacheError::disk_write(format!("Failed to create cache file: {e}")))?;
        file.write_all(bytes)
            .await
            .map_err(|e| CacheError::disk_write(format!("Failed to write cache file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| CacheError::disk_write(format!("Failed to sync cache file: {e}")))?;

        self.written[index] = Some(bytes.len() as u64);
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> CacheResult<()> {
        self.finished = true;

        if self.written.iter().any(Option::is_none) {
            self.discard_tmp_files().await;
            self.shared.release(&self.key);
            return Err(CacheError::disk_write(format!(
                "entry {} committed without every value",
                self.key
            )));
        }

        for slot in 0..self.written.len() {
            let tmp = self.shared.tmp_path(&self.key, slot);
            let live = self.shared.value_path(&self.key, slot);
            if let Err(e) = fs::rename(&tmp, &live).await {
                self.discard_tmp_files().await;
                self.shared.release(&self.key);
                return Err(CacheError::disk_write(format!(
                    "Failed to publish cache file: {e}"
                )));
            }
        }

        let size: u64 = self.written.iter().flatten().sum();
        let evicted = self.shared.record(self.key.clone(), size);
        self.shared.release(&self.key);

        debug!(key = %self.key, size = size, "Committed disk entry");
        for victim in &evicted {
            self.shared.delete_files(victim).await;
            debug!(key = %victim, "Evicted from disk store");
        }
        Ok(())
    }

    async fn abort(mut self: Box<Self>) -> CacheResult<()> {
        self.finished = true;
        self.discard_tmp_files().await;
        self.shared.release(&self.key);
        trace!(key = %self.key, "Aborted disk entry edit");
        Ok(())
    }
}

impl Drop for FsEditor {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        for (slot, written) in self.written.iter().enumerate() {
            if written.is_some() {
                let _ = std::fs::remove_file(self.shared.tmp_path(&self.key, slot));
            }
        }
        self.shared.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(s: &str) -> CacheKey {
        CacheKey::from_url(s)
    }

    async fn create_test_store(max_size: u64) -> (FsBlobStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBlobStore::open(temp_dir.path(), 1, 1, max_size)
            .await
            .unwrap();
        (store, temp_dir)
    }

    async fn put(store: &FsBlobStore, k: &CacheKey, data: &[u8]) {
        let mut editor = store.edit(k).await.unwrap().unwrap();
        editor.write(0, data).await.unwrap();
        editor.commit().await.unwrap();
    }

    async fn read(store: &FsBlobStore, k: &CacheKey) -> Option<Bytes> {
        store.get(k).await.unwrap().and_then(|s| s.into_value(0))
    }

    #[tokio::test]
    async fn test_commit_and_get() {
        let (store, _temp) = create_test_store(1024).await;
        let k = key("test1");

        put(&store, &k, b"test image data").await;

        assert_eq!(read(&store, &k).await.unwrap(), &b"test image data"[..]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.size(), 15);
    }

    #[tokio::test]
    async fn test_miss() {
        let (store, _temp) = create_test_store(1024).await;
        assert!(store.get(&key("nonexistent")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_uncommitted_write_is_invisible() {
        let (store, _temp) = create_test_store(1024).await;
        let k = key("pending");

        let mut editor = store.edit(&k).await.unwrap().unwrap();
        editor.write(0, b"half").await.unwrap();

        assert!(store.get(&k).await.unwrap().is_none());
        editor.abort().await.unwrap();
        assert!(store.get(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_abort_keeps_previous_entry() {
        let (store, _temp) = create_test_store(1024).await;
        let k = key("stable");
        put(&store, &k, b"original").await;

        let mut editor = store.edit(&k).await.unwrap().unwrap();
        editor.write(0, b"replacement").await.unwrap();
        editor.abort().await.unwrap();

        assert_eq!(read(&store, &k).await.unwrap(), &b"original"[..]);
    }

    #[tokio::test]
    async fn test_commit_without_values_fails() {
        let (store, _temp) = create_test_store(1024).await;
        let k = key("empty");

        let editor = store.edit(&k).await.unwrap().unwrap();
        assert!(editor.commit().await.is_err());
        assert!(store.get(&k).await.unwrap().is_none());

        // The key is released after the failed commit
        assert!(store.edit(&k).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_edit_rejected() {
        let (store, _temp) = create_test_store(1024).await;
        let k = key("busy");

        let first = store.edit(&k).await.unwrap();
        assert!(first.is_some());
        assert!(store.edit(&k).await.unwrap().is_none());

        drop(first);
        assert!(store.edit(&k).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lru_eviction_by_bytes() {
        let (store, _temp) = create_test_store(10).await;

        put(&store, &key("a"), b"1234").await;
        put(&store, &key("b"), b"1234").await;
        // Touch a so b is least recently used
        assert!(read(&store, &key("a")).await.is_some());
        put(&store, &key("c"), b"1234").await;

        assert!(read(&store, &key("b")).await.is_none());
        assert!(read(&store, &key("a")).await.is_some());
        assert!(read(&store, &key("c")).await.is_some());
        assert_eq!(store.size(), 8);
        assert!(!store.dir().join("b.0").exists());
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let k = key("https://x/a.png");
        {
            let store = FsBlobStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
            put(&store, &k, b"persisted").await;
            store.flush().await.unwrap();
        }

        let store = FsBlobStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(read(&store, &k).await.unwrap(), &b"persisted"[..]);
    }

    #[tokio::test]
    async fn test_version_change_discards_entries() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = FsBlobStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
            put(&store, &key("old"), b"stale").await;
        }

        let store = FsBlobStore::open(temp_dir.path(), 2, 1, 1024).await.unwrap();
        assert!(store.is_empty());
        assert!(read(&store, &key("old")).await.is_none());
    }

    #[tokio::test]
    async fn test_open_removes_leftover_tmp_files() {
        let temp_dir = TempDir::new().unwrap();
        {
            let _store = FsBlobStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
        }
        let leftover = temp_dir.path().join("crashed.0.tmp");
        std::fs::write(&leftover, b"partial").unwrap();

        let store = FsBlobStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
        assert!(!leftover.exists());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_open_trims_to_budget() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = FsBlobStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
            put(&store, &key("a"), b"123456").await;
            put(&store, &key("b"), b"123456").await;
        }

        let store = FsBlobStore::open(temp_dir.path(), 1, 1, 8).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.size() <= 8);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let (store, _temp) = create_test_store(1024).await;
        put(&store, &key("a"), b"1").await;
        put(&store, &key("b"), b"2").await;

        assert!(store.remove(&key("a")).await.unwrap());
        assert!(!store.remove(&key("a")).await.unwrap());
        assert_eq!(store.len(), 1);

        store.clear().await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.size(), 0);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let (store, temp) = create_test_store(1024).await;

        assert!(store.edit(&key("")).await.is_err());
        assert!(!temp.path().join(".0").exists());
    }

    #[tokio::test]
    async fn test_open_removes_unrecognized_files() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = FsBlobStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
            put(&store, &key("kept"), b"data").await;
        }
        let orphan = temp_dir.path().join(".0");
        std::fs::write(&orphan, b"orphaned bytes").unwrap();

        let store = FsBlobStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();

        assert!(!orphan.exists());
        assert!(temp_dir.path().join(VERSION_FILE).exists());
        assert_eq!(store.len(), 1);
        assert_eq!(read(&store, &key("kept")).await.unwrap(), &b"data"[..]);
    }

    #[test]
    fn test_parse_value_file() {
        assert_eq!(
            parse_value_file("https___x_a_png.0", 1),
            Some((key("https://x/a.png"), 0))
        );
        assert!(parse_value_file("https___x_a_png.1", 1).is_none());
        assert!(parse_value_file("version", 1).is_none());
        assert!(parse_value_file("Bad.Key.0", 1).is_none());
    }
}
