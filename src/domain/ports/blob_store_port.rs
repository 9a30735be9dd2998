//! Port definition for the bounded on-disk blob store.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::CacheKey;
use crate::domain::errors::CacheResult;

/// Immutable view of every value stored under one key.
#[derive(Debug, Clone)]
pub struct Snapshot {
    values: Vec<Bytes>,
}

impl Snapshot {
    /// Creates a snapshot from its values, in slot order.
    #[must_use]
    pub const fn new(values: Vec<Bytes>) -> Self {
        Self { values }
    }

    /// Consumes the snapshot and returns the value in slot `index`.
    #[must_use]
    pub fn into_value(mut self, index: usize) -> Option<Bytes> {
        (index < self.values.len()).then(|| self.values.swap_remove(index))
    }
}

/// In-progress write for one key.
///
/// Nothing written through an editor is visible to readers until
/// [`BlobEditor::commit`] succeeds. [`BlobEditor::abort`] discards the
/// pending values and leaves any previous entry unchanged.
#[async_trait]
pub trait BlobEditor: Send {
    /// Writes the full value for slot `index`.
    async fn write(&mut self, index: usize, bytes: &[u8]) -> CacheResult<()>;

    /// Publishes every written slot atomically.
    async fn commit(self: Box<Self>) -> CacheResult<()>;

    /// Discards every written slot.
    async fn abort(self: Box<Self>) -> CacheResult<()>;
}

/// Port for a persistent key/blob store with a fixed byte budget.
///
/// Implementations own eviction: once committed entries exceed the budget,
/// least-recently-used entries are removed until the total fits again.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Reads every slot for `key`, marking it most recently used.
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Snapshot>>;

    /// Opens an editor for `key`.
    ///
    /// Returns `None` while another editor for the same key is open.
    async fn edit(&self, key: &CacheKey) -> CacheResult<Option<Box<dyn BlobEditor>>>;

    /// Removes the entry for `key`. Returns whether an entry existed.
    async fn remove(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Makes committed writes durable.
    async fn flush(&self) -> CacheResult<()>;

    /// Removes every entry.
    async fn clear(&self) -> CacheResult<()>;

    /// Returns the number of bytes currently stored.
    fn size(&self) -> u64;

    /// Returns the byte budget.
    fn max_size(&self) -> u64;

    /// Returns the number of committed entries.
    fn len(&self) -> usize;

    /// Returns true if no entries are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
