//! Diagnostic events emitted by the coordinator.
//!
//! Every failure is invisible to request targets. Subscribing to these
//! events is the only way to tell a network error from a decode error or a
//! failed disk write.

use tokio::sync::mpsc;

use crate::domain::entities::CacheKey;
use crate::domain::errors::CacheError;

/// Something the coordinator observed while serving a request.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum CacheEvent {
    /// Served from the memory tier.
    MemoryHit { key: CacheKey },
    /// Served from the disk tier.
    DiskHit { key: CacheKey },
    /// Downloaded, decoded and delivered.
    Fetched { key: CacheKey },
    /// Download or decode failed; nothing was delivered.
    FetchFailed { key: CacheKey, cause: CacheError },
    /// Reading or decoding a disk entry failed; treated as a miss.
    DiskReadFailed { key: CacheKey, cause: CacheError },
    /// Encoding or writing a disk entry failed; the entry was not stored.
    DiskWriteFailed { key: CacheKey, cause: CacheError },
    /// The disk store could not be opened; the disk tier is disabled.
    DiskUnavailable { cause: CacheError },
}

impl CacheEvent {
    /// Returns the key the event concerns, if any.
    #[must_use]
    pub const fn key(&self) -> Option<&CacheKey> {
        match self {
            Self::MemoryHit { key }
            | Self::DiskHit { key }
            | Self::Fetched { key }
            | Self::FetchFailed { key, .. }
            | Self::DiskReadFailed { key, .. }
            | Self::DiskWriteFailed { key, .. } => Some(key),
            Self::DiskUnavailable { .. } => None,
        }
    }

    /// Returns the failure cause, if the event reports one.
    #[must_use]
    pub const fn cause(&self) -> Option<&CacheError> {
        match self {
            Self::FetchFailed { cause, .. }
            | Self::DiskReadFailed { cause, .. }
            | Self::DiskWriteFailed { cause, .. }
            | Self::DiskUnavailable { cause } => Some(cause),
            _ => None,
        }
    }
}

/// Optional sink for [`CacheEvent`]s. Sending never blocks or fails.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    tx: Option<mpsc::UnboundedSender<CacheEvent>>,
}

impl Diagnostics {
    /// Creates a sink forwarding to `tx`.
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<CacheEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Creates a sink that drops every event.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emits `event` if a receiver is listening.
    pub fn emit(&self, event: CacheEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
