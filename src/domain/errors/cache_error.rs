//! Cache error types.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur inside the cache tiers and their collaborators.
///
/// None of these reach a request's target: the coordinator folds every
/// variant into "no image delivered". They surface only through logs and
/// the diagnostic event stream.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum CacheError {
    #[error("network failure: {message}")]
    NetworkFailure { message: String },

    #[error("decode failure: {message}")]
    DecodeFailure { message: String },

    #[error("disk write failure: {message}")]
    DiskWriteFailure { message: String },

    #[error("disk read failure: {message}")]
    DiskReadFailure { message: String },

    #[error("io error: {message}")]
    Io { message: String },

    #[error("image request has no source url")]
    MissingSource,
}

impl CacheError {
    /// Creates network failure error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            message: message.into(),
        }
    }

    /// Creates decode failure error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::DecodeFailure {
            message: message.into(),
        }
    }

    /// Creates disk write failure error.
    #[must_use]
    pub fn disk_write(message: impl Into<String>) -> Self {
        Self::DiskWriteFailure {
            message: message.into(),
        }
    }

    /// Creates disk read failure error.
    #[must_use]
    pub fn disk_read(message: impl Into<String>) -> Self {
        Self::DiskReadFailure {
            message: message.into(),
        }
    }

    /// Creates io error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Returns whether the error came from the disk tier.
    #[must_use]
    pub const fn is_disk_error(&self) -> bool {
        matches!(
            self,
            Self::DiskWriteFailure { .. } | Self::DiskReadFailure { .. } | Self::Io { .. }
        )
    }

    /// Returns whether the error came from fetching a remote image.
    #[must_use]
    pub const fn is_fetch_error(&self) -> bool {
        matches!(self, Self::NetworkFailure { .. } | Self::DecodeFailure { .. })
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}
