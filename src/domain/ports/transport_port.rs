//! Port definition for fetching remote bytes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::CacheResult;

/// Port for retrieving raw bytes from a remote source.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches the full body at `url`.
    ///
    /// Any network error or non-success response is a `NetworkFailure`.
    async fn fetch(&self, url: &str) -> CacheResult<Bytes>;
}
