//! Network fetch plus decode, folded into a single outcome.

use std::sync::Arc;

use tracing::debug;

use crate::domain::entities::SharedImage;
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{ImageCodec, Transport};

/// Result of one fetch attempt.
///
/// The failure cause is kept for diagnostics only; callers treat every
/// failure the same way.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Image downloaded and decoded.
    Success(SharedImage),
    /// Transport or decode failed.
    Failure(CacheError),
}

impl FetchOutcome {
    /// Returns the image on success.
    #[must_use]
    pub fn image(self) -> Option<SharedImage> {
        match self {
            Self::Success(image) => Some(image),
            Self::Failure(_) => None,
        }
    }

    /// Returns true on success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Fetches remote images through a [`Transport`] and decodes them with an
/// [`ImageCodec`].
#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn ImageCodec>,
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient").finish_non_exhaustive()
    }
}

impl FetchClient {
    /// Creates a fetch client.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<dyn ImageCodec>) -> Self {
        Self { transport, codec }
    }

    /// Returns the codec used for decoding.
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn ImageCodec> {
        &self.codec
    }

    /// Downloads and decodes `url`. Decoding runs on the blocking pool.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        match self.try_fetch(url).await {
            Ok(image) => FetchOutcome::Success(image),
            Err(e) => {
                debug!(url = %url, error = %e, "Fetch failed");
                FetchOutcome::Failure(e)
            }
        }
    }

    async fn try_fetch(&self, url: &str) -> CacheResult<SharedImage> {
        let bytes = self.transport.fetch(url).await?;
        let codec = Arc::clone(&self.codec);
        let decoded = tokio::task::spawn_blocking(move || codec.decode(&bytes))
            .await
            .map_err(|e| CacheError::decode(format!("Decode task panicked: {e}")))??;
        Ok(Arc::new(decoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::MockTransport;
    use crate::infrastructure::image::codec::DefaultCodec;
    use crate::domain::ports::DISK_ENCODE_QUALITY;
    use image::DynamicImage;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        DefaultCodec
            .encode(&DynamicImage::new_rgb8(width, height), DISK_ENCODE_QUALITY)
            .unwrap()
    }

    fn client(transport: MockTransport) -> FetchClient {
        FetchClient::new(Arc::new(transport), Arc::new(DefaultCodec))
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let transport = MockTransport::new().with_response("https://x/a.png", png_bytes(7, 5));
        let outcome = client(transport).fetch("https://x/a.png").await;

        let image = outcome.image().unwrap();
        assert_eq!((image.width(), image.height()), (7, 5));
    }

    #[tokio::test]
    async fn test_transport_error_is_failure() {
        let outcome = client(MockTransport::new()).fetch("https://x/missing.png").await;
        assert!(matches!(
            outcome,
            FetchOutcome::Failure(CacheError::NetworkFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_failure() {
        let transport = MockTransport::new().with_response("https://x/bad.png", &b"garbage"[..]);
        let outcome = client(transport).fetch("https://x/bad.png").await;

        assert!(!outcome.is_success());
        assert!(matches!(
            outcome,
            FetchOutcome::Failure(CacheError::DecodeFailure { .. })
        ));
    }
}
