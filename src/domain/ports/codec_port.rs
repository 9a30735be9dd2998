//! Port definition for image decoding and encoding.

use image::DynamicImage;

use crate::domain::errors::CacheResult;

/// Quality passed to the encoder when writing the disk tier.
pub const DISK_ENCODE_QUALITY: u8 = 100;

/// Port for converting between encoded blobs and decoded images.
///
/// Both operations are CPU-bound and are expected to run off the async
/// executor (`spawn_blocking`).
pub trait ImageCodec: Send + Sync {
    /// Decodes an encoded blob.
    ///
    /// # Errors
    /// Returns `DecodeFailure` for malformed input.
    fn decode(&self, bytes: &[u8]) -> CacheResult<DynamicImage>;

    /// Encodes an image for persistence.
    ///
    /// # Errors
    /// Returns `DiskWriteFailure` if the encoder rejects the image.
    fn encode(&self, image: &DynamicImage, quality: u8) -> CacheResult<Vec<u8>>;
}
