//! Image codec backed by the `image` crate.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::ImageCodec;

/// Decodes any format the `image` crate was built with and encodes to PNG.
///
/// PNG is lossless, so the quality argument is accepted and ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCodec;

impl ImageCodec for DefaultCodec {
    fn decode(&self, bytes: &[u8]) -> CacheResult<DynamicImage> {
        image::load_from_memory(bytes)
            .map_err(|e| CacheError::decode(format!("Failed to decode image: {e}")))
    }

    fn encode(&self, image: &DynamicImage, _quality: u8) -> CacheResult<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| CacheError::disk_write(format!("Failed to encode image: {e}")))?;
        Ok(out.into_inner())
    }
}
