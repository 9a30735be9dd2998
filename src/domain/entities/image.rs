//! Domain types for cached images.

use std::sync::Arc;

use image::DynamicImage;

use super::CacheKey;

/// Decoded image shared between tiers and targets.
pub type SharedImage = Arc<DynamicImage>;

/// Returns the in-memory footprint of a decoded image in bytes.
#[must_use]
pub fn byte_size(image: &DynamicImage) -> usize {
    image.as_bytes().len()
}

/// Returns the memory-tier cost of an image in whole kilobytes, rounded down.
#[must_use]
pub fn cost_kb(image: &DynamicImage) -> usize {
    byte_size(image) / 1024
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from in-memory LRU cache.
    MemoryCache,
    /// Loaded from disk cache.
    DiskCache,
    /// Downloaded from network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// An image delivered to a target, with its provenance.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Normalized key the image is cached under.
    pub key: CacheKey,
    /// The decoded image.
    pub image: SharedImage,
    /// Tier the image was served from.
    pub source: ImageSource,
}

impl LoadedImage {
    /// Creates a loaded image record.
    #[must_use]
    pub const fn new(key: CacheKey, image: SharedImage, source: ImageSource) -> Self {
        Self { key, image, source }
    }

    /// Returns `(width, height)` of the image.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}
