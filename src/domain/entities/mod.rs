//! Domain entity definitions.

mod cache_key;
mod image;

pub use cache_key::{CacheKey, MAX_KEY_LENGTH, normalize};
pub use image::{ImageSource, LoadedImage, SharedImage, byte_size, cost_kb};
