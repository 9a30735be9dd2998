//! Tiered image cache.
//!
//! Serves remote images from an in-memory LRU tier, then a bounded on-disk
//! tier, and only then from the network, writing fetched images back to
//! both tiers.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing the cache tiers and adapters.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "tiered-image-cache";
