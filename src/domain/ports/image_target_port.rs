//! Port definition for consumers of loaded images.

use crate::domain::entities::{LoadedImage, SharedImage};

/// Destination a request delivers into.
///
/// The coordinator calls these from whichever task completes the load.
/// Implementations that must apply updates on a specific context (a UI
/// loop, a single-threaded renderer) should forward the call there, as
/// `ChannelTarget` does.
pub trait ImageTarget: Send + Sync {
    /// Name used in logs and events.
    fn name(&self) -> &str;

    /// Shows the placeholder while a network fetch is in flight.
    fn set_placeholder(&self, placeholder: SharedImage);

    /// Shows the loaded image.
    fn set_image(&self, image: LoadedImage);
}
