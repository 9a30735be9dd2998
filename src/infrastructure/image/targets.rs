//! Ready-made [`ImageTarget`] implementations.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::domain::entities::{LoadedImage, SharedImage};
use crate::domain::ports::ImageTarget;

/// What an [`ImageSlot`] currently shows.
#[derive(Debug, Clone, Default)]
pub enum SlotContent {
    /// Nothing delivered yet.
    #[default]
    Empty,
    /// Placeholder shown while fetching.
    Placeholder(SharedImage),
    /// Loaded image.
    Image(LoadedImage),
}

/// Target that keeps the last delivery in place, like a widget holding
/// its current picture.
#[derive(Debug)]
pub struct ImageSlot {
    name: String,
    content: Mutex<SlotContent>,
}

impl ImageSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: Mutex::new(SlotContent::Empty),
        }
    }

    /// Returns what the slot shows now.
    #[must_use]
    pub fn content(&self) -> SlotContent {
        self.content.lock().clone()
    }

    /// Returns the loaded image, if one was delivered.
    #[must_use]
    pub fn image(&self) -> Option<LoadedImage> {
        match &*self.content.lock() {
            SlotContent::Image(loaded) => Some(loaded.clone()),
            _ => None,
        }
    }

    /// Returns true while the placeholder is shown.
    #[must_use]
    pub fn shows_placeholder(&self) -> bool {
        matches!(*self.content.lock(), SlotContent::Placeholder(_))
    }

    /// Returns true if nothing was delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(*self.content.lock(), SlotContent::Empty)
    }
}

impl ImageTarget for ImageSlot {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_placeholder(&self, placeholder: SharedImage) {
        *self.content.lock() = SlotContent::Placeholder(placeholder);
    }

    fn set_image(&self, image: LoadedImage) {
        trace!(target_name = %self.name, key = %image.key, source = %image.source, "Image delivered");
        *self.content.lock() = SlotContent::Image(image);
    }
}

/// A delivery forwarded by [`ChannelTarget`].
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Placeholder to show while fetching.
    Placeholder(SharedImage),
    /// Loaded image.
    Image(LoadedImage),
}

/// Message sent when a target receives a delivery.
#[derive(Debug, Clone)]
pub struct ImageLoadedEvent {
    /// Name of the target.
    pub target: String,
    /// What was delivered.
    pub delivery: Delivery,
}

/// Target that forwards deliveries over a channel, so the task owning the
/// receiver applies them on its own context.
#[derive(Debug, Clone)]
pub struct ChannelTarget {
    name: String,
    tx: mpsc::UnboundedSender<ImageLoadedEvent>,
}

impl ChannelTarget {
    /// Creates a target named `name` sending on `tx`.
    #[must_use]
    pub fn new(name: impl Into<String>, tx: mpsc::UnboundedSender<ImageLoadedEvent>) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }

    fn send(&self, delivery: Delivery) {
        let event = ImageLoadedEvent {
            target: self.name.clone(),
            delivery,
        };
        if self.tx.send(event).is_err() {
            trace!(target_name = %self.name, "Receiver dropped, discarding delivery");
        }
    }
}

impl ImageTarget for ChannelTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_placeholder(&self, placeholder: SharedImage) {
        self.send(Delivery::Placeholder(placeholder));
    }

    fn set_image(&self, image: LoadedImage) {
        self.send(Delivery::Image(image));
    }
}
