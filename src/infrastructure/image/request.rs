//! Caller-facing request values.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::domain::entities::{ImageSource, SharedImage};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::ImageTarget;

use super::coordinator::CacheCoordinator;

/// One load, frozen at submission: where to fetch from, what to show while
/// fetching, and where to deliver.
#[derive(Clone)]
pub struct ImageRequest {
    url: String,
    placeholder: Option<SharedImage>,
    target: Arc<dyn ImageTarget>,
}

impl ImageRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        placeholder: Option<SharedImage>,
        target: Arc<dyn ImageTarget>,
    ) -> Self {
        Self {
            url: url.into(),
            placeholder,
            target,
        }
    }

    /// Returns the source URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the placeholder, if set.
    #[must_use]
    pub const fn placeholder(&self) -> Option<&SharedImage> {
        self.placeholder.as_ref()
    }

    /// Returns the delivery target.
    #[must_use]
    pub fn target(&self) -> &Arc<dyn ImageTarget> {
        &self.target
    }
}

impl std::fmt::Debug for ImageRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRequest")
            .field("url", &self.url)
            .field("placeholder", &self.placeholder.is_some())
            .field("target", &self.target.name())
            .finish()
    }
}

/// Builder for an [`ImageRequest`], obtained from
/// [`CacheCoordinator::load`] or [`CacheCoordinator::request`].
#[must_use = "a request does nothing until `into_target` is called"]
pub struct RequestBuilder<'a> {
    coordinator: &'a CacheCoordinator,
    url: Option<String>,
    placeholder: Option<SharedImage>,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) const fn new(coordinator: &'a CacheCoordinator) -> Self {
        Self {
            coordinator,
            url: None,
            placeholder: None,
        }
    }

    /// Sets the source URL.
    pub fn source(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the image shown while a network fetch is in flight.
    pub fn placeholder(mut self, placeholder: SharedImage) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    /// Freezes the request without submitting it.
    ///
    /// # Errors
    /// Returns `MissingSource` if no source URL was set.
    pub fn build(self, target: Arc<dyn ImageTarget>) -> CacheResult<ImageRequest> {
        let url = self.url.ok_or(CacheError::MissingSource)?;
        Ok(ImageRequest::new(url, self.placeholder, target))
    }

    /// Submits the request, delivering into `target`.
    ///
    /// # Panics
    /// Panics if no source URL was set. A request without a source is a
    /// programming error, not a cache miss.
    #[track_caller]
    pub fn into_target(self, target: Arc<dyn ImageTarget>) -> impl Future<Output = Dispatch> + 'a {
        let coordinator = self.coordinator;
        let request = match self.build(target) {
            Ok(request) => request,
            Err(e) => panic!("{e}: call `source` before `into_target`"),
        };
        async move { coordinator.submit(request).await }
    }
}

/// How a submitted request was (or is being) served.
#[derive(Debug)]
pub enum Dispatch {
    /// Delivered synchronously from the memory tier.
    Memory,
    /// Delivered from the disk tier.
    Disk,
    /// Missed both tiers; a background fetch is running. The handle
    /// resolves to whether an image was delivered, after the disk
    /// write-back has finished.
    Fetching(JoinHandle<bool>),
}

impl Dispatch {
    /// Returns the tier that served the request, if it was a hit.
    #[must_use]
    pub const fn source(&self) -> Option<ImageSource> {
        match self {
            Self::Memory => Some(ImageSource::MemoryCache),
            Self::Disk => Some(ImageSource::DiskCache),
            Self::Fetching(_) => None,
        }
    }

    /// Returns true if the request missed both tiers.
    #[must_use]
    pub const fn is_fetching(&self) -> bool {
        matches!(self, Self::Fetching(_))
    }

    /// Waits for the request to finish. Returns whether an image was
    /// delivered.
    pub async fn finished(self) -> bool {
        match self {
            Self::Memory | Self::Disk => true,
            Self::Fetching(handle) => handle.await.unwrap_or(false),
        }
    }
}
