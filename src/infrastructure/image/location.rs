//! Disk cache directory selection.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::debug;

/// Default cache namespace appended to the chosen base directory.
pub const DEFAULT_CACHE_NAME: &str = "thumbnails";

/// Picks the directory the disk tier lives in.
///
/// Prefers `external_dir` when it exists, then the per-user cache
/// directory, then the system temp directory. `cache_name` is always
/// appended.
#[must_use]
pub fn select_cache_dir(cache_name: &str, external_dir: Option<&Path>) -> PathBuf {
    let base = external_dir
        .filter(|dir| dir.is_dir())
        .map(Path::to_path_buf)
        .or_else(|| {
            ProjectDirs::from("com", "linuxmobile", "tiered-image-cache")
                .map(|dirs| dirs.cache_dir().to_path_buf())
        })
        .unwrap_or_else(std::env::temp_dir);

    let dir = base.join(cache_name);
    debug!(dir = %dir.display(), "Selected disk cache directory");
    dir
}
