mod blob_store_port;
mod codec_port;
mod image_target_port;
mod transport_port;

pub use blob_store_port::{BlobEditor, BlobStore, Snapshot};
pub use codec_port::{DISK_ENCODE_QUALITY, ImageCodec};
pub use image_target_port::ImageTarget;
pub use transport_port::Transport;
