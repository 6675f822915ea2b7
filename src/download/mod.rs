//! Download queue: tracked items and the concurrent transfer manager.

pub mod item;
pub mod manager;

pub use item::{DownloadItem, DownloadStatus, ItemError};
pub use manager::{DownloadError, DownloadManager, PART_SUFFIX};
