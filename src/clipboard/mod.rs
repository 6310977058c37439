//! System clipboard access and change detection.

pub mod watcher;
pub mod xclip;

use crate::content::Bitmap;

pub use watcher::ClipboardWatcher;
pub use xclip::XclipClipboard;

#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    #[error("clipboard command failed: {0}")]
    Command(String),
    #[error("clipboard image: {0}")]
    Image(#[from] image::ImageError),
    #[error("clipboard image has inconsistent dimensions")]
    BadBitmap,
}

/// Reads and writes the system clipboard.
///
/// `Ok(None)` means the clipboard holds nothing of that kind. `Send + Sync`
/// because the watcher probes from the poller task while write-back runs
/// in a handler.
pub trait ClipboardProvider: Send + Sync {
    fn get_text(&self) -> Result<Option<String>, ClipboardError>;

    fn set_text(&self, text: &str) -> Result<(), ClipboardError>;

    fn get_image(&self) -> Result<Option<Bitmap>, ClipboardError>;

    fn set_image(&self, image: &Bitmap) -> Result<(), ClipboardError>;
}
