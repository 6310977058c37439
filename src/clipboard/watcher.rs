//! Non-blocking clipboard-change probe.
//!
//! The watcher remembers the last text and image it saw. Each [`probe`]
//! reads the clipboard once and reports the first kind that differs,
//! text before image, so it can run as a poller condition without
//! stalling the tick.
//!
//! [`probe`]: ClipboardWatcher::probe

use std::sync::{Arc, Mutex};

use tracing::warn;

use super::{ClipboardError, ClipboardProvider};
use crate::content::{Bitmap, ClipContent};
use crate::engine::lock;

#[derive(Debug, Default)]
struct Seen {
    text: Option<String>,
    image: Option<Bitmap>,
}

pub struct ClipboardWatcher {
    provider: Arc<dyn ClipboardProvider>,
    seen: Mutex<Seen>,
}

impl ClipboardWatcher {
    pub fn new(provider: Arc<dyn ClipboardProvider>) -> Self {
        Self {
            provider,
            seen: Mutex::new(Seen::default()),
        }
    }

    pub fn provider(&self) -> &Arc<dyn ClipboardProvider> {
        &self.provider
    }

    /// Record the current clipboard so content present at startup does
    /// not fire an event. Read failures leave that kind unrecorded.
    pub fn prime(&self) {
        let text = self.provider.get_text().unwrap_or_else(|e| {
            warn!(error = %e, "cannot read clipboard text at startup");
            None
        });
        let image = self.provider.get_image().unwrap_or_else(|e| {
            warn!(error = %e, "cannot read clipboard image at startup");
            None
        });
        *lock(&self.seen) = Seen { text, image };
    }

    /// Read the clipboard once and return what changed since the last
    /// probe, if anything. An empty clipboard is never a change.
    pub fn probe(&self) -> Result<Option<ClipContent>, ClipboardError> {
        let text = self.provider.get_text()?;
        {
            let mut seen = lock(&self.seen);
            if let Some(text) = text
                && seen.text.as_ref() != Some(&text)
            {
                seen.text = Some(text.clone());
                return Ok(Some(ClipContent::Text(text)));
            }
        }

        let image = self.provider.get_image()?;
        let mut seen = lock(&self.seen);
        if let Some(image) = image
            && seen.image.as_ref() != Some(&image)
        {
            seen.image = Some(image.clone());
            return Ok(Some(ClipContent::Image(image)));
        }
        Ok(None)
    }

    /// Record content the agent wrote itself so the next probe does not
    /// report it as a change.
    pub fn remember(&self, content: &ClipContent) {
        let mut seen = lock(&self.seen);
        match content {
            ClipContent::Text(text) => seen.text = Some(text.clone()),
            ClipContent::Image(image) => seen.image = Some(image.clone()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// In-memory clipboard.
    #[derive(Default)]
    pub(crate) struct MemoryClipboard {
        pub text: Mutex<Option<String>>,
        pub image: Mutex<Option<Bitmap>>,
        pub fail: Mutex<bool>,
    }

    impl ClipboardProvider for MemoryClipboard {
        fn get_text(&self) -> Result<Option<String>, ClipboardError> {
            if *self.fail.lock().unwrap() {
                return Err(ClipboardError::Command("no display".into()));
            }
            Ok(self.text.lock().unwrap().clone())
        }

        fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
            *self.text.lock().unwrap() = Some(text.to_string());
            Ok(())
        }

        fn get_image(&self) -> Result<Option<Bitmap>, ClipboardError> {
            Ok(self.image.lock().unwrap().clone())
        }

        fn set_image(&self, image: &Bitmap) -> Result<(), ClipboardError> {
            *self.image.lock().unwrap() = Some(image.clone());
            Ok(())
        }
    }

    fn setup() -> (Arc<MemoryClipboard>, ClipboardWatcher) {
        let clip = Arc::new(MemoryClipboard::default());
        let watcher = ClipboardWatcher::new(clip.clone());
        (clip, watcher)
    }

    fn pixel(v: u8) -> Bitmap {
        Bitmap::from_rgba(1, 1, vec![v, v, v, 255]).unwrap()
    }

    #[test]
    fn empty_clipboard_never_changes() {
        let (_clip, watcher) = setup();
        assert_eq!(watcher.probe().unwrap(), None);
        assert_eq!(watcher.probe().unwrap(), None);
    }

    #[test]
    fn text_change_reported_once() {
        let (clip, watcher) = setup();
        clip.set_text("a").unwrap();
        assert_eq!(watcher.probe().unwrap(), Some(ClipContent::Text("a".into())));
        assert_eq!(watcher.probe().unwrap(), None);

        clip.set_text("b").unwrap();
        assert_eq!(watcher.probe().unwrap(), Some(ClipContent::Text("b".into())));
    }

    #[test]
    fn prime_suppresses_startup_content() {
        let (clip, watcher) = setup();
        clip.set_text("already there").unwrap();
        clip.set_image(&pixel(1)).unwrap();
        watcher.prime();
        assert_eq!(watcher.probe().unwrap(), None);
    }

    #[test]
    fn text_checked_before_image() {
        let (clip, watcher) = setup();
        clip.set_text("t").unwrap();
        clip.set_image(&pixel(7)).unwrap();

        assert_eq!(watcher.probe().unwrap(), Some(ClipContent::Text("t".into())));
        assert_eq!(watcher.probe().unwrap(), Some(ClipContent::Image(pixel(7))));
        assert_eq!(watcher.probe().unwrap(), None);
    }

    #[test]
    fn image_compared_by_pixels() {
        let (clip, watcher) = setup();
        clip.set_image(&pixel(1)).unwrap();
        assert!(watcher.probe().unwrap().is_some());

        // Same pixels in a fresh buffer: no change.
        clip.set_image(&pixel(1)).unwrap();
        assert_eq!(watcher.probe().unwrap(), None);

        clip.set_image(&pixel(2)).unwrap();
        assert_eq!(watcher.probe().unwrap(), Some(ClipContent::Image(pixel(2))));
    }

    #[test]
    fn remembered_write_back_is_not_a_change() {
        let (clip, watcher) = setup();
        clip.set_text("hello").unwrap();
        assert!(watcher.probe().unwrap().is_some());

        let upper = ClipContent::Text("HELLO".into());
        clip.set_text("HELLO").unwrap();
        watcher.remember(&upper);
        assert_eq!(watcher.probe().unwrap(), None);
    }

    #[test]
    fn read_errors_propagate_and_prime_tolerates_them() {
        let (clip, watcher) = setup();
        *clip.fail.lock().unwrap() = true;
        watcher.prime();
        assert!(watcher.probe().is_err());

        *clip.fail.lock().unwrap() = false;
        clip.set_text("x").unwrap();
        assert_eq!(watcher.probe().unwrap(), Some(ClipContent::Text("x".into())));
    }
}
