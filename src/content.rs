//! Clipboard content values and event arguments.
//!
//! A clipboard event is a `(kind, value)` pair. [`ClipContent`] keeps the
//! two together so a text kind can never carry an image value. On the
//! event bus the pair travels as positional [`Arg`]s: `[Text(kind), value]`.

use std::fmt;
use std::sync::Arc;

/// The two content kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    Image,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Image => "image",
        }
    }

    /// Parse a wire/event kind name. Anything but `text`/`image` is `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "text" => Some(ContentKind::Text),
            "image" => Some(ContentKind::Image),
            _ => None,
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded RGBA8 bitmap.
///
/// Pixel data is shared, so cloning a bitmap into several event payloads
/// does not copy it. Equality compares dimensions and pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    rgba: Arc<[u8]>,
}

impl Bitmap {
    /// Wrap raw RGBA8 pixels. Returns `None` if the buffer length does not
    /// match `width * height * 4`.
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(4)?;
        if rgba.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            rgba: rgba.into(),
        })
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

/// One clipboard value together with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipContent {
    Text(String),
    Image(Bitmap),
}

impl ClipContent {
    pub fn kind(&self) -> ContentKind {
        match self {
            ClipContent::Text(_) => ContentKind::Text,
            ClipContent::Image(_) => ContentKind::Image,
        }
    }

    /// Event arguments for this content: `[kind, value]`.
    pub fn to_args(&self) -> EventArgs {
        let value = match self {
            ClipContent::Text(text) => Arg::Text(text.clone()),
            ClipContent::Image(bitmap) => Arg::Image(bitmap.clone()),
        };
        vec![Arg::Text(self.kind().as_str().to_string()), value]
    }

    /// Rebuild content from `[kind, value]` event arguments.
    ///
    /// Returns `None` for any other shape, including a kind that does not
    /// agree with the value.
    pub fn from_args(args: &[Arg]) -> Option<Self> {
        let [Arg::Text(kind), value] = args else {
            return None;
        };
        match (ContentKind::parse(kind)?, value) {
            (ContentKind::Text, Arg::Text(text)) => Some(ClipContent::Text(text.clone())),
            (ContentKind::Image, Arg::Image(bitmap)) => Some(ClipContent::Image(bitmap.clone())),
            _ => None,
        }
    }

    /// Short human-readable preview: text clipped to `max_chars` with a
    /// trailing `...`, images as `[Image WxH]`.
    pub fn preview(&self, max_chars: usize) -> String {
        match self {
            ClipContent::Text(text) => preview_text(text, max_chars),
            ClipContent::Image(bitmap) => format!("[Image {}x{}]", bitmap.width, bitmap.height),
        }
    }
}

pub(crate) fn preview_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// A positional event argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Text(String),
    Image(Bitmap),
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Text(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Text(s)
    }
}

/// Ordered argument list carried by one event.
pub type EventArgs = Vec<Arg>;
