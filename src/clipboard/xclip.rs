//! X11 clipboard provider: read/write via `xclip`.
//!
//! Text goes through the `UTF8_STRING` target, images through `image/png`.
//! PNG data is decoded to RGBA8 on read and encoded from it on write.

use std::io::{Cursor, Write};
use std::process::{Command, Stdio};

use image::{ImageFormat, RgbaImage};

use super::{ClipboardError, ClipboardProvider};
use crate::content::Bitmap;

const TEXT_TARGET: &str = "UTF8_STRING";
const PNG_TARGET: &str = "image/png";

/// `xclip -selection clipboard` wrapper.
#[derive(Debug, Default, Clone, Copy)]
pub struct XclipClipboard;

impl XclipClipboard {
    pub fn new() -> Self {
        Self
    }

    /// Targets the current owner offers. No owner yields an empty list.
    fn targets(&self) -> Result<Vec<String>, ClipboardError> {
        Ok(read_target("TARGETS")?
            .map(|raw| {
                String::from_utf8_lossy(&raw)
                    .lines()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// `xclip -o -t <target>`. A non-zero exit means the target is not on
/// offer (or nobody owns the selection), reported as `None`.
fn read_target(target: &str) -> Result<Option<Vec<u8>>, ClipboardError> {
    let output = Command::new("xclip")
        .args(["-selection", "clipboard", "-t", target, "-o"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| ClipboardError::Command(format!("failed to spawn xclip -o: {e}")))?;

    Ok(output.status.success().then_some(output.stdout))
}

fn write_target(target: &str, content: &[u8]) -> Result<(), ClipboardError> {
    let mut child = Command::new("xclip")
        .args(["-selection", "clipboard", "-t", target, "-i"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ClipboardError::Command(format!("failed to spawn xclip: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(content)
            .map_err(|e| ClipboardError::Command(format!("failed to write to xclip: {e}")))?;
        // Drop stdin to close the pipe so xclip can finish.
    }

    let status = child
        .wait()
        .map_err(|e| ClipboardError::Command(format!("failed to wait for xclip: {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(ClipboardError::Command(format!(
            "xclip exited with status {status}"
        )))
    }
}

impl ClipboardProvider for XclipClipboard {
    fn get_text(&self) -> Result<Option<String>, ClipboardError> {
        if !self.targets()?.iter().any(|t| t == TEXT_TARGET) {
            return Ok(None);
        }
        Ok(read_target(TEXT_TARGET)?.map(|raw| String::from_utf8_lossy(&raw).into_owned()))
    }

    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        write_target(TEXT_TARGET, text.as_bytes())
    }

    fn get_image(&self) -> Result<Option<Bitmap>, ClipboardError> {
        if !self.targets()?.iter().any(|t| t == PNG_TARGET) {
            return Ok(None);
        }
        match read_target(PNG_TARGET)? {
            Some(png) if !png.is_empty() => decode_png(&png).map(Some),
            _ => Ok(None),
        }
    }

    fn set_image(&self, image: &Bitmap) -> Result<(), ClipboardError> {
        write_target(PNG_TARGET, &encode_png(image)?)
    }
}

/// PNG bytes → RGBA8 bitmap.
pub fn decode_png(png: &[u8]) -> Result<Bitmap, ClipboardError> {
    let rgba = image::load_from_memory_with_format(png, ImageFormat::Png)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    Bitmap::from_rgba(width, height, rgba.into_raw()).ok_or(ClipboardError::BadBitmap)
}

/// RGBA8 bitmap → PNG bytes.
pub fn encode_png(bitmap: &Bitmap) -> Result<Vec<u8>, ClipboardError> {
    let image = RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.rgba().to_vec())
        .ok_or(ClipboardError::BadBitmap)?;
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_round_trip_preserves_pixels() {
        let pixels: Vec<u8> = (0..2 * 3 * 4).map(|i| (i * 10) as u8).collect();
        let bitmap = Bitmap::from_rgba(2, 3, pixels).unwrap();

        let png = encode_png(&bitmap).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        assert_eq!(decode_png(&png).unwrap(), bitmap);
    }

    #[test]
    fn garbage_is_an_image_error() {
        assert!(matches!(
            decode_png(b"definitely not a png"),
            Err(ClipboardError::Image(_))
        ));
    }
}
