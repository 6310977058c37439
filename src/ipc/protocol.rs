//! Wire protocol between the host and subprocess plugin units.
//!
//! All messages are MessagePack-encoded maps with at minimum `type` and
//! `id` fields. The host sends requests; the unit answers each with a
//! reply carrying the same `id`.

use serde::{Deserialize, Serialize};

use crate::content::{Bitmap, ClipContent, ContentKind};

/// Current protocol version, sent in `describe`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum payload size: 64 MiB (a large RGBA screenshot fits).
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Entry point a unit must list in `describe_ack`.
pub const ENTRY_ON_CLIPBOARD: &str = "on_clipboard";
/// Optional startup entry point.
pub const ENTRY_ON_STARTUP: &str = "on_startup";

/// All wire protocol messages.
///
/// Serialized as a tagged union on the `type` field via MessagePack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Message {
    // -- Host → unit --
    #[serde(rename = "describe")]
    Describe { id: u32, version: u32 },

    #[serde(rename = "transform")]
    Transform { id: u32, content: WireContent },

    #[serde(rename = "startup")]
    Startup { id: u32 },

    // -- Unit → host --
    #[serde(rename = "describe_ack")]
    DescribeAck {
        id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        entry_points: Vec<String>,
    },

    #[serde(rename = "result")]
    TransformResult {
        id: u32,
        action: Action,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<WireContent>,
    },

    #[serde(rename = "startup_ack")]
    StartupAck {
        id: u32,
        #[serde(default)]
        hotkeys: Vec<HotkeyBinding>,
    },

    #[serde(rename = "error")]
    Error { id: u32, message: String },
}

impl Message {
    pub fn id(&self) -> u32 {
        match self {
            Message::Describe { id, .. }
            | Message::Transform { id, .. }
            | Message::Startup { id }
            | Message::DescribeAck { id, .. }
            | Message::TransformResult { id, .. }
            | Message::StartupAck { id, .. }
            | Message::Error { id, .. } => *id,
        }
    }

    /// The `type` tag, for log lines.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Describe { .. } => "describe",
            Message::Transform { .. } => "transform",
            Message::Startup { .. } => "startup",
            Message::DescribeAck { .. } => "describe_ack",
            Message::TransformResult { .. } => "result",
            Message::StartupAck { .. } => "startup_ack",
            Message::Error { .. } => "error",
        }
    }
}

/// Just `{type, id}` of a reply whose body did not decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub id: u32,
}

/// What a unit asks the host to do with the content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    None,
    Skip,
    Replace,
}

/// Content as it travels on the wire.
///
/// `kind` is a free string so a unit can send something the host
/// rejects; [`WireContent::into_content`] does the checking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireContent {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<WireImage>,
}

/// RGBA8 image payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireImage {
    pub width: u32,
    pub height: u32,
    #[serde(with = "serde_bytes")]
    pub rgba: Vec<u8>,
}

/// A hotkey a unit asks the host to bind at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HotkeyBinding {
    pub combo: String,
    pub event: String,
}

impl From<&ClipContent> for WireContent {
    fn from(content: &ClipContent) -> Self {
        match content {
            ClipContent::Text(text) => WireContent {
                kind: ContentKind::Text.as_str().to_string(),
                text: Some(text.clone()),
                image: None,
            },
            ClipContent::Image(bitmap) => WireContent {
                kind: ContentKind::Image.as_str().to_string(),
                text: None,
                image: Some(WireImage {
                    width: bitmap.width,
                    height: bitmap.height,
                    rgba: bitmap.rgba().to_vec(),
                }),
            },
        }
    }
}

impl WireContent {
    /// Whether this is the `("skip", None)` form of a veto.
    pub fn is_skip(&self) -> bool {
        self.kind == "skip"
    }

    /// Validate into host content. The error string says what was wrong.
    pub fn into_content(self) -> Result<ClipContent, String> {
        match ContentKind::parse(&self.kind) {
            Some(ContentKind::Text) => self
                .text
                .map(ClipContent::Text)
                .ok_or_else(|| "text kind without text value".to_string()),
            Some(ContentKind::Image) => {
                let image = self
                    .image
                    .ok_or_else(|| "image kind without image value".to_string())?;
                let (width, height) = (image.width, image.height);
                Bitmap::from_rgba(width, height, image.rgba)
                    .map(ClipContent::Image)
                    .ok_or_else(|| format!("image buffer does not match {width}x{height} RGBA"))
            }
            None => Err(format!("unknown content kind {:?}", self.kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: &Message) -> Message {
        let bytes = rmp_serde::to_vec_named(msg).unwrap();
        rmp_serde::from_slice(&bytes).unwrap()
    }

    #[test]
    fn type_tags_on_the_wire() {
        let msg = Message::Describe {
            id: 1,
            version: PROTOCOL_VERSION,
        };
        let bytes = rmp_serde::to_vec_named(&msg).unwrap();
        let envelope: RawEnvelope = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(envelope.msg_type, "describe");
        assert_eq!(envelope.id, 1);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn result_with_content_round_trips() {
        let msg = Message::TransformResult {
            id: 7,
            action: Action::Replace,
            content: Some(WireContent::from(&ClipContent::Text("HI".into()))),
        };
        assert_eq!(round_trip(&msg), msg);
        assert_eq!(msg.id(), 7);
    }

    #[test]
    fn missing_optional_fields_default() {
        #[derive(Serialize)]
        struct Bare<'a> {
            r#type: &'a str,
            id: u32,
        }
        let bytes = rmp_serde::to_vec_named(&Bare {
            r#type: "describe_ack",
            id: 3,
        })
        .unwrap();
        let msg: Message = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(
            msg,
            Message::DescribeAck {
                id: 3,
                name: None,
                entry_points: Vec::new(),
            }
        );
    }

    #[test]
    fn image_content_validates_buffer() {
        let good = WireContent {
            kind: "image".into(),
            text: None,
            image: Some(WireImage {
                width: 1,
                height: 1,
                rgba: vec![0, 0, 0, 255],
            }),
        };
        assert!(matches!(good.into_content(), Ok(ClipContent::Image(_))));

        let short = WireContent {
            kind: "image".into(),
            text: None,
            image: Some(WireImage {
                width: 2,
                height: 2,
                rgba: vec![0; 4],
            }),
        };
        assert!(short.into_content().is_err());
    }

    #[test]
    fn kind_value_mismatch_is_rejected() {
        let mismatched = WireContent {
            kind: "text".into(),
            text: None,
            image: Some(WireImage {
                width: 0,
                height: 0,
                rgba: Vec::new(),
            }),
        };
        assert!(mismatched.into_content().is_err());

        let unknown = WireContent {
            kind: "video".into(),
            text: Some("x".into()),
            image: None,
        };
        assert!(unknown.into_content().unwrap_err().contains("video"));
    }

    #[test]
    fn skip_kind_detected() {
        let skip = WireContent {
            kind: "skip".into(),
            text: None,
            image: None,
        };
        assert!(skip.is_skip());
        assert!(!WireContent::from(&ClipContent::Text("x".into())).is_skip());
    }
}
