//! Plugin unit framing.
//!
//! A unit reads requests from stdin and writes replies to stdout, one
//! frame each: `[u32 big-endian payload length][MessagePack map]`. A
//! frame may carry a full RGBA bitmap, so the cap is [`MAX_PAYLOAD_SIZE`]
//! rather than anything line-sized.
//!
//! Replies are decoded in two steps. A payload that is not a known
//! [`Message`] but still has a `{type, id}` envelope becomes
//! [`Frame::Unrecognized`], so the waiting request fails at once instead
//! of running into its timeout. Only payloads without even that envelope
//! are a [`CodecError::Decode`].

use std::io::{Read, Write};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::protocol::{MAX_PAYLOAD_SIZE, Message, RawEnvelope};

/// Length header size in bytes.
const HEADER_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("payload too large: {0} bytes (max {MAX_PAYLOAD_SIZE})")]
    PayloadTooLarge(usize),
    #[error("stream closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("MessagePack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("MessagePack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// One frame read from a unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(Message),
    /// Envelope parsed, body did not (unknown `type` or bad field).
    Unrecognized { envelope: RawEnvelope, error: String },
}

impl Frame {
    /// Request id the frame answers.
    pub fn id(&self) -> u32 {
        match self {
            Frame::Message(msg) => msg.id(),
            Frame::Unrecognized { envelope, .. } => envelope.id,
        }
    }
}

/// Decode one payload, falling back to the bare envelope.
pub fn decode_frame(payload: &[u8]) -> Result<Frame, CodecError> {
    match rmp_serde::from_slice::<Message>(payload) {
        Ok(msg) => Ok(Frame::Message(msg)),
        Err(e) => match rmp_serde::from_slice::<RawEnvelope>(payload) {
            Ok(envelope) => Ok(Frame::Unrecognized {
                envelope,
                error: e.to_string(),
            }),
            Err(_) => Err(CodecError::Decode(e)),
        },
    }
}

/// Host side of the unit framing: encodes [`Message`] requests, decodes
/// [`Frame`] replies.
#[derive(Debug, Default)]
pub struct UnitCodec {
    /// Payload length once the header of the current frame is consumed.
    pending_len: Option<usize>,
}

impl Decoder for UnitCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let payload_len = match self.pending_len {
            Some(len) => len,
            None if src.len() < HEADER_LEN => return Ok(None),
            None => {
                let len = src.get_u32() as usize;
                if len > MAX_PAYLOAD_SIZE {
                    return Err(CodecError::PayloadTooLarge(len));
                }
                self.pending_len = Some(len);
                len
            }
        };

        // Images arrive in many pipe reads; grow once.
        if src.len() < payload_len {
            src.reserve(payload_len - src.len());
            return Ok(None);
        }

        let payload = src.split_to(payload_len);
        self.pending_len = None;
        decode_frame(&payload).map(Some)
    }
}

impl Encoder<Message> for UnitCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // Named fields: units in any language read plain maps.
        let payload = rmp_serde::to_vec_named(&item)?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge(payload.len()));
        }

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

/// Write one request to a unit's stdin.
pub fn write_message<W: Write>(writer: &mut W, msg: Message) -> Result<(), CodecError> {
    let mut buf = BytesMut::new();
    UnitCodec::default().encode(msg, &mut buf)?;
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

/// Blocking frame reader over a unit's stdout.
pub struct FrameReader<R> {
    inner: R,
    codec: UnitCodec,
    buf: BytesMut,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            codec: UnitCodec::default(),
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Block until one full frame is available.
    ///
    /// Returns [`CodecError::Closed`] on EOF, including EOF mid-frame.
    pub fn read_frame(&mut self) -> Result<Frame, CodecError> {
        let mut chunk = [0u8; 8 * 1024];
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf)? {
                return Ok(frame);
            }
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                return Err(CodecError::Closed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;
    use crate::ipc::protocol::*;

    fn encode_message(msg: &Message) -> BytesMut {
        let mut buf = BytesMut::new();
        UnitCodec::default().encode(msg.clone(), &mut buf).unwrap();
        buf
    }

    fn expect_message(frame: Frame) -> Message {
        match frame {
            Frame::Message(msg) => msg,
            other => panic!("not a message: {other:?}"),
        }
    }

    /// Frame an arbitrary serializable map, bypassing [`Message`].
    fn raw_frame<T: Serialize>(value: &T) -> Vec<u8> {
        let payload = rmp_serde::to_vec_named(value).unwrap();
        let mut wire = (payload.len() as u32).to_be_bytes().to_vec();
        wire.extend_from_slice(&payload);
        wire
    }

    #[test]
    fn partial_payload_returns_none() {
        let msg = Message::Startup { id: 1 };
        let mut full = encode_message(&msg);

        let half = full.len() / 2;
        let mut partial = full.split_to(half);

        let mut codec = UnitCodec::default();
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(expect_message(decoded), msg);
    }

    #[test]
    fn partial_header_returns_none() {
        let mut codec = UnitCodec::default();
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn binary_image_fidelity() {
        let rgba: Vec<u8> = (0..=255).collect();
        let msg = Message::Transform {
            id: 2,
            content: WireContent {
                kind: "image".into(),
                text: None,
                image: Some(WireImage {
                    width: 8,
                    height: 8,
                    rgba: rgba.clone(),
                }),
            },
        };

        let mut buf = encode_message(&msg);
        let decoded = UnitCodec::default().decode(&mut buf).unwrap().unwrap();
        match expect_message(decoded) {
            Message::Transform { content, .. } => {
                assert_eq!(content.image.unwrap().rgba, rgba);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn payload_too_large_on_decode() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_PAYLOAD_SIZE + 1) as u32);
        buf.extend_from_slice(&[0u8; 100]);

        let err = UnitCodec::default().decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::PayloadTooLarge(_)));
    }

    #[test]
    fn frame_length_header_is_big_endian() {
        let buf = encode_message(&Message::Startup { id: 0 });
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(buf.len() - HEADER_LEN, len);
    }

    #[test]
    fn unknown_action_keeps_the_envelope() {
        #[derive(Serialize)]
        struct OddResult<'a> {
            r#type: &'a str,
            id: u32,
            action: &'a str,
        }
        let wire = raw_frame(&OddResult {
            r#type: "result",
            id: 9,
            action: "explode",
        });

        let frame = UnitCodec::default()
            .decode(&mut BytesMut::from(&wire[..]))
            .unwrap()
            .unwrap();
        assert_eq!(frame.id(), 9);
        match frame {
            Frame::Unrecognized { envelope, error } => {
                assert_eq!(envelope.msg_type, "result");
                assert!(!error.is_empty());
            }
            other => panic!("expected unrecognized, got {other:?}"),
        }
    }

    #[test]
    fn payload_without_envelope_is_a_decode_error() {
        let wire = raw_frame(&42u32);
        let err = UnitCodec::default()
            .decode(&mut BytesMut::from(&wire[..]))
            .unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn blocking_reader_reads_consecutive_frames() {
        let mut wire = Vec::new();
        write_message(&mut wire, Message::Startup { id: 1 }).unwrap();
        write_message(
            &mut wire,
            Message::Error {
                id: 2,
                message: "bad".into(),
            },
        )
        .unwrap();

        let mut reader = FrameReader::new(std::io::Cursor::new(wire));
        assert_eq!(
            reader.read_frame().unwrap(),
            Frame::Message(Message::Startup { id: 1 })
        );
        assert_eq!(reader.read_frame().unwrap().id(), 2);
        assert!(matches!(reader.read_frame(), Err(CodecError::Closed)));
    }

    #[test]
    fn blocking_reader_eof_mid_frame() {
        let mut wire = Vec::new();
        write_message(&mut wire, Message::Startup { id: 1 }).unwrap();
        wire.truncate(wire.len() - 1);

        let mut reader = FrameReader::new(std::io::Cursor::new(wire));
        assert!(matches!(reader.read_frame(), Err(CodecError::Closed)));
    }
}
