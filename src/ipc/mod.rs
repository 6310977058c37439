//! Plugin unit wire protocol: MessagePack framing.

pub mod codec;
pub mod protocol;
