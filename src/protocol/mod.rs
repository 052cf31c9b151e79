//! Wire protocol: frame header, frame codec, control and audio payloads

#![allow(missing_docs)]

pub mod audio;
pub mod codec;
pub mod control;
pub mod datagram;
pub mod header;
pub mod json;

#[cfg(test)]
mod tests;

pub use audio::{AudioPacket, PayloadEncoding, decode_audio_payload, encode_audio_payload};
pub use codec::{Frame, FrameCodec, FrameError, InboundFrame, SkipReason};
pub use control::{ControlMessage, Handshake, MixUpdate, OutboundMessage, ServerInfo};
pub use header::{AudioFlags, FrameHeader, MAGIC, MessageType, PROTOCOL_VERSION};
