//! Frame codec for the stream transport
//!
//! Splits the inbound byte stream into frames and writes outbound frames.
//! A header with a bad magic number is skipped on its own; only a run of
//! them is reported as a desync. Frames above their type's payload ceiling
//! are discarded without closing the connection.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::header::{AudioFlags, FrameHeader, MessageType};
use crate::types::PayloadLimits;

/// Largest length a signed 32-bit field can carry
const MAX_SIGNED_LEN: u32 = 0x7FFF_FFFF;

/// A complete frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,
    /// Raw payload
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame, filling in the payload length
    #[must_use]
    pub fn new(msg_type: MessageType, flags: AudioFlags, timestamp: u32, payload: Bytes) -> Self {
        // Payloads are bounded by `PayloadLimits` long before u32::MAX
        #[allow(clippy::cast_possible_truncation)]
        let len = payload.len() as u32;
        Self {
            header: FrameHeader::new(msg_type, flags, timestamp, len),
            payload,
        }
    }

    /// Control frame carrying a JSON document
    #[must_use]
    pub fn control(json: String, flags: AudioFlags, timestamp: u32) -> Self {
        Self::new(MessageType::Control, flags, timestamp, Bytes::from(json))
    }

    /// Audio frame around an encoded audio payload
    #[must_use]
    pub fn audio(flags: AudioFlags, timestamp: u32, payload: Bytes) -> Self {
        Self::new(MessageType::Audio, flags, timestamp, payload)
    }

    /// Empty heartbeat frame
    #[must_use]
    pub fn heartbeat(flags: AudioFlags, timestamp: u32) -> Self {
        Self::new(MessageType::Heartbeat, flags, timestamp, Bytes::new())
    }

    /// Message type of this frame
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        self.header.message_type()
    }

    /// Total encoded size
    #[must_use]
    pub fn wire_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }
}

/// Why an inbound frame was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Header magic did not match
    BadMagic {
        /// Bad headers seen in a row, including this one
        consecutive: u32,
    },
    /// Payload length above the ceiling for its type
    Oversized {
        /// Raw message type
        msg_type: u8,
        /// Declared payload length
        len: u32,
    },
    /// Message type not understood by this client
    UnknownType(u8),
}

/// Item produced by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A frame ready for dispatch
    Frame(Frame),
    /// A frame that was dropped
    Skipped(SkipReason),
}

/// Fatal framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol desync after {consecutive} bad headers")]
    Desync { consecutive: u32 },
}

/// Codec turning the byte stream into [`InboundFrame`]s
#[derive(Debug, Clone)]
pub struct FrameCodec {
    limits: PayloadLimits,
    /// Consecutive bad-magic headers
    magic_errors: u32,
    /// Bytes of an oversized payload still to discard
    skip_remaining: usize,
    /// Header whose payload has not fully arrived yet
    pending: Option<FrameHeader>,
}

impl FrameCodec {
    /// Create a codec with the given payload limits
    #[must_use]
    pub fn new(limits: PayloadLimits) -> Self {
        Self {
            limits,
            magic_errors: 0,
            skip_remaining: 0,
            pending: None,
        }
    }

    /// Consecutive bad headers seen so far
    #[must_use]
    pub fn magic_errors(&self) -> u32 {
        self.magic_errors
    }

    fn limit_for(&self, msg_type: u8) -> u32 {
        match MessageType::from_byte(msg_type) {
            Some(MessageType::Audio) => self.limits.max_audio,
            _ => self.limits.max_control,
        }
    }

    fn bad_header(&mut self) -> Result<Option<InboundFrame>, FrameError> {
        self.magic_errors += 1;
        if self.magic_errors >= self.limits.max_magic_errors {
            return Err(FrameError::Desync {
                consecutive: self.magic_errors,
            });
        }
        Ok(Some(InboundFrame::Skipped(SkipReason::BadMagic {
            consecutive: self.magic_errors,
        })))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(PayloadLimits::default())
    }
}

impl Decoder for FrameCodec {
    type Item = InboundFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.skip_remaining > 0 {
            let n = self.skip_remaining.min(src.len());
            src.advance(n);
            self.skip_remaining -= n;
            if self.skip_remaining > 0 {
                return Ok(None);
            }
        }

        let header = if let Some(header) = self.pending {
            header
        } else {
            if src.len() < FrameHeader::SIZE {
                src.reserve(FrameHeader::SIZE - src.len());
                return Ok(None);
            }
            let Ok(header) = FrameHeader::decode(&src[..FrameHeader::SIZE]) else {
                return Ok(None);
            };
            src.advance(FrameHeader::SIZE);

            // A length with the sign bit set is garbage from a misaligned read
            if !header.has_valid_magic() || header.payload_len > MAX_SIGNED_LEN {
                return self.bad_header();
            }
            self.magic_errors = 0;

            if header.payload_len > self.limit_for(header.msg_type) {
                self.skip_remaining = header.payload_len as usize;
                let n = self.skip_remaining.min(src.len());
                src.advance(n);
                self.skip_remaining -= n;
                return Ok(Some(InboundFrame::Skipped(SkipReason::Oversized {
                    msg_type: header.msg_type,
                    len: header.payload_len,
                })));
            }
            header
        };

        let len = header.payload_len as usize;
        if src.len() < len {
            self.pending = Some(header);
            src.reserve(len - src.len());
            return Ok(None);
        }
        self.pending = None;
        let payload = src.split_to(len).freeze();

        if header.message_type().is_none() {
            return Ok(Some(InboundFrame::Skipped(SkipReason::UnknownType(
                header.msg_type,
            ))));
        }

        Ok(Some(InboundFrame::Frame(Frame { header, payload })))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.wire_len());
        item.header.encode_into(dst);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}
