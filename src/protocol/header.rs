//! Fixed 16-byte frame header of the stream transport

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Frame magic number
pub const MAGIC: u32 = 0xA1D1_0A7C;

/// Protocol version spoken by this client
pub const PROTOCOL_VERSION: u16 = 2;

/// Frame message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Binary audio payload
    Audio = 0x01,
    /// UTF-8 JSON control payload
    Control = 0x02,
    /// Keep-alive, payload ignored
    Heartbeat = 0x03,
}

impl MessageType {
    /// Parse from byte value
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Audio),
            0x02 => Some(Self::Control),
            0x03 => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// Payload encoding and mode flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AudioFlags(u8);

impl AudioFlags {
    /// 32-bit float samples
    pub const FLOAT32: Self = Self(0x01);
    /// 16-bit signed samples
    pub const INT16: Self = Self(0x02);
    /// Zlib-compressed PCM16 payload
    pub const ZLIB: Self = Self(0x04);
    /// Opus payload
    pub const OPUS: Self = Self(0x08);
    /// RF / persistent session marker
    pub const RF_MODE: Self = Self(0x80);

    /// Wrap raw flag bits
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw flag bits
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Check whether every bit of `other` is set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for AudioFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Header decode errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },
}

/// Frame header
///
/// The message type byte is kept raw so that unknown types survive a
/// decode/encode cycle and can be skipped by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Magic number (valid frames carry [`MAGIC`])
    pub magic: u32,
    /// Protocol version
    pub version: u16,
    /// Raw message type byte
    pub msg_type: u8,
    /// Flag bits
    pub flags: AudioFlags,
    /// Sender clock in milliseconds, truncated to 32 bits
    pub timestamp: u32,
    /// Payload length in bytes
    pub payload_len: u32,
}

impl FrameHeader {
    /// Encoded header size
    pub const SIZE: usize = 16;

    /// Create a header with the protocol magic and version
    #[must_use]
    pub fn new(msg_type: MessageType, flags: AudioFlags, timestamp: u32, payload_len: u32) -> Self {
        Self {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            msg_type: msg_type as u8,
            flags,
            timestamp,
            payload_len,
        }
    }

    /// Parsed message type, `None` for unknown values
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_byte(self.msg_type)
    }

    /// Whether the magic number matches the protocol
    #[must_use]
    pub fn has_valid_magic(&self) -> bool {
        self.magic == MAGIC
    }

    /// Encode header to bytes
    #[must_use]
    pub fn encode(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..6].copy_from_slice(&self.version.to_be_bytes());
        buf[6] = self.msg_type;
        buf[7] = self.flags.bits();
        buf[8..12].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[12..16].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// Append the encoded header to a buffer
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(Self::SIZE);
        dst.put_u32(self.magic);
        dst.put_u16(self.version);
        dst.put_u8(self.msg_type);
        dst.put_u8(self.flags.bits());
        dst.put_u32(self.timestamp);
        dst.put_u32(self.payload_len);
    }

    /// Decode header from bytes
    ///
    /// Magic and version are not validated here; the frame codec decides
    /// how to treat a mismatch.
    ///
    /// # Errors
    ///
    /// Returns `HeaderError` if the buffer is shorter than 16 bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }

        Ok(Self {
            magic: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            version: u16::from_be_bytes([buf[4], buf[5]]),
            msg_type: buf[6],
            flags: AudioFlags::from_bits(buf[7]),
            timestamp: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            payload_len: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }
}

/// Wire timestamp: milliseconds since the epoch folded into the positive `i32` range
#[must_use]
pub fn wire_timestamp(unix_millis: u64) -> u32 {
    // i32::MAX fits in u32
    #[allow(clippy::cast_possible_truncation)]
    let folded = (unix_millis % i32::MAX as u64) as u32;
    folded
}
