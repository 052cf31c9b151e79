//! Datagram transport framing
//!
//! Each UDP datagram carries a 32-byte big-endian header followed by the
//! sample data. The sequence number lets the jitter buffer restore order.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::audio::{AudioPacket, decode_channels, mask_from_channels};
use super::header::{AudioFlags, MessageType};
use crate::codec::{AudioDecoder, pcm};

/// Datagram magic number
pub const DATAGRAM_MAGIC: u32 = 0xA1D1_0A7D;

/// Largest datagram that fits an Ethernet MTU without fragmentation
pub const MAX_DATAGRAM: usize = 1472;

/// Datagram decode errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatagramError {
    #[error("datagram too small: {0} bytes")]
    TooSmall(usize),

    #[error("bad datagram magic: 0x{0:08x}")]
    BadMagic(u32),
}

/// Datagram header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    /// Per-sender sequence number
    pub sequence: u32,
    /// Sender clock in milliseconds
    pub timestamp: u64,
    /// Position of the first frame
    pub sample_position: i64,
    /// Channels carried
    pub channel_mask: u32,
    /// Raw message type byte
    pub packet_type: u8,
    /// Encoding and mode flags
    pub flags: AudioFlags,
    /// Short hash of the addressed client id
    pub client_hash: u16,
}

impl DatagramHeader {
    /// Encoded header size
    pub const SIZE: usize = 32;

    /// Encode header to bytes
    #[must_use]
    pub fn encode(&self) -> [u8; 32] {
        let mut buf = [0u8; 32];
        buf[0..4].copy_from_slice(&DATAGRAM_MAGIC.to_be_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_be_bytes());
        buf[8..16].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[16..24].copy_from_slice(&self.sample_position.to_be_bytes());
        buf[24..28].copy_from_slice(&self.channel_mask.to_be_bytes());
        buf[28] = self.packet_type;
        buf[29] = self.flags.bits();
        buf[30..32].copy_from_slice(&self.client_hash.to_be_bytes());
        buf
    }

    /// Decode header from bytes
    ///
    /// # Errors
    ///
    /// Returns `DatagramError` if the buffer is short or the magic is wrong.
    pub fn decode(buf: &[u8]) -> Result<Self, DatagramError> {
        if buf.len() < Self::SIZE {
            return Err(DatagramError::TooSmall(buf.len()));
        }
        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != DATAGRAM_MAGIC {
            return Err(DatagramError::BadMagic(magic));
        }

        let mut u64_bytes = [0u8; 8];
        u64_bytes.copy_from_slice(&buf[8..16]);
        let timestamp = u64::from_be_bytes(u64_bytes);
        u64_bytes.copy_from_slice(&buf[16..24]);
        let sample_position = i64::from_be_bytes(u64_bytes);

        Ok(Self {
            sequence: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            timestamp,
            sample_position,
            channel_mask: u32::from_be_bytes([buf[24], buf[25], buf[26], buf[27]]),
            packet_type: buf[28],
            flags: AudioFlags::from_bits(buf[29]),
            client_hash: u16::from_be_bytes([buf[30], buf[31]]),
        })
    }
}

/// 16-bit FNV-1a fold of a client id, used to address datagrams
#[must_use]
pub fn client_hash(client_id: &str) -> u16 {
    let hash = client_id
        .bytes()
        .fold(0x811c_9dc5u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193));
    // Fold the high half in so both halves contribute
    #[allow(clippy::cast_possible_truncation)]
    let folded = ((hash >> 16) ^ (hash & 0xFFFF)) as u16;
    folded
}

/// Decode an audio datagram into its header and samples
///
/// Returns `None` for non-audio datagrams or undecodable payloads.
pub fn decode_audio_datagram(
    buf: &[u8],
    decoder: &mut AudioDecoder,
) -> Option<(DatagramHeader, AudioPacket)> {
    let header = DatagramHeader::decode(buf).ok()?;
    if MessageType::from_byte(header.packet_type) != Some(MessageType::Audio) {
        return None;
    }
    let (channels, samples) = decode_channels(
        header.channel_mask,
        &buf[DatagramHeader::SIZE..],
        header.flags,
        decoder,
    )?;

    Some((
        header,
        AudioPacket {
            sample_position: header.sample_position,
            channels,
            samples,
            rf_mode: header.flags.contains(AudioFlags::RF_MODE),
        },
    ))
}

/// Build an int16 audio datagram (test fixtures and loopback tools)
#[must_use]
pub fn encode_audio_datagram(
    sequence: u32,
    timestamp: u64,
    sample_position: i64,
    channels: &[u32],
    interleaved: &[f32],
    client_hash: u16,
) -> Bytes {
    let header = DatagramHeader {
        sequence,
        timestamp,
        sample_position,
        channel_mask: mask_from_channels(channels),
        packet_type: MessageType::Audio as u8,
        flags: AudioFlags::INT16,
        client_hash,
    };
    let body = pcm::f32_to_i16_be(interleaved);
    let mut buf = BytesMut::with_capacity(DatagramHeader::SIZE + body.len());
    buf.put_slice(&header.encode());
    buf.put_slice(&body);
    buf.freeze()
}
