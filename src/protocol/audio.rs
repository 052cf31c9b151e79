//! Audio payloads
//!
//! After the frame header an audio payload starts with a big-endian
//! `i64` sample position and a `u32` channel mask, followed by the
//! interleaved samples of every channel set in the mask, in ascending
//! channel order.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use super::header::AudioFlags;
use crate::codec::{AudioDecoder, CompressionMethod, pcm, zlib};
use crate::error::LinkError;

/// Bytes before the sample data
pub const AUDIO_PREFIX_LEN: usize = 12;

/// Highest channel index a mask can carry
pub const MAX_MASK_CHANNELS: u32 = 32;

/// Sample encoding selected by the flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// Big-endian float32
    Float32,
    /// Big-endian int16
    Int16,
    /// Delegated to the codec layer
    Compressed(CompressionMethod),
}

impl PayloadEncoding {
    /// Pick the encoding for a set of flags
    ///
    /// Opus wins over zlib, zlib over int16; float32 is the fallback.
    #[must_use]
    pub fn from_flags(flags: AudioFlags) -> Self {
        if flags.contains(AudioFlags::OPUS) {
            Self::Compressed(CompressionMethod::Opus)
        } else if flags.contains(AudioFlags::ZLIB) {
            Self::Compressed(CompressionMethod::Zlib)
        } else if flags.contains(AudioFlags::INT16) {
            Self::Int16
        } else {
            Self::Float32
        }
    }

    /// Flag bits announcing this encoding
    #[must_use]
    pub fn flags(self) -> AudioFlags {
        match self {
            Self::Float32 => AudioFlags::FLOAT32,
            Self::Int16 => AudioFlags::INT16,
            Self::Compressed(CompressionMethod::Zlib) => AudioFlags::ZLIB,
            Self::Compressed(CompressionMethod::Opus) => AudioFlags::OPUS,
        }
    }
}

/// A decoded block of multi-channel audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    /// Position of the first frame in the server's sample clock
    pub sample_position: i64,
    /// Channel indices, ascending
    pub channels: Vec<u32>,
    /// Samples per channel, parallel to `channels`
    pub samples: Vec<Vec<f32>>,
    /// Sent in RF (persistent) mode
    pub rf_mode: bool,
}

impl AudioPacket {
    /// Number of channels
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames in each channel
    #[must_use]
    pub fn samples_per_channel(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }

    /// Samples of one channel, if present
    #[must_use]
    pub fn channel(&self, channel: u32) -> Option<&[f32]> {
        self.channels
            .iter()
            .position(|&c| c == channel)
            .map(|i| self.samples[i].as_slice())
    }

    /// Absolute peak per channel
    #[must_use]
    pub fn peaks(&self) -> Vec<(u32, f32)> {
        self.channels
            .iter()
            .zip(&self.samples)
            .map(|(&ch, s)| (ch, s.iter().fold(0.0f32, |m, x| m.max(x.abs()))))
            .collect()
    }
}

/// Channel indices set in a mask, ascending
#[must_use]
pub fn channels_from_mask(mask: u32) -> Vec<u32> {
    (0..MAX_MASK_CHANNELS)
        .filter(|bit| mask & (1 << bit) != 0)
        .collect()
}

/// Mask for a set of channels; indices of 32 and above are ignored
#[must_use]
pub fn mask_from_channels(channels: &[u32]) -> u32 {
    channels
        .iter()
        .filter(|&&c| c < MAX_MASK_CHANNELS)
        .fold(0, |mask, &c| mask | (1 << c))
}

/// Decode an audio payload
///
/// Returns `None` for a truncated prefix, an empty channel mask, a payload
/// that decodes to nothing, or a sample count that does not divide evenly
/// by the channel count.
pub fn decode_audio_payload(
    payload: &[u8],
    flags: AudioFlags,
    decoder: &mut AudioDecoder,
) -> Option<AudioPacket> {
    if payload.len() < AUDIO_PREFIX_LEN {
        return None;
    }
    let sample_position = BigEndian::read_i64(&payload[0..8]);
    let mask = BigEndian::read_u32(&payload[8..12]);
    let (channels, samples) =
        decode_channels(mask, &payload[AUDIO_PREFIX_LEN..], flags, decoder)?;

    Some(AudioPacket {
        sample_position,
        channels,
        samples,
        rf_mode: flags.contains(AudioFlags::RF_MODE),
    })
}

/// Decode sample data for the channels in `mask` into per-channel vectors
pub(crate) fn decode_channels(
    mask: u32,
    body: &[u8],
    flags: AudioFlags,
    decoder: &mut AudioDecoder,
) -> Option<(Vec<u32>, Vec<Vec<f32>>)> {
    let channels = channels_from_mask(mask);
    if channels.is_empty() {
        return None;
    }

    let interleaved = match PayloadEncoding::from_flags(flags) {
        PayloadEncoding::Float32 => pcm::f32_be_to_f32(body),
        PayloadEncoding::Int16 => pcm::i16_be_to_f32(body),
        PayloadEncoding::Compressed(method) => decoder.decode(body, method),
    };
    if interleaved.is_empty() {
        return None;
    }

    let samples = pcm::deinterleave(&interleaved, channels.len())?;
    Some((channels, samples))
}

/// Encode an audio payload from interleaved samples
///
/// Used by test fixtures and loopback tools; the client never sends audio.
///
/// # Errors
///
/// Returns `LinkError::InvalidParameter` for an empty channel set,
/// misaligned samples, or the Opus encoding, which this crate only decodes.
pub fn encode_audio_payload(
    sample_position: i64,
    channels: &[u32],
    interleaved: &[f32],
    encoding: PayloadEncoding,
) -> Result<Bytes, LinkError> {
    let mask = mask_from_channels(channels);
    let count = channels_from_mask(mask).len();
    if count == 0 || interleaved.len() % count != 0 {
        return Err(LinkError::InvalidParameter {
            name: "interleaved".to_string(),
            message: format!("{} samples for {count} channels", interleaved.len()),
        });
    }

    let body = match encoding {
        PayloadEncoding::Float32 => pcm::f32_to_f32_be(interleaved),
        PayloadEncoding::Int16 => pcm::f32_to_i16_be(interleaved),
        PayloadEncoding::Compressed(CompressionMethod::Zlib) => {
            zlib::compress_pcm16(interleaved)?
        }
        PayloadEncoding::Compressed(CompressionMethod::Opus) => {
            return Err(LinkError::InvalidParameter {
                name: "encoding".to_string(),
                message: "opus encoding is not supported".to_string(),
            });
        }
    };

    let mut buf = BytesMut::with_capacity(AUDIO_PREFIX_LEN + body.len());
    buf.put_i64(sample_position);
    buf.put_u32(mask);
    buf.extend_from_slice(&body);
    Ok(buf.freeze())
}
