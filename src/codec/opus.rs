//! Opus payloads, decoded through libopus

use ::opus::{Channels, Decoder};
use thiserror::Error;

/// Opus decoder errors
#[derive(Debug, Error)]
pub enum OpusError {
    #[error("decoder init failed: {0}")]
    Init(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// Opus decoder wrapper with a reusable output buffer
pub struct OpusDecoder {
    decoder: Decoder,
    channels: usize,
    decode_buffer: Vec<f32>,
}

impl OpusDecoder {
    /// Create a decoder for the given rate and channel count (1 or 2)
    ///
    /// # Errors
    ///
    /// Returns `OpusError::Init` for unsupported channel counts or if
    /// libopus rejects the configuration.
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, OpusError> {
        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            n => return Err(OpusError::Init(format!("unsupported channel count: {n}"))),
        };
        let decoder =
            Decoder::new(sample_rate, opus_channels).map_err(|e| OpusError::Init(e.to_string()))?;

        // 120ms at 48kHz stereo
        let decode_buffer = vec![0.0f32; 48_000 * 2 * 120 / 1000];

        Ok(Self {
            decoder,
            channels: usize::from(channels),
            decode_buffer,
        })
    }

    /// Decode one packet into interleaved float samples
    ///
    /// # Errors
    ///
    /// Returns `OpusError::Decode` if libopus rejects the packet.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>, OpusError> {
        let frames = self
            .decoder
            .decode_float(data, &mut self.decode_buffer, false)
            .map_err(|e| OpusError::Decode(e.to_string()))?;
        let total = (frames * self.channels).min(self.decode_buffer.len());
        Ok(self.decode_buffer[..total].to_vec())
    }
}
