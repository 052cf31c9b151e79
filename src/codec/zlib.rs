//! Zlib + PCM16 payloads
//!
//! Wire layout: `[u32 big-endian original size][zlib stream]`. The inflated
//! bytes are little-endian int16 samples.

use std::io::{self, Write};

use byteorder::{BigEndian, ByteOrder};
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

use super::pcm;

/// Largest original size accepted from the wire
pub const MAX_ORIGINAL_SIZE: usize = 1_000_000;

const SIZE_PREFIX: usize = 4;

/// Reusable inflate context
pub struct ZlibDecoder {
    inflater: Decompress,
    scratch: Vec<u8>,
}

impl std::fmt::Debug for ZlibDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZlibDecoder")
            .field("scratch_capacity", &self.scratch.capacity())
            .finish_non_exhaustive()
    }
}

impl Default for ZlibDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZlibDecoder {
    /// Create a decoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflater: Decompress::new(true),
            scratch: Vec::new(),
        }
    }

    /// Inflate a size-prefixed payload
    ///
    /// Returns `None` for a missing prefix, an implausible declared size,
    /// a corrupt stream, or an inflated length different from the declared one.
    pub fn inflate(&mut self, data: &[u8]) -> Option<&[u8]> {
        if data.len() < SIZE_PREFIX {
            return None;
        }
        let declared = BigEndian::read_u32(&data[..SIZE_PREFIX]) as usize;
        if declared == 0 || declared > MAX_ORIGINAL_SIZE {
            tracing::debug!(declared, "zlib payload with implausible size");
            return None;
        }

        self.inflater.reset(true);
        self.scratch.clear();
        // One spare byte so an over-long stream shows up as a mismatch
        self.scratch.resize(declared + 1, 0);

        let status = self
            .inflater
            .decompress(&data[SIZE_PREFIX..], &mut self.scratch, FlushDecompress::Finish)
            .map_err(|e| tracing::debug!("zlib inflate failed: {}", e))
            .ok()?;

        let produced = usize::try_from(self.inflater.total_out()).ok()?;
        if status != Status::StreamEnd || produced != declared {
            tracing::debug!(declared, produced, ?status, "zlib size mismatch");
            return None;
        }

        Some(&self.scratch[..declared])
    }

    /// Inflate and convert to float samples; empty on any failure
    pub fn decode(&mut self, data: &[u8]) -> Vec<f32> {
        self.inflate(data)
            .map(pcm::i16_le_to_f32)
            .unwrap_or_default()
    }
}

/// Compress raw bytes into the size-prefixed wire layout
///
/// # Errors
///
/// Returns an error if the input exceeds [`MAX_ORIGINAL_SIZE`] or the
/// encoder fails.
pub fn compress(raw: &[u8]) -> io::Result<Vec<u8>> {
    if raw.len() > MAX_ORIGINAL_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {} bytes exceeds zlib limit", raw.len()),
        ));
    }
    let mut out = Vec::with_capacity(SIZE_PREFIX + raw.len() / 2);
    // Bounded by MAX_ORIGINAL_SIZE above
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(raw.len() as u32).to_be_bytes());

    let mut encoder = ZlibEncoder::new(out, Compression::new(4));
    encoder.write_all(raw)?;
    encoder.finish()
}

/// Compress float samples as little-endian PCM16
///
/// # Errors
///
/// Returns an error if the encoded PCM exceeds [`MAX_ORIGINAL_SIZE`].
pub fn compress_pcm16(samples: &[f32]) -> io::Result<Vec<u8>> {
    compress(&pcm::f32_to_i16_le(samples))
}
