//! Codec layer: compressed payloads to float PCM
//!
//! Nothing here returns an error to the caller. A payload that cannot be
//! decoded yields an empty sample vector and bumps a failure counter.

pub mod pcm;
pub mod zlib;

#[cfg(feature = "opus")]
pub mod opus;

#[cfg(test)]
mod tests;

pub use zlib::ZlibDecoder;

/// Sample rate the Opus decoder runs at
pub const OPUS_SAMPLE_RATE: u32 = 48_000;

/// Channel count the Opus decoder runs with
pub const OPUS_CHANNELS: u16 = 2;

/// Compressed payload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// Size-prefixed zlib stream of little-endian PCM16
    Zlib,
    /// Opus packet
    Opus,
}

/// Decode counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Payloads decoded to at least one sample
    pub decoded: u64,
    /// Payloads that produced nothing
    pub failures: u64,
    /// Opus payloads routed to zlib because no Opus decoder was available
    pub opus_fallbacks: u64,
}

/// Stateful decoder holding the reusable inflate (and Opus) contexts
#[derive(Debug, Default)]
pub struct AudioDecoder {
    zlib: ZlibDecoder,
    #[cfg(feature = "opus")]
    opus: Option<OpusHandle>,
    stats: DecoderStats,
}

#[cfg(feature = "opus")]
struct OpusHandle(opus::OpusDecoder);

#[cfg(feature = "opus")]
impl std::fmt::Debug for OpusHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OpusDecoder")
    }
}

impl AudioDecoder {
    /// Create a decoder, initialising Opus when it is compiled in
    #[must_use]
    pub fn new() -> Self {
        #[cfg(feature = "opus")]
        {
            let opus = match opus::OpusDecoder::new(OPUS_SAMPLE_RATE, OPUS_CHANNELS) {
                Ok(d) => Some(OpusHandle(d)),
                Err(e) => {
                    tracing::warn!("Opus decoder unavailable, falling back to zlib: {}", e);
                    None
                }
            };
            Self {
                zlib: ZlibDecoder::new(),
                opus,
                stats: DecoderStats::default(),
            }
        }
        #[cfg(not(feature = "opus"))]
        {
            Self::default()
        }
    }

    /// Whether Opus payloads are decoded natively
    #[must_use]
    pub fn opus_available(&self) -> bool {
        #[cfg(feature = "opus")]
        {
            self.opus.is_some()
        }
        #[cfg(not(feature = "opus"))]
        {
            false
        }
    }

    /// Decode a compressed payload to interleaved float samples
    ///
    /// Returns an empty vector if the payload is invalid.
    pub fn decode(&mut self, data: &[u8], method: CompressionMethod) -> Vec<f32> {
        let samples = match method {
            CompressionMethod::Zlib => self.zlib.decode(data),
            CompressionMethod::Opus => self.decode_opus(data),
        };

        if samples.is_empty() {
            self.stats.failures += 1;
        } else {
            self.stats.decoded += 1;
        }
        samples
    }

    fn decode_opus(&mut self, data: &[u8]) -> Vec<f32> {
        #[cfg(feature = "opus")]
        if let Some(OpusHandle(decoder)) = self.opus.as_mut() {
            return decoder.decode(data).unwrap_or_else(|e| {
                tracing::debug!("{}", e);
                Vec::new()
            });
        }

        self.stats.opus_fallbacks += 1;
        self.zlib.decode(data)
    }

    /// Decode counters so far
    #[must_use]
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }
}
