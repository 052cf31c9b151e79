//! PCM sample conversion
//!
//! Int16 samples map to float by dividing by 32768, so `-32768` lands
//! exactly on `-1.0` and `32767` just below `1.0`. The reverse direction
//! rounds and clamps.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Scale between int16 and float samples
pub const I16_SCALE: f32 = 32768.0;

/// Convert one int16 sample to float
#[must_use]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / I16_SCALE
}

/// Convert one float sample to int16, clamping out-of-range input
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn f32_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * I16_SCALE).round().clamp(-32768.0, 32767.0) as i16
}

/// Decode big-endian int16 samples; a trailing odd byte is ignored
#[must_use]
pub fn i16_be_to_f32(input: &[u8]) -> Vec<f32> {
    input
        .chunks_exact(2)
        .map(|bytes| i16_to_f32(BigEndian::read_i16(bytes)))
        .collect()
}

/// Decode little-endian int16 samples; a trailing odd byte is ignored
#[must_use]
pub fn i16_le_to_f32(input: &[u8]) -> Vec<f32> {
    input
        .chunks_exact(2)
        .map(|bytes| i16_to_f32(LittleEndian::read_i16(bytes)))
        .collect()
}

/// Decode big-endian float32 samples; trailing partial samples are ignored
#[must_use]
pub fn f32_be_to_f32(input: &[u8]) -> Vec<f32> {
    input.chunks_exact(4).map(BigEndian::read_f32).collect()
}

/// Encode float samples as big-endian int16
#[must_use]
pub fn f32_to_i16_be(input: &[f32]) -> Vec<u8> {
    let mut out = vec![0u8; input.len() * 2];
    for (chunk, &sample) in out.chunks_exact_mut(2).zip(input) {
        BigEndian::write_i16(chunk, f32_to_i16(sample));
    }
    out
}

/// Encode float samples as little-endian int16
#[must_use]
pub fn f32_to_i16_le(input: &[f32]) -> Vec<u8> {
    let mut out = vec![0u8; input.len() * 2];
    for (chunk, &sample) in out.chunks_exact_mut(2).zip(input) {
        LittleEndian::write_i16(chunk, f32_to_i16(sample));
    }
    out
}

/// Encode float samples as big-endian float32
#[must_use]
pub fn f32_to_f32_be(input: &[f32]) -> Vec<u8> {
    let mut out = vec![0u8; input.len() * 4];
    for (chunk, &sample) in out.chunks_exact_mut(4).zip(input) {
        BigEndian::write_f32(chunk, sample);
    }
    out
}

/// Split interleaved samples into one vector per channel
///
/// Returns `None` when the sample count is not a multiple of `channels`.
#[must_use]
pub fn deinterleave(interleaved: &[f32], channels: usize) -> Option<Vec<Vec<f32>>> {
    if channels == 0 || interleaved.len() % channels != 0 {
        return None;
    }
    let frames = interleaved.len() / channels;
    let mut out = vec![Vec::with_capacity(frames); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (dst, &sample) in out.iter_mut().zip(frame) {
            dst.push(sample);
        }
    }
    Some(out)
}

/// Interleave per-channel vectors of equal length
#[must_use]
pub fn interleave(channels: &[Vec<f32>]) -> Vec<f32> {
    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * channels.len());
    for i in 0..frames {
        for ch in channels {
            out.push(ch[i]);
        }
    }
    out
}
