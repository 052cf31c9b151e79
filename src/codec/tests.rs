use proptest::prelude::*;

use super::pcm::{f32_to_i16, i16_to_f32};
use super::zlib::{self, ZlibDecoder};
use super::{AudioDecoder, CompressionMethod};

#[test]
fn test_i16_scale_endpoints() {
    assert!((i16_to_f32(i16::MIN) - -1.0).abs() < f32::EPSILON);
    assert!(i16_to_f32(i16::MAX) < 1.0);
    assert_eq!(f32_to_i16(1.5), i16::MAX);
    assert_eq!(f32_to_i16(-1.5), i16::MIN);
    assert_eq!(f32_to_i16(f32::NAN), 0);
}

#[test]
fn test_pcm_byte_orders() {
    // 0x0100 = 256
    let be = super::pcm::i16_be_to_f32(&[0x01, 0x00]);
    let le = super::pcm::i16_le_to_f32(&[0x00, 0x01]);
    assert_eq!(be, le);
    assert!((be[0] - 256.0 / 32768.0).abs() < f32::EPSILON);

    let f = super::pcm::f32_be_to_f32(&0.25f32.to_be_bytes());
    assert_eq!(f, vec![0.25]);
}

#[test]
fn test_deinterleave_rejects_ragged() {
    assert!(super::pcm::deinterleave(&[0.0; 5], 2).is_none());
    assert!(super::pcm::deinterleave(&[0.0; 4], 0).is_none());

    let split = super::pcm::deinterleave(&[1.0, 2.0, 3.0, 4.0], 2).unwrap();
    assert_eq!(split, vec![vec![1.0, 3.0], vec![2.0, 4.0]]);
    assert_eq!(super::pcm::interleave(&split), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_zlib_decode_samples() {
    let samples: Vec<f32> = (0..64).map(|i| (i as f32 - 32.0) / 64.0).collect();
    let payload = zlib::compress_pcm16(&samples).unwrap();

    let mut decoder = ZlibDecoder::new();
    let decoded = decoder.decode(&payload);
    assert_eq!(decoded.len(), samples.len());
    for (a, b) in decoded.iter().zip(&samples) {
        assert!((a - b).abs() <= 1.0 / 32768.0);
    }
}

#[test]
fn test_zlib_declared_size_mismatch_is_empty() {
    let mut payload = zlib::compress(&[1, 2, 3, 4, 5, 6]).unwrap();
    // Claim 8 bytes instead of 6
    payload[..4].copy_from_slice(&8u32.to_be_bytes());
    let mut decoder = ZlibDecoder::new();
    assert!(decoder.inflate(&payload).is_none());

    // Claim fewer bytes than the stream holds
    payload[..4].copy_from_slice(&4u32.to_be_bytes());
    assert!(decoder.inflate(&payload).is_none());
    assert!(decoder.decode(&payload).is_empty());
}

#[test]
fn test_zlib_rejects_implausible_sizes() {
    let mut decoder = ZlibDecoder::new();
    assert!(decoder.inflate(&[]).is_none());
    assert!(decoder.inflate(&[0, 0, 0]).is_none());
    assert!(decoder.inflate(&[0, 0, 0, 0, 0x78, 0x9c]).is_none());

    let mut huge = 2_000_000u32.to_be_bytes().to_vec();
    huge.extend_from_slice(&[0x78, 0x9c, 0x03, 0x00]);
    assert!(decoder.inflate(&huge).is_none());
}

#[test]
fn test_zlib_corrupt_stream_is_empty() {
    let mut payload = zlib::compress(&[7u8; 512]).unwrap();
    let len = payload.len();
    payload[len / 2] ^= 0xFF;
    payload.truncate(len - 2);

    let mut decoder = ZlibDecoder::new();
    assert!(decoder.decode(&payload).is_empty());

    // Context is reusable after a failure
    let good = zlib::compress(&[1, 0, 2, 0]).unwrap();
    assert_eq!(decoder.inflate(&good), Some(&[1u8, 0, 2, 0][..]));
}

#[test]
fn test_compress_rejects_oversized_input() {
    let raw = vec![0u8; zlib::MAX_ORIGINAL_SIZE + 1];
    assert!(zlib::compress(&raw).is_err());
}

#[cfg(not(feature = "opus"))]
#[test]
fn test_opus_falls_back_to_zlib() {
    let payload = zlib::compress_pcm16(&[0.5, -0.5]).unwrap();
    let mut decoder = AudioDecoder::new();
    assert!(!decoder.opus_available());

    let decoded = decoder.decode(&payload, CompressionMethod::Opus);
    assert_eq!(decoded, vec![0.5, -0.5]);
    assert_eq!(decoder.stats().opus_fallbacks, 1);
    assert_eq!(decoder.stats().decoded, 1);
}

#[test]
fn test_decoder_counts_failures() {
    let mut decoder = AudioDecoder::new();
    assert!(decoder.decode(&[0xde, 0xad], CompressionMethod::Zlib).is_empty());
    assert_eq!(decoder.stats().failures, 1);
    assert_eq!(decoder.stats().decoded, 0);
}

proptest! {
    #[test]
    fn test_zlib_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 1..4096)) {
        let payload = zlib::compress(&bytes).unwrap();
        let mut decoder = ZlibDecoder::new();
        prop_assert_eq!(decoder.inflate(&payload), Some(&bytes[..]));
    }

    #[test]
    fn test_zlib_no_panic_on_random_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut decoder = ZlibDecoder::new();
        let _ = decoder.decode(&bytes);
    }

    #[test]
    fn test_i16_roundtrip_within_one_lsb(s in any::<i16>()) {
        let back = f32_to_i16(i16_to_f32(s));
        prop_assert!((i32::from(back) - i32::from(s)).abs() <= 1);
    }
}
