use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::codec::*;
use crate::protocol::header::{AudioFlags, FrameHeader, MessageType};
use crate::types::PayloadLimits;

fn encoded(frame: Frame) -> BytesMut {
    let mut buf = BytesMut::new();
    FrameCodec::default().encode(frame, &mut buf).unwrap();
    buf
}

fn garbage_header() -> [u8; 16] {
    let mut bytes = FrameHeader::new(MessageType::Audio, AudioFlags::INT16, 0, 4).encode();
    bytes[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
    bytes
}

#[test]
fn test_decode_complete_frame() {
    let frame = Frame::control("{\"type\":\"x\"}".to_string(), AudioFlags::RF_MODE, 42);
    let mut buf = encoded(frame.clone());

    let mut codec = FrameCodec::default();
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(InboundFrame::Frame(frame))
    );
    assert!(buf.is_empty());
}

#[test]
fn test_decode_partial_frame_waits() {
    let frame = Frame::audio(AudioFlags::INT16, 1, Bytes::from_static(&[1, 2, 3, 4, 5, 6]));
    let full = encoded(frame.clone());

    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&full[..10]);
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(&full[10..18]);
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(&full[18..]);
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(InboundFrame::Frame(frame))
    );
}

#[test]
fn test_bad_magic_is_tolerated_then_fatal() {
    let mut codec = FrameCodec::new(PayloadLimits::default());
    let mut buf = BytesMut::new();
    buf.put_slice(&garbage_header());
    buf.put_slice(&garbage_header());
    buf.put_slice(&garbage_header());

    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(InboundFrame::Skipped(SkipReason::BadMagic { consecutive: 1 }))
    );
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(InboundFrame::Skipped(SkipReason::BadMagic { consecutive: 2 }))
    );
    assert!(matches!(
        codec.decode(&mut buf),
        Err(FrameError::Desync { consecutive: 3 })
    ));
}

#[test]
fn test_good_frame_resets_magic_budget() {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::new();
    buf.put_slice(&garbage_header());
    buf.put_slice(&garbage_header());
    buf.extend_from_slice(&encoded(Frame::heartbeat(AudioFlags::default(), 0)));
    buf.put_slice(&garbage_header());

    assert!(matches!(codec.decode(&mut buf), Ok(Some(InboundFrame::Skipped(_)))));
    assert!(matches!(codec.decode(&mut buf), Ok(Some(InboundFrame::Skipped(_)))));
    assert!(matches!(codec.decode(&mut buf), Ok(Some(InboundFrame::Frame(_)))));
    assert_eq!(codec.magic_errors(), 0);
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(InboundFrame::Skipped(SkipReason::BadMagic { consecutive: 1 }))
    );
}

#[test]
fn test_oversized_frame_is_skipped_not_fatal() {
    let limits = PayloadLimits {
        max_control: 8,
        ..PayloadLimits::default()
    };
    let mut codec = FrameCodec::new(limits);

    let big = Frame::control("x".repeat(20), AudioFlags::default(), 0);
    let small = Frame::control("{}".to_string(), AudioFlags::default(), 0);
    let big_bytes = encoded(big);

    // Oversized payload arrives in two pieces
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&big_bytes[..20]);
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(InboundFrame::Skipped(SkipReason::Oversized {
            msg_type: MessageType::Control as u8,
            len: 20
        }))
    );
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(&big_bytes[20..]);
    buf.extend_from_slice(&encoded(small.clone()));
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(InboundFrame::Frame(small))
    );
}

#[test]
fn test_audio_limit_applies_to_audio_only() {
    let limits = PayloadLimits {
        max_control: 4,
        max_audio: 64,
        ..PayloadLimits::default()
    };
    let mut codec = FrameCodec::new(limits);
    let audio = Frame::audio(AudioFlags::INT16, 0, Bytes::from(vec![0u8; 32]));
    let mut buf = encoded(audio.clone());

    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(InboundFrame::Frame(audio))
    );
}

#[test]
fn test_unknown_type_is_skipped() {
    let mut frame = Frame::heartbeat(AudioFlags::default(), 0);
    frame.header.msg_type = 0x7E;
    let mut buf = encoded(frame);

    assert_eq!(
        FrameCodec::default().decode(&mut buf).unwrap(),
        Some(InboundFrame::Skipped(SkipReason::UnknownType(0x7E)))
    );
}

#[test]
fn test_negative_length_counts_as_bad_header() {
    let mut bytes = FrameHeader::new(MessageType::Audio, AudioFlags::INT16, 0, 0).encode();
    bytes[12..16].copy_from_slice(&0xFFFF_FFF0u32.to_be_bytes());
    let mut buf = BytesMut::from(&bytes[..]);

    assert_eq!(
        FrameCodec::default().decode(&mut buf).unwrap(),
        Some(InboundFrame::Skipped(SkipReason::BadMagic { consecutive: 1 }))
    );
}

#[tokio::test]
async fn test_framed_read_across_split_reads() {
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    let control = Frame::control(
        "{\"type\":\"heartbeat_response\"}".to_string(),
        AudioFlags::default(),
        7,
    );
    let audio = Frame::audio(AudioFlags::INT16, 8, Bytes::from_static(&[0, 1, 0, 2]));
    let mut wire = encoded(control.clone());
    wire.extend_from_slice(&encoded(audio.clone()));

    // Header and payload boundaries land mid-read
    let mock = tokio_test::io::Builder::new()
        .read(&wire[..5])
        .read(&wire[5..23])
        .read(&wire[23..])
        .build();
    let mut frames = FramedRead::new(mock, FrameCodec::default());

    assert_eq!(frames.next().await.unwrap().unwrap(), InboundFrame::Frame(control));
    assert_eq!(frames.next().await.unwrap().unwrap(), InboundFrame::Frame(audio));
    assert!(frames.next().await.is_none());
}
