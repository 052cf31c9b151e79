use std::sync::Arc;

use super::*;
use crate::audio::{RingBufferBackend, StreamKey};
use crate::audio::dsp::db_to_linear;
use crate::mixer::{ChannelChange, MixerState, UpdateOrigin};
use crate::protocol::AudioPacket;
use crate::testing::RecordingBackend;
use crate::types::{RenderConfig, RenderMode};

fn engine_with(backend: Arc<RecordingBackend>, config: RenderConfig) -> RenderEngine {
    RenderEngine::new(backend, Arc::new(MixerState::default()), config)
}

fn engine() -> (Arc<RecordingBackend>, RenderEngine) {
    let backend = Arc::new(RecordingBackend::new());
    let engine = engine_with(Arc::clone(&backend), RenderConfig::default());
    (backend, engine)
}

#[test]
fn test_duplicate_position_written_once() {
    let (backend, engine) = engine();
    let block = vec![0.1; 64];

    assert_eq!(engine.write(0, &block, 1000), WriteOutcome::Written { frames: 64 });
    assert_eq!(engine.write(0, &block, 1000), WriteOutcome::Duplicate);

    let stream = backend.stream(StreamKey::Channel(0)).unwrap();
    assert_eq!(stream.write_count(), 1);
    assert_eq!(engine.stats().duplicate_drops, 1);
}

#[test]
fn test_same_position_other_channel_is_not_duplicate() {
    let (backend, engine) = engine();
    let block = vec![0.1; 16];

    assert!(engine.write(0, &block, 0).is_written());
    assert!(engine.write(1, &block, 0).is_written());
    assert_eq!(backend.keys(), vec![StreamKey::Channel(0), StreamKey::Channel(1)]);
}

#[test]
fn test_centre_pan_and_gain() {
    let (backend, engine) = engine();
    engine.set_channel_gain(2, -6.0);
    engine.write(2, &[0.5], 0);

    let written = backend.stream(StreamKey::Channel(2)).unwrap().writes();
    let expected = 0.5 * db_to_linear(-6.0) * std::f32::consts::FRAC_1_SQRT_2;
    assert!((written[0][0] - expected).abs() < 1e-5);
    assert!((written[0][1] - expected).abs() < 1e-5);
}

#[test]
fn test_hard_pan_and_master_gain() {
    let (backend, engine) = engine();
    engine.set_channel_pan(0, -1.0);
    engine.set_master_gain(-20.0);
    engine.write(0, &[0.5, 0.5], 0);

    let written = backend.stream(StreamKey::Channel(0)).unwrap().writes();
    let frame = &written[0];
    assert!((frame[0] - 0.05).abs() < 1e-5);
    assert!(frame[1].abs() < 1e-6);
}

#[test]
fn test_output_is_soft_clipped() {
    let (backend, engine) = engine();
    engine.set_channel_gain(0, 12.0);
    engine.write(0, &[1.0, -1.0], 0);

    for block in backend.stream(StreamKey::Channel(0)).unwrap().writes() {
        assert!(block.iter().all(|s| s.abs() <= 1.0));
    }
}

#[test]
fn test_muted_and_inactive_channels_skip() {
    let (backend, engine) = engine();
    engine.set_channel_mute(0, true);
    assert_eq!(engine.write(0, &[0.1], 0), WriteOutcome::Inaudible);

    engine.set_channel_active(1, false);
    assert_eq!(engine.write(1, &[0.1], 0), WriteOutcome::Inaudible);
    assert_eq!(backend.created(), 0);
}

#[test]
fn test_deactivating_closes_stream() {
    let (backend, engine) = engine();
    engine.write(3, &[0.1], 0);
    assert!(backend.stream(StreamKey::Channel(3)).is_some());

    engine.set_channel_active(3, false);
    assert!(backend.stream(StreamKey::Channel(3)).is_none());
    assert_eq!(engine.stats().active_streams, 0);
}

#[test]
fn test_recovery_ladder() {
    let backend = Arc::new(RecordingBackend::with_accept_limit(2));
    let engine = engine_with(Arc::clone(&backend), RenderConfig::default());
    let block = vec![0.1; 8];

    let mut outcomes = Vec::new();
    for pos in 0..5 {
        outcomes.push(engine.write(0, &block, pos));
    }
    assert_eq!(
        outcomes[0],
        WriteOutcome::Partial {
            frames: 1,
            failures: 1
        }
    );
    assert!(matches!(outcomes[4], WriteOutcome::Partial { failures: 5, .. }));

    // first stream: cleared once, restarted once, then destroyed
    let first = backend.stream(StreamKey::Channel(0));
    assert!(first.is_none());
    assert_eq!(backend.destroyed(), 1);
    let stats = engine.stats();
    assert_eq!(stats.write_failures, 5);
    assert_eq!(stats.destroyed_streams, 1);

    // the next write opens a fresh stream
    engine.write(0, &block, 5);
    assert_eq!(backend.created(), 2);
}

#[test]
fn test_recovery_clears_then_restarts() {
    let backend = Arc::new(RecordingBackend::with_accept_limit(2));
    let engine = engine_with(Arc::clone(&backend), RenderConfig::default());
    let block = vec![0.1; 8];

    engine.write(0, &block, 0);
    let stream = backend.stream(StreamKey::Channel(0)).unwrap();
    assert_eq!(stream.clears(), 1);
    assert_eq!(stream.stops(), 0);

    engine.write(0, &block, 1);
    engine.write(0, &block, 2);
    assert_eq!(stream.stops(), 1);
    // one start on open, one on restart
    assert_eq!(stream.starts(), 2);
}

#[test]
fn test_full_write_resets_failures() {
    let backend = Arc::new(RecordingBackend::with_accept_limit(2));
    let engine = engine_with(Arc::clone(&backend), RenderConfig::default());

    engine.write(0, &[0.1; 4], 0);
    engine.write(0, &[0.1; 4], 1);
    backend
        .stream(StreamKey::Channel(0))
        .unwrap()
        .set_accept_limit(usize::MAX);
    assert!(engine.write(0, &[0.1; 4], 2).is_written());
    assert_eq!(
        engine.write(0, &[0.1; 4], 3),
        WriteOutcome::Written { frames: 4 }
    );
    assert_eq!(backend.destroyed(), 0);
}

#[test]
fn test_stream_limit_evicts_least_recent() {
    let backend = Arc::new(RecordingBackend::new());
    let config = RenderConfig {
        max_streams: 2,
        ..RenderConfig::default()
    };
    let engine = engine_with(Arc::clone(&backend), config);

    engine.write(0, &[0.1], 0);
    engine.write(1, &[0.1], 0);
    engine.write(0, &[0.1], 1);
    engine.write(2, &[0.1], 0);

    assert_eq!(backend.keys(), vec![StreamKey::Channel(0), StreamKey::Channel(2)]);
    assert_eq!(engine.stats().evicted_streams, 1);
}

#[test]
fn test_no_stream_when_backend_fails() {
    let (backend, engine) = engine();
    backend.set_fail_create(true);
    assert_eq!(engine.write(0, &[0.1], 0), WriteOutcome::NoStream);
    assert_eq!(engine.stats().write_failures, 1);
}

#[test]
fn test_mixed_stereo_sums_channels() {
    let backend = Arc::new(RecordingBackend::new());
    let config = RenderConfig {
        mode: RenderMode::MixedStereo,
        ..RenderConfig::default()
    };
    let engine = engine_with(Arc::clone(&backend), config);
    engine.set_channel_pan(0, -1.0);
    engine.set_channel_pan(1, 1.0);

    let packet = AudioPacket {
        sample_position: 0,
        channels: vec![0, 1],
        samples: vec![vec![0.25; 4], vec![0.5; 4]],
        rf_mode: false,
    };
    assert_eq!(engine.write_packet(&packet), WriteOutcome::Written { frames: 4 });
    assert_eq!(backend.keys(), vec![StreamKey::Master]);

    let block = &backend.stream(StreamKey::Master).unwrap().writes()[0];
    assert!((block[0] - 0.25).abs() < 1e-5);
    assert!((block[1] - 0.5).abs() < 1e-5);

    assert_eq!(engine.write_packet(&packet), WriteOutcome::Duplicate);
}

#[test]
fn test_per_channel_packet() {
    let (backend, engine) = engine();
    engine
        .mixer()
        .update(1, ChannelChange::mute(true), UpdateOrigin::Remote);

    let packet = AudioPacket {
        sample_position: 128,
        channels: vec![0, 1],
        samples: vec![vec![0.1; 128], vec![0.1; 128]],
        rf_mode: true,
    };
    assert_eq!(engine.write_packet(&packet), WriteOutcome::Written { frames: 128 });
    assert_eq!(backend.keys(), vec![StreamKey::Channel(0)]);
}

#[test]
fn test_stop_and_resume() {
    let (backend, engine) = engine();
    engine.write(0, &[0.1], 0);
    engine.stop();

    assert!(engine.is_stopped());
    assert_eq!(engine.write(0, &[0.1], 1), WriteOutcome::Stopped);
    assert!(backend.keys().is_empty());

    engine.resume();
    // positions were forgotten, so the old position is accepted again
    assert!(engine.write(0, &[0.1], 0).is_written());
}

#[test]
fn test_stats() {
    let (_backend, engine) = engine();
    engine.write(0, &[0.1; 32], 0);
    engine.write(1, &[0.1; 32], 0);

    let stats = engine.stats();
    assert_eq!(stats.active_streams, 2);
    assert_eq!(stats.frames_written, 64);
    assert!((stats.avg_latency_ms - 10.0).abs() < 1e-9);
    assert_eq!(stats.drops(), 0);
}

#[test]
fn test_concurrent_writers_keep_blocks_whole() {
    const WRITERS: usize = 4;
    const BLOCKS: usize = 200;
    const FRAMES: usize = 64;

    let backend = Arc::new(RingBufferBackend::new());
    let config = RenderConfig {
        ring_frames: 65_536,
        ..RenderConfig::default()
    };
    let engine = RenderEngine::new(
        backend.clone(),
        Arc::new(MixerState::default()),
        config,
    );
    // Block `id` carries the constant level `id * 1e-4`, well below the knee
    let level = |id: usize| id as f32 * 1e-4;

    std::thread::scope(|scope| {
        for writer in 0..WRITERS {
            let engine = &engine;
            scope.spawn(move || {
                for block in 0..BLOCKS {
                    let id = writer * 1000 + block + 1;
                    let packet = AudioPacket {
                        sample_position: (id * FRAMES) as i64,
                        channels: vec![0],
                        samples: vec![vec![level(id); FRAMES]],
                        rf_mode: false,
                    };
                    assert!(engine.write_packet(&packet).is_written());
                }
            });
        }
    });

    let total = WRITERS * BLOCKS * FRAMES * 2;
    let ring = backend.stream(StreamKey::Channel(0)).unwrap();
    assert_eq!(ring.buffered(), total);
    assert_eq!(engine.stats().frames_written, (WRITERS * BLOCKS * FRAMES) as u64);

    let mut out = vec![0.0f32; total];
    assert_eq!(ring.read_into(&mut out), total);

    let centre = std::f32::consts::FRAC_1_SQRT_2;
    let mut seen: Vec<Vec<usize>> = vec![Vec::new(); WRITERS];
    for chunk in out.chunks_exact(FRAMES * 2) {
        assert!(chunk.iter().all(|s| *s == chunk[0]), "block torn: {chunk:?}");
        let id = (chunk[0] / centre / 1e-4).round() as usize;
        seen[(id - 1) / 1000].push((id - 1) % 1000);
    }
    for blocks in seen {
        assert_eq!(blocks, (0..BLOCKS).collect::<Vec<_>>());
    }
}
