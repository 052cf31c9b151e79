//! Gain, pan and output stream management for decoded audio

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::audio::dsp::{db_to_linear, pan_gains, soft_clip};
use crate::audio::{BufferPool, OutputBackend, OutputError, OutputStream, StreamFormat, StreamKey};
use crate::mixer::{ChannelChange, ChannelMix, MixerState, UpdateOrigin};
use crate::protocol::AudioPacket;
use crate::types::{RenderConfig, RenderMode};

/// Consecutive short writes before the stream is flushed
const CLEAR_AFTER: u32 = 1;
/// Consecutive short writes before the stream is restarted
const RESTART_AFTER: u32 = 3;
/// Consecutive short writes before the stream is destroyed
const DESTROY_AFTER: u32 = 5;

/// What happened to one write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// All frames reached the stream
    Written {
        /// Frames written
        frames: usize,
    },
    /// Only part of the block fit
    Partial {
        /// Frames written
        frames: usize,
        /// Consecutive short writes on this stream
        failures: u32,
    },
    /// Same sample position as the previous block on this channel
    Duplicate,
    /// Channel unsubscribed or muted
    Inaudible,
    /// The engine is stopped
    Stopped,
    /// No stream could be opened
    NoStream,
}

impl WriteOutcome {
    /// Whether the full block was written
    #[must_use]
    pub fn is_written(self) -> bool {
        matches!(self, Self::Written { .. })
    }

    /// Rank used to summarise several channel writes as one outcome
    fn severity(self) -> u8 {
        match self {
            Self::Inaudible => 0,
            Self::Duplicate => 1,
            Self::Written { .. } => 2,
            Self::Stopped => 3,
            Self::Partial { .. } => 4,
            Self::NoStream => 5,
        }
    }
}

/// Render engine statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderStats {
    /// Mean buffered latency across streams, in milliseconds
    pub avg_latency_ms: f64,
    /// Frames writable across all streams
    pub available_frames: usize,
    /// Open streams
    pub active_streams: usize,
    /// Blocks dropped as duplicates
    pub duplicate_drops: u64,
    /// Short writes
    pub write_failures: u64,
    /// Streams destroyed by recovery
    pub destroyed_streams: u64,
    /// Streams closed to make room for a new one
    pub evicted_streams: u64,
    /// Frames accepted by the outputs
    pub frames_written: u64,
    /// Sink reads the outputs could not fill
    pub underruns: u64,
}

impl RenderStats {
    /// Blocks that did not fully reach an output
    #[must_use]
    pub fn drops(&self) -> u64 {
        self.duplicate_drops + self.write_failures
    }
}

#[derive(Debug)]
struct StreamHandle {
    stream: Arc<dyn OutputStream>,
    /// Held across a write and its failure accounting; both transports
    /// can write the same stream
    writer: Mutex<()>,
    failures: AtomicU32,
    /// Engine write tick of the last write, for LRU eviction
    last_write: AtomicU64,
}

#[derive(Debug, Default)]
struct Counters {
    duplicate_drops: AtomicU64,
    write_failures: AtomicU64,
    destroyed_streams: AtomicU64,
    evicted_streams: AtomicU64,
    frames_written: AtomicU64,
}

/// Turns decoded channel blocks into stereo output
///
/// Each write looks up the channel's mix, applies gain, constant-power pan
/// and soft clipping, and pushes interleaved stereo into the channel's
/// stream (or the shared master stream). Streams are opened lazily and
/// recovered on short writes.
pub struct RenderEngine {
    backend: Arc<dyn OutputBackend>,
    mixer: Arc<MixerState>,
    config: RenderConfig,
    streams: Mutex<HashMap<StreamKey, Arc<StreamHandle>>>,
    last_positions: Mutex<HashMap<u32, i64>>,
    pool: BufferPool,
    counters: Counters,
    tick: AtomicU64,
    stopped: AtomicBool,
}

impl std::fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEngine")
            .field("config", &self.config)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RenderEngine {
    /// Create an engine writing to `backend` with mix settings from `mixer`
    #[must_use]
    pub fn new(
        backend: Arc<dyn OutputBackend>,
        mixer: Arc<MixerState>,
        config: RenderConfig,
    ) -> Self {
        let pool = BufferPool::new(config.pool_per_size);
        Self {
            backend,
            mixer,
            config,
            streams: Mutex::new(HashMap::new()),
            last_positions: Mutex::new(HashMap::new()),
            pool,
            counters: Counters::default(),
            tick: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Shared mixer state
    #[must_use]
    pub fn mixer(&self) -> &Arc<MixerState> {
        &self.mixer
    }

    /// Output layout
    #[must_use]
    pub fn mode(&self) -> RenderMode {
        self.config.mode
    }

    /// Whether the engine has been stopped
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Render one channel block to its own stream
    pub fn write(&self, channel: u32, samples: &[f32], sample_position: i64) -> WriteOutcome {
        if self.is_stopped() {
            return WriteOutcome::Stopped;
        }
        if self.is_duplicate(channel, sample_position) {
            return WriteOutcome::Duplicate;
        }

        let (mix, master) = self.mixer.channel_with_master(channel);
        let mix = mix.unwrap_or(ChannelMix {
            active: true,
            ..ChannelMix::default()
        });
        if !mix.is_audible() {
            return WriteOutcome::Inaudible;
        }

        let mut buf = self.pool.get(samples.len() * 2);
        self.mix_into(&mut buf, samples, mix, master);
        let knee = self.config.soft_clip_knee;
        for s in &mut buf {
            *s = soft_clip(*s, knee);
        }

        let outcome = self.push(StreamKey::Channel(channel), &buf);
        self.pool.put(buf);
        outcome
    }

    /// Render every channel of a packet according to the render mode
    pub fn write_packet(&self, packet: &AudioPacket) -> WriteOutcome {
        match self.config.mode {
            RenderMode::PerChannel => {
                let mut result = WriteOutcome::Inaudible;
                for (&channel, samples) in packet.channels.iter().zip(&packet.samples) {
                    let outcome = self.write(channel, samples, packet.sample_position);
                    if outcome.severity() > result.severity() {
                        result = outcome;
                    }
                }
                result
            }
            RenderMode::MixedStereo => self.write_mixed(packet),
        }
    }

    fn write_mixed(&self, packet: &AudioPacket) -> WriteOutcome {
        if self.is_stopped() {
            return WriteOutcome::Stopped;
        }

        let frames = packet.samples_per_channel();
        let mut buf = self.pool.get(frames * 2);
        let mut any = false;
        let mut duplicates = 0;

        for (&channel, samples) in packet.channels.iter().zip(&packet.samples) {
            if self.is_duplicate(channel, packet.sample_position) {
                duplicates += 1;
                continue;
            }
            let (mix, master) = self.mixer.channel_with_master(channel);
            let mix = mix.unwrap_or(ChannelMix {
                active: true,
                ..ChannelMix::default()
            });
            if !mix.is_audible() || samples.len() != frames {
                continue;
            }
            self.mix_into(&mut buf, samples, mix, master);
            any = true;
        }

        let outcome = if any {
            let knee = self.config.soft_clip_knee;
            for s in &mut buf {
                *s = soft_clip(*s, knee);
            }
            self.push(StreamKey::Master, &buf)
        } else if duplicates > 0 {
            WriteOutcome::Duplicate
        } else {
            WriteOutcome::Inaudible
        };
        self.pool.put(buf);
        outcome
    }

    /// Returns true (and counts) if this channel already saw `position`
    fn is_duplicate(&self, channel: u32, position: i64) -> bool {
        let mut last = lock(&self.last_positions);
        if last.insert(channel, position) == Some(position) {
            self.counters.duplicate_drops.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(channel, position, "Duplicate block dropped");
            return true;
        }
        false
    }

    /// Add a gained and panned mono block onto interleaved stereo `out`
    #[allow(clippy::unused_self)]
    fn mix_into(&self, out: &mut [f32], samples: &[f32], mix: ChannelMix, master_db: f32) {
        let gain = db_to_linear(mix.gain_db + master_db);
        let (left, right) = pan_gains(mix.pan);
        let (gl, gr) = (gain * left, gain * right);
        for (frame, &s) in out.chunks_exact_mut(2).zip(samples) {
            frame[0] += s * gl;
            frame[1] += s * gr;
        }
    }

    fn push(&self, key: StreamKey, interleaved: &[f32]) -> WriteOutcome {
        let handle = match self.stream_for(key) {
            Ok(handle) => handle,
            Err(e) => {
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(stream = %key, error = %e, "Could not open output stream");
                return WriteOutcome::NoStream;
            }
        };

        let _writer = lock(&handle.writer);
        let written = handle.stream.write(interleaved);
        handle
            .last_write
            .store(self.tick.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        let frames = written / 2;
        self.counters
            .frames_written
            .fetch_add(frames as u64, Ordering::Relaxed);

        if written == interleaved.len() {
            handle.failures.store(0, Ordering::Relaxed);
            return WriteOutcome::Written { frames };
        }

        self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
        let failures = handle.failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.recover(key, &handle, failures);
        WriteOutcome::Partial { frames, failures }
    }

    /// Graduated recovery after a short write
    fn recover(&self, key: StreamKey, handle: &StreamHandle, failures: u32) {
        match failures {
            CLEAR_AFTER => {
                tracing::debug!(stream = %key, "Output full, flushing");
                handle.stream.clear();
            }
            RESTART_AFTER => {
                tracing::warn!(stream = %key, failures, "Output stuck, restarting");
                let restarted = handle
                    .stream
                    .stop()
                    .and_then(|()| handle.stream.start());
                if let Err(e) = restarted {
                    tracing::warn!(stream = %key, error = %e, "Restart failed");
                }
            }
            n if n >= DESTROY_AFTER => {
                tracing::warn!(stream = %key, failures, "Output unrecoverable, destroying");
                self.destroy(key);
                self.counters
                    .destroyed_streams
                    .fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn stream_for(&self, key: StreamKey) -> Result<Arc<StreamHandle>, OutputError> {
        let mut streams = lock(&self.streams);
        if let Some(handle) = streams.get(&key) {
            return Ok(Arc::clone(handle));
        }

        if streams.len() >= self.config.max_streams.max(1) {
            let victim = streams
                .iter()
                .min_by_key(|(_, h)| h.last_write.load(Ordering::Relaxed))
                .map(|(&k, _)| k);
            if let Some(victim) = victim {
                if let Some(old) = streams.remove(&victim) {
                    let _ = old.stream.stop();
                }
                self.backend.destroy_stream(victim);
                self.counters.evicted_streams.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(evicted = %victim, "Stream limit reached, closed least recent");
            }
        }

        let format = StreamFormat::stereo(self.config.sample_rate, self.config.ring_frames);
        let stream = self.backend.create_stream(key, format)?;
        stream.start()?;
        tracing::debug!(stream = %key, "Output stream opened");

        let handle = Arc::new(StreamHandle {
            stream,
            writer: Mutex::new(()),
            failures: AtomicU32::new(0),
            last_write: AtomicU64::new(self.tick.load(Ordering::Relaxed)),
        });
        streams.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    fn destroy(&self, key: StreamKey) {
        let removed = lock(&self.streams).remove(&key);
        if let Some(handle) = removed {
            let _ = handle.stream.stop();
        }
        self.backend.destroy_stream(key);
    }

    /// Set a channel's gain in dB
    pub fn set_channel_gain(&self, channel: u32, gain_db: f32) {
        self.mixer
            .update(channel, ChannelChange::gain(gain_db), UpdateOrigin::Local);
    }

    /// Set a channel's pan
    pub fn set_channel_pan(&self, channel: u32, pan: f32) {
        self.mixer
            .update(channel, ChannelChange::pan(pan), UpdateOrigin::Local);
    }

    /// Mute or unmute a channel
    pub fn set_channel_mute(&self, channel: u32, mute: bool) {
        self.mixer
            .update(channel, ChannelChange::mute(mute), UpdateOrigin::Local);
    }

    /// Enable or disable a channel; disabling closes its stream
    pub fn set_channel_active(&self, channel: u32, active: bool) {
        self.mixer
            .update(channel, ChannelChange::active(active), UpdateOrigin::Local);
        if !active {
            self.release_channel(channel);
        }
    }

    /// Close a channel's stream and forget its position
    pub fn release_channel(&self, channel: u32) {
        lock(&self.last_positions).remove(&channel);
        if self.config.mode == RenderMode::PerChannel {
            self.destroy(StreamKey::Channel(channel));
        }
    }

    /// Set the master gain in dB
    pub fn set_master_gain(&self, gain_db: f32) {
        self.mixer.set_master_gain(gain_db, UpdateOrigin::Local);
    }

    /// Close every stream and refuse further writes until `resume`
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let drained: Vec<_> = lock(&self.streams).drain().collect();
        for (key, handle) in drained {
            let _ = handle.stream.stop();
            self.backend.destroy_stream(key);
        }
        lock(&self.last_positions).clear();
        self.pool.clear();
        tracing::info!("Render engine stopped");
    }

    /// Accept writes again after `stop`
    pub fn resume(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> RenderStats {
        let streams: Vec<_> = lock(&self.streams).values().cloned().collect();

        let latencies: Vec<Duration> = streams.iter().map(|h| h.stream.latency()).collect();
        #[allow(clippy::cast_precision_loss)]
        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().map(|d| d.as_secs_f64() * 1000.0).sum::<f64>()
                / latencies.len() as f64
        };

        RenderStats {
            avg_latency_ms,
            available_frames: streams.iter().map(|h| h.stream.available_frames()).sum(),
            active_streams: streams.len(),
            duplicate_drops: self.counters.duplicate_drops.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
            destroyed_streams: self.counters.destroyed_streams.load(Ordering::Relaxed),
            evicted_streams: self.counters.evicted_streams.load(Ordering::Relaxed),
            frames_written: self.counters.frames_written.load(Ordering::Relaxed),
            underruns: streams.iter().map(|h| h.stream.underruns()).sum(),
        }
    }
}
