//! Audio output abstraction
//!
//! The render engine writes interleaved stereo `f32` into one
//! [`OutputStream`] per logical stream. A backend creates those streams;
//! the platform sink drains them from its own callback thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::buffer::SampleRing;

/// Errors from audio output
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// Device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Stream could not be built or driven
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Generic device error
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Backend refuses more streams
    #[error("Stream limit reached ({max})")]
    StreamLimit {
        /// Streams the backend supports
        max: usize,
    },

    /// Output closed
    #[error("Output closed")]
    Closed,
}

/// Identifies a render stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKey {
    /// One server channel rendered on its own
    Channel(u32),
    /// All channels mixed to one stereo stream
    Master,
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(ch) => write!(f, "channel {ch}"),
            Self::Master => write!(f, "master"),
        }
    }
}

/// Stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channels per frame
    pub channels: u16,
    /// Ring capacity in frames
    pub capacity_frames: usize,
}

impl StreamFormat {
    /// Stereo stream at the given rate and capacity
    #[must_use]
    pub fn stereo(sample_rate: u32, capacity_frames: usize) -> Self {
        Self {
            sample_rate,
            channels: 2,
            capacity_frames,
        }
    }
}

/// A writable output stream
pub trait OutputStream: Send + Sync + fmt::Debug {
    /// Write interleaved samples; returns how many were accepted
    fn write(&self, interleaved: &[f32]) -> usize;

    /// Start (or restart) playback
    ///
    /// # Errors
    ///
    /// Returns `OutputError` if the sink cannot be started.
    fn start(&self) -> Result<(), OutputError>;

    /// Stop playback and drop buffered audio
    ///
    /// # Errors
    ///
    /// Returns `OutputError` if the sink cannot be stopped.
    fn stop(&self) -> Result<(), OutputError>;

    /// Drop buffered audio
    fn clear(&self);

    /// Time the buffered audio takes to play
    fn latency(&self) -> Duration;

    /// Frames that can be written right now
    fn available_frames(&self) -> usize;

    /// Reads the sink could not satisfy
    fn underruns(&self) -> u64;
}

/// Creates output streams
pub trait OutputBackend: Send + Sync {
    /// Create a stream for `key`
    ///
    /// # Errors
    ///
    /// Returns `OutputError` if the sink cannot provide another stream.
    fn create_stream(
        &self,
        key: StreamKey,
        format: StreamFormat,
    ) -> Result<Arc<dyn OutputStream>, OutputError>;

    /// Release the stream for `key`
    fn destroy_stream(&self, _key: StreamKey) {}
}

/// Ring-buffered stream drained by a sink callback
#[derive(Debug)]
pub struct RingStream {
    key: StreamKey,
    format: StreamFormat,
    ring: SampleRing,
    running: AtomicBool,
}

impl RingStream {
    fn new(key: StreamKey, format: StreamFormat) -> Self {
        let samples = format.capacity_frames * usize::from(format.channels.max(1));
        Self {
            key,
            format,
            ring: SampleRing::new(samples),
            running: AtomicBool::new(true),
        }
    }

    /// Stream identity
    #[must_use]
    pub fn key(&self) -> StreamKey {
        self.key
    }

    /// Stream parameters
    #[must_use]
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Whether the stream is playing
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Fill `out` from the ring, padding with silence
    ///
    /// Call from the sink's callback thread only.
    pub fn read_into(&self, out: &mut [f32]) -> usize {
        if !self.is_running() {
            out.fill(0.0);
            return 0;
        }
        let n = self.ring.read(out);
        out[n..].fill(0.0);
        n
    }

    /// Samples waiting to be played
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.ring.available()
    }

    fn channels(&self) -> usize {
        usize::from(self.format.channels.max(1))
    }
}

impl OutputStream for RingStream {
    fn write(&self, interleaved: &[f32]) -> usize {
        if !self.is_running() {
            return 0;
        }
        self.ring.write(interleaved)
    }

    fn start(&self) -> Result<(), OutputError> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) -> Result<(), OutputError> {
        self.running.store(false, Ordering::Release);
        self.ring.request_clear();
        Ok(())
    }

    fn clear(&self) {
        self.ring.request_clear();
    }

    fn latency(&self) -> Duration {
        let frames = self.ring.available() / self.channels();
        if self.format.sample_rate == 0 {
            return Duration::ZERO;
        }
        #[allow(clippy::cast_precision_loss)]
        let secs = frames as f64 / f64::from(self.format.sample_rate);
        Duration::from_secs_f64(secs)
    }

    fn available_frames(&self) -> usize {
        self.ring.free() / self.channels()
    }

    fn underruns(&self) -> u64 {
        self.ring.underruns()
    }
}

/// Stream list a sink callback keeps between calls
///
/// Holds the callback's copy of the live streams and its scratch buffer.
/// [`RingBufferBackend::mix_into`] refreshes the copy only after a stream
/// was created or destroyed, so steady-state callbacks take no lock and
/// allocate nothing.
#[derive(Debug, Default)]
pub struct MixScratch {
    generation: u64,
    streams: Arc<[Arc<RingStream>]>,
    buf: Vec<f32>,
}

impl MixScratch {
    /// Empty scratch; the first mix loads the stream list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Backend handing out [`RingStream`]s for a sink to drain
#[derive(Debug)]
pub struct RingBufferBackend {
    streams: Mutex<HashMap<StreamKey, Arc<RingStream>>>,
    /// Key-ordered copy of `streams`, replaced on every change
    snapshot: Mutex<Arc<[Arc<RingStream>]>>,
    /// Bumped after each snapshot replacement; starts above a fresh
    /// [`MixScratch`]
    generation: AtomicU64,
    max_streams: Option<usize>,
}

impl Default for RingBufferBackend {
    fn default() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            snapshot: Mutex::new(Arc::from(Vec::new())),
            generation: AtomicU64::new(1),
            max_streams: None,
        }
    }
}

impl RingBufferBackend {
    /// Backend without a stream limit
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that refuses more than `max` concurrent streams
    #[must_use]
    pub fn with_limit(max: usize) -> Self {
        Self {
            max_streams: Some(max),
            ..Self::default()
        }
    }

    /// Current stream for `key`
    #[must_use]
    pub fn stream(&self, key: StreamKey) -> Option<Arc<RingStream>> {
        self.streams.lock().ok()?.get(&key).cloned()
    }

    /// Every live stream, ordered by key
    #[must_use]
    pub fn streams(&self) -> Arc<[Arc<RingStream>]> {
        self.snapshot
            .lock()
            .map(|s| Arc::clone(&*s))
            .unwrap_or_else(|_| Arc::from(Vec::new()))
    }

    /// Sum every running stream into an interleaved stereo buffer
    ///
    /// Call from the sink's callback thread with the same `scratch` each
    /// time.
    pub fn mix_into(&self, out: &mut [f32], scratch: &mut MixScratch) {
        let generation = self.generation.load(Ordering::Acquire);
        if generation != scratch.generation {
            scratch.streams = self.streams();
            scratch.generation = generation;
        }
        if scratch.buf.len() < out.len() {
            scratch.buf.resize(out.len(), 0.0);
        }

        out.fill(0.0);
        let buf = &mut scratch.buf[..out.len()];
        for stream in scratch.streams.iter() {
            stream.read_into(buf);
            for (o, s) in out.iter_mut().zip(buf.iter()) {
                *o += *s;
            }
        }
    }

    /// Rebuild the drain snapshot; call with the stream map locked
    fn publish(&self, map: &HashMap<StreamKey, Arc<RingStream>>) {
        let mut streams: Vec<_> = map.values().cloned().collect();
        streams.sort_by_key(|s| s.key());
        if let Ok(mut snapshot) = self.snapshot.lock() {
            *snapshot = Arc::from(streams);
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl OutputBackend for RingBufferBackend {
    fn create_stream(
        &self,
        key: StreamKey,
        format: StreamFormat,
    ) -> Result<Arc<dyn OutputStream>, OutputError> {
        let mut map = self.streams.lock().map_err(|_| OutputError::Closed)?;
        if let Some(max) = self.max_streams {
            if !map.contains_key(&key) && map.len() >= max {
                return Err(OutputError::StreamLimit { max });
            }
        }
        let stream = Arc::new(RingStream::new(key, format));
        map.insert(key, Arc::clone(&stream));
        self.publish(&map);
        Ok(stream)
    }

    fn destroy_stream(&self, key: StreamKey) {
        if let Ok(mut map) = self.streams.lock() {
            if map.remove(&key).is_some() {
                self.publish(&map);
            }
        }
    }
}
