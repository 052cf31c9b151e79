//! Output backend that records every write

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::audio::{OutputBackend, OutputError, OutputStream, StreamFormat, StreamKey};

/// Stream that keeps every block written to it
#[derive(Debug)]
pub struct RecordingStream {
    key: StreamKey,
    format: StreamFormat,
    writes: Mutex<Vec<Vec<f32>>>,
    /// Samples accepted per write
    accept_limit: AtomicUsize,
    clears: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl RecordingStream {
    fn new(key: StreamKey, format: StreamFormat, accept_limit: usize) -> Self {
        Self {
            key,
            format,
            writes: Mutex::new(Vec::new()),
            accept_limit: AtomicUsize::new(accept_limit),
            clears: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// Stream identity
    #[must_use]
    pub fn key(&self) -> StreamKey {
        self.key
    }

    /// Stream parameters it was created with
    #[must_use]
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Copies of the accepted part of each write
    #[must_use]
    pub fn writes(&self) -> Vec<Vec<f32>> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Number of writes
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Limit how many samples each later write accepts
    pub fn set_accept_limit(&self, samples: usize) {
        self.accept_limit.store(samples, Ordering::SeqCst);
    }

    /// Times `clear` was called
    #[must_use]
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    /// Times `start` was called
    #[must_use]
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Times `stop` was called
    #[must_use]
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl OutputStream for RecordingStream {
    fn write(&self, interleaved: &[f32]) -> usize {
        let n = interleaved.len().min(self.accept_limit.load(Ordering::SeqCst));
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(interleaved[..n].to_vec());
        }
        n
    }

    fn start(&self) -> Result<(), OutputError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), OutputError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn available_frames(&self) -> usize {
        self.format.capacity_frames
    }

    fn underruns(&self) -> u64 {
        0
    }
}

/// Backend handing out [`RecordingStream`]s
#[derive(Debug)]
pub struct RecordingBackend {
    streams: Mutex<HashMap<StreamKey, Arc<RecordingStream>>>,
    history: Mutex<Vec<Arc<RecordingStream>>>,
    accept_limit: usize,
    fail_create: AtomicBool,
    destroyed: AtomicUsize,
}

impl RecordingBackend {
    /// Backend whose streams accept every write in full
    #[must_use]
    pub fn new() -> Self {
        Self::with_accept_limit(usize::MAX)
    }

    /// Backend whose streams accept at most `samples` per write
    #[must_use]
    pub fn with_accept_limit(samples: usize) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            accept_limit: samples,
            fail_create: AtomicBool::new(false),
            destroyed: AtomicUsize::new(0),
        }
    }

    /// Live stream for `key`
    #[must_use]
    pub fn stream(&self, key: StreamKey) -> Option<Arc<RecordingStream>> {
        self.streams.lock().ok()?.get(&key).cloned()
    }

    /// Keys of live streams, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<StreamKey> {
        let mut keys: Vec<_> = self
            .streams
            .lock()
            .map(|s| s.keys().copied().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Streams ever created
    #[must_use]
    pub fn created(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }

    /// Streams destroyed
    #[must_use]
    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Total writes across every stream ever created
    #[must_use]
    pub fn total_writes(&self) -> usize {
        self.history
            .lock()
            .map(|h| h.iter().map(|s| s.write_count()).sum())
            .unwrap_or(0)
    }

    /// Make `create_stream` fail
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBackend for RecordingBackend {
    fn create_stream(
        &self,
        key: StreamKey,
        format: StreamFormat,
    ) -> Result<Arc<dyn OutputStream>, OutputError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(OutputError::DeviceError("creation disabled".into()));
        }
        let stream = Arc::new(RecordingStream::new(key, format, self.accept_limit));
        if let Ok(mut streams) = self.streams.lock() {
            streams.insert(key, Arc::clone(&stream));
        }
        if let Ok(mut history) = self.history.lock() {
            history.push(Arc::clone(&stream));
        }
        Ok(stream)
    }

    fn destroy_stream(&self, key: StreamKey) {
        if let Ok(mut streams) = self.streams.lock() {
            if streams.remove(&key).is_some() {
                self.destroyed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
