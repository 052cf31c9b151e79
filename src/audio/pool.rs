//! Interleave buffer pool
//!
//! Render writes need a scratch buffer of `2 * frames` samples for every
//! packet. Buffers are kept per size so a steady stream of equal-sized
//! packets reuses the same allocations.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Size-keyed pool of `Vec<f32>` scratch buffers
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<HashMap<usize, Vec<Vec<f32>>>>,
    per_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BufferPool {
    /// Create a pool keeping at most `per_size` idle buffers of each size
    #[must_use]
    pub fn new(per_size: usize) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            per_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Take a zeroed buffer of exactly `len` samples
    pub fn get(&self, len: usize) -> Vec<f32> {
        let reused = self
            .buffers
            .lock()
            .ok()
            .and_then(|mut map| map.get_mut(&len).and_then(Vec::pop));

        if let Some(mut buf) = reused {
            self.hits.fetch_add(1, Ordering::Relaxed);
            buf.fill(0.0);
            buf
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            vec![0.0; len]
        }
    }

    /// Return a buffer; dropped if its size already has `per_size` idle buffers
    pub fn put(&self, buf: Vec<f32>) {
        let Ok(mut map) = self.buffers.lock() else {
            return;
        };
        let slot = map.entry(buf.len()).or_default();
        if slot.len() < self.per_size {
            slot.push(buf);
        }
    }

    /// Idle buffers of a given size
    #[must_use]
    pub fn idle(&self, len: usize) -> usize {
        self.buffers
            .lock()
            .map(|map| map.get(&len).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// `(hits, misses)` since creation
    #[must_use]
    pub fn usage(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Drop every idle buffer
    pub fn clear(&self) {
        if let Ok(mut map) = self.buffers.lock() {
            map.clear();
        }
    }
}
