//! Sample ring buffer shared between the render engine and an output callback

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Single-producer single-consumer ring of `f32` samples
///
/// Producer and consumer never wait on each other: positions are
/// monotonically increasing atomic counters and the slot index is the
/// counter modulo the capacity, so the producer never touches slots the
/// consumer has not yet released.
///
/// Each side holds its own lock while it runs. With one writer and one
/// reader those locks are never contended; a second concurrent writer (or
/// reader) waits for the first instead of racing on the positions.
///
/// Clearing is requested by the producer and carried out by the consumer on
/// its next `read`, so neither side ever writes slots the other owns.
pub struct SampleRing {
    data: UnsafeCell<Box<[f32]>>,
    capacity: usize,
    producer: Mutex<()>,
    consumer: Mutex<()>,
    /// Samples consumed so far
    read_pos: AtomicUsize,
    /// Samples produced so far
    write_pos: AtomicUsize,
    clear_requested: AtomicBool,
    /// Reads that could not be filled completely
    underruns: AtomicU64,
}

impl SampleRing {
    /// Create a ring holding `capacity` samples
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: UnsafeCell::new(vec![0.0; capacity].into_boxed_slice()),
            capacity,
            producer: Mutex::new(()),
            consumer: Mutex::new(()),
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            clear_requested: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
        }
    }

    /// Capacity in samples
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples waiting to be read
    #[must_use]
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Samples that can be written without blocking
    #[must_use]
    pub fn free(&self) -> usize {
        self.capacity - self.available().min(self.capacity)
    }

    /// Whether nothing is waiting to be read
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Reads that came up short
    #[must_use]
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Write as many samples as fit; returns the number written
    ///
    /// Concurrent writers are serialized, so each call lands as one
    /// contiguous run.
    pub fn write(&self, samples: &[f32]) -> usize {
        let _producer = side(&self.producer);
        let to_write = samples.len().min(self.free());
        if to_write == 0 {
            return 0;
        }

        let write = self.write_pos.load(Ordering::Relaxed);
        let start = write % self.capacity;
        let first = (self.capacity - start).min(to_write);

        // SAFETY: the producer lock is held; slots in [write, write + to_write) are free
        // because `to_write <= free()`, so the consumer is not reading them.
        unsafe {
            let buf = &mut *self.data.get();
            buf[start..start + first].copy_from_slice(&samples[..first]);
            buf[..to_write - first].copy_from_slice(&samples[first..to_write]);
        }

        self.write_pos
            .store(write.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Read up to `out.len()` samples; returns the number read
    ///
    /// A short read counts as an underrun.
    pub fn read(&self, out: &mut [f32]) -> usize {
        let _consumer = side(&self.consumer);
        if self.clear_requested.swap(false, Ordering::AcqRel) {
            let write = self.write_pos.load(Ordering::Acquire);
            self.read_pos.store(write, Ordering::Release);
        }

        let available = self.available();
        let to_read = out.len().min(available);
        if to_read < out.len() {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        if to_read == 0 {
            return 0;
        }

        let read = self.read_pos.load(Ordering::Relaxed);
        let start = read % self.capacity;
        let first = (self.capacity - start).min(to_read);

        // SAFETY: the consumer lock is held; slots in [read, read + to_read) were
        // published by the producer's Release store of `write_pos`.
        unsafe {
            let buf = &*self.data.get();
            out[..first].copy_from_slice(&buf[start..start + first]);
            out[first..to_read].copy_from_slice(&buf[..to_read - first]);
        }

        self.read_pos
            .store(read.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// Ask the consumer to discard everything buffered
    pub fn request_clear(&self) {
        self.clear_requested.store(true, Ordering::Release);
    }

    /// Whether a clear is still pending
    #[must_use]
    pub fn clear_pending(&self) -> bool {
        self.clear_requested.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SampleRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleRing")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish_non_exhaustive()
    }
}

fn side(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

// SAFETY: writers are serialized by `producer`, readers by `consumer`, and
// the atomic positions partition `data` between the two sides.
unsafe impl Send for SampleRing {}
unsafe impl Sync for SampleRing {}
