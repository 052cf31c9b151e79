//! Jitter buffer for the datagram transport
//!
//! Packets are keyed by sequence number. `pop` releases the expected
//! sequence if present, otherwise probes a short window ahead and counts
//! the sequences it skipped as lost.
//!
//! A run of packets far behind the release point means the sender started
//! counting again; the buffer then drops what it holds and follows the new
//! sequence.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Consecutive far-behind packets that mark a sender restart
const RESTART_RUN: u32 = 3;

/// A buffered packet
#[derive(Debug, Clone)]
pub struct JitterEntry<T> {
    /// Sender sequence number
    pub sequence: u32,
    /// Position of the first frame
    pub sample_position: i64,
    /// Decoded payload
    pub payload: T,
    /// When the packet was pushed
    pub arrived_at: Instant,
    /// Sequences skipped to reach this entry
    pub skipped: u32,
}

/// Jitter buffer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitterStats {
    /// Packets offered to `push`
    pub received: u64,
    /// Packets handed out by `pop`
    pub released: u64,
    /// Packets behind the release point
    pub late: u64,
    /// Packets already buffered
    pub duplicate: u64,
    /// Entries evicted to make room
    pub overflow: u64,
    /// Sequences never delivered
    pub gaps: u64,
    /// Times the buffer restarted on a new sequence run
    pub resyncs: u64,
    /// Entries currently held
    pub current_depth: usize,
}

/// Result of `push`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Buffered
    Accepted,
    /// Dropped, its sequence was already released or skipped
    Late,
    /// Dropped, same sequence already buffered
    Duplicate,
    /// Buffered after evicting the oldest entry
    Overflow {
        /// Sequence that was evicted
        evicted: u32,
    },
}

impl PushOutcome {
    /// Whether the packet is now in the buffer
    #[must_use]
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted | Self::Overflow { .. })
    }
}

/// Sequence-ordered bounded packet buffer
#[derive(Debug)]
pub struct JitterBuffer<T> {
    entries: BTreeMap<u32, JitterEntry<T>>,
    /// Next sequence to release; unset until the first pop
    next_seq: Option<u32>,
    capacity: usize,
    window: u32,
    /// Consecutive pushes too far behind to be reordering
    far_behind: u32,
    stats: JitterStats,
}

impl<T> JitterBuffer<T> {
    /// Create a buffer holding at most `capacity` packets, probing `window`
    /// sequences ahead on a gap
    #[must_use]
    pub fn new(capacity: usize, window: u32) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: None,
            capacity: capacity.max(1),
            window,
            far_behind: 0,
            stats: JitterStats::default(),
        }
    }

    /// Add a packet
    pub fn push(&mut self, sequence: u32, sample_position: i64, payload: T) -> PushOutcome {
        self.stats.received += 1;

        if let Some(next) = self.next_seq {
            // Anything more than half the sequence space behind is old
            if sequence.wrapping_sub(next) > u32::MAX / 2 {
                let behind = next.wrapping_sub(sequence);
                if behind <= self.reorder_span() {
                    self.far_behind = 0;
                    self.stats.late += 1;
                    tracing::trace!(sequence, next, "Late packet dropped");
                    return PushOutcome::Late;
                }
                self.far_behind += 1;
                if self.far_behind < RESTART_RUN {
                    self.stats.late += 1;
                    tracing::trace!(sequence, next, "Far-behind packet dropped");
                    return PushOutcome::Late;
                }
                tracing::info!(sequence, next, "Sequence restarted, resyncing");
                self.entries.clear();
                self.next_seq = None;
                self.stats.resyncs += 1;
            }
        }
        self.far_behind = 0;

        if self.entries.contains_key(&sequence) {
            self.stats.duplicate += 1;
            return PushOutcome::Duplicate;
        }

        let mut outcome = PushOutcome::Accepted;
        if self.entries.len() >= self.capacity {
            if let Some((evicted, _)) = self.entries.pop_first() {
                self.stats.overflow += 1;
                tracing::debug!(evicted, "Jitter buffer full, evicted oldest");
                outcome = PushOutcome::Overflow { evicted };
                // A loss ahead of the release point is counted when `pop`
                // skips over it
                match self.next_seq {
                    Some(next) if next == evicted => {
                        self.stats.gaps += 1;
                        self.next_seq = Some(evicted.wrapping_add(1));
                    }
                    Some(_) => {}
                    None => self.stats.gaps += 1,
                }
            }
        }

        self.entries.insert(
            sequence,
            JitterEntry {
                sequence,
                sample_position,
                payload,
                arrived_at: Instant::now(),
                skipped: 0,
            },
        );
        self.stats.current_depth = self.entries.len();
        outcome
    }

    /// How far behind the release point a reordered packet can plausibly be
    fn reorder_span(&self) -> u32 {
        u32::try_from(self.capacity)
            .unwrap_or(u32::MAX)
            .saturating_add(self.window)
    }

    /// Release the next packet in order
    ///
    /// Tries the expected sequence first, then the next `window` sequences.
    /// When the buffer is full and nothing lies in the window, jumps to the
    /// lowest buffered sequence.
    pub fn pop(&mut self) -> Option<JitterEntry<T>> {
        let next = match self.next_seq {
            Some(next) => next,
            None => *self.entries.keys().next()?,
        };

        let found = (0..=self.window)
            .map(|offset| next.wrapping_add(offset))
            .find(|seq| self.entries.contains_key(seq))
            .or_else(|| {
                if self.entries.len() >= self.capacity {
                    self.entries.keys().next().copied()
                } else {
                    None
                }
            })?;

        let mut entry = self.entries.remove(&found)?;
        let skipped = found.wrapping_sub(next);
        if skipped > 0 {
            self.stats.gaps += u64::from(skipped);
            tracing::debug!(expected = next, found, skipped, "Sequence gap");
        }
        entry.skipped = skipped;

        self.next_seq = Some(found.wrapping_add(1));
        self.stats.released += 1;
        self.stats.current_depth = self.entries.len();
        Some(entry)
    }

    /// Release the next packet for live playback
    ///
    /// The expected sequence is released at once. A gap is only skipped once
    /// the oldest buffered packet has waited `max_hold`, so late arrivals
    /// inside that time still come out in order.
    pub fn pop_ready(&mut self, now: Instant, max_hold: Duration) -> Option<JitterEntry<T>> {
        let next = self.next_seq.or_else(|| self.entries.keys().next().copied())?;
        if self.entries.contains_key(&next) {
            return self.pop();
        }

        let oldest_wait = self
            .entries
            .values()
            .map(|e| now.saturating_duration_since(e.arrived_at))
            .max()?;
        if oldest_wait >= max_hold || self.entries.len() >= self.capacity {
            self.pop()
        } else {
            None
        }
    }

    /// Sequence the buffer will release next, if known
    #[must_use]
    pub fn next_sequence(&self) -> Option<u32> {
        self.next_seq
    }

    /// Number of buffered packets
    #[must_use]
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> JitterStats {
        JitterStats {
            current_depth: self.entries.len(),
            ..self.stats.clone()
        }
    }

    /// Drop all packets and forget the release point
    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_seq = None;
        self.far_behind = 0;
        self.stats.current_depth = 0;
    }
}
