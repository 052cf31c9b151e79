//! Network condition simulation for jitter tests

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seeded packet loss, duplication and reordering
#[derive(Clone, Debug)]
pub struct NetworkSimulator {
    /// Packet loss probability (0.0 to 1.0)
    pub loss_rate: f64,
    /// Probability a packet is delivered twice
    pub duplicate_rate: f64,
    /// Probability a packet swaps places with the next one
    pub reorder_rate: f64,
    /// Jitter range (max delay added)
    pub jitter_ms: u32,
    /// Base delay added to all packets
    pub delay_ms: u32,
    /// Seeded random source driving loss, duplication and reordering
    pub rng: StdRng,
}

impl NetworkSimulator {
    fn with_rates(loss: f64, duplicate: f64, reorder: f64, jitter_ms: u32, delay_ms: u32) -> Self {
        Self {
            loss_rate: loss,
            duplicate_rate: duplicate,
            reorder_rate: reorder,
            jitter_ms,
            delay_ms,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Perfect network (no issues)
    #[must_use]
    pub fn perfect() -> Self {
        Self::with_rates(0.0, 0.0, 0.0, 0, 0)
    }

    /// Good `WiFi` conditions
    #[must_use]
    pub fn good_wifi() -> Self {
        Self::with_rates(0.001, 0.0, 0.001, 5, 2)
    }

    /// Poor `WiFi` conditions
    #[must_use]
    pub fn poor_wifi() -> Self {
        Self::with_rates(0.05, 0.01, 0.05, 50, 30)
    }

    /// Very poor conditions
    #[must_use]
    pub fn stress_test() -> Self {
        Self::with_rates(0.10, 0.05, 0.20, 100, 50)
    }

    /// Reseed for a reproducible run
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Should this packet be dropped?
    pub fn should_drop(&mut self) -> bool {
        self.loss_rate > 0.0 && self.rng.gen_bool(self.loss_rate.min(1.0))
    }

    /// Should this packet be delivered twice?
    pub fn should_duplicate(&mut self) -> bool {
        self.duplicate_rate > 0.0 && self.rng.gen_bool(self.duplicate_rate.min(1.0))
    }

    /// Should this packet be reordered?
    pub fn should_reorder(&mut self) -> bool {
        self.reorder_rate > 0.0 && self.rng.gen_bool(self.reorder_rate.min(1.0))
    }

    /// Delay for this packet
    pub fn get_delay(&mut self) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            self.rng.gen_range(0..self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(u64::from(self.delay_ms + jitter))
    }

    /// Run a packet sequence through the simulated network
    ///
    /// Returns the packets in delivery order.
    pub fn deliver<T: Clone>(&mut self, packets: impl IntoIterator<Item = T>) -> Vec<T> {
        let mut out = Vec::new();
        for packet in packets {
            if self.should_drop() {
                continue;
            }
            if self.should_duplicate() {
                out.push(packet.clone());
            }
            out.push(packet);
        }

        let mut i = 0;
        while i + 1 < out.len() {
            if self.should_reorder() {
                out.swap(i, i + 1);
                i += 2;
            } else {
                i += 1;
            }
        }
        out
    }
}

impl Default for NetworkSimulator {
    fn default() -> Self {
        Self::perfect()
    }
}
