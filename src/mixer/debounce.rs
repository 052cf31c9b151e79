//! Outbound mix change coalescing

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use super::ChannelMix;
use crate::protocol::control::MixUpdate;
use crate::types::MixSyncConfig;

/// Changes ready to send
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMix {
    /// Channel changes for `update_mix`
    pub update: Option<MixUpdate>,
    /// New master gain for `set_master_gain`
    pub master_gain_db: Option<f32>,
}

impl OutboundMix {
    /// Whether there is nothing to send
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.update.is_none() && self.master_gain_db.is_none()
    }
}

/// Coalesces local edits into at most one message per interval
///
/// Each channel keeps the last values the server is known to have. A flush
/// sends only fields that moved past their threshold from that baseline;
/// smaller moves stay unsent until they accumulate.
#[derive(Debug, Clone)]
pub struct MixDebouncer {
    config: MixSyncConfig,
    pending: BTreeSet<u32>,
    pending_subscription: bool,
    pending_master: bool,
    sent: BTreeMap<u32, ChannelMix>,
    sent_subscription: Option<Vec<u32>>,
    sent_master: f32,
    last_flush: Option<Instant>,
}

impl MixDebouncer {
    /// Create a debouncer with the given thresholds
    #[must_use]
    pub fn new(config: MixSyncConfig) -> Self {
        Self {
            config,
            pending: BTreeSet::new(),
            pending_subscription: false,
            pending_master: false,
            sent: BTreeMap::new(),
            sent_subscription: None,
            sent_master: 0.0,
            last_flush: None,
        }
    }

    /// Record a local channel edit
    pub fn touch_channel(&mut self, channel: u32) {
        self.pending.insert(channel);
    }

    /// Record a local subscription edit
    pub fn touch_subscription(&mut self) {
        self.pending_subscription = true;
    }

    /// Record a local master gain edit
    pub fn touch_master(&mut self) {
        self.pending_master = true;
    }

    /// The server reported `mix` for `channel`
    pub fn remote_channel(&mut self, channel: u32, mix: ChannelMix) {
        self.sent.insert(channel, mix);
    }

    /// The server reported this subscription
    pub fn remote_subscription(&mut self, channels: Vec<u32>) {
        self.sent_subscription = Some(channels);
    }

    /// The server reported this master gain
    pub fn remote_master(&mut self, gain_db: f32) {
        self.sent_master = gain_db;
    }

    /// Whether any local edit awaits a flush
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.pending_subscription || self.pending_master
    }

    /// Forget everything, including baselines
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    /// Collect what should go out now
    ///
    /// Returns `None` when nothing is pending, the previous flush was less
    /// than one interval ago, or every pending change is below threshold.
    pub fn flush(
        &mut self,
        now: Instant,
        channels: &BTreeMap<u32, ChannelMix>,
        subscription: &[u32],
        master_gain_db: f32,
    ) -> Option<OutboundMix> {
        if !self.has_pending() {
            return None;
        }
        if let Some(last) = self.last_flush {
            if now.saturating_duration_since(last) < self.config.interval {
                return None;
            }
        }

        let mut update = MixUpdate::default();
        for channel in std::mem::take(&mut self.pending) {
            let Some(current) = channels.get(&channel) else {
                continue;
            };
            let baseline = self.sent.entry(channel).or_default();

            if (current.gain_db - baseline.gain_db).abs() >= self.config.min_gain_delta_db {
                update.gains.insert(channel, current.gain_db);
                baseline.gain_db = current.gain_db;
            }
            if (current.pan - baseline.pan).abs() >= self.config.min_pan_delta {
                update.pans.insert(channel, current.pan);
                baseline.pan = current.pan;
            }
            if current.mute != baseline.mute {
                update.mutes.insert(channel, current.mute);
                baseline.mute = current.mute;
            }
        }

        if std::mem::take(&mut self.pending_subscription)
            && self.sent_subscription.as_deref() != Some(subscription)
        {
            update.channels = Some(subscription.to_vec());
            self.sent_subscription = Some(subscription.to_vec());
        }

        let mut out = OutboundMix::default();
        if std::mem::take(&mut self.pending_master)
            && (master_gain_db - self.sent_master).abs() >= self.config.min_gain_delta_db
        {
            out.master_gain_db = Some(master_gain_db);
            self.sent_master = master_gain_db;
        }
        if !update.is_empty() {
            out.update = Some(update);
        }

        if out.is_empty() {
            return None;
        }
        self.last_flush = Some(now);
        Some(out)
    }
}
