//! Lock-guarded mixer state with change notifications

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use tokio::sync::watch;

use super::debounce::{MixDebouncer, OutboundMix};
use super::{ChannelChange, ChannelMix, MixSnapshot, UpdateOrigin};
use crate::audio::dsp::clamp_gain_db;
use crate::protocol::control::{FullStateSync, MixStateMessage};
use crate::types::MixSyncConfig;

#[derive(Debug)]
struct Inner {
    channels: BTreeMap<u32, ChannelMix>,
    master_gain_db: f32,
    debouncer: MixDebouncer,
}

impl Inner {
    fn subscription(&self) -> Vec<u32> {
        self.channels
            .iter()
            .filter(|(_, mix)| mix.active)
            .map(|(&ch, _)| ch)
            .collect()
    }

    fn snapshot(&self) -> MixSnapshot {
        MixSnapshot {
            channels: self.subscription(),
            gains: self.channels.iter().map(|(&c, m)| (c, m.gain_db)).collect(),
            pans: self.channels.iter().map(|(&c, m)| (c, m.pan)).collect(),
            mutes: self.channels.iter().map(|(&c, m)| (c, m.mute)).collect(),
            master_gain_db: self.master_gain_db,
        }
    }

    fn set_subscription(&mut self, channels: &[u32]) {
        for (ch, mix) in &mut self.channels {
            mix.active = channels.contains(ch);
        }
        for &ch in channels {
            self.channels.entry(ch).or_default().active = true;
        }
    }

    fn merge_maps(
        &mut self,
        gains: &BTreeMap<u32, f32>,
        pans: &BTreeMap<u32, f32>,
        mutes: &BTreeMap<u32, bool>,
    ) {
        for (&ch, &db) in gains {
            ChannelChange::gain(db).apply_to(self.channels.entry(ch).or_default());
        }
        for (&ch, &pan) in pans {
            ChannelChange::pan(pan).apply_to(self.channels.entry(ch).or_default());
        }
        for (&ch, &mute) in mutes {
            self.channels.entry(ch).or_default().mute = mute;
        }
    }

    /// Make the server's view the debounce baseline
    fn adopt_as_baseline(&mut self) {
        for (&ch, &mix) in &self.channels {
            self.debouncer.remote_channel(ch, mix);
        }
        let subscription = self.subscription();
        self.debouncer.remote_subscription(subscription);
        self.debouncer.remote_master(self.master_gain_db);
    }
}

/// Per-channel mix state behind one lock
///
/// Readers on the render path take the read lock for a single lookup; all
/// mutations go through the write lock and publish a fresh
/// [`MixSnapshot`] to watchers.
#[derive(Debug)]
pub struct MixerState {
    inner: RwLock<Inner>,
    tx: watch::Sender<MixSnapshot>,
}

impl MixerState {
    /// Create an empty mixer
    #[must_use]
    pub fn new(sync: MixSyncConfig) -> Self {
        let (tx, _) = watch::channel(MixSnapshot::default());
        Self {
            inner: RwLock::new(Inner {
                channels: BTreeMap::new(),
                master_gain_db: 0.0,
                debouncer: MixDebouncer::new(sync),
            }),
            tx,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep going
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.tx.send_replace(inner.snapshot());
    }

    /// Apply a change to one channel and return its new settings
    pub fn update(&self, channel: u32, change: ChannelChange, origin: UpdateOrigin) -> ChannelMix {
        let mut inner = self.write();
        let mix = inner.channels.entry(channel).or_default();
        change.apply_to(mix);
        let mix = *mix;

        match origin {
            UpdateOrigin::Local => {
                inner.debouncer.touch_channel(channel);
                if change.active.is_some() {
                    inner.debouncer.touch_subscription();
                }
            }
            UpdateOrigin::Remote => {
                inner.debouncer.remote_channel(channel, mix);
                if change.active.is_some() {
                    let subscription = inner.subscription();
                    inner.debouncer.remote_subscription(subscription);
                }
            }
        }

        tracing::trace!(channel, ?origin, gain_db = mix.gain_db, pan = mix.pan, "Channel mix updated");
        self.publish(&inner);
        mix
    }

    /// Replace the set of subscribed channels
    pub fn set_subscription(&self, channels: &[u32], origin: UpdateOrigin) {
        let mut inner = self.write();
        inner.set_subscription(channels);
        match origin {
            UpdateOrigin::Local => inner.debouncer.touch_subscription(),
            UpdateOrigin::Remote => {
                let subscription = inner.subscription();
                inner.debouncer.remote_subscription(subscription);
            }
        }
        self.publish(&inner);
    }

    /// Set the master gain, clamped; returns the applied value
    pub fn set_master_gain(&self, gain_db: f32, origin: UpdateOrigin) -> f32 {
        let mut inner = self.write();
        inner.master_gain_db = clamp_gain_db(gain_db);
        let applied = inner.master_gain_db;
        match origin {
            UpdateOrigin::Local => inner.debouncer.touch_master(),
            UpdateOrigin::Remote => inner.debouncer.remote_master(applied),
        }
        self.publish(&inner);
        applied
    }

    /// Apply a `mix_state` message from the server
    pub fn apply_mix_state(&self, msg: &MixStateMessage) {
        let mut inner = self.write();
        inner.set_subscription(&msg.channels);
        inner.merge_maps(&msg.gains, &msg.pans, &msg.mutes);
        if let Some(master) = msg.master_gain {
            inner.master_gain_db = clamp_gain_db(master);
        }
        inner.adopt_as_baseline();
        self.publish(&inner);
    }

    /// Apply a `full_state_sync` message from the server
    ///
    /// Channels the server no longer operates are left unsubscribed.
    pub fn apply_full_sync(&self, msg: &FullStateSync) {
        let mut inner = self.write();
        inner.set_subscription(&msg.restorable_channels());
        inner.merge_maps(&msg.gains, &msg.pans, &msg.mutes);
        inner.adopt_as_baseline();
        self.publish(&inner);
    }

    /// Treat the current mix as what the server has
    ///
    /// Called after the full mix went out with `subscribe`, so the
    /// debouncer does not send the same values again.
    pub fn mark_synced(&self) {
        self.write().adopt_as_baseline();
    }

    /// Settings of one channel
    #[must_use]
    pub fn channel(&self, channel: u32) -> Option<ChannelMix> {
        self.read().channels.get(&channel).copied()
    }

    /// Settings of one channel plus the master gain, in one lock
    #[must_use]
    pub fn channel_with_master(&self, channel: u32) -> (Option<ChannelMix>, f32) {
        let inner = self.read();
        (inner.channels.get(&channel).copied(), inner.master_gain_db)
    }

    /// Current master gain in dB
    #[must_use]
    pub fn master_gain_db(&self) -> f32 {
        self.read().master_gain_db
    }

    /// Subscribed channels, ascending
    #[must_use]
    pub fn subscription(&self) -> Vec<u32> {
        self.read().subscription()
    }

    /// Copy of the whole mix
    #[must_use]
    pub fn snapshot(&self) -> MixSnapshot {
        self.read().snapshot()
    }

    /// Watch for changes
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<MixSnapshot> {
        self.tx.subscribe()
    }

    /// Collect debounced local changes that are due
    pub fn take_outbound(&self, now: Instant) -> Option<OutboundMix> {
        let mut inner = self.write();
        let subscription = inner.subscription();
        let master = inner.master_gain_db;
        let Inner {
            channels,
            debouncer,
            ..
        } = &mut *inner;
        debouncer.flush(now, channels, &subscription, master)
    }

    /// Forget every channel, the master gain and the sync baseline
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.channels.clear();
        inner.master_gain_db = 0.0;
        inner.debouncer.reset();
        self.publish(&inner);
    }
}

impl Default for MixerState {
    fn default() -> Self {
        Self::new(MixSyncConfig::default())
    }
}
