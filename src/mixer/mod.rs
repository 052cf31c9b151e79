//! Channel mixer state shared by the network and render paths
//!
//! [`MixerState`] is the single source of truth for per-channel gain, pan,
//! subscription and mute plus the master gain. Local edits are coalesced by
//! [`MixDebouncer`] before they reach the server; remote edits only move
//! the debouncer's baseline so they are never echoed back.

mod debounce;
mod state;


use std::collections::BTreeMap;

pub use debounce::{MixDebouncer, OutboundMix};
pub use state::MixerState;

use crate::audio::dsp::{clamp_gain_db, clamp_pan};
use crate::protocol::control::ChannelUpdate;

/// Mix settings of one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelMix {
    /// Gain in dB, within [-60, 12]
    pub gain_db: f32,
    /// Pan position, within [-1, 1]
    pub pan: f32,
    /// Subscribed and rendered
    pub active: bool,
    /// Muted
    pub mute: bool,
}

impl Default for ChannelMix {
    fn default() -> Self {
        Self {
            gain_db: 0.0,
            pan: 0.0,
            active: false,
            mute: false,
        }
    }
}

impl ChannelMix {
    /// Whether the channel should be heard
    #[must_use]
    pub fn is_audible(&self) -> bool {
        self.active && !self.mute
    }
}

/// Partial change to one channel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelChange {
    /// New gain in dB
    pub gain_db: Option<f32>,
    /// New pan
    pub pan: Option<f32>,
    /// New subscription state
    pub active: Option<bool>,
    /// New mute state
    pub mute: Option<bool>,
}

impl ChannelChange {
    /// Change only the gain
    #[must_use]
    pub fn gain(db: f32) -> Self {
        Self {
            gain_db: Some(db),
            ..Self::default()
        }
    }

    /// Change only the pan
    #[must_use]
    pub fn pan(pan: f32) -> Self {
        Self {
            pan: Some(pan),
            ..Self::default()
        }
    }

    /// Change only the subscription state
    #[must_use]
    pub fn active(active: bool) -> Self {
        Self {
            active: Some(active),
            ..Self::default()
        }
    }

    /// Change only the mute state
    #[must_use]
    pub fn mute(mute: bool) -> Self {
        Self {
            mute: Some(mute),
            ..Self::default()
        }
    }

    /// Whether nothing changes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gain_db.is_none() && self.pan.is_none() && self.active.is_none() && self.mute.is_none()
    }

    /// Apply to `mix`, clamping gain and pan
    pub fn apply_to(&self, mix: &mut ChannelMix) {
        if let Some(db) = self.gain_db {
            mix.gain_db = clamp_gain_db(db);
        }
        if let Some(pan) = self.pan {
            mix.pan = clamp_pan(pan);
        }
        if let Some(active) = self.active {
            mix.active = active;
        }
        if let Some(mute) = self.mute {
            mix.mute = mute;
        }
    }
}

impl From<&ChannelUpdate> for ChannelChange {
    fn from(update: &ChannelUpdate) -> Self {
        Self {
            gain_db: update.gain_db,
            pan: update.pan,
            active: update.active,
            mute: update.mute,
        }
    }
}

/// Who made a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// This client (UI or API); synced to the server
    Local,
    /// The server; never sent back
    Remote,
}

/// Point-in-time copy of the whole mix
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MixSnapshot {
    /// Subscribed channels, ascending
    pub channels: Vec<u32>,
    /// Gain per known channel in dB
    pub gains: BTreeMap<u32, f32>,
    /// Pan per known channel
    pub pans: BTreeMap<u32, f32>,
    /// Mute per known channel
    pub mutes: BTreeMap<u32, bool>,
    /// Master gain in dB
    pub master_gain_db: f32,
}

impl MixSnapshot {
    /// Settings of one channel, if known
    #[must_use]
    pub fn channel(&self, channel: u32) -> Option<ChannelMix> {
        let gain_db = *self.gains.get(&channel)?;
        Some(ChannelMix {
            gain_db,
            pan: self.pans.get(&channel).copied().unwrap_or(0.0),
            active: self.channels.contains(&channel),
            mute: self.mutes.get(&channel).copied().unwrap_or(false),
        })
    }

    /// Copy keeping only the subscribed channels' entries
    #[must_use]
    pub fn subscribed_only(&self) -> Self {
        let subscribed = |ch: u32| self.channels.contains(&ch);
        Self {
            channels: self.channels.clone(),
            gains: filter_map(&self.gains, subscribed),
            pans: filter_map(&self.pans, subscribed),
            mutes: filter_map(&self.mutes, subscribed),
            master_gain_db: self.master_gain_db,
        }
    }
}

fn filter_map<V: Copy>(map: &BTreeMap<u32, V>, keep: impl Fn(u32) -> bool) -> BTreeMap<u32, V> {
    map.iter()
        .filter(|(ch, _)| keep(**ch))
        .map(|(&ch, &v)| (ch, v))
        .collect()
}
