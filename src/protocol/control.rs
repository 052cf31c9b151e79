//! Control messages
//!
//! Inbound JSON is decoded once into [`ControlMessage`]. Outbound messages
//! are written with [`JsonWriter`](super::json::JsonWriter).

use std::collections::BTreeMap;

use serde::Deserialize;

use super::header::PROTOCOL_VERSION;
use super::json::JsonWriter;
use crate::audio::dsp::{clamp_gain_db, clamp_pan};
use crate::error::LinkError;

fn default_sample_rate() -> u32 {
    48_000
}

fn default_max_channels() -> u32 {
    8
}

fn default_protocol_version() -> u16 {
    PROTOCOL_VERSION
}

/// Server description from `handshake_response`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerInfo {
    /// Server software version
    #[serde(default)]
    pub server_version: Option<String>,
    /// Protocol version spoken by the server
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u16,
    /// Sample rate of the mix
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Number of channels the server can send
    #[serde(default = "default_max_channels")]
    pub max_channels: u32,
    /// Whether the server runs in RF (persistent) mode
    #[serde(default)]
    pub rf_mode: bool,
    /// Server-side latency estimate
    #[serde(default)]
    pub latency_ms: Option<f64>,
    /// Compression the server will use
    #[serde(default)]
    pub compression_mode: Option<String>,
    /// Identifier under which the server keeps our state
    #[serde(default)]
    pub persistent_id: Option<String>,
    /// Server recognised us from an earlier session
    #[serde(default)]
    pub is_reconnection: bool,
    /// Server restored our earlier subscription and mix
    #[serde(default)]
    pub state_restored: bool,
    /// Frames per server processing block
    #[serde(default)]
    pub server_blocksize: Option<u32>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            server_version: None,
            protocol_version: PROTOCOL_VERSION,
            sample_rate: default_sample_rate(),
            max_channels: default_max_channels(),
            rf_mode: false,
            latency_ms: None,
            compression_mode: None,
            persistent_id: None,
            is_reconnection: false,
            state_restored: false,
            server_blocksize: None,
        }
    }
}

/// Single-channel change pushed by the server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelUpdate {
    /// Channel index
    pub channel: u32,
    /// New gain in dB
    #[serde(default, rename = "gainDb", alias = "gain_db")]
    pub gain_db: Option<f32>,
    /// New pan position
    #[serde(default)]
    pub pan: Option<f32>,
    /// New subscription state
    #[serde(default)]
    pub active: Option<bool>,
    /// New mute state
    #[serde(default, alias = "muted")]
    pub mute: Option<bool>,
}

/// Complete mix snapshot pushed by the server
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct MixStateMessage {
    /// Subscribed channels
    #[serde(default)]
    pub channels: Vec<u32>,
    /// Gain per channel in dB
    #[serde(default)]
    pub gains: BTreeMap<u32, f32>,
    /// Pan per channel
    #[serde(default)]
    pub pans: BTreeMap<u32, f32>,
    /// Mute per channel
    #[serde(default)]
    pub mutes: BTreeMap<u32, bool>,
    /// Master gain in dB
    #[serde(default)]
    pub master_gain: Option<f32>,
}

/// State restore sent by the server after a reconnect
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct FullStateSync {
    /// Channels the server can currently deliver
    #[serde(default)]
    pub operational_channels: Vec<u32>,
    /// Channels we were subscribed to
    #[serde(default)]
    pub channels: Vec<u32>,
    /// Gain per channel in dB
    #[serde(default)]
    pub gains: BTreeMap<u32, f32>,
    /// Pan per channel
    #[serde(default)]
    pub pans: BTreeMap<u32, f32>,
    /// Mute per channel
    #[serde(default)]
    pub mutes: BTreeMap<u32, bool>,
}

impl FullStateSync {
    /// Subscribed channels that are still operational
    ///
    /// A sync without `operational_channels` restores nothing.
    #[must_use]
    pub fn restorable_channels(&self) -> Vec<u32> {
        self.channels
            .iter()
            .copied()
            .filter(|ch| self.operational_channels.contains(ch))
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct SubscriptionConfirmed {
    #[serde(default)]
    channels: Vec<u32>,
    #[serde(default)]
    compression_mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HeartbeatResponse {
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    clients_connected: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MasterGainUpdate {
    #[serde(rename = "gainDb", alias = "gain_db")]
    gain_db: f32,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Inbound control message
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Reply to our handshake
    HandshakeResponse(ServerInfo),
    /// Reply to our heartbeat
    HeartbeatResponse {
        /// Server clock in milliseconds
        timestamp: Option<f64>,
        /// Number of clients connected to the server
        clients_connected: Option<u32>,
    },
    /// Subscription accepted
    SubscriptionConfirmed {
        /// Channels now streamed
        channels: Vec<u32>,
        /// Compression used for them
        compression_mode: Option<String>,
    },
    /// One channel changed (`channel_update` or `control_update`)
    ChannelUpdate(ChannelUpdate),
    /// Master gain changed
    MasterGainUpdate {
        /// New master gain in dB
        gain_db: f32,
    },
    /// Complete mix snapshot
    MixState(MixStateMessage),
    /// State restore after reconnect
    FullStateSync(FullStateSync),
    /// A type this client does not handle
    Unknown(String),
}

impl ControlMessage {
    /// Decode a control payload
    ///
    /// # Errors
    ///
    /// Returns `LinkError::MalformedControl` if the payload is not valid JSON
    /// or a known message type is missing required fields.
    pub fn parse(payload: &[u8]) -> Result<Self, LinkError> {
        let envelope: Envelope = serde_json::from_slice(payload).map_err(malformed)?;

        let message = match envelope.kind.as_str() {
            "handshake_response" => {
                Self::HandshakeResponse(serde_json::from_slice(payload).map_err(malformed)?)
            }
            "heartbeat_response" => {
                let r: HeartbeatResponse = serde_json::from_slice(payload).map_err(malformed)?;
                Self::HeartbeatResponse {
                    timestamp: r.timestamp,
                    clients_connected: r.clients_connected,
                }
            }
            "subscription_confirmed" => {
                let r: SubscriptionConfirmed =
                    serde_json::from_slice(payload).map_err(malformed)?;
                Self::SubscriptionConfirmed {
                    channels: r.channels,
                    compression_mode: r.compression_mode,
                }
            }
            "channel_update" | "control_update" => {
                Self::ChannelUpdate(serde_json::from_slice(payload).map_err(malformed)?)
            }
            "master_gain_update" => {
                let r: MasterGainUpdate = serde_json::from_slice(payload).map_err(malformed)?;
                Self::MasterGainUpdate { gain_db: r.gain_db }
            }
            "mix_state" => Self::MixState(serde_json::from_slice(payload).map_err(malformed)?),
            "full_state_sync" => {
                Self::FullStateSync(serde_json::from_slice(payload).map_err(malformed)?)
            }
            other => Self::Unknown(other.to_string()),
        };

        Ok(message)
    }
}

fn malformed(e: serde_json::Error) -> LinkError {
    LinkError::MalformedControl {
        message: e.to_string(),
    }
}

/// Sample format requested from the server
pub const AUDIO_FORMAT: &str = "int16";

/// Handshake parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Persistent client identifier
    pub client_id: String,
    /// RF (persistent) mode
    pub rf_mode: bool,
    /// Ask the server to keep state across reconnects
    pub persistent: bool,
    /// Client will reconnect on its own
    pub auto_reconnect: bool,
    /// Optional stable device identifier
    pub device_uuid: Option<String>,
}

/// Partial mix change sent with `update_mix`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MixUpdate {
    /// New subscription, if changed
    pub channels: Option<Vec<u32>>,
    /// Changed gains in dB
    pub gains: BTreeMap<u32, f32>,
    /// Changed pans
    pub pans: BTreeMap<u32, f32>,
    /// Changed mutes
    pub mutes: BTreeMap<u32, bool>,
}

impl MixUpdate {
    /// Whether there is nothing to send
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_none()
            && self.gains.is_empty()
            && self.pans.is_empty()
            && self.mutes.is_empty()
    }
}

/// Outbound control message
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Session opening
    Handshake(Handshake),
    /// Acknowledge `handshake_response`
    HandshakeAck {
        /// Persistent client identifier
        client_id: String,
    },
    /// Channel subscription with the full mix for those channels
    Subscribe {
        /// Persistent client identifier
        client_id: String,
        /// Channels to receive
        channels: Vec<u32>,
        /// Gain per channel in dB
        gains: BTreeMap<u32, f32>,
        /// Pan per channel
        pans: BTreeMap<u32, f32>,
        /// Mute per channel
        mutes: BTreeMap<u32, bool>,
        /// RF (persistent) mode
        rf_mode: bool,
    },
    /// Liveness ping
    Heartbeat {
        /// Persistent client identifier
        client_id: String,
        /// Last rendered sample position
        sample_position: i64,
    },
    /// Master gain change
    SetMasterGain {
        /// Persistent client identifier
        client_id: String,
        /// Gain in dB
        gain_db: f32,
    },
    /// Partial mix change
    UpdateMix {
        /// Device or client identifier the mix belongs to
        device_id: String,
        /// The changes
        update: MixUpdate,
    },
}

impl OutboundMessage {
    /// Wire name of this message
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::HandshakeAck { .. } => "handshake_ack",
            Self::Subscribe { .. } => "subscribe",
            Self::Heartbeat { .. } => "heartbeat",
            Self::SetMasterGain { .. } => "set_master_gain",
            Self::UpdateMix { .. } => "update_mix",
        }
    }

    /// Encode to JSON with the given millisecond timestamp
    ///
    /// Gains and pans are clamped to their valid ranges.
    #[must_use]
    pub fn to_json(&self, timestamp: u64) -> String {
        let w = JsonWriter::object().string("type", self.type_name());

        match self {
            Self::Handshake(h) => {
                let mut formats = Vec::with_capacity(3);
                if cfg!(feature = "opus") {
                    formats.push("opus");
                }
                formats.extend(["zlib", "none"]);

                let w = w
                    .string("client_id", &h.client_id)
                    .string("client_type", "monitor")
                    .uint("protocol_version", u64::from(PROTOCOL_VERSION))
                    .uint("timestamp", timestamp)
                    .bool("rf_mode", h.rf_mode)
                    .bool("persistent", h.persistent)
                    .bool("auto_reconnect", h.auto_reconnect)
                    .bool("optimized", true)
                    .string("audio_format", AUDIO_FORMAT)
                    .bool("opus_support", cfg!(feature = "opus"))
                    .string_list("compression_formats", &formats);
                match &h.device_uuid {
                    Some(uuid) => w.string("device_uuid", uuid).finish(),
                    None => w.finish(),
                }
            }
            Self::HandshakeAck { client_id } => w
                .string("client_id", client_id)
                .uint("timestamp", timestamp)
                .finish(),
            Self::Subscribe {
                client_id,
                channels,
                gains,
                pans,
                mutes,
                rf_mode,
            } => {
                let mut w = w
                    .string("client_id", client_id)
                    .channel_list("channels", channels)
                    .uint("timestamp", timestamp)
                    .bool("rf_mode", *rf_mode)
                    .bool("persistent", *rf_mode)
                    .string("audio_format", AUDIO_FORMAT)
                    .bool("opus_support", cfg!(feature = "opus"));
                if !gains.is_empty() {
                    w = w.float_map("gains", &clamped_gains(gains));
                }
                if !pans.is_empty() {
                    w = w.float_map("pans", &clamped_pans(pans));
                }
                if !mutes.is_empty() {
                    w = w.bool_map("mutes", mutes);
                }
                w.finish()
            }
            Self::Heartbeat {
                client_id,
                sample_position,
            } => w
                .string("client_id", client_id)
                .int("sample_position", *sample_position)
                .uint("timestamp", timestamp)
                .finish(),
            Self::SetMasterGain { client_id, gain_db } => w
                .string("client_id", client_id)
                .float("gain_db", clamp_gain_db(*gain_db))
                .uint("timestamp", timestamp)
                .finish(),
            Self::UpdateMix { device_id, update } => {
                let mut w = w
                    .string("device_uuid", device_id)
                    .uint("timestamp", timestamp);
                if let Some(channels) = &update.channels {
                    w = w.channel_list("channels", channels);
                }
                if !update.gains.is_empty() {
                    w = w.float_map("gains", &clamped_gains(&update.gains));
                }
                if !update.pans.is_empty() {
                    w = w.float_map("pans", &clamped_pans(&update.pans));
                }
                if !update.mutes.is_empty() {
                    w = w.bool_map("mutes", &update.mutes);
                }
                w.finish()
            }
        }
    }
}

fn clamped_gains(gains: &BTreeMap<u32, f32>) -> BTreeMap<u32, f32> {
    gains.iter().map(|(&ch, &g)| (ch, clamp_gain_db(g))).collect()
}

fn clamped_pans(pans: &BTreeMap<u32, f32>) -> BTreeMap<u32, f32> {
    pans.iter().map(|(&ch, &p)| (ch, clamp_pan(p))).collect()
}
