//! Connection state, events and statistics

use std::fmt;
use std::time::{Duration, Instant};

use crate::mixer::MixSnapshot;
use crate::protocol::ServerInfo;
use crate::types::ServerAddress;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Idle,
    /// TCP connect and handshake in progress
    Connecting,
    /// Handshake done, traffic flowing
    Connected,
    /// Connected but the server has been quiet for over a heartbeat interval
    Degraded,
    /// Connection lost, reconnect supervisor running
    Reconnecting,
}

impl ConnectionState {
    /// Check if currently connected or trying to be
    #[must_use]
    pub fn is_active(self) -> bool {
        !matches!(self, ConnectionState::Idle)
    }

    /// Check if a session is up (possibly degraded)
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }

    /// User-facing status for this state
    #[must_use]
    pub fn status(self) -> ConnectionStatus {
        match self {
            ConnectionState::Connected | ConnectionState::Degraded => ConnectionStatus::Online,
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                ConnectionStatus::Searching
            }
            ConnectionState::Idle => ConnectionStatus::Offline,
        }
    }
}

/// Coarse status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Audio link up
    Online,
    /// Connecting or reconnecting
    Searching,
    /// Not connected
    Offline,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionStatus::Online => "connected",
            ConnectionStatus::Searching => "searching",
            ConnectionStatus::Offline => "offline",
        })
    }
}

/// Connection events
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// State changed
    StateChanged {
        /// The previous state
        old: ConnectionState,
        /// The new state
        new: ConnectionState,
        /// User-facing status of the new state
        status: ConnectionStatus,
    },
    /// Session established
    Connected {
        /// The server
        server: ServerAddress,
        /// Whether this came from the reconnect supervisor
        reconnected: bool,
    },
    /// Server description from the handshake
    ServerInfo(ServerInfo),
    /// Server confirmed a subscription
    SubscriptionConfirmed {
        /// Channels now streamed
        channels: Vec<u32>,
    },
    /// Mixer state changed because of a server message
    MixChanged(MixSnapshot),
    /// Session ended
    Disconnected {
        /// Why
        reason: DisconnectReason,
    },
    /// A reconnect attempt is scheduled
    Reconnecting {
        /// Attempt number, starting at 1
        attempt: u32,
        /// Delay before the attempt
        delay: Duration,
    },
    /// Error occurred
    Error {
        /// The error message
        message: String,
        /// Whether the link will recover on its own
        recoverable: bool,
    },
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// User requested disconnect
    UserRequested,
    /// User requested disconnect and a mixer reset
    FullReset,
    /// No inbound traffic within the liveness window
    HeartbeatTimeout,
    /// Read or write failure
    NetworkError(String),
    /// Server closed the socket
    ServerClosed,
    /// Too many consecutive bad headers
    ProtocolDesync {
        /// Bad headers in a row
        consecutive: u32,
    },
    /// Reconnect budget used up
    ReconnectExhausted {
        /// Attempts made
        attempts: u32,
    },
}

impl DisconnectReason {
    /// Whether the user asked for this
    #[must_use]
    pub fn is_user_requested(&self) -> bool {
        matches!(self, Self::UserRequested | Self::FullReset)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRequested => f.write_str("disconnected by user"),
            Self::FullReset => f.write_str("disconnected with full reset"),
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            Self::NetworkError(e) => write!(f, "network error: {e}"),
            Self::ServerClosed => f.write_str("server closed the connection"),
            Self::ProtocolDesync { consecutive } => {
                write!(f, "protocol desync after {consecutive} bad headers")
            }
            Self::ReconnectExhausted { attempts } => {
                write!(f, "gave up after {attempts} reconnect attempts")
            }
        }
    }
}

/// Connection statistics
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    /// Time the current session was established
    pub connected_at: Option<Instant>,
    /// Frames received
    pub frames_received: u64,
    /// Bytes received, headers included
    pub bytes_received: u64,
    /// Frames sent
    pub frames_sent: u64,
    /// Bytes sent, headers included
    pub bytes_sent: u64,
    /// Headers with a bad magic number
    pub magic_errors: u64,
    /// Frames skipped for exceeding their payload ceiling
    pub oversize_drops: u64,
    /// Frames skipped for an unknown message type
    pub unknown_frames: u64,
    /// Audio payloads that failed to decode
    pub decode_failures: u64,
    /// Control payloads that failed to parse
    pub control_errors: u64,
    /// Decoded packets dropped because the audio queue was full
    pub queue_drops: u64,
    /// Heartbeats sent
    pub heartbeats_sent: u64,
    /// Reconnect attempts made
    pub reconnect_attempts: u32,
    /// Successful reconnects
    pub reconnects: u32,
    /// Last error message
    pub last_error: Option<String>,
}

impl ConnectionStats {
    /// Get connection uptime
    #[must_use]
    pub fn uptime(&self) -> Option<Duration> {
        self.connected_at.map(|t| t.elapsed())
    }

    /// Record a sent frame
    pub fn record_sent(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Record a received frame
    pub fn record_received(&mut self, bytes: usize) {
        self.frames_received += 1;
        self.bytes_received += bytes as u64;
    }
}
