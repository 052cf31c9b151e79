//! Events delivered to the application layer

use std::time::Duration;

use tokio::sync::broadcast;

use crate::connection::{ConnectionEvent, ConnectionState, ConnectionStatus, DisconnectReason};
use crate::mixer::MixSnapshot;
use crate::protocol::ServerInfo;
use crate::types::ServerAddress;

/// Events emitted by [`MonitorClient`](super::MonitorClient)
#[derive(Debug, Clone)]
pub enum ClientEvent {
    // Connection events
    /// User-facing connection status changed
    ConnectionStatus {
        /// Whether a session is up (connected or degraded)
        connected: bool,
        /// Status shown to the user
        status: ConnectionStatus,
        /// Short human-readable description
        message: String,
    },
    /// A session was established
    Connected {
        /// The server
        server: ServerAddress,
        /// Whether the reconnect supervisor established it
        reconnected: bool,
    },
    /// A reconnect attempt is scheduled
    Reconnecting {
        /// Attempt number, starting at 1
        attempt: u32,
        /// Delay before the attempt
        delay: Duration,
    },
    /// The session ended
    Disconnected {
        /// Why
        reason: DisconnectReason,
    },

    // Server events
    /// Server description from the handshake
    ServerInfo(ServerInfo),
    /// Server confirmed the subscription
    SubscriptionConfirmed {
        /// Channels now streamed
        channels: Vec<u32>,
    },
    /// Mix changed because of a server message
    MixState(MixSnapshot),

    // Audio events
    /// Peak level per channel, throttled
    AudioMeter {
        /// `(channel, peak)` pairs, peak in linear scale
        levels: Vec<(u32, f32)>,
    },
    /// Audio started flowing after a quiet period
    StreamActive,
    /// No audio arrived for the idle timeout
    StreamIdle,

    // Error events
    /// Error occurred
    Error {
        /// Error message
        message: String,
        /// Whether the link recovers on its own
        recoverable: bool,
    },
}

impl ClientEvent {
    /// Map a connection-layer event to its application-level counterpart
    #[must_use]
    pub fn from_connection(event: ConnectionEvent) -> Self {
        match event {
            ConnectionEvent::StateChanged { new, status, .. } => Self::ConnectionStatus {
                connected: new.is_connected(),
                status,
                message: if new == ConnectionState::Degraded {
                    "degraded".to_string()
                } else {
                    status.to_string()
                },
            },
            ConnectionEvent::Connected {
                server,
                reconnected,
            } => Self::Connected {
                server,
                reconnected,
            },
            ConnectionEvent::ServerInfo(info) => Self::ServerInfo(info),
            ConnectionEvent::SubscriptionConfirmed { channels } => {
                Self::SubscriptionConfirmed { channels }
            }
            ConnectionEvent::MixChanged(snapshot) => Self::MixState(snapshot),
            ConnectionEvent::Disconnected { reason } => Self::Disconnected { reason },
            ConnectionEvent::Reconnecting { attempt, delay } => {
                Self::Reconnecting { attempt, delay }
            }
            ConnectionEvent::Error {
                message,
                recoverable,
            } => Self::Error {
                message,
                recoverable,
            },
        }
    }

    /// Whether this is a connection lifecycle event
    #[must_use]
    pub fn is_connection_event(&self) -> bool {
        matches!(
            self,
            Self::ConnectionStatus { .. }
                | Self::Connected { .. }
                | Self::Reconnecting { .. }
                | Self::Disconnected { .. }
        )
    }
}

/// Event bus for distributing events
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    /// Create a new event bus
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    /// Subscribe to events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    pub fn emit(&self, event: ClientEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }

    /// Get subscriber count
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
pub struct EventFilter {
    rx: broadcast::Receiver<ClientEvent>,
    filter: Box<dyn Fn(&ClientEvent) -> bool + Send>,
}

impl std::fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFilter").finish_non_exhaustive()
    }
}

impl EventFilter {
    /// Create a filtered event receiver
    pub fn new<F>(bus: &EventBus, filter: F) -> Self
    where
        F: Fn(&ClientEvent) -> bool + Send + 'static,
    {
        Self {
            rx: bus.subscribe(),
            filter: Box::new(filter),
        }
    }

    /// Receive next matching event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if (self.filter)(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Connection lifecycle events only
    #[must_use]
    pub fn connection_events(bus: &EventBus) -> Self {
        Self::new(bus, ClientEvent::is_connection_event)
    }

    /// Meter and stream activity events only
    #[must_use]
    pub fn audio_events(bus: &EventBus) -> Self {
        Self::new(bus, |e| {
            matches!(
                e,
                ClientEvent::AudioMeter { .. } | ClientEvent::StreamActive | ClientEvent::StreamIdle
            )
        })
    }
}
