//! # stagelink
//!
//! Client side of a live multi-channel audio monitoring link.
//!
//! A mixing server streams multi-channel audio to a monitoring device over
//! an unreliable network. This crate keeps the link alive, decodes and
//! reorders the audio, applies the per-channel mix and hands stereo
//! buffers to an output sink.
//!
//! ## Features
//!
//! - Framed stream transport with handshake, heartbeat liveness and
//!   exponential-backoff reconnection
//! - Subscription and mix state replayed on every reconnect
//! - float32, int16, zlib and (optionally) Opus audio payloads
//! - Datagram transport with a sequence-ordered jitter buffer
//! - Per-channel gain, pan and mute with debounced sync to the server
//! - Output stream recovery and buffer pooling on the render path
//!
//! ## Example
//!
//! ```rust,no_run
//! use stagelink::{ClientEvent, LinkConfig, MonitorClient};
//!
//! # async fn example() -> Result<(), stagelink::LinkError> {
//! let client = MonitorClient::new(LinkConfig::default()).await?;
//! client.connect("192.168.1.20", 9000).await?;
//! client.subscribe(&[0, 1, 4]).await?;
//!
//! let mut events = client.events();
//! while let Ok(event) = events.recv().await {
//!     if let ClientEvent::ConnectionStatus { message, .. } = event {
//!         println!("link: {message}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Client**: [`MonitorClient`] wires everything together
//! - **Connection**: [`connection::ConnectionManager`] owns the socket and
//!   the session state machine
//! - **Pipeline**: [`protocol`] and [`codec`] decode frames,
//!   [`audio::JitterBuffer`] reorders datagrams, [`render::RenderEngine`]
//!   mixes into output streams

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
/// Core types
pub mod types;

/// Testing utilities
pub mod testing;

pub mod audio;
mod client;
pub mod codec;
pub mod connection;
pub mod mixer;
pub mod net;
pub mod protocol;
pub mod render;
pub mod storage;

// Re-exports
pub use audio::{OutputBackend, OutputStream, RingBufferBackend};
pub use client::{
    ClientEvent, DatagramReceiver, EventBus, EventFilter, MonitorClient, MonitorClientBuilder,
    ReceiverConfig, ReceiverStats,
};
pub use connection::{ConnectionState, ConnectionStatus, DisconnectReason};
pub use error::{LinkError, Result};
pub use mixer::{ChannelMix, MixSnapshot, MixerState};
pub use render::{RenderEngine, RenderStats};
pub use storage::{ClientIdentity, FileStore, IdentityStore, MemoryStore};
pub use types::{LinkConfig, ReconnectPolicy, RenderMode, ServerAddress};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        ClientEvent, ConnectionState, ConnectionStatus, LinkConfig, LinkError, MixSnapshot,
        MonitorClient, RenderMode, ServerAddress,
    };
}
