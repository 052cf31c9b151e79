//! Core types module

mod config;

pub use config::{
    HeartbeatConfig, LinkConfig, LinkConfigBuilder, MixSyncConfig, PayloadLimits,
    ReconnectPolicy, RenderConfig, RenderMode,
};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Host and port of a mixing server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    /// Hostname or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl ServerAddress {
    /// Create a new server address
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
