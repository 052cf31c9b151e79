//! Test fixtures: a mock mixing server, a network simulator and a
//! recording output backend

pub mod mock_server;
pub mod network_sim;
pub mod recording;

#[cfg(test)]
mod tests;

pub use mock_server::{MockMixServer, MockServerConfig};
pub use network_sim::NetworkSimulator;
pub use recording::{RecordingBackend, RecordingStream};
