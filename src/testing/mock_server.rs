//! Mock mixing server for tests
//!
//! Speaks the framed stream protocol on a local TCP port. It answers
//! handshakes and heartbeats, records every control message it receives,
//! and lets a test push audio or control frames to the connected clients
//! or cut them off.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::LinkError;
use crate::net::{Runtime, unix_millis};
use crate::protocol::header::wire_timestamp;
use crate::protocol::{
    AudioFlags, Frame, FrameCodec, InboundFrame, MessageType, PayloadEncoding,
    encode_audio_payload,
};

/// Configuration for the mock server
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Port to listen on (0 picks a free one)
    pub port: u16,
    /// Sample rate reported in `handshake_response`
    pub sample_rate: u32,
    /// Channel count reported in `handshake_response`
    pub max_channels: u32,
    /// Answer `handshake` messages
    pub respond_handshake: bool,
    /// Answer `heartbeat` messages
    pub respond_heartbeat: bool,
    /// Answer `subscribe` with `subscription_confirmed`
    pub confirm_subscribe: bool,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            sample_rate: 48_000,
            max_channels: 8,
            respond_handshake: true,
            respond_heartbeat: true,
            confirm_subscribe: true,
        }
    }
}

/// Internal state of the mock server
#[derive(Debug, Default)]
struct ServerState {
    /// Every control message received, in order
    received: Vec<Value>,
    /// Heartbeat frames (not messages) received
    heartbeat_frames: usize,
    /// Connections accepted so far
    accepted: usize,
    /// Client ids that completed a handshake
    known_clients: HashSet<String>,
    /// Stop answering anything
    silent: bool,
}

enum ConnCommand {
    Frame(Frame),
    Raw(Bytes),
    Close,
}

type ConnList = Arc<Mutex<Vec<mpsc::UnboundedSender<ConnCommand>>>>;

/// A mock mixing server
pub struct MockMixServer {
    config: MockServerConfig,
    state: Arc<RwLock<ServerState>>,
    conns: ConnList,
    shutdown: Option<mpsc::Sender<()>>,
    address: Option<SocketAddr>,
}

impl MockMixServer {
    /// Create a server with the given configuration
    #[must_use]
    pub fn new(config: MockServerConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(ServerState::default())),
            conns: Arc::new(Mutex::new(Vec::new())),
            shutdown: None,
            address: None,
        }
    }

    /// Create a server with default configuration
    #[must_use]
    pub fn default_server() -> Self {
        Self::new(MockServerConfig::default())
    }

    /// Bind and start accepting connections
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start(&mut self) -> Result<SocketAddr, std::io::Error> {
        let listener = TcpListener::bind(("127.0.0.1", self.config.port)).await?;
        let addr = listener.local_addr()?;
        self.address = Some(addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        self.shutdown = Some(shutdown_tx);

        let state = Arc::clone(&self.state);
        let conns = Arc::clone(&self.conns);
        let config = self.config.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                tracing::debug!(%peer, "Mock server accepted connection");
                                let (tx, rx) = mpsc::unbounded_channel();
                                if let Ok(mut list) = conns.lock() {
                                    list.push(tx);
                                }
                                state.write().await.accepted += 1;
                                tokio::spawn(Self::handle_connection(
                                    stream,
                                    rx,
                                    Arc::clone(&state),
                                    config.clone(),
                                ));
                            }
                            Err(e) => tracing::error!(error = %e, "Mock server accept failed"),
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(addr)
    }

    /// Stop accepting and close every live connection
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(()).await;
        }
        self.drop_connections();
    }

    /// Address the server listens on
    #[must_use]
    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// Port the server listens on
    #[must_use]
    pub fn port(&self) -> u16 {
        self.address.map_or(0, |a| a.port())
    }

    async fn handle_connection(
        stream: TcpStream,
        mut commands: mpsc::UnboundedReceiver<ConnCommand>,
        state: Arc<RwLock<ServerState>>,
        config: MockServerConfig,
    ) {
        let (read, write) = stream.into_split();
        let mut reader = FramedRead::new(read, FrameCodec::default());
        let mut writer = FramedWrite::new(write, FrameCodec::default());

        loop {
            tokio::select! {
                item = reader.next() => {
                    let frame = match item {
                        Some(Ok(InboundFrame::Frame(frame))) => frame,
                        Some(Ok(InboundFrame::Skipped(_))) => continue,
                        Some(Err(_)) | None => break,
                    };
                    let replies = Self::handle_frame(&frame, &state, &config).await;
                    for reply in replies {
                        if writer.send(server_frame(reply)).await.is_err() {
                            return;
                        }
                    }
                }
                cmd = commands.recv() => {
                    let sent = match cmd {
                        Some(ConnCommand::Frame(frame)) => writer.send(frame).await.is_ok(),
                        Some(ConnCommand::Raw(bytes)) => {
                            writer.flush().await.is_ok()
                                && writer.get_mut().write_all(&bytes).await.is_ok()
                        }
                        Some(ConnCommand::Close) | None => false,
                    };
                    if !sent {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Mock server connection closed");
    }

    async fn handle_frame(
        frame: &Frame,
        state: &RwLock<ServerState>,
        config: &MockServerConfig,
    ) -> Vec<String> {
        let mut state = state.write().await;
        match frame.message_type() {
            Some(MessageType::Heartbeat) => {
                state.heartbeat_frames += 1;
                return Vec::new();
            }
            Some(MessageType::Control) => {}
            _ => return Vec::new(),
        }

        let Ok(msg) = serde_json::from_slice::<Value>(&frame.payload) else {
            return Vec::new();
        };
        let kind = msg["type"].as_str().unwrap_or_default().to_string();
        let client_id = msg["client_id"].as_str().unwrap_or_default().to_string();
        state.received.push(msg.clone());
        if state.silent {
            return Vec::new();
        }

        match kind.as_str() {
            "handshake" if config.respond_handshake => {
                let returning = !state.known_clients.insert(client_id.clone());
                vec![
                    json!({
                        "type": "handshake_response",
                        "server_version": "mock-1",
                        "protocol_version": crate::protocol::PROTOCOL_VERSION,
                        "sample_rate": config.sample_rate,
                        "max_channels": config.max_channels,
                        "rf_mode": msg["rf_mode"].as_bool().unwrap_or(false),
                        "persistent_id": client_id,
                        "is_reconnection": returning,
                        "state_restored": false,
                    })
                    .to_string(),
                ]
            }
            "heartbeat" if config.respond_heartbeat => vec![
                json!({
                    "type": "heartbeat_response",
                    "timestamp": unix_millis(),
                    "clients_connected": state.known_clients.len(),
                })
                .to_string(),
            ],
            "subscribe" if config.confirm_subscribe => vec![
                json!({
                    "type": "subscription_confirmed",
                    "channels": msg["channels"].clone(),
                    "compression_mode": "none",
                })
                .to_string(),
            ],
            _ => Vec::new(),
        }
    }

    fn broadcast(&self, make: impl Fn() -> ConnCommand) -> usize {
        let Ok(mut list) = self.conns.lock() else {
            return 0;
        };
        list.retain(|tx| tx.send(make()).is_ok());
        list.len()
    }

    /// Send a control JSON document to every live connection
    ///
    /// Returns the number of connections reached.
    pub fn send_control(&self, json: &str) -> usize {
        let frame = server_frame(json.to_string());
        self.broadcast(|| ConnCommand::Frame(frame.clone()))
    }

    /// Send an audio frame to every live connection
    ///
    /// # Errors
    ///
    /// Returns `LinkError::InvalidParameter` if the samples cannot be encoded.
    pub fn send_audio(
        &self,
        sample_position: i64,
        channels: &[u32],
        interleaved: &[f32],
        encoding: PayloadEncoding,
    ) -> Result<usize, LinkError> {
        let payload = encode_audio_payload(sample_position, channels, interleaved, encoding)?;
        let frame = Frame::audio(encoding.flags(), wire_timestamp(unix_millis()), payload);
        Ok(self.broadcast(|| ConnCommand::Frame(frame.clone())))
    }

    /// Send an arbitrary frame to every live connection
    pub fn send_frame(&self, frame: &Frame) -> usize {
        self.broadcast(|| ConnCommand::Frame(frame.clone()))
    }

    /// Write raw bytes to every live connection
    pub fn send_raw(&self, bytes: &[u8]) -> usize {
        let bytes = Bytes::copy_from_slice(bytes);
        self.broadcast(|| ConnCommand::Raw(bytes.clone()))
    }

    /// Close every live connection without stopping the listener
    pub fn drop_connections(&self) {
        if let Ok(mut list) = self.conns.lock() {
            for tx in list.drain(..) {
                let _ = tx.send(ConnCommand::Close);
            }
        }
    }

    /// Stop (or resume) answering anything
    pub async fn set_silent(&self, silent: bool) {
        self.state.write().await.silent = silent;
    }

    /// Every control message received so far
    pub async fn received(&self) -> Vec<Value> {
        self.state.read().await.received.clone()
    }

    /// Received control messages of one type
    pub async fn received_of(&self, kind: &str) -> Vec<Value> {
        self.state
            .read()
            .await
            .received
            .iter()
            .filter(|m| m["type"] == kind)
            .cloned()
            .collect()
    }

    /// Heartbeat frames received
    pub async fn heartbeat_frames(&self) -> usize {
        self.state.read().await.heartbeat_frames
    }

    /// Connections accepted so far
    pub async fn accepted(&self) -> usize {
        self.state.read().await.accepted
    }

    /// Live connections
    #[must_use]
    pub fn live_connections(&self) -> usize {
        self.conns
            .lock()
            .map(|list| list.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Wait until `count` messages of `kind` have arrived
    ///
    /// Returns the last one, or `None` on timeout.
    pub async fn wait_for(&self, kind: &str, count: usize, timeout: Duration) -> Option<Value> {
        let poll = async {
            loop {
                let seen = self.received_of(kind).await;
                if seen.len() >= count {
                    return seen.last().cloned();
                }
                Runtime::sleep(Duration::from_millis(10)).await;
            }
        };
        Runtime::timeout(timeout, poll).await.ok().flatten()
    }

    /// Wait until at least `count` connections have been accepted
    pub async fn wait_for_accepted(&self, count: usize, timeout: Duration) -> bool {
        let poll = async {
            while self.accepted().await < count {
                Runtime::sleep(Duration::from_millis(10)).await;
            }
        };
        Runtime::timeout(timeout, poll).await.is_ok()
    }
}

impl Drop for MockMixServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        self.drop_connections();
    }
}

fn server_frame(json: String) -> Frame {
    Frame::control(json, AudioFlags::RF_MODE, wire_timestamp(unix_millis()))
}
