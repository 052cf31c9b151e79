//! Top-level monitoring client
//!
//! [`MonitorClient`] owns one session end to end: the persisted identity,
//! the shared mixer, the connection manager, the render engine and the
//! optional datagram receiver. Connection events are re-published as
//! [`ClientEvent`]s together with the audio keep-alive and meter events.

mod events;
mod receiver;
mod router;

#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

pub use events::{ClientEvent, EventBus, EventFilter};
pub use receiver::{DatagramReceiver, ReceiverConfig, ReceiverStats};

use crate::audio::{OutputBackend, RingBufferBackend};
use crate::connection::{ConnectionManager, ConnectionState, ConnectionStats};
use crate::error::LinkError;
use crate::mixer::{MixSnapshot, MixerState};
use crate::protocol::ServerInfo;
use crate::protocol::datagram::client_hash;
use crate::render::{RenderEngine, RenderStats};
use crate::storage::{ClientIdentity, IdentityStore, MemoryStore, load_or_create};
use crate::types::{LinkConfig, ServerAddress};
use router::{PacketRouter, run_idle_watch, run_pump};

/// Running datagram receiver and the pump feeding its output to the router
struct DatagramPath {
    receiver: DatagramReceiver,
    pump: CancellationToken,
}

struct Inner {
    config: LinkConfig,
    identity: Mutex<ClientIdentity>,
    store: Mutex<Box<dyn IdentityStore>>,
    mixer: Arc<MixerState>,
    connection: ConnectionManager,
    engine: Arc<RenderEngine>,
    events: Arc<EventBus>,
    router: Arc<PacketRouter>,
    datagram: Arc<Mutex<Option<DatagramPath>>>,
    tasks: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.tasks.cancel();
    }
}

/// Client for a live multi-channel monitoring link
///
/// # Example
///
/// ```rust,no_run
/// use stagelink::{ClientEvent, MonitorClient};
///
/// # async fn example() -> Result<(), stagelink::LinkError> {
/// let client = MonitorClient::builder().build().await?;
/// let mut events = client.events();
///
/// client.connect("192.168.1.20", 9000).await?;
/// client.subscribe(&[0, 1]).await?;
/// client.set_channel_gain(1, -6.0);
///
/// while let Ok(event) = events.recv().await {
///     if let ClientEvent::AudioMeter { levels } = event {
///         println!("{levels:?}");
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MonitorClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MonitorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorClient")
            .field("client_id", &self.client_id())
            .field("connection", &self.inner.connection)
            .finish_non_exhaustive()
    }
}

/// Builder for [`MonitorClient`]
#[derive(Default)]
pub struct MonitorClientBuilder {
    config: LinkConfig,
    backend: Option<Arc<dyn OutputBackend>>,
    store: Option<Box<dyn IdentityStore>>,
}

impl std::fmt::Debug for MonitorClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorClientBuilder")
            .field("config", &self.config)
            .field("backend", &self.backend.is_some())
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl MonitorClientBuilder {
    /// Set the link configuration
    #[must_use]
    pub fn config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the audio output backend (default: in-memory ring buffers)
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn OutputBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the identity store (default: in-memory)
    #[must_use]
    pub fn store(mut self, store: Box<dyn IdentityStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Load the identity and start the client's background tasks
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the identity cannot be loaded or saved.
    pub async fn build(self) -> Result<MonitorClient, LinkError> {
        let mut store = self
            .store
            .unwrap_or_else(|| Box::new(MemoryStore::new()));
        let identity = load_or_create(store.as_mut()).await?;
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(RingBufferBackend::new()));
        let config = self.config;

        let mixer = Arc::new(MixerState::new(config.mix_sync.clone()));
        let connection =
            ConnectionManager::new(config.clone(), identity.client_id.clone(), Arc::clone(&mixer));
        let engine = Arc::new(RenderEngine::new(
            backend,
            Arc::clone(&mixer),
            config.render.clone(),
        ));
        let events = Arc::new(EventBus::new());
        let router = Arc::new(PacketRouter::new(
            Arc::clone(&engine),
            connection.clone(),
            Arc::clone(&events),
            config.meter_interval,
            config.idle_timeout,
        ));
        let tasks = CancellationToken::new();
        let datagram = Arc::new(Mutex::new(None));

        if let Some(rx) = connection.take_audio_receiver() {
            tokio::spawn(run_pump(Arc::clone(&router), rx, tasks.child_token()));
        }
        tokio::spawn(run_idle_watch(Arc::clone(&router), tasks.child_token()));
        tokio::spawn(forward_events(
            connection.events(),
            Arc::clone(&events),
            Arc::clone(&router),
            Arc::clone(&datagram),
            tasks.child_token(),
        ));

        tracing::info!(client_id = %identity.client_id, "Monitor client ready");

        Ok(MonitorClient {
            inner: Arc::new(Inner {
                config,
                identity: Mutex::new(identity),
                store: Mutex::new(store),
                mixer,
                connection,
                engine,
                events,
                router,
                datagram,
                tasks,
            }),
        })
    }
}

impl MonitorClient {
    /// Start building a client
    #[must_use]
    pub fn builder() -> MonitorClientBuilder {
        MonitorClientBuilder::default()
    }

    /// Client with the given config, an in-memory store and ring-buffer output
    ///
    /// # Errors
    ///
    /// Returns a storage error if the identity cannot be created.
    pub async fn new(config: LinkConfig) -> Result<Self, LinkError> {
        Self::builder().config(config).build().await
    }

    /// Stable client identifier
    #[must_use]
    pub fn client_id(&self) -> &str {
        self.inner.connection.client_id()
    }

    /// The link configuration
    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    /// Copy of the persisted identity
    pub async fn identity(&self) -> ClientIdentity {
        self.inner.identity.lock().await.clone()
    }

    /// Shared mixer state
    #[must_use]
    pub fn mixer(&self) -> &Arc<MixerState> {
        &self.inner.mixer
    }

    /// The render engine
    #[must_use]
    pub fn engine(&self) -> &Arc<RenderEngine> {
        &self.inner.engine
    }

    /// The connection manager
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    // === Connection ===

    /// Connect to a mixing server
    ///
    /// The server is recorded as the last server in the identity store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if already connected, or the connect or
    /// handshake error.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), LinkError> {
        self.connect_to(ServerAddress::new(host, port)).await
    }

    /// Connect to a mixing server by address
    ///
    /// # Errors
    ///
    /// See [`MonitorClient::connect`].
    pub async fn connect_to(&self, server: ServerAddress) -> Result<(), LinkError> {
        self.inner.engine.resume();
        self.inner.connection.connect(server.clone()).await?;
        self.remember_server(server).await;
        Ok(())
    }

    /// Connect to the server of the last successful connect
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if no server was ever recorded, otherwise
    /// see [`MonitorClient::connect`].
    pub async fn connect_last(&self) -> Result<(), LinkError> {
        let last = self.inner.identity.lock().await.last_server.clone();
        let server = last.ok_or_else(|| LinkError::InvalidParameter {
            name: "server".to_string(),
            message: "no previous server recorded".to_string(),
        })?;
        self.connect_to(server).await
    }

    async fn remember_server(&self, server: ServerAddress) {
        let identity = {
            let mut identity = self.inner.identity.lock().await;
            if identity.last_server.as_ref() == Some(&server) {
                return;
            }
            identity.last_server = Some(server);
            identity.clone()
        };
        // The session is up either way; a failed save only loses the hint
        if let Err(e) = self.inner.store.lock().await.save(&identity).await {
            tracing::warn!(error = %e, "Failed to persist last server");
        }
    }

    /// Disconnect, keeping the mix for a later connect
    pub async fn disconnect(&self) {
        self.inner.connection.disconnect().await;
        self.inner.engine.stop();
        self.inner.router.force_idle();
    }

    /// Disconnect and forget the mix and subscription
    pub async fn disconnect_full_reset(&self) {
        self.inner.connection.disconnect_full_reset().await;
        self.inner.engine.stop();
        self.inner.router.force_idle();
        reset_datagram(&self.inner.datagram).await;
    }

    /// Stop everything: the session, the datagram receiver and the
    /// background tasks
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.stop_datagram().await;
        self.inner.tasks.cancel();
        tracing::info!("Monitor client shut down");
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        self.inner.connection.state().await
    }

    /// Whether a session is up
    pub async fn is_connected(&self) -> bool {
        self.state().await.is_connected()
    }

    /// Server description from the last handshake
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.inner.connection.server_info().await
    }

    // === Mix ===

    /// Replace the subscription
    ///
    /// Streams of channels that drop out are closed. While disconnected the
    /// subscription is stored and sent on the next connect.
    ///
    /// # Errors
    ///
    /// Returns the write error if the subscription could not be sent.
    pub async fn subscribe(&self, channels: &[u32]) -> Result<(), LinkError> {
        let previous = self.inner.mixer.subscription();
        self.inner.connection.subscribe(channels).await?;
        for channel in previous.into_iter().filter(|c| !channels.contains(c)) {
            self.inner.engine.release_channel(channel);
        }
        Ok(())
    }

    /// Set a channel's gain in dB
    pub fn set_channel_gain(&self, channel: u32, gain_db: f32) {
        self.inner.engine.set_channel_gain(channel, gain_db);
    }

    /// Set a channel's pan
    pub fn set_channel_pan(&self, channel: u32, pan: f32) {
        self.inner.engine.set_channel_pan(channel, pan);
    }

    /// Mute or unmute a channel
    pub fn set_channel_mute(&self, channel: u32, mute: bool) {
        self.inner.engine.set_channel_mute(channel, mute);
    }

    /// Enable or disable a channel
    pub fn set_channel_active(&self, channel: u32, active: bool) {
        self.inner.engine.set_channel_active(channel, active);
    }

    /// Set the master gain in dB
    pub fn set_master_gain(&self, gain_db: f32) {
        self.inner.engine.set_master_gain(gain_db);
    }

    /// Copy of the whole mix
    #[must_use]
    pub fn mix(&self) -> MixSnapshot {
        self.inner.mixer.snapshot()
    }

    // === Datagram transport ===

    /// Start receiving audio datagrams on `bind` (e.g. `"0.0.0.0:9001"`)
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if a receiver is already running, or the
    /// bind error.
    pub async fn start_datagram(&self, bind: &str) -> Result<SocketAddr, LinkError> {
        let mut slot = self.inner.datagram.lock().await;
        if let Some(path) = slot.as_ref() {
            return Err(LinkError::InvalidState {
                message: "Datagram receiver already running".to_string(),
                current_state: path.receiver.local_addr().to_string(),
            });
        }

        let config = &self.inner.config;
        let (tx, rx) = mpsc::channel(config.audio_queue_depth.max(1));
        let receiver = DatagramReceiver::start(
            bind,
            ReceiverConfig {
                client_hash: client_hash(self.client_id()),
                capacity: config.jitter_capacity,
                window: config.jitter_window,
                max_hold: config.jitter_max_hold,
            },
            tx,
        )
        .await?;

        let pump = self.inner.tasks.child_token();
        tokio::spawn(run_pump(Arc::clone(&self.inner.router), rx, pump.clone()));

        let addr = receiver.local_addr();
        *slot = Some(DatagramPath { receiver, pump });
        Ok(addr)
    }

    /// Stop the datagram receiver, if running
    pub async fn stop_datagram(&self) {
        let path = self.inner.datagram.lock().await.take();
        if let Some(path) = path {
            path.receiver.stop().await;
            path.pump.cancel();
        }
    }

    /// Datagram receive counters, if the receiver is running
    pub async fn datagram_stats(&self) -> Option<ReceiverStats> {
        self.inner
            .datagram
            .lock()
            .await
            .as_ref()
            .map(|path| path.receiver.stats())
    }

    // === Observation ===

    /// Subscribe to client events
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Filtered event receiver
    pub fn filtered_events<F>(&self, filter: F) -> EventFilter
    where
        F: Fn(&ClientEvent) -> bool + Send + 'static,
    {
        EventFilter::new(&self.inner.events, filter)
    }

    /// Stream transport counters
    #[must_use]
    pub fn connection_stats(&self) -> ConnectionStats {
        self.inner.connection.stats()
    }

    /// Render engine counters
    #[must_use]
    pub fn render_stats(&self) -> RenderStats {
        self.inner.engine.stats()
    }

    /// Whether audio is currently flowing
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.inner.router.is_active()
    }
}

/// Re-publish connection events as client events
/// Forget the datagram sequence position, if a receiver is running
async fn reset_datagram(datagram: &Mutex<Option<DatagramPath>>) {
    if let Some(path) = datagram.lock().await.as_ref() {
        path.receiver.reset();
    }
}

async fn forward_events(
    mut rx: broadcast::Receiver<crate::connection::ConnectionEvent>,
    events: Arc<EventBus>,
    router: Arc<PacketRouter>,
    datagram: Arc<Mutex<Option<DatagramPath>>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(event) => {
                let event = ClientEvent::from_connection(event);
                match &event {
                    ClientEvent::Disconnected { .. } => router.force_idle(),
                    // The server may have restarted its datagram sequence
                    ClientEvent::Connected {
                        reconnected: true, ..
                    } => reset_datagram(&datagram).await,
                    _ => {}
                }
                events.emit(event);
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Client event forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
