//! Connection manager for the stream transport
//!
//! Owns the socket and drives the session: TCP connect, handshake, a reader
//! task, a heartbeat task and a mix-sync task per session, and a reconnect
//! supervisor after an unexpected loss. Every task of a session hangs off
//! one [`CancellationToken`]; a user disconnect cancels the root token and
//! with it the session and any running supervisor.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::state::{ConnectionEvent, ConnectionState, ConnectionStats, DisconnectReason};
use crate::codec::AudioDecoder;
use crate::error::LinkError;
use crate::mixer::{ChannelChange, MixerState, UpdateOrigin};
use crate::net::{Runtime, connect_tcp, unix_millis};
use crate::protocol::header::wire_timestamp;
use crate::protocol::{
    AudioFlags, AudioPacket, ControlMessage, Frame, FrameCodec, FrameError, Handshake,
    InboundFrame, MessageType, MixUpdate, OutboundMessage, ServerInfo, SkipReason,
    decode_audio_payload,
};
use crate::types::{LinkConfig, ServerAddress};

type Reader = FramedRead<OwnedReadHalf, FrameCodec>;
type Writer = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Tasks of one established session
#[derive(Debug)]
struct Session {
    generation: u64,
    cancel: CancellationToken,
}

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn frame_error(e: FrameError) -> LinkError {
    match e {
        FrameError::Io(e) => LinkError::NetworkError(e),
        FrameError::Desync { consecutive } => LinkError::ProtocolDesync { consecutive },
    }
}

struct Shared {
    config: LinkConfig,
    client_id: String,
    mixer: Arc<MixerState>,
    state: RwLock<ConnectionState>,
    server: RwLock<Option<ServerAddress>>,
    server_info: RwLock<Option<ServerInfo>>,
    /// Write half; the lock serializes outbound frames
    writer: Mutex<Option<Writer>>,
    session: StdMutex<Option<Session>>,
    /// Parent of every session and supervisor token
    root: StdMutex<CancellationToken>,
    generation: AtomicU64,
    last_inbound: StdMutex<Instant>,
    degraded: AtomicBool,
    sample_position: AtomicI64,
    stats: StdMutex<ConnectionStats>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    audio_tx: mpsc::Sender<AudioPacket>,
    audio_rx: StdMutex<Option<mpsc::Receiver<AudioPacket>>>,
}

/// Connection manager for one mixing server
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("client_id", &self.shared.client_id)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager for `client_id` that keeps its mix in `mixer`
    #[must_use]
    pub fn new(config: LinkConfig, client_id: impl Into<String>, mixer: Arc<MixerState>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let (audio_tx, audio_rx) = mpsc::channel(config.audio_queue_depth.max(1));

        Self {
            shared: Arc::new(Shared {
                config,
                client_id: client_id.into(),
                mixer,
                state: RwLock::new(ConnectionState::Idle),
                server: RwLock::new(None),
                server_info: RwLock::new(None),
                writer: Mutex::new(None),
                session: StdMutex::new(None),
                root: StdMutex::new(CancellationToken::new()),
                generation: AtomicU64::new(0),
                last_inbound: StdMutex::new(Runtime::now()),
                degraded: AtomicBool::new(false),
                sample_position: AtomicI64::new(0),
                stats: StdMutex::new(ConnectionStats::default()),
                event_tx,
                audio_tx,
                audio_rx: StdMutex::new(Some(audio_rx)),
            }),
        }
    }

    /// Persistent client identifier
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    /// Shared mixer state
    #[must_use]
    pub fn mixer(&self) -> &Arc<MixerState> {
        &self.shared.mixer
    }

    /// Get current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    /// Server of the current or last session
    pub async fn server(&self) -> Option<ServerAddress> {
        self.shared.server.read().await.clone()
    }

    /// Server description from the last handshake
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.shared.server_info.read().await.clone()
    }

    /// Get connection statistics
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        lock(&self.shared.stats).clone()
    }

    /// Subscribe to connection events
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Take the receiver of decoded audio packets
    ///
    /// There is one receiver for the lifetime of the manager; it keeps
    /// working across reconnects. Returns `None` once taken.
    #[must_use]
    pub fn take_audio_receiver(&self) -> Option<mpsc::Receiver<AudioPacket>> {
        lock(&self.shared.audio_rx).take()
    }

    /// Record the last rendered sample position, reported with heartbeats
    pub fn set_sample_position(&self, position: i64) {
        self.shared
            .sample_position
            .store(position, Ordering::Relaxed);
    }

    /// Connect to a server
    ///
    /// Resolves once the handshake is done. A failure here does not start
    /// the reconnect supervisor; only the loss of an established session
    /// does.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if already connected or connecting, or the
    /// connect/handshake error.
    pub async fn connect(&self, server: ServerAddress) -> Result<(), LinkError> {
        let shared = &self.shared;
        {
            let mut state = shared.state.write().await;
            if state.is_active() {
                return Err(LinkError::InvalidState {
                    message: "Already connected or connecting".to_string(),
                    current_state: format!("{:?}", *state),
                });
            }
            *state = ConnectionState::Connecting;
        }
        shared.emit_state(ConnectionState::Idle, ConnectionState::Connecting);

        *lock(&shared.root) = CancellationToken::new();
        *shared.server.write().await = Some(server.clone());
        tracing::info!(%server, client_id = %shared.client_id, "Connecting");

        match shared.establish(&server, false).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(%server, error = %e, "Connect failed");
                lock(&shared.stats).last_error = Some(e.to_string());
                shared.set_state(ConnectionState::Idle).await;
                shared.send_event(ConnectionEvent::Error {
                    message: e.to_string(),
                    recoverable: false,
                });
                Err(e)
            }
        }
    }

    /// Disconnect, keeping the mixer state for a later connect
    pub async fn disconnect(&self) {
        self.disconnect_with_reason(DisconnectReason::UserRequested)
            .await;
    }

    /// Disconnect and forget the mixer state and subscription
    pub async fn disconnect_full_reset(&self) {
        self.disconnect_with_reason(DisconnectReason::FullReset)
            .await;
    }

    /// Disconnect with a specific reason
    ///
    /// Idempotent. Cancels the session tasks and any reconnect supervisor.
    pub async fn disconnect_with_reason(&self, reason: DisconnectReason) {
        let shared = &self.shared;
        lock(&shared.root).cancel();
        if let Some(session) = lock(&shared.session).take() {
            session.cancel.cancel();
        }
        *shared.writer.lock().await = None;
        lock(&shared.stats).connected_at = None;

        if reason == DisconnectReason::FullReset {
            shared.mixer.clear();
        }

        let old = shared.set_state(ConnectionState::Idle).await;
        if old.is_active() {
            tracing::info!(%reason, "Disconnected");
            shared.send_event(ConnectionEvent::Disconnected { reason });
        }
    }

    /// Subscribe to `channels`, sending the full mix for them
    ///
    /// While disconnected the subscription is only stored; it is sent on
    /// the next connect.
    ///
    /// # Errors
    ///
    /// Returns the write error if the message could not be sent.
    pub async fn subscribe(&self, channels: &[u32]) -> Result<(), LinkError> {
        let shared = &self.shared;
        shared.mixer.set_subscription(channels, UpdateOrigin::Local);
        if !self.state().await.is_connected() {
            return Ok(());
        }
        shared.send_subscribe().await
    }

    /// Send a partial mix change
    ///
    /// Gains and pans are clamped. Nothing is sent for an empty update.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` without a session, or the write error.
    pub async fn send_mix_update(&self, update: MixUpdate) -> Result<(), LinkError> {
        self.shared.send_mix_update(update).await
    }

    /// Send a master gain change
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` without a session, or the write error.
    pub async fn send_master_gain(&self, gain_db: f32) -> Result<(), LinkError> {
        self.shared
            .send_message(&OutboundMessage::SetMasterGain {
                client_id: self.shared.client_id.clone(),
                gain_db,
            })
            .await
    }

    /// Send any control message
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` without a session, or the write error.
    pub async fn send_message(&self, msg: &OutboundMessage) -> Result<(), LinkError> {
        self.shared.send_message(msg).await
    }
}

impl Shared {
    fn send_event(&self, event: ConnectionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, old: ConnectionState, new: ConnectionState) {
        if old != new {
            tracing::debug!(?old, ?new, "Connection state changed");
            self.send_event(ConnectionEvent::StateChanged {
                old,
                new,
                status: new.status(),
            });
        }
    }

    /// Set the state and return the previous one
    async fn set_state(&self, new: ConnectionState) -> ConnectionState {
        let old = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, new)
        };
        self.emit_state(old, new);
        old
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.session)
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    fn touch_inbound(&self) {
        *lock(&self.last_inbound) = Runtime::now();
    }

    fn last_inbound(&self) -> Instant {
        *lock(&self.last_inbound)
    }

    fn frame_for(&self, msg: &OutboundMessage) -> Frame {
        let now = unix_millis();
        let flags = if self.config.rf_mode {
            AudioFlags::RF_MODE
        } else {
            AudioFlags::default()
        };
        Frame::control(msg.to_json(now), flags, wire_timestamp(now))
    }

    async fn write_frame(&self, writer: &mut Writer, msg: &OutboundMessage) -> Result<(), LinkError> {
        let frame = self.frame_for(msg);
        let len = frame.wire_len();
        Runtime::timeout(self.config.write_timeout, writer.send(frame))
            .await
            .map_err(|_| LinkError::Timeout)?
            .map_err(frame_error)?;
        lock(&self.stats).record_sent(len);
        tracing::trace!(kind = msg.type_name(), bytes = len, "Sent control message");
        Ok(())
    }

    async fn send_message(self: &Arc<Self>, msg: &OutboundMessage) -> Result<(), LinkError> {
        let generation = self.generation.load(Ordering::Acquire);
        let result = {
            let mut guard = self.writer.lock().await;
            let Some(writer) = guard.as_mut() else {
                return Err(LinkError::NotConnected);
            };
            self.write_frame(writer, msg).await
        };

        if let Err(e) = &result {
            if e.is_connection_lost() || matches!(e, LinkError::Timeout) {
                self.report_loss(generation, DisconnectReason::NetworkError(e.to_string()))
                    .await;
            }
        }
        result
    }

    async fn send_mix_update(self: &Arc<Self>, update: MixUpdate) -> Result<(), LinkError> {
        if update.is_empty() {
            return Ok(());
        }
        let device_id = self
            .config
            .device_uuid
            .clone()
            .unwrap_or_else(|| self.client_id.clone());
        self.send_message(&OutboundMessage::UpdateMix { device_id, update })
            .await
    }

    async fn send_subscribe(self: &Arc<Self>) -> Result<(), LinkError> {
        let mix = self.mixer.snapshot().subscribed_only();
        self.send_message(&OutboundMessage::Subscribe {
            client_id: self.client_id.clone(),
            channels: mix.channels,
            gains: mix.gains,
            pans: mix.pans,
            mutes: mix.mutes,
            rf_mode: self.config.rf_mode,
        })
        .await?;
        self.mixer.mark_synced();
        Ok(())
    }

    /// Send the stored subscription and master gain after a (re)connect
    async fn replay_state(self: &Arc<Self>) -> Result<(), LinkError> {
        if !self.mixer.subscription().is_empty() {
            self.send_subscribe().await?;
            tracing::debug!("Subscription replayed");
        }
        let master = self.mixer.master_gain_db();
        if master.abs() > f32::EPSILON {
            self.send_message(&OutboundMessage::SetMasterGain {
                client_id: self.client_id.clone(),
                gain_db: master,
            })
            .await?;
        }
        Ok(())
    }

    async fn await_handshake(reader: &mut Reader) -> Result<ServerInfo, LinkError> {
        loop {
            match reader.next().await {
                Some(Ok(InboundFrame::Frame(frame)))
                    if frame.message_type() == Some(MessageType::Control) =>
                {
                    match ControlMessage::parse(&frame.payload) {
                        Ok(ControlMessage::HandshakeResponse(info)) => return Ok(info),
                        Ok(other) => tracing::trace!(?other, "Ignored before handshake"),
                        Err(e) => tracing::warn!(error = %e, "Bad control message during handshake"),
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(frame_error(e)),
                None => {
                    return Err(LinkError::ConnectionLost {
                        reason: "closed during handshake".to_string(),
                    });
                }
            }
        }
    }

    /// Open a session: connect, handshake, spawn the session tasks
    async fn establish(
        self: &Arc<Self>,
        server: &ServerAddress,
        reconnected: bool,
    ) -> Result<(), LinkError> {
        let config = &self.config;
        let stream = connect_tcp(&server.host, server.port, config.connect_timeout)
            .await
            .map_err(|e| LinkError::ConnectionFailed {
                address: server.to_string(),
                message: e.to_string(),
                source: Some(Box::new(e)),
            })?;

        let (read, write) = stream.into_split();
        let mut reader = FramedRead::new(read, FrameCodec::new(config.limits));
        let mut writer = FramedWrite::new(write, FrameCodec::new(config.limits));

        let handshake = OutboundMessage::Handshake(Handshake {
            client_id: self.client_id.clone(),
            rf_mode: config.rf_mode,
            persistent: true,
            auto_reconnect: config.reconnect.enabled,
            device_uuid: config.device_uuid.clone(),
        });
        self.write_frame(&mut writer, &handshake).await?;

        let info = Runtime::timeout(config.handshake_timeout, Self::await_handshake(&mut reader))
            .await
            .map_err(|_| LinkError::HandshakeFailed {
                message: format!("no handshake_response within {:?}", config.handshake_timeout),
            })??;

        self.write_frame(
            &mut writer,
            &OutboundMessage::HandshakeAck {
                client_id: self.client_id.clone(),
            },
        )
        .await?;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = {
            let root = lock(&self.root).clone();
            if root.is_cancelled() {
                return Err(LinkError::ConnectionLost {
                    reason: "disconnected during handshake".to_string(),
                });
            }
            let cancel = root.child_token();
            *lock(&self.session) = Some(Session {
                generation,
                cancel: cancel.clone(),
            });
            cancel
        };
        *self.writer.lock().await = Some(writer);
        self.touch_inbound();
        self.degraded.store(false, Ordering::Release);
        {
            let mut stats = lock(&self.stats);
            stats.connected_at = Some(std::time::Instant::now());
            if reconnected {
                stats.reconnects += 1;
            }
        }

        tracing::info!(
            %server,
            sample_rate = info.sample_rate,
            max_channels = info.max_channels,
            is_reconnection = info.is_reconnection,
            "Handshake complete"
        );
        *self.server_info.write().await = Some(info.clone());
        self.send_event(ConnectionEvent::ServerInfo(info));

        tokio::spawn(Arc::clone(self).reader_loop(reader, generation, cancel.clone()));
        tokio::spawn(Arc::clone(self).heartbeat_loop(generation, cancel.clone()));
        tokio::spawn(Arc::clone(self).mix_sync_loop(cancel));

        if self.is_current(generation) {
            self.set_state(ConnectionState::Connected).await;
            self.send_event(ConnectionEvent::Connected {
                server: server.clone(),
                reconnected,
            });
        }

        // A failed replay already went through loss handling
        if let Err(e) = self.replay_state().await {
            tracing::warn!(error = %e, "State replay failed");
        }
        Ok(())
    }

    /// Tear down session `generation` after a failure
    ///
    /// Only the first report for a session acts; later ones (from the other
    /// session tasks, or a write racing the reader) are ignored.
    async fn report_loss(self: &Arc<Self>, generation: u64, reason: DisconnectReason) {
        let session = {
            let mut slot = lock(&self.session);
            match slot.as_ref() {
                Some(s) if s.generation == generation => slot.take(),
                _ => None,
            }
        };
        let Some(session) = session else {
            return;
        };

        session.cancel.cancel();
        *self.writer.lock().await = None;
        {
            let mut stats = lock(&self.stats);
            stats.connected_at = None;
            stats.last_error = Some(reason.to_string());
        }
        tracing::warn!(%reason, "Connection lost");
        self.send_event(ConnectionEvent::Disconnected {
            reason: reason.clone(),
        });

        let root = lock(&self.root).clone();
        if root.is_cancelled() {
            return;
        }
        if !self.config.reconnect.enabled {
            self.set_state(ConnectionState::Idle).await;
            self.send_event(ConnectionEvent::Error {
                message: reason.to_string(),
                recoverable: false,
            });
            return;
        }

        self.set_state(ConnectionState::Reconnecting).await;
        if root.is_cancelled() {
            self.set_state(ConnectionState::Idle).await;
            return;
        }
        self.spawn_reconnect(root.child_token());
    }

    /// Start the reconnect supervisor
    ///
    /// The boxed future breaks the establish → reader → loss → reconnect
    /// type cycle.
    fn spawn_reconnect(self: &Arc<Self>, cancel: CancellationToken) {
        let task: BoxFuture<'static, ()> = Box::pin(Arc::clone(self).reconnect_loop(cancel));
        tokio::spawn(task);
    }

    async fn reconnect_loop(self: Arc<Self>, cancel: CancellationToken) {
        let Some(server) = self.server.read().await.clone() else {
            self.set_state(ConnectionState::Idle).await;
            return;
        };
        let mut backoff = Backoff::new(self.config.reconnect.clone());
        let started = Runtime::now();
        let mut last_error = String::from("connection lost");

        loop {
            let Some(delay) = backoff.next_delay(started.elapsed()) else {
                let attempts = backoff.attempts();
                let err = LinkError::ReconnectExhausted {
                    attempts,
                    reason: last_error,
                };
                tracing::error!(attempts, error = %err, "Giving up on reconnect");
                lock(&self.stats).last_error = Some(err.to_string());
                self.set_state(ConnectionState::Idle).await;
                self.send_event(ConnectionEvent::Error {
                    message: err.to_string(),
                    recoverable: false,
                });
                self.send_event(ConnectionEvent::Disconnected {
                    reason: DisconnectReason::ReconnectExhausted { attempts },
                });
                return;
            };

            let attempt = backoff.attempts();
            lock(&self.stats).reconnect_attempts += 1;
            tracing::info!(attempt, ?delay, %server, "Reconnecting");
            self.send_event(ConnectionEvent::Reconnecting { attempt, delay });

            tokio::select! {
                () = cancel.cancelled() => return,
                () = Runtime::sleep(delay) => {}
            }

            let result = tokio::select! {
                () = cancel.cancelled() => return,
                result = self.establish(&server, true) => result,
            };
            match result {
                Ok(()) => {
                    backoff.reset();
                    tracing::info!(attempt, "Reconnected");
                    return;
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "Reconnect attempt failed");
                    last_error = e.to_string();
                }
            }
        }
    }

    async fn reader_loop(self: Arc<Self>, mut reader: Reader, generation: u64, cancel: CancellationToken) {
        let mut decoder = AudioDecoder::new();

        let reason = loop {
            let item = tokio::select! {
                () = cancel.cancelled() => return,
                item = reader.next() => item,
            };
            match item {
                Some(Ok(InboundFrame::Frame(frame))) => {
                    self.note_inbound().await;
                    lock(&self.stats).record_received(frame.wire_len());
                    self.dispatch(frame, &mut decoder).await;
                }
                Some(Ok(InboundFrame::Skipped(skip))) => {
                    self.note_inbound().await;
                    self.record_skip(skip);
                }
                Some(Err(FrameError::Desync { consecutive })) => {
                    break DisconnectReason::ProtocolDesync { consecutive };
                }
                Some(Err(FrameError::Io(e))) => break DisconnectReason::NetworkError(e.to_string()),
                None => break DisconnectReason::ServerClosed,
            }
        };
        self.report_loss(generation, reason).await;
    }

    /// Any inbound traffic resets the liveness timer
    async fn note_inbound(&self) {
        self.touch_inbound();
        if self.degraded.swap(false, Ordering::AcqRel) {
            let mut state = self.state.write().await;
            if *state == ConnectionState::Degraded {
                *state = ConnectionState::Connected;
                drop(state);
                tracing::info!("Link recovered");
                self.emit_state(ConnectionState::Degraded, ConnectionState::Connected);
            }
        }
    }

    fn record_skip(&self, skip: SkipReason) {
        let mut stats = lock(&self.stats);
        match skip {
            SkipReason::BadMagic { consecutive } => {
                stats.magic_errors += 1;
                tracing::warn!(consecutive, "Bad frame magic, skipping header");
            }
            SkipReason::Oversized { msg_type, len } => {
                stats.oversize_drops += 1;
                tracing::warn!(msg_type, len, "Oversized frame dropped");
            }
            SkipReason::UnknownType(msg_type) => {
                stats.unknown_frames += 1;
                tracing::debug!(msg_type, "Unknown frame type skipped");
            }
        }
    }

    async fn dispatch(&self, frame: Frame, decoder: &mut AudioDecoder) {
        match frame.message_type() {
            Some(MessageType::Audio) => {
                let Some(packet) = decode_audio_payload(&frame.payload, frame.header.flags, decoder)
                else {
                    lock(&self.stats).decode_failures += 1;
                    tracing::debug!(bytes = frame.payload.len(), "Audio payload dropped");
                    return;
                };
                tracing::trace!(
                    position = packet.sample_position,
                    channels = packet.channel_count(),
                    "Audio packet"
                );
                if let Err(mpsc::error::TrySendError::Full(_)) = self.audio_tx.try_send(packet) {
                    lock(&self.stats).queue_drops += 1;
                }
            }
            Some(MessageType::Control) => match ControlMessage::parse(&frame.payload) {
                Ok(msg) => self.handle_control(msg).await,
                Err(e) => {
                    lock(&self.stats).control_errors += 1;
                    tracing::warn!(error = %e, "Control message dropped");
                }
            },
            Some(MessageType::Heartbeat) => tracing::trace!("Heartbeat frame"),
            None => {}
        }
    }

    async fn handle_control(&self, msg: ControlMessage) {
        match msg {
            ControlMessage::HandshakeResponse(info) => {
                *self.server_info.write().await = Some(info.clone());
                self.send_event(ConnectionEvent::ServerInfo(info));
            }
            ControlMessage::HeartbeatResponse {
                clients_connected, ..
            } => {
                tracing::trace!(?clients_connected, "Heartbeat response");
            }
            ControlMessage::SubscriptionConfirmed {
                channels,
                compression_mode,
            } => {
                tracing::debug!(?channels, ?compression_mode, "Subscription confirmed");
                self.send_event(ConnectionEvent::SubscriptionConfirmed { channels });
            }
            ControlMessage::ChannelUpdate(update) => {
                self.mixer.update(
                    update.channel,
                    ChannelChange::from(&update),
                    UpdateOrigin::Remote,
                );
                self.mix_changed();
            }
            ControlMessage::MasterGainUpdate { gain_db } => {
                self.mixer.set_master_gain(gain_db, UpdateOrigin::Remote);
                self.mix_changed();
            }
            ControlMessage::MixState(state) => {
                self.mixer.apply_mix_state(&state);
                self.mix_changed();
            }
            ControlMessage::FullStateSync(sync) => {
                tracing::info!(
                    channels = ?sync.restorable_channels(),
                    "Server restored mix state"
                );
                self.mixer.apply_full_sync(&sync);
                self.mix_changed();
            }
            ControlMessage::Unknown(kind) => tracing::trace!(%kind, "Ignoring control message"),
        }
    }

    fn mix_changed(&self) {
        self.send_event(ConnectionEvent::MixChanged(self.mixer.snapshot()));
    }

    async fn heartbeat_loop(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        let interval = self.config.heartbeat.interval;
        let timeout = self.config.heartbeat.timeout;
        let check = (interval.min(timeout) / 4).max(Duration::from_millis(5));

        let mut ticker = tokio::time::interval(check);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_beat = Runtime::now() + interval;

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let now = Runtime::now();
            let silence = now.saturating_duration_since(self.last_inbound());
            if silence >= timeout {
                tracing::warn!(?silence, "No inbound traffic, dropping connection");
                self.report_loss(generation, DisconnectReason::HeartbeatTimeout)
                    .await;
                return;
            }
            if silence >= interval && !self.degraded.swap(true, Ordering::AcqRel) {
                let mut state = self.state.write().await;
                if *state == ConnectionState::Connected {
                    *state = ConnectionState::Degraded;
                    drop(state);
                    tracing::info!(?silence, "Link degraded");
                    self.emit_state(ConnectionState::Connected, ConnectionState::Degraded);
                }
            }

            if now >= next_beat {
                next_beat = now + interval;
                let msg = OutboundMessage::Heartbeat {
                    client_id: self.client_id.clone(),
                    sample_position: self.sample_position.load(Ordering::Relaxed),
                };
                if self.send_message(&msg).await.is_ok() {
                    lock(&self.stats).heartbeats_sent += 1;
                }
            }
        }
    }

    async fn mix_sync_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(
            self.config.mix_sync.interval.max(Duration::from_millis(1)),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let Some(out) = self.mixer.take_outbound(Runtime::now().into_std()) else {
                continue;
            };
            if let Some(update) = out.update {
                if let Err(e) = self.send_mix_update(update).await {
                    tracing::debug!(error = %e, "Mix update not sent");
                }
            }
            if let Some(gain_db) = out.master_gain_db {
                let msg = OutboundMessage::SetMasterGain {
                    client_id: self.client_id.clone(),
                    gain_db,
                };
                if let Err(e) = self.send_message(&msg).await {
                    tracing::debug!(error = %e, "Master gain not sent");
                }
            }
        }
    }
}
