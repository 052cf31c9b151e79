//! Hands decoded packets to the renderer and tracks stream activity

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::events::{ClientEvent, EventBus};
use crate::connection::ConnectionManager;
use crate::net::Runtime;
use crate::protocol::AudioPacket;
use crate::render::{RenderEngine, WriteOutcome};

#[derive(Debug, Default)]
struct Activity {
    active: bool,
    last_audio: Option<Instant>,
    last_meter: Option<Instant>,
}

/// Shared tail of both transports
///
/// Every packet, whether it came over the stream or out of the jitter
/// buffer, goes through [`PacketRouter::deliver`], which renders it,
/// advances the heartbeat sample position and emits the keep-alive and
/// meter events.
#[derive(Debug)]
pub(crate) struct PacketRouter {
    engine: Arc<RenderEngine>,
    connection: ConnectionManager,
    events: Arc<EventBus>,
    meter_interval: Duration,
    idle_timeout: Duration,
    activity: Mutex<Activity>,
}

impl PacketRouter {
    pub(crate) fn new(
        engine: Arc<RenderEngine>,
        connection: ConnectionManager,
        events: Arc<EventBus>,
        meter_interval: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            connection,
            events,
            meter_interval,
            idle_timeout,
            activity: Mutex::new(Activity::default()),
        }
    }

    fn activity(&self) -> MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Render one packet
    pub(crate) fn deliver(&self, packet: &AudioPacket, now: Instant) -> WriteOutcome {
        let outcome = self.engine.write_packet(packet);
        let frames = i64::try_from(packet.samples_per_channel()).unwrap_or(i64::MAX);
        self.connection
            .set_sample_position(packet.sample_position.saturating_add(frames));

        let (started, meter) = {
            let mut activity = self.activity();
            let started = !activity.active;
            activity.active = true;
            activity.last_audio = Some(now);

            let meter_due = activity
                .last_meter
                .is_none_or(|t| now.saturating_duration_since(t) >= self.meter_interval);
            if meter_due {
                activity.last_meter = Some(now);
            }
            (started, meter_due)
        };

        if started {
            tracing::debug!(position = packet.sample_position, "Audio stream active");
            self.events.emit(ClientEvent::StreamActive);
        }
        if meter {
            self.events.emit(ClientEvent::AudioMeter {
                levels: packet.peaks(),
            });
        }
        tracing::trace!(position = packet.sample_position, ?outcome, "Packet rendered");
        outcome
    }

    /// Report the stream idle if nothing arrived for the idle timeout
    ///
    /// Returns whether this call made the transition.
    pub(crate) fn check_idle(&self, now: Instant) -> bool {
        {
            let mut activity = self.activity();
            let quiet = activity
                .last_audio
                .is_none_or(|t| now.saturating_duration_since(t) >= self.idle_timeout);
            if !activity.active || !quiet {
                return false;
            }
            activity.active = false;
        }
        tracing::debug!("Audio stream idle");
        self.events.emit(ClientEvent::StreamIdle);
        true
    }

    /// Go idle immediately, e.g. on disconnect
    pub(crate) fn force_idle(&self) {
        let was_active = std::mem::take(&mut self.activity().active);
        if was_active {
            self.events.emit(ClientEvent::StreamIdle);
        }
    }

    /// Whether audio is currently flowing
    pub(crate) fn is_active(&self) -> bool {
        self.activity().active
    }
}

/// Drain a packet queue into the router until cancelled or closed
pub(crate) async fn run_pump(
    router: Arc<PacketRouter>,
    mut rx: mpsc::Receiver<AudioPacket>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            packet = rx.recv() => match packet {
                Some(packet) => {
                    router.deliver(&packet, Runtime::now());
                }
                None => break,
            },
        }
    }
    tracing::debug!("Render pump stopped");
}

/// Periodically check for an idle stream
pub(crate) async fn run_idle_watch(router: Arc<PacketRouter>, cancel: CancellationToken) {
    let tick = (router.idle_timeout / 4).max(Duration::from_millis(10));
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                router.check_idle(Runtime::now());
            }
        }
    }
}
