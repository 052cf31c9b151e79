//! UDP receive loop for the datagram transport
//!
//! Datagrams arrive unordered and may be lost or duplicated. Each one is
//! decoded, filtered by the addressed client hash and pushed into a
//! [`JitterBuffer`]; packets leave the buffer in sequence order, with a
//! gap skipped once the oldest buffered packet has waited long enough.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio::{JitterBuffer, JitterStats};
use crate::codec::AudioDecoder;
use crate::net::{Runtime, UdpSocket, bind_udp};
use crate::protocol::AudioPacket;
use crate::protocol::datagram::{DatagramHeader, MAX_DATAGRAM, decode_audio_datagram};

/// Datagram receive settings
#[derive(Debug, Clone, Copy)]
pub struct ReceiverConfig {
    /// Hash of our client id; datagrams for other clients are ignored
    pub client_hash: u16,
    /// Jitter buffer capacity
    pub capacity: usize,
    /// Forward probe window
    pub window: u32,
    /// Longest wait for a missing predecessor
    pub max_hold: Duration,
}

/// Datagram receive counters
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    /// Datagrams read from the socket
    pub datagrams: u64,
    /// Datagrams addressed to another client
    pub foreign: u64,
    /// Datagrams that were not decodable audio
    pub undecodable: u64,
    /// Released packets dropped because the render queue was full
    pub queue_drops: u64,
    /// Jitter buffer counters
    pub jitter: JitterStats,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Running datagram receiver
///
/// Stops when dropped or when [`DatagramReceiver::stop`] is called.
#[derive(Debug)]
pub struct DatagramReceiver {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    reset: Arc<Notify>,
    stats: Arc<Mutex<ReceiverStats>>,
    handle: Option<JoinHandle<()>>,
}

impl DatagramReceiver {
    /// Bind `addr` and start receiving; released packets go to `tx`
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket cannot be bound.
    pub async fn start(
        addr: &str,
        config: ReceiverConfig,
        tx: mpsc::Sender<AudioPacket>,
    ) -> std::io::Result<Self> {
        let socket = bind_udp(addr).await?;
        let local_addr = socket.local_addr()?;
        let cancel = CancellationToken::new();
        let reset = Arc::new(Notify::new());
        let stats = Arc::new(Mutex::new(ReceiverStats::default()));

        let handle = tokio::spawn(receive_loop(
            socket,
            config,
            tx,
            Loop {
                cancel: cancel.clone(),
                reset: Arc::clone(&reset),
                stats: Arc::clone(&stats),
            },
        ));
        tracing::info!(%local_addr, "Datagram receiver started");

        Ok(Self {
            local_addr,
            cancel,
            reset,
            stats,
            handle: Some(handle),
        })
    }

    /// Address the socket is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> ReceiverStats {
        lock(&self.stats).clone()
    }

    /// Drop buffered datagrams and follow whatever sequence arrives next
    ///
    /// Used when the server session restarts and its sender may count
    /// from zero again.
    pub fn reset(&self) {
        self.reset.notify_one();
    }

    /// Stop the receive loop and wait for it to exit
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        tracing::info!(local_addr = %self.local_addr, "Datagram receiver stopped");
    }
}

impl Drop for DatagramReceiver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handles the receive loop shares with its [`DatagramReceiver`]
struct Loop {
    cancel: CancellationToken,
    reset: Arc<Notify>,
    stats: Arc<Mutex<ReceiverStats>>,
}

async fn receive_loop(
    socket: UdpSocket,
    config: ReceiverConfig,
    tx: mpsc::Sender<AudioPacket>,
    shared: Loop,
) {
    let Loop {
        cancel,
        reset,
        stats,
    } = shared;
    // Room for a datagram larger than the MTU so it can be rejected whole
    let mut buf = vec![0u8; MAX_DATAGRAM * 2];
    let mut decoder = AudioDecoder::new();
    let mut jitter: JitterBuffer<AudioPacket> = JitterBuffer::new(config.capacity, config.window);
    let tick = (config.max_hold / 2).max(Duration::from_millis(1));

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, _peer)) => {
                    accept(&buf[..len], &config, &mut decoder, &mut jitter, &stats);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Datagram receive failed");
                    Runtime::sleep(tick).await;
                }
            },
            () = reset.notified() => {
                tracing::debug!(depth = jitter.depth(), "Jitter buffer reset");
                jitter.clear();
            }
            () = Runtime::sleep(tick), if !jitter.is_empty() => {}
        }

        let mut drops = 0;
        while let Some(entry) = jitter.pop_ready(std::time::Instant::now(), config.max_hold) {
            if entry.skipped > 0 {
                tracing::debug!(
                    sequence = entry.sequence,
                    skipped = entry.skipped,
                    "Jitter buffer skipped a gap"
                );
            }
            match tx.try_send(entry.payload) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => drops += 1,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    cancel.cancel();
                    break;
                }
            }
        }

        let mut s = lock(&stats);
        s.queue_drops += drops;
        s.jitter = jitter.stats();
    }
}

fn accept(
    datagram: &[u8],
    config: &ReceiverConfig,
    decoder: &mut AudioDecoder,
    jitter: &mut JitterBuffer<AudioPacket>,
    stats: &Mutex<ReceiverStats>,
) {
    let mut s = lock(stats);
    s.datagrams += 1;

    if datagram.len() > MAX_DATAGRAM {
        s.undecodable += 1;
        return;
    }
    if let Ok(header) = DatagramHeader::decode(datagram) {
        if header.client_hash != 0 && header.client_hash != config.client_hash {
            s.foreign += 1;
            return;
        }
    }
    let Some((header, packet)) = decode_audio_datagram(datagram, decoder) else {
        s.undecodable += 1;
        return;
    };
    drop(s);

    let outcome = jitter.push(header.sequence, header.sample_position, packet);
    if !outcome.is_accepted() {
        tracing::trace!(sequence = header.sequence, ?outcome, "Datagram not buffered");
    }
}
