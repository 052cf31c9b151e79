use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use super::super::{ClientEvent, MonitorClient};
use crate::audio::StreamKey;
use crate::connection::ConnectionState;
use crate::error::LinkError;
use crate::protocol::PayloadEncoding;
use crate::protocol::datagram::{client_hash, encode_audio_datagram};
use crate::storage::FileStore;
use crate::testing::{MockMixServer, RecordingBackend};
use crate::types::{LinkConfig, ServerAddress};

const WAIT: Duration = Duration::from_secs(2);

fn config() -> LinkConfig {
    LinkConfig::builder()
        .connect_timeout(Duration::from_secs(1))
        .handshake_timeout(Duration::from_secs(1))
        .idle_timeout(Duration::from_millis(150))
        .meter_interval(Duration::from_millis(10))
        .build()
}

async fn client_with(backend: &Arc<RecordingBackend>) -> MonitorClient {
    MonitorClient::builder()
        .config(config())
        .backend(backend.clone())
        .build()
        .await
        .unwrap()
}

async fn wait_event<F>(rx: &mut broadcast::Receiver<ClientEvent>, pred: F) -> Option<ClientEvent>
where
    F: Fn(&ClientEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

#[tokio::test]
async fn test_identity_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");

    let first = MonitorClient::builder()
        .store(Box::new(FileStore::new(&path).await.unwrap()))
        .build()
        .await
        .unwrap();
    let second = MonitorClient::builder()
        .store(Box::new(FileStore::new(&path).await.unwrap()))
        .build()
        .await
        .unwrap();

    assert!(first.client_id().starts_with("monitor-"));
    assert_eq!(first.client_id(), second.client_id());
}

#[tokio::test]
async fn test_connect_last_without_history() {
    let client = MonitorClient::new(config()).await.unwrap();
    let err = client.connect_last().await.unwrap_err();
    assert!(matches!(err, LinkError::InvalidParameter { .. }));
    assert_eq!(client.state().await, ConnectionState::Idle);
}

#[tokio::test]
async fn test_connect_records_server_and_reports_status() {
    let mut server = MockMixServer::default_server();
    let addr = server.start().await.unwrap();
    let client = MonitorClient::new(config()).await.unwrap();
    let mut events = client.events();

    client.connect("127.0.0.1", addr.port()).await.unwrap();
    assert!(client.is_connected().await);
    assert_eq!(client.server_info().await.unwrap().sample_rate, 48_000);
    assert_eq!(
        client.identity().await.last_server,
        Some(ServerAddress::new("127.0.0.1", addr.port()))
    );

    let online = wait_event(&mut events, |e| {
        matches!(e, ClientEvent::ConnectionStatus { connected: true, .. })
    })
    .await;
    assert!(online.is_some());

    let handshake = server.wait_for("handshake", 1, WAIT).await.unwrap();
    assert_eq!(handshake["client_id"], client.client_id());

    client.disconnect().await;
    assert_eq!(client.state().await, ConnectionState::Idle);
    assert!(client.engine().is_stopped());

    // Reconnect to the remembered server
    client.connect_last().await.unwrap();
    assert!(client.is_connected().await);
    assert!(!client.engine().is_stopped());
    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_audio_reaches_output_with_keepalive_events() {
    let mut server = MockMixServer::default_server();
    let addr = server.start().await.unwrap();
    let backend = Arc::new(RecordingBackend::new());
    let client = client_with(&backend).await;
    let mut events = client.events();

    client.connect("127.0.0.1", addr.port()).await.unwrap();
    client.subscribe(&[0, 1]).await.unwrap();
    let subscribe = server.wait_for("subscribe", 1, WAIT).await.unwrap();
    assert_eq!(subscribe["channels"], serde_json::json!([0, 1]));

    let interleaved: Vec<f32> = (0..256).map(|i| if i % 2 == 0 { 0.25 } else { -0.25 }).collect();
    server
        .send_audio(0, &[0, 1], &interleaved, PayloadEncoding::Int16)
        .unwrap();

    assert!(wait_event(&mut events, |e| matches!(e, ClientEvent::StreamActive)).await.is_some());
    let meter = wait_event(&mut events, |e| matches!(e, ClientEvent::AudioMeter { .. }))
        .await
        .unwrap();
    let ClientEvent::AudioMeter { levels } = meter else {
        unreachable!()
    };
    assert_eq!(levels.len(), 2);

    let ch0 = backend.stream(StreamKey::Channel(0)).unwrap();
    // 128 frames of stereo output
    assert_eq!(ch0.writes()[0].len(), 256);
    assert!(backend.stream(StreamKey::Channel(1)).is_some());
    assert!(client.is_streaming());

    assert!(wait_event(&mut events, |e| matches!(e, ClientEvent::StreamIdle)).await.is_some());
    assert!(!client.is_streaming());

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_resubscribe_releases_dropped_channels() {
    let backend = Arc::new(RecordingBackend::new());
    let client = client_with(&backend).await;

    client.subscribe(&[0, 1]).await.unwrap();
    assert!(client.engine().write(1, &[0.1; 8], 0).is_written());
    assert_eq!(backend.created(), 1);

    client.subscribe(&[0]).await.unwrap();
    assert_eq!(backend.destroyed(), 1);
    assert!(backend.stream(StreamKey::Channel(1)).is_none());
    assert_eq!(client.mix().channels, vec![0]);
}

#[tokio::test]
async fn test_mix_controls_update_snapshot() {
    let client = MonitorClient::new(config()).await.unwrap();
    client.subscribe(&[3]).await.unwrap();
    client.set_channel_gain(3, -9.0);
    client.set_channel_pan(3, 0.5);
    client.set_channel_mute(3, true);
    client.set_master_gain(40.0);

    let mix = client.mix();
    assert_eq!(mix.gains[&3], -9.0);
    assert_eq!(mix.pans[&3], 0.5);
    assert!(mix.mutes[&3]);
    assert_eq!(mix.master_gain_db, 12.0);

    client.set_channel_active(3, false);
    assert!(client.mix().channels.is_empty());
}

#[tokio::test]
async fn test_mix_changes_sync_to_server() {
    let mut server = MockMixServer::default_server();
    let addr = server.start().await.unwrap();
    let client = MonitorClient::new(config()).await.unwrap();

    client.connect("127.0.0.1", addr.port()).await.unwrap();
    client.subscribe(&[0]).await.unwrap();
    server.wait_for("subscribe", 1, WAIT).await.unwrap();

    client.set_channel_gain(0, -6.0);
    let deadline = tokio::time::Instant::now() + WAIT;
    let update = loop {
        let found = server
            .received_of("update_mix")
            .await
            .into_iter()
            .find(|m| m.get("gains").is_some());
        if found.is_some() || tokio::time::Instant::now() >= deadline {
            break found;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(update.unwrap()["gains"]["0"], -6.0);

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_datagram_path() {
    let backend = Arc::new(RecordingBackend::new());
    let client = client_with(&backend).await;
    client.subscribe(&[0]).await.unwrap();

    let addr = client.start_datagram("127.0.0.1:0").await.unwrap();
    let again = client.start_datagram("127.0.0.1:0").await;
    assert!(matches!(again, Err(LinkError::InvalidState { .. })));

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let hash = client_hash(client.client_id());
    for seq in 0..3u32 {
        let datagram = encode_audio_datagram(seq, 0, i64::from(seq) * 16, &[0], &[0.5; 16], hash);
        sender.send_to(&datagram, addr).await.unwrap();
    }

    let deadline = tokio::time::Instant::now() + WAIT;
    while backend.total_writes() < 3 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(backend.total_writes(), 3);
    assert_eq!(client.datagram_stats().await.unwrap().datagrams, 3);

    client.stop_datagram().await;
    assert!(client.datagram_stats().await.is_none());
}

#[tokio::test]
async fn test_full_reset_forgets_mix() {
    let client = MonitorClient::new(config()).await.unwrap();
    client.subscribe(&[1, 2]).await.unwrap();
    client.set_channel_gain(1, -3.0);

    client.disconnect().await;
    assert_eq!(client.mix().channels, vec![1, 2]);

    client.disconnect_full_reset().await;
    assert!(client.mix().channels.is_empty());
    assert!(client.mix().gains.is_empty());
}
