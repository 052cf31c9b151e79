//! Liveness detection and reconnection against the mock mixing server

use std::sync::Arc;
use std::time::Duration;

use stagelink::connection::{ConnectionEvent, ConnectionManager};
use stagelink::mixer::{ChannelChange, MixerState, UpdateOrigin};
use stagelink::testing::MockMixServer;
use stagelink::{ConnectionState, DisconnectReason, LinkConfig, ReconnectPolicy, ServerAddress};
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(3);

fn fast_policy(max_attempts: Option<u32>) -> ReconnectPolicy {
    ReconnectPolicy {
        enabled: true,
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        multiplier: 1.5,
        max_attempts,
        max_elapsed: None,
    }
}

fn manager(heartbeat: Duration, timeout: Duration, policy: ReconnectPolicy) -> ConnectionManager {
    let config = LinkConfig::builder()
        .connect_timeout(Duration::from_millis(500))
        .handshake_timeout(Duration::from_millis(200))
        .heartbeat(heartbeat, timeout)
        .reconnect(policy)
        .build();
    ConnectionManager::new(config, "reconnect-client", Arc::new(MixerState::default()))
}

async fn next_event<F>(rx: &mut broadcast::Receiver<ConnectionEvent>, pred: F) -> ConnectionEvent
where
    F: Fn(&ConnectionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("event not seen in time")
}

async fn wait_state(conn: &ConnectionManager, want: ConnectionState) {
    tokio::time::timeout(WAIT, async {
        while conn.state().await != want {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("state {want:?} not reached"));
}

#[tokio::test]
async fn test_reconnect_replays_subscription() {
    let mut server = MockMixServer::default_server();
    let addr = server.start().await.unwrap();
    let conn = manager(
        Duration::from_secs(5),
        Duration::from_secs(15),
        fast_policy(None),
    );
    let mut events = conn.events();

    conn.connect(ServerAddress::new("127.0.0.1", addr.port()))
        .await
        .unwrap();
    conn.mixer()
        .update(0, ChannelChange::gain(-6.0), UpdateOrigin::Local);
    conn.subscribe(&[0, 2]).await.unwrap();
    server.wait_for("subscribe", 1, WAIT).await.unwrap();

    server.drop_connections();

    let event = next_event(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    let ConnectionEvent::Disconnected { reason } = event else {
        unreachable!()
    };
    assert!(!reason.is_user_requested());
    next_event(&mut events, |e| matches!(e, ConnectionEvent::Reconnecting { attempt: 1, .. })).await;
    next_event(&mut events, |e| {
        matches!(e, ConnectionEvent::Connected { reconnected: true, .. })
    })
    .await;

    // Same identity, same subscription and mix
    let handshakes = server.received_of("handshake").await;
    assert_eq!(handshakes.len(), 2);
    assert_eq!(handshakes[0]["client_id"], handshakes[1]["client_id"]);

    let replay = server.wait_for("subscribe", 2, WAIT).await.unwrap();
    assert_eq!(replay["channels"], serde_json::json!([0, 2]));
    assert_eq!(replay["gains"]["0"], -6.0);

    assert!(conn.server_info().await.unwrap().is_reconnection);
    assert_eq!(conn.stats().reconnects, 1);

    conn.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_heartbeat_timeout_then_recovery() {
    let mut server = MockMixServer::default_server();
    let addr = server.start().await.unwrap();
    let conn = manager(
        Duration::from_millis(100),
        Duration::from_millis(400),
        fast_policy(None),
    );
    let mut events = conn.events();
    conn.connect(ServerAddress::new("127.0.0.1", addr.port()))
        .await
        .unwrap();

    server.set_silent(true).await;

    next_event(&mut events, |e| {
        matches!(
            e,
            ConnectionEvent::StateChanged {
                new: ConnectionState::Degraded,
                ..
            }
        )
    })
    .await;
    next_event(&mut events, |e| {
        matches!(
            e,
            ConnectionEvent::Disconnected {
                reason: DisconnectReason::HeartbeatTimeout
            }
        )
    })
    .await;

    // Handshakes time out while the server stays quiet
    next_event(&mut events, |e| matches!(e, ConnectionEvent::Reconnecting { attempt: 2, .. })).await;
    assert_eq!(conn.state().await, ConnectionState::Reconnecting);

    server.set_silent(false).await;
    wait_state(&conn, ConnectionState::Connected).await;
    assert!(conn.stats().heartbeats_sent > 0);

    conn.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_any_inbound_traffic_restores_connected() {
    let mut server = MockMixServer::default_server();
    let addr = server.start().await.unwrap();
    let conn = manager(
        Duration::from_millis(100),
        Duration::from_secs(2),
        fast_policy(None),
    );
    conn.connect(ServerAddress::new("127.0.0.1", addr.port()))
        .await
        .unwrap();

    server.set_silent(true).await;
    wait_state(&conn, ConnectionState::Degraded).await;

    // Not a heartbeat reply, still proof of life
    server.send_control(r#"{"type":"master_gain_update","gainDb":-3.0}"#);
    wait_state(&conn, ConnectionState::Connected).await;
    assert_eq!(conn.mixer().master_gain_db(), -3.0);

    conn.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_reconnect_budget_exhausted() {
    let mut server = MockMixServer::default_server();
    let addr = server.start().await.unwrap();
    let conn = manager(
        Duration::from_secs(5),
        Duration::from_secs(15),
        fast_policy(Some(2)),
    );
    let mut events = conn.events();
    conn.connect(ServerAddress::new("127.0.0.1", addr.port()))
        .await
        .unwrap();

    server.stop().await;
    server.drop_connections();

    let error = next_event(&mut events, |e| {
        matches!(e, ConnectionEvent::Error { recoverable: false, .. })
    })
    .await;
    let ConnectionEvent::Error { message, .. } = error else {
        unreachable!()
    };
    assert!(message.contains("after 2 attempts"), "unexpected message: {message}");

    next_event(&mut events, |e| {
        matches!(
            e,
            ConnectionEvent::Disconnected {
                reason: DisconnectReason::ReconnectExhausted { attempts: 2 }
            }
        )
    })
    .await;
    assert_eq!(conn.state().await, ConnectionState::Idle);
    assert_eq!(conn.stats().reconnect_attempts, 2);
}

#[tokio::test]
async fn test_disconnect_cancels_reconnect() {
    let mut server = MockMixServer::default_server();
    let addr = server.start().await.unwrap();
    let conn = manager(
        Duration::from_secs(5),
        Duration::from_secs(15),
        fast_policy(None),
    );
    let mut events = conn.events();
    conn.connect(ServerAddress::new("127.0.0.1", addr.port()))
        .await
        .unwrap();

    server.stop().await;
    server.drop_connections();
    next_event(&mut events, |e| matches!(e, ConnectionEvent::Reconnecting { .. })).await;

    conn.disconnect().await;
    assert_eq!(conn.state().await, ConnectionState::Idle);

    // Drain what is queued, then make sure the supervisor stays quiet
    tokio::time::sleep(Duration::from_millis(50)).await;
    while events.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(
        !std::iter::from_fn(|| events.try_recv().ok())
            .any(|e| matches!(e, ConnectionEvent::Reconnecting { .. }))
    );
    assert_eq!(conn.state().await, ConnectionState::Idle);
}
