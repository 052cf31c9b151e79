use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use crate::connection::{
    Backoff, ConnectionEvent, ConnectionManager, ConnectionState, ConnectionStats,
    ConnectionStatus, DisconnectReason,
};
use crate::mixer::MixerState;
use crate::testing::MockMixServer;
use crate::types::{LinkConfig, ReconnectPolicy, ServerAddress};

fn policy() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay: Duration::from_millis(300),
        max_delay: Duration::from_secs(10),
        multiplier: 1.3,
        max_attempts: Some(20),
        max_elapsed: Some(Duration::from_secs(60)),
        ..ReconnectPolicy::default()
    }
}

#[test]
fn test_connection_state_is_active() {
    assert!(ConnectionState::Connecting.is_active());
    assert!(ConnectionState::Degraded.is_active());
    assert!(ConnectionState::Reconnecting.is_active());
    assert!(!ConnectionState::Idle.is_active());
}

#[test]
fn test_connection_state_is_connected() {
    assert!(ConnectionState::Connected.is_connected());
    assert!(ConnectionState::Degraded.is_connected());
    assert!(!ConnectionState::Connecting.is_connected());
}

#[test]
fn test_connection_status() {
    assert_eq!(ConnectionState::Degraded.status(), ConnectionStatus::Online);
    assert_eq!(ConnectionState::Reconnecting.status(), ConnectionStatus::Searching);
    assert_eq!(ConnectionState::Idle.status(), ConnectionStatus::Offline);
    assert_eq!(ConnectionStatus::Searching.to_string(), "searching");
}

#[test]
fn test_connection_stats() {
    let mut stats = ConnectionStats::default();
    stats.record_sent(100);
    stats.record_received(200);
    stats.record_received(16);

    assert_eq!(stats.bytes_sent, 100);
    assert_eq!(stats.frames_received, 2);
    assert_eq!(stats.bytes_received, 216);
    assert!(stats.uptime().is_none());
}

#[test]
fn test_disconnect_reason() {
    assert!(DisconnectReason::FullReset.is_user_requested());
    assert!(!DisconnectReason::HeartbeatTimeout.is_user_requested());
    assert_eq!(DisconnectReason::HeartbeatTimeout.to_string(), "heartbeat timeout");
}

#[test]
fn test_backoff_grows_to_cap() {
    let mut backoff = Backoff::new(policy());
    let delays: Vec<_> = (0..20)
        .map(|_| backoff.next_delay(Duration::ZERO).unwrap())
        .collect();

    assert_eq!(delays[0], Duration::from_millis(300));
    assert!(delays[1].abs_diff(Duration::from_millis(390)) < Duration::from_micros(1));
    assert_eq!(*delays.last().unwrap(), Duration::from_secs(10));
    assert!(backoff.next_delay(Duration::ZERO).is_none());
}

#[test]
fn test_backoff_reset() {
    let mut backoff = Backoff::new(policy());
    backoff.next_delay(Duration::ZERO);
    backoff.next_delay(Duration::ZERO);
    backoff.reset();

    assert_eq!(backoff.attempts(), 0);
    assert_eq!(
        backoff.next_delay(Duration::ZERO),
        Some(Duration::from_millis(300))
    );
}

#[test]
fn test_backoff_elapsed_ceiling() {
    let mut backoff = Backoff::new(policy());
    assert!(backoff.next_delay(Duration::from_secs(59)).is_some());
    assert!(backoff.next_delay(Duration::from_secs(60)).is_none());
}

#[test]
fn test_backoff_disabled() {
    let mut backoff = Backoff::new(ReconnectPolicy::disabled());
    assert!(backoff.next_delay(Duration::ZERO).is_none());
}

proptest! {
    #[test]
    fn prop_backoff_non_decreasing_and_capped(
        initial_ms in 1u64..2_000,
        cap_ms in 1u64..20_000,
        multiplier in 1.0f64..3.0,
        attempts in 1u32..40,
    ) {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(cap_ms),
            multiplier,
            max_attempts: None,
            max_elapsed: None,
            ..ReconnectPolicy::default()
        };
        let mut backoff = Backoff::new(policy);
        let mut last = Duration::ZERO;
        for _ in 0..attempts {
            let delay = backoff.next_delay(Duration::ZERO).unwrap();
            prop_assert!(delay >= last);
            prop_assert!(delay <= Duration::from_millis(cap_ms));
            last = delay;
        }
        backoff.reset();
        prop_assert_eq!(
            backoff.next_delay(Duration::ZERO).unwrap(),
            Duration::from_millis(initial_ms.min(cap_ms))
        );
    }
}

fn manager(config: LinkConfig) -> ConnectionManager {
    ConnectionManager::new(config, "abc", Arc::new(MixerState::default()))
}

#[tokio::test]
async fn test_send_without_session() {
    let manager = manager(LinkConfig::default());
    assert!(matches!(
        manager.send_master_gain(-3.0).await,
        Err(crate::LinkError::NotConnected)
    ));
    // Subscribing while offline just stores the channels
    manager.subscribe(&[0, 1]).await.unwrap();
    assert_eq!(manager.mixer().subscription(), vec![0, 1]);
}

#[tokio::test]
async fn test_connect_refused_returns_to_idle() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let manager = manager(LinkConfig::default());
    let result = manager.connect(ServerAddress::new("127.0.0.1", port)).await;
    assert!(result.is_err());
    assert_eq!(manager.state().await, ConnectionState::Idle);
}

#[tokio::test]
async fn test_connect_and_double_connect() {
    let mut server = MockMixServer::default_server();
    let addr = server.start().await.unwrap();
    let manager = manager(LinkConfig::default());
    let mut events = manager.events();

    manager
        .connect(ServerAddress::new("127.0.0.1", addr.port()))
        .await
        .unwrap();
    assert_eq!(manager.state().await, ConnectionState::Connected);
    assert_eq!(manager.server_info().await.unwrap().sample_rate, 48_000);

    let again = manager
        .connect(ServerAddress::new("127.0.0.1", addr.port()))
        .await;
    assert!(matches!(again, Err(crate::LinkError::InvalidState { .. })));

    let mut saw_info = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ConnectionEvent::ServerInfo(_)) {
            saw_info = true;
        }
    }
    assert!(saw_info);

    manager.disconnect().await;
    manager.disconnect().await;
    assert_eq!(manager.state().await, ConnectionState::Idle);
    server.stop().await;
}
