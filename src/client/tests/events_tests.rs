use std::time::Duration;

use super::super::events::{ClientEvent, EventBus, EventFilter};
use crate::connection::{ConnectionEvent, ConnectionState, ConnectionStatus, DisconnectReason};
use crate::types::ServerAddress;

#[test]
fn test_state_change_maps_to_status() {
    let event = ClientEvent::from_connection(ConnectionEvent::StateChanged {
        old: ConnectionState::Connected,
        new: ConnectionState::Reconnecting,
        status: ConnectionState::Reconnecting.status(),
    });
    let ClientEvent::ConnectionStatus {
        connected,
        status,
        message,
    } = event
    else {
        panic!("unexpected event");
    };
    assert!(!connected);
    assert_eq!(status, ConnectionStatus::Searching);
    assert_eq!(message, "searching");
}

#[test]
fn test_degraded_is_still_connected() {
    let event = ClientEvent::from_connection(ConnectionEvent::StateChanged {
        old: ConnectionState::Connected,
        new: ConnectionState::Degraded,
        status: ConnectionStatus::Online,
    });
    assert!(matches!(
        event,
        ClientEvent::ConnectionStatus { connected: true, ref message, .. } if message == "degraded"
    ));
}

#[test]
fn test_passthrough_events() {
    let event = ClientEvent::from_connection(ConnectionEvent::Connected {
        server: ServerAddress::new("10.0.0.2", 9000),
        reconnected: true,
    });
    assert!(matches!(event, ClientEvent::Connected { reconnected: true, .. }));
    assert!(event.is_connection_event());

    let event = ClientEvent::from_connection(ConnectionEvent::Disconnected {
        reason: DisconnectReason::HeartbeatTimeout,
    });
    assert!(matches!(
        event,
        ClientEvent::Disconnected {
            reason: DisconnectReason::HeartbeatTimeout
        }
    ));

    let event = ClientEvent::from_connection(ConnectionEvent::SubscriptionConfirmed {
        channels: vec![2, 3],
    });
    assert!(!event.is_connection_event());
}

#[tokio::test]
async fn test_event_bus_fanout() {
    let bus = EventBus::new();
    assert_eq!(bus.subscriber_count(), 0);
    // Emitting with nobody listening is fine
    bus.emit(ClientEvent::StreamIdle);

    let mut a = bus.subscribe();
    let mut b = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 2);

    bus.emit(ClientEvent::StreamActive);
    assert!(matches!(a.recv().await.unwrap(), ClientEvent::StreamActive));
    assert!(matches!(b.recv().await.unwrap(), ClientEvent::StreamActive));
}

#[tokio::test]
async fn test_filter_skips_other_events() {
    let bus = EventBus::new();
    let mut filter = EventFilter::connection_events(&bus);

    bus.emit(ClientEvent::StreamActive);
    bus.emit(ClientEvent::AudioMeter { levels: vec![] });
    bus.emit(ClientEvent::Reconnecting {
        attempt: 1,
        delay: Duration::from_millis(300),
    });

    let event = tokio::time::timeout(Duration::from_secs(1), filter.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, ClientEvent::Reconnecting { attempt: 1, .. }));
}

#[tokio::test]
async fn test_filter_ends_with_bus() {
    let bus = EventBus::new();
    let mut filter = EventFilter::audio_events(&bus);
    drop(bus);
    assert!(filter.recv().await.is_none());
}
