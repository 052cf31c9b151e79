use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::*;
use crate::protocol::{AudioFlags, ControlMessage, Frame, FrameCodec, InboundFrame};

#[test]
fn test_simulator_perfect_keeps_order() {
    let mut sim = NetworkSimulator::perfect();
    assert_eq!(sim.deliver(0..20), (0..20).collect::<Vec<_>>());
    assert_eq!(sim.get_delay(), Duration::ZERO);
}

#[test]
fn test_simulator_is_reproducible() {
    let a = NetworkSimulator::stress_test().with_seed(7).deliver(0..200);
    let b = NetworkSimulator::stress_test().with_seed(7).deliver(0..200);
    assert_eq!(a, b);
    assert_ne!(a, (0..200).collect::<Vec<_>>());
}

#[test]
fn test_simulator_full_loss() {
    let mut sim = NetworkSimulator {
        loss_rate: 1.0,
        ..NetworkSimulator::perfect()
    };
    assert!(sim.deliver(0..10).is_empty());
}

#[test]
fn test_simulator_delay_bounds() {
    let mut sim = NetworkSimulator::poor_wifi().with_seed(1);
    for _ in 0..100 {
        let d = sim.get_delay();
        assert!(d >= Duration::from_millis(30));
        assert!(d < Duration::from_millis(80));
    }
}

#[tokio::test]
async fn test_mock_server_handshake_and_heartbeat() {
    let mut server = MockMixServer::default_server();
    let addr = server.start().await.unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, write) = stream.into_split();
    let mut reader = FramedRead::new(read, FrameCodec::default());
    let mut writer = FramedWrite::new(write, FrameCodec::default());

    let hello = r#"{"type":"handshake","client_id":"abc","rf_mode":true}"#;
    writer
        .send(Frame::control(hello.to_string(), AudioFlags::default(), 0))
        .await
        .unwrap();
    let Some(Ok(InboundFrame::Frame(reply))) = reader.next().await else {
        panic!("no handshake response");
    };
    let ControlMessage::HandshakeResponse(info) = ControlMessage::parse(&reply.payload).unwrap()
    else {
        panic!("unexpected reply");
    };
    assert_eq!(info.sample_rate, 48_000);
    assert!(!info.is_reconnection);

    writer
        .send(Frame::control(
            r#"{"type":"heartbeat","client_id":"abc"}"#.to_string(),
            AudioFlags::default(),
            0,
        ))
        .await
        .unwrap();
    let Some(Ok(InboundFrame::Frame(reply))) = reader.next().await else {
        panic!("no heartbeat response");
    };
    assert!(matches!(
        ControlMessage::parse(&reply.payload).unwrap(),
        ControlMessage::HeartbeatResponse { .. }
    ));

    assert_eq!(server.received_of("handshake").await.len(), 1);
    server.stop().await;
}

#[tokio::test]
async fn test_mock_server_drop_connections() {
    let mut server = MockMixServer::default_server();
    let addr = server.start().await.unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = FramedRead::new(stream, FrameCodec::default());
    assert!(server.wait_for_accepted(1, Duration::from_secs(2)).await);

    server.drop_connections();
    let next = tokio::time::timeout(Duration::from_secs(2), reader.next())
        .await
        .unwrap();
    assert!(next.is_none());
}
