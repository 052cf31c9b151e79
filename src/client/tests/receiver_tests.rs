use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::super::receiver::{DatagramReceiver, ReceiverConfig};
use crate::protocol::AudioPacket;
use crate::protocol::datagram::encode_audio_datagram;

const HASH: u16 = 0x1234;

fn config(max_hold: Duration) -> ReceiverConfig {
    ReceiverConfig {
        client_hash: HASH,
        capacity: 10,
        window: 5,
        max_hold,
    }
}

async fn start(max_hold: Duration) -> (DatagramReceiver, mpsc::Receiver<AudioPacket>, UdpSocket) {
    let (tx, rx) = mpsc::channel(16);
    let receiver = DatagramReceiver::start("127.0.0.1:0", config(max_hold), tx)
        .await
        .unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    (receiver, rx, sender)
}

async fn send(sender: &UdpSocket, to: SocketAddr, sequence: u32, hash: u16) {
    let position = i64::from(sequence) * 4;
    let datagram = encode_audio_datagram(sequence, 0, position, &[0], &[0.5; 4], hash);
    sender.send_to(&datagram, to).await.unwrap();
}

async fn next(rx: &mut mpsc::Receiver<AudioPacket>) -> Option<AudioPacket> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn test_reorders_late_packet() {
    let (receiver, mut rx, sender) = start(Duration::from_millis(500)).await;
    let to = receiver.local_addr();

    send(&sender, to, 0, HASH).await;
    assert_eq!(next(&mut rx).await.unwrap().sample_position, 0);

    send(&sender, to, 2, HASH).await;
    send(&sender, to, 1, HASH).await;
    assert_eq!(next(&mut rx).await.unwrap().sample_position, 4);
    assert_eq!(next(&mut rx).await.unwrap().sample_position, 8);

    let stats = receiver.stats();
    assert_eq!(stats.datagrams, 3);
    assert_eq!(stats.jitter.gaps, 0);
    receiver.stop().await;
}

#[tokio::test]
async fn test_skips_gap_after_hold() {
    let (receiver, mut rx, sender) = start(Duration::from_millis(30)).await;
    let to = receiver.local_addr();

    send(&sender, to, 0, HASH).await;
    next(&mut rx).await.unwrap();
    send(&sender, to, 2, HASH).await;

    let packet = next(&mut rx).await.unwrap();
    assert_eq!(packet.sample_position, 8);

    // Counters are published after the release pass
    let mut gaps = 0;
    for _ in 0..50 {
        gaps = receiver.stats().jitter.gaps;
        if gaps > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(gaps, 1);
    receiver.stop().await;
}

#[tokio::test]
async fn test_filters_other_clients() {
    let (receiver, mut rx, sender) = start(Duration::from_millis(20)).await;
    let to = receiver.local_addr();

    send(&sender, to, 0, HASH ^ 0xFFFF).await;
    send(&sender, to, 1, 0).await;

    // Broadcast hash is accepted
    assert_eq!(next(&mut rx).await.unwrap().sample_position, 4);
    assert_eq!(receiver.stats().foreign, 1);
    receiver.stop().await;
}

#[tokio::test]
async fn test_counts_garbage() {
    let (receiver, mut rx, sender) = start(Duration::from_millis(20)).await;
    let to = receiver.local_addr();

    sender.send_to(b"not a datagram", to).await.unwrap();
    send(&sender, to, 0, HASH).await;

    next(&mut rx).await.unwrap();
    let stats = receiver.stats();
    assert_eq!(stats.datagrams, 2);
    assert_eq!(stats.undecodable, 1);
    receiver.stop().await;
}

#[tokio::test]
async fn test_stop_closes_output() {
    let (receiver, mut rx, _sender) = start(Duration::from_millis(20)).await;
    receiver.stop().await;
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_reset_follows_restarted_sequence() {
    let (receiver, mut rx, sender) = start(Duration::from_millis(30)).await;
    let to = receiver.local_addr();

    for sequence in 0..20 {
        send(&sender, to, sequence, HASH).await;
        next(&mut rx).await.unwrap();
    }

    // Without the reset these would be behind the release point
    receiver.reset();
    tokio::time::sleep(Duration::from_millis(50)).await;
    send(&sender, to, 0, HASH).await;
    assert_eq!(next(&mut rx).await.unwrap().sample_position, 0);
    send(&sender, to, 1, HASH).await;
    assert_eq!(next(&mut rx).await.unwrap().sample_position, 4);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let stats = receiver.stats();
    assert_eq!(stats.jitter.late, 0);
    assert_eq!(stats.jitter.released, 22);
    receiver.stop().await;
}
