//! UDP Transport Tests (mocap-transport)
//!
//! - Send/receive through senders and the receive loop
//! - Encoded frames survive the trip
//! - Cancellation ends the receive loop

use bytes::Bytes;
use mocap_core::{adapter, codec, Body, Frame};
use mocap_transport::{TransportEvent, TransportReceiver, TransportSender, UdpTransport};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Send/Receive Tests
// ============================================================================

#[tokio::test]
async fn test_udp_sender_to() {
    let server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let client = UdpTransport::bind("127.0.0.1:0").await.unwrap();

    let server_addr = server.local_addr().unwrap();
    let client_addr = client.local_addr().unwrap();
    let mut receiver = server.start_receiver(CancellationToken::new());

    let sender = client.sender_to(server_addr);
    assert!(sender.is_connected());
    assert_eq!(sender.remote_addr(), server_addr);

    sender
        .send(Bytes::from_static(b"via sender"))
        .await
        .expect("Send should succeed");

    match tokio::time::timeout(WAIT, receiver.recv_from()).await {
        Ok(Some((TransportEvent::Data(data), from))) => {
            assert_eq!(data.as_ref(), b"via sender");
            assert_eq!(from.port(), client_addr.port());
        }
        other => panic!("Failed to receive data: {:?}", other),
    }
}

#[tokio::test]
async fn test_udp_frame_over_the_wire() {
    let server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let client = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let mut receiver = server.start_receiver(CancellationToken::new());

    let frame = Frame::new(adapter::KINECT, "kinect-1", 420).with_body(Body::named("MUC-KIN-SKEL"));
    let sender = client.sender_to(server.local_addr().unwrap());
    sender.send(codec::encode(&frame).unwrap()).await.unwrap();

    match tokio::time::timeout(WAIT, receiver.recv()).await {
        Ok(Some(TransportEvent::Data(data))) => {
            assert_eq!(codec::decode(&data).unwrap(), frame);
        }
        other => panic!("Expected frame datagram, got {:?}", other),
    }
}

#[tokio::test]
async fn test_udp_ordered_from_one_sender() {
    let server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let client = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let mut receiver = server.start_receiver(CancellationToken::new());

    let sender = client.sender_to(server.local_addr().unwrap());
    for i in 0..10u8 {
        sender.send(Bytes::from(vec![i])).await.unwrap();
    }

    let mut received = Vec::new();
    while received.len() < 10 {
        match tokio::time::timeout(WAIT, receiver.recv()).await {
            Ok(Some(TransportEvent::Data(data))) => received.push(data[0]),
            _ => break,
        }
    }

    // loopback keeps order; allow loss but never reordering
    assert!(received.len() >= 8, "got {}", received.len());
    assert!(received.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_recv_timeout_returns_datagram() {
    let server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let client = UdpTransport::bind("127.0.0.1:0").await.unwrap();

    client
        .send_to(b"SYN", server.local_addr().unwrap())
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    let (len, from) = server
        .recv_timeout(&mut buf, WAIT)
        .await
        .unwrap()
        .expect("datagram before timeout");
    assert_eq!(&buf[..len], b"SYN");
    assert_eq!(from, client.local_addr().unwrap());
}

// ============================================================================
// Cancellation Tests
// ============================================================================

#[tokio::test]
async fn test_cancel_stops_receiver() {
    let server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let cancel = CancellationToken::new();
    let mut receiver = server.start_receiver(cancel.clone());

    cancel.cancel();

    let result = tokio::time::timeout(WAIT, receiver.recv())
        .await
        .expect("receiver should close after cancellation");
    assert!(result.is_none());
}

#[tokio::test]
async fn test_clone_shares_socket() {
    let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let clone = transport.clone();
    assert_eq!(
        transport.local_addr().unwrap(),
        clone.local_addr().unwrap()
    );
}
