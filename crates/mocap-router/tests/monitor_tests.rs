//! Peer Link Monitor Tests (mocap-router)

use mocap_core::{adapter, codec, Body, Frame};
use mocap_router::{LinkHealth, MonitorConfig, PeerLinkMonitor, RouterError};
use mocap_transport::UdpTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

fn channel_sink() -> (Arc<mpsc::UnboundedSender<Frame>>, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(tx), rx)
}

fn quiet() -> MonitorConfig {
    MonitorConfig {
        keepalive: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_remote_frames_delivered_inbound() {
    let rx = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let target = rx.local_addr().unwrap();
    let remote = UdpTransport::bind("127.0.0.1:0").await.unwrap();

    let (outbound, _out) = channel_sink();
    let (inbound, mut frames) = channel_sink();
    let monitor = PeerLinkMonitor::start(rx, outbound, inbound, quiet()).unwrap();

    let frame = Frame::new(adapter::KINECT, "k1", 12).with_body(Body::named("B-KIN-SKEL"));
    remote
        .send_to(&codec::encode(&frame).unwrap(), target)
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(2), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, frame);

    monitor.stop().await;
}

#[tokio::test]
async fn test_meta_and_garbage_not_delivered() {
    let rx = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let target = rx.local_addr().unwrap();
    let remote = UdpTransport::bind("127.0.0.1:0").await.unwrap();

    let (outbound, _out) = channel_sink();
    let (inbound, mut frames) = channel_sink();
    let monitor = PeerLinkMonitor::start(rx, outbound, inbound, quiet()).unwrap();

    let unknown_meta = Frame::new(adapter::PEER, adapter::PEER, 0).with_body(Body::named("*-RESYNC"));
    let data = Frame::new(adapter::KINECT, "k1", 5).with_body(Body::named("B-KIN-SKEL"));

    // a late handshake packet, a heartbeat, an unknown meta frame, then data
    remote.send_to(b"ACK", target).await.unwrap();
    remote
        .send_to(&codec::encode(&Frame::heartbeat()).unwrap(), target)
        .await
        .unwrap();
    remote
        .send_to(&codec::encode(&unknown_meta).unwrap(), target)
        .await
        .unwrap();
    remote
        .send_to(&codec::encode(&data).unwrap(), target)
        .await
        .unwrap();

    let first = timeout(Duration::from_secs(2), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, data);
    assert!(frames.try_recv().is_err());

    monitor.stop().await;
}

#[tokio::test]
async fn test_heartbeats_sent_outbound() {
    let rx = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let (outbound, mut sent) = channel_sink();
    let (inbound, _frames) = channel_sink();

    let config = MonitorConfig {
        heartbeat_interval: Duration::from_millis(20),
        keepalive: true,
    };
    let monitor = PeerLinkMonitor::start(rx, outbound, inbound, config).unwrap();

    for _ in 0..3 {
        let frame = timeout(Duration::from_secs(2), sent.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(frame.is_heartbeat());
    }

    monitor.stop().await;
}

#[tokio::test]
async fn test_no_heartbeats_without_keepalive() {
    let rx = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let (outbound, mut sent) = channel_sink();
    let (inbound, _frames) = channel_sink();

    let config = MonitorConfig {
        heartbeat_interval: Duration::from_millis(10),
        keepalive: false,
    };
    let monitor = PeerLinkMonitor::start(rx, outbound, inbound, config).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sent.try_recv().is_err());

    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_reports_down_once() {
    let rx = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let (outbound, _sent) = channel_sink();
    let (inbound, _frames) = channel_sink();

    let start = Instant::now();
    let monitor = PeerLinkMonitor::start(rx, outbound, inbound, MonitorConfig::default()).unwrap();
    let mut health = monitor.subscribe();

    let event = timeout(Duration::from_secs(60), health.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, LinkHealth::Down { .. }));
    // the 10s check sees exactly the threshold, which is not yet stale
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(20) && elapsed < Duration::from_secs(21));

    // still silent: no second report
    assert!(timeout(Duration::from_secs(30), health.recv()).await.is_err());
    assert!(monitor.heartbeat().is_down());

    assert_eq!(
        monitor.heartbeat().record(Instant::now()),
        Some(LinkHealth::Restored)
    );
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_postpones_watchdog() {
    let rx = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let (outbound, _sent) = channel_sink();
    let (inbound, _frames) = channel_sink();

    let start = Instant::now();
    let monitor = PeerLinkMonitor::start(rx, outbound, inbound, MonitorConfig::default()).unwrap();
    let mut health = monitor.subscribe();

    tokio::time::sleep(Duration::from_secs(12)).await;
    monitor.heartbeat().record(Instant::now());

    // checks at 10s and 20s see 10s and 8s of silence; the one at 30s sees 18s
    let event = timeout(Duration::from_secs(60), health.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, LinkHealth::Down { .. }));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));

    monitor.stop().await;
}

#[tokio::test]
async fn test_remote_heartbeat_restores_link() {
    let rx = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let target = rx.local_addr().unwrap();
    let remote = UdpTransport::bind("127.0.0.1:0").await.unwrap();

    let (outbound, _sent) = channel_sink();
    let (inbound, _frames) = channel_sink();
    let config = MonitorConfig {
        heartbeat_interval: Duration::from_millis(25),
        keepalive: true,
    };
    let monitor = PeerLinkMonitor::start(rx, outbound, inbound, config).unwrap();
    let mut health = monitor.subscribe();

    let down = timeout(Duration::from_secs(2), health.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(down, LinkHealth::Down { .. }));

    remote
        .send_to(&codec::encode(&Frame::heartbeat()).unwrap(), target)
        .await
        .unwrap();

    let restored = timeout(Duration::from_secs(2), health.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restored, LinkHealth::Restored);

    monitor.stop().await;
}

#[tokio::test]
async fn test_stop_releases_socket() {
    let rx = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = rx.local_addr().unwrap();
    let (outbound, _sent) = channel_sink();
    let (inbound, _frames) = channel_sink();

    let config = MonitorConfig {
        heartbeat_interval: Duration::from_millis(20),
        keepalive: true,
    };
    let monitor = PeerLinkMonitor::start(rx, outbound, inbound, config).unwrap();
    monitor.stop().await;

    // the receive task drops its socket as it winds down
    let mut rebound = None;
    for _ in 0..50 {
        if let Ok(socket) = UdpTransport::bind(&addr.to_string()).await {
            rebound = Some(socket);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(rebound.is_some(), "{} still held after stop", addr);
}

#[tokio::test]
async fn test_zero_interval_refused() {
    let rx = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let (outbound, _sent) = channel_sink();
    let (inbound, _frames) = channel_sink();

    let config = MonitorConfig {
        heartbeat_interval: Duration::ZERO,
        keepalive: true,
    };
    let result = PeerLinkMonitor::start(rx, outbound, inbound, config);
    assert!(matches!(result, Err(RouterError::Config(_))));
}
