//! Peer link monitor
//!
//! Watches one established link: receives the remote room's frames, sends
//! our heartbeat, and reports when the remote heartbeat goes quiet.

use mocap_core::{adapter, codec, Frame, DEFAULT_HEARTBEAT_INTERVAL_MS};
use mocap_transport::{TransportEvent, UdpTransport};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, RouterError};
use crate::periodic::spawn_periodic;
use crate::sink::FrameSink;

/// Staleness threshold and watchdog period, in heartbeat intervals
const WATCHDOG_MULTIPLIER: u32 = 2;

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub heartbeat_interval: Duration,
    /// Send heartbeats and run the watchdog
    pub keepalive: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            keepalive: true,
        }
    }
}

impl MonitorConfig {
    /// A zero interval is only rejected with keepalive on; nothing is
    /// scheduled otherwise.
    pub fn validate(&self) -> Result<()> {
        if self.keepalive && self.heartbeat_interval.is_zero() {
            return Err(RouterError::Config(
                "heartbeat interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn watchdog_threshold(&self) -> Duration {
        self.heartbeat_interval * WATCHDOG_MULTIPLIER
    }
}

/// Link liveness transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkHealth {
    /// No heartbeat for longer than the threshold
    Down { silent_for: Duration },
    /// Heartbeats arrive again after `Down`
    Restored,
}

/// Last-heartbeat bookkeeping shared by the receive loop and the watchdog
#[derive(Debug)]
pub struct HeartbeatState {
    epoch: Instant,
    /// Milliseconds after `epoch` of the last heartbeat
    last_ms: AtomicU64,
    down: AtomicBool,
}

impl HeartbeatState {
    /// Starts as if a heartbeat arrived at `now`
    pub fn new(now: Instant) -> Self {
        Self {
            epoch: now,
            last_ms: AtomicU64::new(0),
            down: AtomicBool::new(false),
        }
    }

    /// Record a heartbeat. Returns [`LinkHealth::Restored`] if the link was
    /// considered down.
    pub fn record(&self, now: Instant) -> Option<LinkHealth> {
        let offset = now.saturating_duration_since(self.epoch).as_millis() as u64;
        self.last_ms.fetch_max(offset, Ordering::AcqRel);
        self.down
            .swap(false, Ordering::AcqRel)
            .then_some(LinkHealth::Restored)
    }

    /// Time since the last heartbeat
    pub fn silent_for(&self, now: Instant) -> Duration {
        let last = self.epoch + Duration::from_millis(self.last_ms.load(Ordering::Acquire));
        now.saturating_duration_since(last)
    }

    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        self.silent_for(now) > threshold
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }

    /// Watchdog check. Reports [`LinkHealth::Down`] once per outage.
    pub fn check(&self, now: Instant, threshold: Duration) -> Option<LinkHealth> {
        if !self.is_stale(now, threshold) {
            return None;
        }
        if self.down.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(LinkHealth::Down {
            silent_for: self.silent_for(now),
        })
    }
}

/// Monitors one peer link
pub struct PeerLinkMonitor {
    cancel: CancellationToken,
    heartbeat: Arc<HeartbeatState>,
    health: broadcast::Sender<LinkHealth>,
    tasks: Vec<JoinHandle<()>>,
}

impl PeerLinkMonitor {
    /// Start monitoring. Fails on an invalid `config` before anything is
    /// spawned.
    ///
    /// `rx` is the link's receive socket. Remote frames go to `inbound`;
    /// heartbeats are sent through `outbound` (normally the router, which
    /// forwards them to every remote room).
    pub fn start(
        rx: UdpTransport,
        outbound: Arc<dyn FrameSink>,
        inbound: Arc<dyn FrameSink>,
        config: MonitorConfig,
    ) -> Result<Self> {
        config.validate()?;

        let cancel = CancellationToken::new();
        let heartbeat = Arc::new(HeartbeatState::new(Instant::now()));
        let (health, _) = broadcast::channel(16);
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(receive_loop(
            rx,
            inbound,
            heartbeat.clone(),
            health.clone(),
            cancel.clone(),
        )));

        if config.keepalive {
            let interval = config.heartbeat_interval;
            let frame = Frame::heartbeat();
            tasks.push(spawn_periodic(interval, cancel.child_token(), move || {
                trace!("Sending heartbeat");
                outbound.deliver(frame.clone());
            }));

            let threshold = config.watchdog_threshold();
            let state = heartbeat.clone();
            let events = health.clone();
            tasks.push(spawn_periodic(threshold, cancel.child_token(), move || {
                if let Some(event) = state.check(Instant::now(), threshold) {
                    warn!("Connection to peer is gone: no heartbeat for {:?}", threshold);
                    publish(&events, event);
                }
            }));
        }

        info!(
            "Peer link monitor started (keepalive {}, interval {:?})",
            config.keepalive, config.heartbeat_interval
        );

        Ok(Self {
            cancel,
            heartbeat,
            health,
            tasks,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkHealth> {
        self.health.subscribe()
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatState> {
        &self.heartbeat
    }

    /// Stop all tasks and release the receive socket
    pub async fn stop(mut self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut self.tasks);
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!("Monitor task ended abnormally: {}", e);
            }
        }
        info!("Peer link monitor stopped");
    }
}

impl Drop for PeerLinkMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn publish(events: &broadcast::Sender<LinkHealth>, event: LinkHealth) {
    if events.send(event).is_err() {
        debug!("Link health event dropped: no subscribers");
    }
}

async fn receive_loop(
    rx: UdpTransport,
    inbound: Arc<dyn FrameSink>,
    heartbeat: Arc<HeartbeatState>,
    health: broadcast::Sender<LinkHealth>,
    cancel: CancellationToken,
) {
    let mut receiver = rx.start_receiver(cancel.child_token());
    drop(rx);

    while let Some((event, from)) = receiver.recv_from().await {
        let data = match event {
            TransportEvent::Data(data) => data,
            TransportEvent::Error(e) => {
                debug!("Link receive error: {}", e);
                continue;
            }
        };

        let frame = match codec::decode(&data) {
            Ok(frame) => frame,
            Err(e) => {
                // late handshake packets land here too
                debug!("Skipping {} byte datagram from {}: {}", data.len(), from, e);
                continue;
            }
        };

        if frame.adapter_type == adapter::PEER {
            if frame.is_heartbeat() {
                if let Some(event) = heartbeat.record(Instant::now()) {
                    info!("Connection to peer restored");
                    publish(&health, event);
                }
            } else {
                warn!("Received unknown meta frame from {}", from);
            }
            continue;
        }

        inbound.deliver(frame);
    }
    debug!("Link receive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(5000);

    #[test]
    fn test_stale_after_threshold() {
        let t0 = Instant::now();
        let state = HeartbeatState::new(t0);
        let threshold = INTERVAL * 2;

        assert!(!state.is_stale(t0 + Duration::from_millis(9999), threshold));
        assert!(!state.is_stale(t0 + threshold, threshold));
        assert!(state.is_stale(t0 + threshold + Duration::from_millis(1), threshold));
    }

    #[test]
    fn test_heartbeat_pushes_threshold() {
        let t0 = Instant::now();
        let state = HeartbeatState::new(t0);
        let threshold = INTERVAL * 2;

        state.record(t0 + Duration::from_secs(8));
        assert!(state.check(t0 + Duration::from_secs(10), threshold).is_none());
        assert!(state.check(t0 + Duration::from_secs(17), threshold).is_none());
        assert!(state.check(t0 + Duration::from_secs(18), threshold).is_none());
        assert!(state
            .check(t0 + Duration::from_millis(18_001), threshold)
            .is_some());
    }

    #[test]
    fn test_down_reported_once_then_restored() {
        let t0 = Instant::now();
        let state = HeartbeatState::new(t0);
        let threshold = INTERVAL * 2;
        let late = threshold + Duration::from_millis(1);

        assert_eq!(
            state.check(t0 + late, threshold),
            Some(LinkHealth::Down { silent_for: late })
        );
        assert!(state.is_down());
        assert_eq!(state.check(t0 + threshold * 2, threshold), None);

        assert_eq!(
            state.record(t0 + threshold * 3),
            Some(LinkHealth::Restored)
        );
        assert!(!state.is_down());
        assert_eq!(state.record(t0 + threshold * 3), None);
    }

    #[test]
    fn test_zero_interval_rejected_with_keepalive() {
        let config = MonitorConfig {
            heartbeat_interval: Duration::ZERO,
            keepalive: true,
        };
        assert!(matches!(config.validate(), Err(RouterError::Config(_))));

        let quiet = MonitorConfig {
            keepalive: false,
            ..config
        };
        assert!(quiet.validate().is_ok());
        assert!(MonitorConfig::default().validate().is_ok());
    }
}
