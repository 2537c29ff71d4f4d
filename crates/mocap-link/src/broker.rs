//! Connection broker
//!
//! Drives one link attempt: public address lookup, rendezvous, then two
//! concurrent handshakes (local tx with peer rx, local rx with peer tx).
//! The outcome is published as a [`LinkEvent`] and also returned.

use mocap_core::DEFAULT_BROKER_PORT;
use mocap_core::DEFAULT_TX_PORT;
use mocap_transport::{UdpConfig, UdpTransport};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{LinkError, Result};
use crate::handshake::{Handshake, HandshakeConfig};
use crate::rendezvous::RendezvousClient;
use crate::resolver::AddressResolver;
use crate::retry::RetryPolicy;

/// Connection broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Rendezvous broker host name or IP
    pub broker_host: String,
    pub broker_port: u16,
    /// Local transmit port; the receive port is `tx_port + 1`
    pub tx_port: u16,
    /// Interface the link sockets bind to
    pub bind_ip: IpAddr,
    pub handshake: HandshakeConfig,
    pub retry: RetryPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_host: String::new(),
            broker_port: DEFAULT_BROKER_PORT,
            tx_port: DEFAULT_TX_PORT,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            handshake: HandshakeConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.broker_host.trim().is_empty() {
            return Err(LinkError::Config("broker host is not set".to_string()));
        }
        if self.tx_port == 0 || self.tx_port == u16::MAX {
            return Err(LinkError::Config(format!(
                "tx port {} leaves no room for the rx port",
                self.tx_port
            )));
        }
        Ok(())
    }

    pub fn rx_port(&self) -> u16 {
        self.tx_port + 1
    }
}

/// An established link to a remote room
#[derive(Debug, Clone)]
pub struct PeerLink {
    /// Local socket frames are sent from
    pub tx: UdpTransport,
    /// Local socket frames arrive on
    pub rx: UdpTransport,
    /// Peer endpoint our `tx` sends to (the peer's rx socket)
    pub peer_rx: SocketAddr,
    /// Peer endpoint our `rx` hears from (the peer's tx socket)
    pub peer_tx: SocketAddr,
}

/// Outcome of a link attempt
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Established(PeerLink),
    Failed { reason: String },
}

/// Establishes peer links and announces them
pub struct ConnectionBroker {
    config: BrokerConfig,
    resolver: Arc<dyn AddressResolver>,
    events: broadcast::Sender<LinkEvent>,
}

impl ConnectionBroker {
    /// Create a broker. A missing broker host is a configuration error.
    pub fn new(config: BrokerConfig, resolver: Arc<dyn AddressResolver>) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(16);
        Ok(Self {
            config,
            resolver,
            events,
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Subscribe to link events
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Run one link attempt and publish its outcome
    pub async fn establish(&self, cancel: &CancellationToken) -> Result<PeerLink> {
        match self.try_establish(cancel).await {
            Ok(link) => {
                info!(
                    "Peer link established: tx {} -> {}, rx {} <- {}",
                    self.config.tx_port,
                    link.peer_rx,
                    self.config.rx_port(),
                    link.peer_tx
                );
                self.publish(LinkEvent::Established(link.clone()));
                Ok(link)
            }
            Err(LinkError::Cancelled) => Err(LinkError::Cancelled),
            Err(e) => {
                error!("Peer link failed: {}", e);
                self.publish(LinkEvent::Failed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Run [`establish`](Self::establish) on its own task
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<Result<PeerLink>> {
        tokio::spawn(async move { self.establish(&cancel).await })
    }

    async fn try_establish(&self, cancel: &CancellationToken) -> Result<PeerLink> {
        let public_ip = tokio::select! {
            _ = cancel.cancelled() => return Err(LinkError::Cancelled),
            ip = self.resolver.public_ip() => ip?,
        };
        debug!("Public IP: {}", public_ip);

        // bind before advertising so a busy port fails fast
        let tx = self.bind(self.config.tx_port).await?;
        let rx = self.bind(self.config.rx_port()).await?;

        let client = RendezvousClient::new(
            &self.config.broker_host,
            self.config.broker_port,
            self.config.retry.clone(),
        );
        let peer_tx = client
            .exchange(SocketAddr::new(public_ip, self.config.tx_port), cancel)
            .await?;
        let peer_port = peer_tx.port().checked_add(1).ok_or_else(|| {
            LinkError::Rendezvous(format!("peer tx port {} has no rx port", peer_tx.port()))
        })?;
        let peer_rx = SocketAddr::new(peer_tx.ip(), peer_port);

        let (outbound, inbound) = tokio::join!(
            Handshake::new(tx, peer_rx, self.config.handshake.clone()).run(cancel),
            Handshake::new(rx, peer_tx, self.config.handshake.clone()).run(cancel),
        );
        let outbound = outbound?;
        let inbound = inbound?;

        Ok(PeerLink {
            tx: outbound.socket,
            rx: inbound.socket,
            peer_rx: outbound.peer,
            peer_tx: inbound.peer,
        })
    }

    async fn bind(&self, port: u16) -> Result<UdpTransport> {
        let addr = SocketAddr::new(self.config.bind_ip, port);
        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            LinkError::Config(format!("cannot bind link socket {}: {}", addr, e))
        })?;
        Ok(UdpTransport::from_socket(socket, UdpConfig::default()))
    }

    fn publish(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            warn!("Link event dropped: no subscribers");
        }
    }
}
