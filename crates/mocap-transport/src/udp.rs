//! UDP transport implementation

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender};

/// UDP configuration
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Maximum packet size
    pub max_packet_size: usize,
    /// Capacity of the receive loop's channel
    pub channel_capacity: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            max_packet_size: 65507, // Max UDP payload
            channel_capacity: 256,
        }
    }
}

/// A bound UDP socket (connectionless)
///
/// Cloning shares the socket; it closes when the last clone (and every
/// sender or receive loop made from it) is dropped.
#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    config: UdpConfig,
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.socket.local_addr().ok())
            .finish()
    }
}

impl UdpTransport {
    /// Bind to a local address
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, UdpConfig::default()).await
    }

    /// Bind with config
    pub async fn bind_with_config(addr: &str, config: UdpConfig) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {}", addr, e)))?;

        if let Ok(local) = socket.local_addr() {
            info!("UDP bound to {}", local);
        }

        Ok(Self::from_socket(socket, config))
    }

    /// Wrap an already bound socket
    pub fn from_socket(socket: UdpSocket, config: UdpConfig) -> Self {
        Self {
            socket: Arc::new(socket),
            config,
        }
    }

    /// Get local address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    /// Create a sender for a specific remote address
    pub fn sender_to(&self, remote: SocketAddr) -> UdpSender {
        UdpSender {
            socket: self.socket.clone(),
            remote,
            connected: AtomicBool::new(true),
        }
    }

    /// Spawn a receive loop feeding a channel until `cancel` fires
    pub fn start_receiver(&self, cancel: CancellationToken) -> UdpReceiver {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let socket = self.socket.clone();
        let max_size = self.config.max_packet_size;

        tokio::spawn(async move {
            let mut buf = vec![0u8; max_size];

            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("UDP receive loop cancelled");
                        break;
                    }
                    received = socket.recv_from(&mut buf) => received,
                };

                let event = match received {
                    Ok((len, from)) => {
                        trace!("UDP received {} bytes from {}", len, from);
                        (TransportEvent::Data(Bytes::copy_from_slice(&buf[..len])), from)
                    }
                    Err(e) => {
                        error!("UDP receive error: {}", e);
                        (
                            TransportEvent::Error(e.to_string()),
                            SocketAddr::from(([0, 0, 0, 0], 0)),
                        )
                    }
                };

                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        UdpReceiver { rx }
    }

    /// Send to a specific address
    pub async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<()> {
        self.socket
            .send_to(data, target)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    /// Receive one datagram, waiting at most `timeout`.
    ///
    /// `Ok(None)` means the timeout elapsed.
    pub async fn recv_timeout(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(usize, SocketAddr)>> {
        match tokio::time::timeout(timeout, self.socket.recv_from(buf)).await {
            Ok(Ok(received)) => Ok(Some(received)),
            Ok(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            Err(_) => Ok(None),
        }
    }
}

/// UDP sender (to a specific remote)
pub struct UdpSender {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    connected: AtomicBool,
}

#[async_trait]
impl TransportSender for UdpSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        self.socket
            .send_to(&data, self.remote)
            .await
            .map_err(|e| TransportError::SendFailed(format!("{}: {}", self.remote, e)))?;
        Ok(())
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }
}

/// UDP receiver
pub struct UdpReceiver {
    rx: mpsc::Receiver<(TransportEvent, SocketAddr)>,
}

impl UdpReceiver {
    /// Receive the next event with source address
    pub async fn recv_from(&mut self) -> Option<(TransportEvent, SocketAddr)> {
        self.rx.recv().await
    }
}

#[async_trait]
impl TransportReceiver for UdpReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await.map(|(event, _)| event)
    }
}
