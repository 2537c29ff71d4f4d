//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::error::Result;

/// Events produced by a receive loop
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Datagram received
    Data(Bytes),
    /// Receive error; the loop keeps running
    Error(String),
}

/// Sends datagrams to one fixed destination
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send one datagram
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Destination of this sender
    fn remote_addr(&self) -> SocketAddr;

    /// False once closed
    fn is_connected(&self) -> bool;

    /// Close the sender; later sends fail with [`TransportError::Closed`]
    ///
    /// [`TransportError::Closed`]: crate::TransportError::Closed
    async fn close(&self) -> Result<()>;
}

/// Receives events from a receive loop
#[async_trait]
pub trait TransportReceiver: Send {
    /// Next event, `None` once the loop has stopped
    async fn recv(&mut self) -> Option<TransportEvent>;
}
