//! UDP hole punching
//!
//! Both sides fire `SYN` at each other's public endpoint. Outbound packets
//! open a mapping in the local NAT, so once both have sent, inbound packets
//! get through. A side that hears `SYN` answers with `ACK`; a side that
//! hears `ACK` knows the path works both ways and keeps confirming for a few
//! rounds so the other side hears it too.

use mocap_transport::UdpTransport;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};

pub const SYN: &[u8] = b"SYN";
pub const ACK: &[u8] = b"ACK";

/// Bounds of one handshake
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Send/receive rounds before giving up
    pub rounds: u32,
    /// Receive wait per round
    pub recv_timeout: Duration,
    /// ACKs sent after reaching [`HandshakeState::Ack`]
    pub confirmations: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            rounds: 50,
            recv_timeout: Duration::from_millis(500),
            confirmations: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing heard yet; sending SYN
    Initial,
    /// Peer's SYN heard; sending ACK
    Syn,
    /// Peer's ACK heard; path confirmed
    Ack,
}

impl HandshakeState {
    /// Transition on an inbound payload. Never moves backwards.
    pub fn on_message(self, payload: &[u8]) -> Self {
        match (self, payload) {
            (HandshakeState::Initial, SYN) => HandshakeState::Syn,
            (_, ACK) => HandshakeState::Ack,
            (state, _) => state,
        }
    }

    /// Payload to send in this state
    pub fn outbound(self) -> &'static [u8] {
        match self {
            HandshakeState::Initial => SYN,
            HandshakeState::Syn | HandshakeState::Ack => ACK,
        }
    }
}

/// A punched socket
#[derive(Debug)]
pub struct Established {
    pub socket: UdpTransport,
    /// Peer endpoint as last observed; may differ from the advertised one
    /// when the peer's NAT remaps ports
    pub peer: SocketAddr,
}

/// One direction of a link: a local socket and the peer endpoint it pairs with
pub struct Handshake {
    socket: UdpTransport,
    peer: SocketAddr,
    config: HandshakeConfig,
    state: HandshakeState,
}

impl Handshake {
    pub fn new(socket: UdpTransport, peer: SocketAddr, config: HandshakeConfig) -> Self {
        Self {
            socket,
            peer,
            config,
            state: HandshakeState::Initial,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run to completion. On failure the socket is dropped.
    pub async fn run(mut self, cancel: &CancellationToken) -> Result<Established> {
        let local = self.socket.local_addr()?;
        let mut buf = [0u8; 64];
        let mut confirmations_sent = 0u32;

        for round in 0..self.config.rounds {
            if self.state == HandshakeState::Ack {
                if confirmations_sent >= self.config.confirmations {
                    info!(
                        "Link {} <-> {} established after {} rounds",
                        local, self.peer, round
                    );
                    return Ok(Established {
                        socket: self.socket,
                        peer: self.peer,
                    });
                }
                confirmations_sent += 1;
            }

            let outbound = self.state.outbound();
            if let Err(e) = self.socket.send_to(outbound, self.peer).await {
                debug!("Handshake send to {} failed: {}", self.peer, e);
            }

            let received = tokio::select! {
                _ = cancel.cancelled() => return Err(LinkError::Cancelled),
                received = self.socket.recv_timeout(&mut buf, self.config.recv_timeout) => received,
            };

            match received {
                Ok(Some((len, from))) => {
                    let next = self.state.on_message(&buf[..len]);
                    if next != self.state {
                        debug!("Handshake on {}: {:?} -> {:?} ({})", local, self.state, next, from);
                        if from != self.peer {
                            debug!("Peer {} observed as {}", self.peer, from);
                            self.peer = from;
                        }
                        self.state = next;
                    }
                }
                Ok(None) => {}
                Err(e) => debug!("Handshake receive on {}: {}", local, e),
            }
        }

        warn!(
            "Could not establish link from {} to {} ({:?} after {} rounds)",
            local, self.peer, self.state, self.config.rounds
        );
        Err(LinkError::HandshakeFailed {
            peer: self.peer,
            rounds: self.config.rounds,
        })
    }
}
