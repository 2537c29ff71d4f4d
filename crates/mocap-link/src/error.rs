//! Link error types

use std::net::SocketAddr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not determine public address: {0}")]
    PublicAddress(String),

    #[error("rendezvous failed: {0}")]
    Rendezvous(String),

    #[error("rendezvous gave up after {attempts} malformed replies")]
    RendezvousExhausted { attempts: u32 },

    #[error("handshake with {peer} failed after {rounds} rounds")]
    HandshakeFailed { peer: SocketAddr, rounds: u32 },

    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] mocap_transport::TransportError),
}
