//! Mocap Transport Layer
//!
//! Datagram plumbing shared by the router, the link monitor and the
//! connection broker:
//! - [`UdpTransport`]: a bound socket handing out per-destination senders
//! - a cancellable receive loop feeding an mpsc channel
//! - the [`TransportSender`] seam the router sends through

pub mod error;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use traits::{TransportEvent, TransportReceiver, TransportSender};
pub use udp::{UdpConfig, UdpReceiver, UdpSender, UdpTransport};
