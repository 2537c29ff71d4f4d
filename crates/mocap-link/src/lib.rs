//! Mocap Link
//!
//! Connects two rooms across NATs:
//! - [`resolver`]: finds this host's public IP
//! - [`rendezvous`]: exchanges public endpoints through a TCP broker, plus
//!   the broker server itself
//! - [`handshake`]: SYN/ACK hole punching on one socket pair
//! - [`broker`]: drives the whole sequence and publishes [`LinkEvent`]s
//!
//! ## Port convention
//!
//! Each room uses two UDP ports: `tx` for sending and `tx + 1` for
//! receiving. The rendezvous exchange only carries the `tx` port.

pub mod broker;
pub mod error;
pub mod handshake;
pub mod rendezvous;
pub mod resolver;
pub mod retry;

pub use broker::{BrokerConfig, ConnectionBroker, LinkEvent, PeerLink};
pub use error::{LinkError, Result};
pub use handshake::{Handshake, HandshakeConfig, HandshakeState};
pub use rendezvous::{RendezvousBroker, RendezvousClient};
pub use resolver::{AddressResolver, HttpIpResolver, StaticResolver};
pub use retry::RetryPolicy;
