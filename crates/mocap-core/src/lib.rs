//! Mocap Core
//!
//! Core types and protocol primitives shared by every part of the hub.
//!
//! This crate provides:
//! - Hierarchical room identifiers ([`Hrri`])
//! - The tracked-body frame model ([`Frame`], [`Body`], [`Session`])
//! - Binary wire encoding for frames ([`codec`])
//! - The session replay state machine ([`replay::ReplaySchedule`])
//!
//! Nothing in here performs I/O; the async crates build on top of it.

pub mod codec;
pub mod error;
pub mod frame;
pub mod hrri;
pub mod replay;

pub use codec::{decode, encode};
pub use error::{Error, ReplayError, Result};
pub use frame::{adapter, Body, BodyType, Frame, Origin, Point, Quaternion, Session, SideType, Vector3};
pub use hrri::Hrri;

/// Wire format version
pub const PROTOCOL_VERSION: u8 = 1;

/// Magic byte for frame identification
pub const MAGIC_BYTE: u8 = 0x4D; // 'M' for Mocap

/// Origin name carried by keep-alive frames between linked rooms
pub const HEARTBEAT_ORIGIN: &str = "*-KEEP_ALIVE";

/// Default heartbeat interval in milliseconds
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5000;

/// Default rendezvous broker port
pub const DEFAULT_BROKER_PORT: u16 = 43720;

/// Default transmit port of a peer link (receive port is this + 1)
pub const DEFAULT_TX_PORT: u16 = 27001;
