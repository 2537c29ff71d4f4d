//! Mocap Router
//!
//! The distribution half of the hub:
//! - [`HrriRouter`]: origin-based routing to local consumers and linked rooms
//! - [`EndpointRegistry`]: destinations with per-destination ordered send queues
//! - [`PeerLinkMonitor`]: link receive loop, heartbeat and watchdog
//! - [`SessionPlayer`]: real-time replay of recorded sessions
//!
//! Frames move between components through the [`FrameSink`] trait.

pub mod error;
pub mod monitor;
pub mod periodic;
pub mod player;
pub mod registry;
pub mod router;
pub mod sink;

pub use error::{Result, RouterError};
pub use monitor::{HeartbeatState, LinkHealth, MonitorConfig, PeerLinkMonitor};
pub use player::SessionPlayer;
pub use registry::{EndpointRegistry, Registration, Scope};
pub use router::{HrriRouter, RouteOutcome, RoutePlan};
pub use sink::FrameSink;
