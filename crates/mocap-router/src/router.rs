//! HRRI router
//!
//! Decides where a frame goes based on where it came from:
//!
//! - **local origin** (origin location is this room, or `*`): every remote
//!   room, plus every local consumer outside the origin's group, so a
//!   consumer never hears its own frames back
//! - **remote origin**: local consumers only; frames from one remote room
//!   are never re-exported to another
//!
//! Routing never blocks on I/O. The frame is encoded once and one datagram
//! is queued per destination.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mocap_core::{Body, Frame, Hrri};
//! use mocap_router::{EndpointRegistry, HrriRouter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let router = HrriRouter::bind("MUC", "0.0.0.0:0", Arc::new(EndpointRegistry::new())).await?;
//!
//! router.register_local("127.0.0.1:5000".parse()?, Hrri::parse("MUC-VIS-UNITY"));
//! router.route(&Frame::new("kinect", "k1", 0).with_body(Body::named("MUC-KIN-SKEL")));
//! # Ok(())
//! # }
//! ```

use mocap_core::{codec, Frame, Hrri};
use mocap_transport::{TransportSender, UdpTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::error::{Result, RouterError};
use crate::registry::{EndpointRegistry, Registration};
use crate::sink::FrameSink;

/// What happened to a routed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued for this many local and remote destinations
    Routed { local: usize, remote: usize },
    /// Valid origin, but nobody to send to
    NoDestinations,
    /// Not routed at all
    Dropped(String),
}

/// Destination set for one origin
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutePlan {
    pub local: Vec<Registration>,
    pub remote: Vec<Registration>,
}

impl RoutePlan {
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }

    /// All destinations, remote rooms first
    pub fn destinations(&self) -> impl Iterator<Item = &Registration> {
        self.remote.iter().chain(self.local.iter())
    }
}

/// Routes frames between local consumers and linked rooms
pub struct HrriRouter {
    location: String,
    registry: Arc<EndpointRegistry>,
    local_socket: UdpTransport,
}

impl HrriRouter {
    /// `location` is this room's location token; `local_socket` sends to
    /// local consumers
    pub fn new(location: &str, registry: Arc<EndpointRegistry>, local_socket: UdpTransport) -> Self {
        Self {
            location: location.to_string(),
            registry,
            local_socket,
        }
    }

    /// Bind the local send socket and create the router
    pub async fn bind(location: &str, local_bind: &str, registry: Arc<EndpointRegistry>) -> Result<Self> {
        if location.is_empty() || location.contains('-') || location == "*" {
            return Err(RouterError::Config(format!(
                "invalid location token {:?}",
                location
            )));
        }
        let socket = UdpTransport::bind(local_bind).await?;
        Ok(Self::new(location, registry, socket))
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Register a local consumer reached through the local socket
    pub fn register_local(&self, endpoint: SocketAddr, hrri: Hrri) -> bool {
        let sender = Arc::new(self.local_socket.sender_to(endpoint));
        self.registry.register_local(endpoint, hrri, sender)
    }

    /// Register a remote room reached through `sender` (the link's tx socket)
    pub fn register_remote(&self, endpoint: SocketAddr, hrri: Hrri, sender: Arc<dyn TransportSender>) {
        self.registry.register_remote(endpoint, hrri, sender)
    }

    pub fn deregister(&self, endpoint: &SocketAddr) -> bool {
        self.registry.deregister(endpoint)
    }

    pub fn local_endpoints(&self) -> Vec<Registration> {
        self.registry.locals()
    }

    pub fn remote_endpoints(&self) -> Vec<Registration> {
        self.registry.remotes()
    }

    /// Whether an origin belongs to this room
    pub fn is_local_origin(&self, origin: &Hrri) -> bool {
        origin.is_local_to(&self.location)
    }

    /// Destinations for a frame with the given origin
    pub fn plan(&self, origin: &Hrri) -> RoutePlan {
        if self.is_local_origin(origin) {
            RoutePlan {
                remote: self.registry.remotes(),
                local: self
                    .registry
                    .locals()
                    .into_iter()
                    .filter(|r| r.hrri.group() != origin.group())
                    .collect(),
            }
        } else {
            RoutePlan {
                local: self.registry.locals(),
                remote: Vec::new(),
            }
        }
    }

    /// Queue a frame for every destination its origin allows
    pub fn route(&self, frame: &Frame) -> RouteOutcome {
        let origin = match frame.origin() {
            Ok(origin) => origin,
            Err(e) => {
                warn!("Dropping frame {} from {}: {}", frame.elapsed_millis, frame.source_id, e);
                return RouteOutcome::Dropped(e.to_string());
            }
        };

        let plan = self.plan(&origin.hrri);
        if plan.is_empty() {
            trace!("No destinations for origin {}", origin.name);
            return RouteOutcome::NoDestinations;
        }

        let data = match codec::encode(frame) {
            Ok(data) => data,
            Err(e) => {
                warn!("Dropping frame {} from {}: {}", frame.elapsed_millis, origin.name, e);
                return RouteOutcome::Dropped(e.to_string());
            }
        };

        for destination in plan.destinations() {
            if !self.registry.enqueue(destination, data.clone()) {
                debug!("{} deregistered while routing", destination.endpoint);
            }
        }

        RouteOutcome::Routed {
            local: plan.local.len(),
            remote: plan.remote.len(),
        }
    }

    /// Stop all send workers
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

impl FrameSink for HrriRouter {
    fn deliver(&self, frame: Frame) {
        self.route(&frame);
    }
}
