//! Tracked-body frame model
//!
//! A [`Frame`] is one sample produced by an input adapter (after merging into
//! the shared coordinate space). Routing only ever looks at the adapter type
//! and body names; everything else is carried opaquely.

use serde::{Deserialize, Serialize};

use crate::{Error, Hrri, Result, HEARTBEAT_ORIGIN};

/// Adapter type identifiers
pub mod adapter {
    pub const OPTITRACK: &str = "optitrack";
    pub const LEAPMOTION: &str = "leapmotion";
    pub const KINECT: &str = "kinect";
    pub const HOLOROOM: &str = "holoroom";
    pub const PEER: &str = "peer";

    /// Hardware adapters whose frames carry no HRRI; the adapter type stands
    /// in for the origin
    pub const FIXED_ORIGIN: &[&str] = &[OPTITRACK, LEAPMOTION];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    Marker,
    MarkerSet,
    #[default]
    RigidBody,
    Skeleton,
    Hand,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideType {
    #[default]
    NoSide,
    Left,
    Right,
}

/// A named point in global coordinates (millimeters)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(default)]
    pub name: String,
    /// Tracking state reported by the adapter (tracked, inferred, ...)
    #[serde(default)]
    pub state: String,
    pub position: Vector3,
}

/// A tracked object made of points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(default)]
    pub body_type: BodyType,
    #[serde(default)]
    pub side: SideType,
    #[serde(default)]
    pub centroid: Vector3,
    #[serde(default)]
    pub rotation: Quaternion,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub points: Vec<Point>,
}

impl Body {
    /// An empty rigid body carrying only a name
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// One frame of tracking data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Type of the adapter that produced the frame
    pub adapter_type: String,
    /// Name of the adapter instance
    #[serde(default)]
    pub source_id: String,
    /// Milliseconds since pipeline start
    pub elapsed_millis: u64,
    /// Recognized gesture, empty if none
    #[serde(default)]
    pub gesture: String,
    /// Processing latency in milliseconds
    #[serde(default)]
    pub latency: f32,
    #[serde(default)]
    pub bodies: Vec<Body>,
}

/// Where a frame claims to come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Raw origin string as found in the frame
    pub name: String,
    /// Lenient parse of `name`
    pub hrri: Hrri,
}

impl Frame {
    pub fn new(adapter_type: &str, source_id: &str, elapsed_millis: u64) -> Self {
        Self {
            adapter_type: adapter_type.to_string(),
            source_id: source_id.to_string(),
            elapsed_millis,
            ..Default::default()
        }
    }

    /// Add a body
    pub fn with_body(mut self, body: Body) -> Self {
        self.bodies.push(body);
        self
    }

    /// The keep-alive frame exchanged between linked rooms
    pub fn heartbeat() -> Self {
        Frame::new(adapter::PEER, adapter::PEER, 0).with_body(Body::named(HEARTBEAT_ORIGIN))
    }

    /// True for keep-alive frames
    pub fn is_heartbeat(&self) -> bool {
        self.adapter_type == adapter::PEER
            && self
                .bodies
                .first()
                .is_some_and(|b| b.name == HEARTBEAT_ORIGIN)
    }

    /// Derive the routing origin.
    ///
    /// Peer frames use their first body's name, fixed-origin hardware uses
    /// the adapter type, anything else uses the first body named with a
    /// well-formed HRRI.
    pub fn origin(&self) -> Result<Origin> {
        let name = if self.adapter_type == adapter::PEER {
            self.bodies
                .first()
                .map(|b| b.name.clone())
                .ok_or_else(|| Error::Unaddressable("peer frame without bodies".to_string()))?
        } else if adapter::FIXED_ORIGIN.contains(&self.adapter_type.as_str()) {
            self.adapter_type.clone()
        } else {
            self.bodies
                .iter()
                .find(|b| Hrri::is_well_formed(&b.name))
                .map(|b| b.name.clone())
                .ok_or_else(|| {
                    Error::Unaddressable(format!(
                        "no body with a valid origin among {} bodies (first: {:?})",
                        self.bodies.len(),
                        self.bodies.first().map(|b| b.name.as_str())
                    ))
                })?
        };

        Ok(Origin {
            hrri: Hrri::parse(&name),
            name,
        })
    }
}

/// A recorded sequence of frames
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    #[serde(default)]
    pub frames: Vec<Frame>,
}

impl Session {
    pub fn new(name: &str, frames: Vec<Frame>) -> Self {
        Self {
            name: name.to_string(),
            frames,
        }
    }

    /// Parse a session from its JSON representation
    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_origin_is_first_body() {
        let frame = Frame::new(adapter::PEER, "peer", 0)
            .with_body(Body::named("ESS-TRACK-A"))
            .with_body(Body::named("MUC-TRACK-B"));
        assert_eq!(frame.origin().unwrap().name, "ESS-TRACK-A");
    }

    #[test]
    fn test_fixed_origin_adapters() {
        let frame = Frame::new(adapter::OPTITRACK, "ot", 0).with_body(Body::named("MUC-A-B"));
        assert_eq!(frame.origin().unwrap().name, "optitrack");

        let frame = Frame::new(adapter::LEAPMOTION, "leap", 0);
        assert_eq!(frame.origin().unwrap().name, "leapmotion");
    }

    #[test]
    fn test_first_well_formed_body() {
        let frame = Frame::new(adapter::KINECT, "k", 0)
            .with_body(Body::named("skeleton 1"))
            .with_body(Body::named("MUC-KIN-SKEL"));
        let origin = frame.origin().unwrap();
        assert_eq!(origin.hrri.group(), "KIN");
    }

    #[test]
    fn test_unaddressable() {
        let frame = Frame::new(adapter::KINECT, "k", 0).with_body(Body::named("skeleton"));
        assert!(matches!(frame.origin(), Err(Error::Unaddressable(_))));

        let frame = Frame::new(adapter::PEER, "peer", 0);
        assert!(matches!(frame.origin(), Err(Error::Unaddressable(_))));
    }

    #[test]
    fn test_heartbeat() {
        let frame = Frame::heartbeat();
        assert!(frame.is_heartbeat());
        let origin = frame.origin().unwrap();
        assert!(origin.hrri.is_wildcard());
        assert!(!Frame::new(adapter::PEER, "peer", 0).is_heartbeat());
    }

    #[test]
    fn test_session_from_json() {
        let json = r#"{
            "name": "take-1",
            "frames": [
                { "adapter_type": "kinect", "elapsed_millis": 10,
                  "bodies": [ { "name": "MUC-KIN-A", "body_type": "skeleton" } ] }
            ]
        }"#;
        let session = Session::from_json(json).unwrap();
        assert_eq!(session.frames.len(), 1);
        assert_eq!(session.frames[0].bodies[0].body_type, BodyType::Skeleton);
        assert!(Session::from_json("{").is_err());
    }
}
