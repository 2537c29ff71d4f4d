//! Frame delivery seam
//!
//! Producers (the replay player, the link monitor, adapters) hand frames to
//! a [`FrameSink`] without knowing who consumes them.

use mocap_core::Frame;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Consumes frames without blocking
pub trait FrameSink: Send + Sync {
    fn deliver(&self, frame: Frame);
}

impl<T: FrameSink + ?Sized> FrameSink for Arc<T> {
    fn deliver(&self, frame: Frame) {
        (**self).deliver(frame)
    }
}

impl FrameSink for mpsc::UnboundedSender<Frame> {
    fn deliver(&self, frame: Frame) {
        if self.send(frame).is_err() {
            debug!("Frame dropped: channel closed");
        }
    }
}
