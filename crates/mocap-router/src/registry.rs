//! Endpoint registry
//!
//! Two disjoint sets of destinations, local and remote, each iterated in
//! registration order. Every destination owns an unbounded queue drained by
//! its own worker task, so datagrams to one endpoint leave in the order they
//! were enqueued while a slow endpoint never holds up the others.

use bytes::Bytes;
use dashmap::DashMap;
use mocap_core::Hrri;
use mocap_transport::TransportSender;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Which set a registration belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// A consumer in this room
    Local,
    /// A linked remote room
    Remote,
}

/// A registered destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub endpoint: SocketAddr,
    pub hrri: Hrri,
    pub scope: Scope,
    seq: u64,
}

struct Destination {
    registration: Registration,
    queue: mpsc::UnboundedSender<Bytes>,
    worker: CancellationToken,
}

/// Registered local and remote endpoints
pub struct EndpointRegistry {
    local: DashMap<SocketAddr, Destination>,
    remote: DashMap<SocketAddr, Destination>,
    next_seq: AtomicU64,
    cancel: CancellationToken,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self {
            local: DashMap::new(),
            remote: DashMap::new(),
            next_seq: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a local consumer. Idempotent by endpoint: returns `false`
    /// and keeps the existing registration if the endpoint is known.
    pub fn register_local(
        &self,
        endpoint: SocketAddr,
        hrri: Hrri,
        sender: Arc<dyn TransportSender>,
    ) -> bool {
        if self.local.contains_key(&endpoint) {
            debug!("Local endpoint {} already registered", endpoint);
            return false;
        }

        let destination = self.spawn_destination(endpoint, hrri, Scope::Local, sender);
        let mut inserted = false;
        self.local.entry(endpoint).or_insert_with(|| {
            inserted = true;
            destination
        });
        if inserted {
            info!("Registered local endpoint {}", endpoint);
        }
        inserted
    }

    /// Register a remote room, replacing any previous registration of the
    /// same endpoint (e.g. after the link was re-established)
    pub fn register_remote(&self, endpoint: SocketAddr, hrri: Hrri, sender: Arc<dyn TransportSender>) {
        let destination = self.spawn_destination(endpoint, hrri, Scope::Remote, sender);
        if let Some(previous) = self.remote.insert(endpoint, destination) {
            previous.worker.cancel();
            info!("Replaced remote endpoint {}", endpoint);
        } else {
            info!("Registered remote endpoint {}", endpoint);
        }
    }

    /// Remove an endpoint from whichever set holds it
    pub fn deregister(&self, endpoint: &SocketAddr) -> bool {
        let removed = self
            .local
            .remove(endpoint)
            .or_else(|| self.remote.remove(endpoint));

        match removed {
            Some((_, destination)) => {
                destination.worker.cancel();
                info!(
                    "Deregistered {:?} endpoint {}",
                    destination.registration.scope, endpoint
                );
                true
            }
            None => false,
        }
    }

    /// Local registrations in registration order
    pub fn locals(&self) -> Vec<Registration> {
        Self::ordered(&self.local)
    }

    /// Remote registrations in registration order
    pub fn remotes(&self) -> Vec<Registration> {
        Self::ordered(&self.remote)
    }

    pub fn len(&self) -> usize {
        self.local.len() + self.remote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }

    /// Queue a datagram for one destination; `false` if it is not registered
    pub fn enqueue(&self, registration: &Registration, data: Bytes) -> bool {
        let set = match registration.scope {
            Scope::Local => &self.local,
            Scope::Remote => &self.remote,
        };
        match set.get(&registration.endpoint) {
            Some(destination) => destination.queue.send(data).is_ok(),
            None => false,
        }
    }

    /// Stop every destination worker. Registrations are kept; queued
    /// datagrams are discarded.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn ordered(set: &DashMap<SocketAddr, Destination>) -> Vec<Registration> {
        let mut registrations: Vec<Registration> =
            set.iter().map(|entry| entry.registration.clone()).collect();
        registrations.sort_by_key(|r| r.seq);
        registrations
    }

    fn spawn_destination(
        &self,
        endpoint: SocketAddr,
        hrri: Hrri,
        scope: Scope,
        sender: Arc<dyn TransportSender>,
    ) -> Destination {
        let (queue, rx) = mpsc::unbounded_channel();
        let worker = self.cancel.child_token();
        tokio::spawn(drain_queue(endpoint, sender, rx, worker.clone()));

        Destination {
            registration: Registration {
                endpoint,
                hrri,
                scope,
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            },
            queue,
            worker,
        }
    }
}

impl Drop for EndpointRegistry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drain_queue(
    endpoint: SocketAddr,
    sender: Arc<dyn TransportSender>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        let data = tokio::select! {
            _ = cancel.cancelled() => break,
            data = rx.recv() => match data {
                Some(data) => data,
                None => break,
            },
        };

        if let Err(e) = sender.send(data).await {
            warn!("Could not send frame to {}: {}", endpoint, e);
        }
    }
    debug!("Send worker for {} stopped", endpoint);
}
