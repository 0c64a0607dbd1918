//! The seam between the dispatcher and a concrete connection

use crate::protocol::Envelope;
use std::net::SocketAddr;
use std::sync::Arc;

/// What the dispatcher and ticker need from a server or client connection.
pub trait Transport: Send + Sync {
    /// Queues an envelope for delivery. Never blocks the caller; failures
    /// are logged and the envelope is dropped.
    fn send(&self, envelope: Envelope);

    /// Drops whatever the connection keeps for a peer the prober declared
    /// gone.
    fn evict(&self, peer_addr: SocketAddr);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, envelope: Envelope) {
        (**self).send(envelope)
    }

    fn evict(&self, peer_addr: SocketAddr) {
        (**self).evict(peer_addr)
    }
}
