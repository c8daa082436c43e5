//! Transport boundary used by the synchronization core.
//!
//! The core never touches sockets directly. A transport offers a connection
//! abstraction with optional reliability/ordering per logical lane, and a
//! non-blocking read that returns `None` when nothing is queued.

use crate::channel::DeliveryClass;
use crate::protocol::{Handshake, RejectReason};
use std::net::SocketAddr;
use thiserror::Error;

/// Connection state reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No connection.
    #[default]
    Disconnected,
    /// Connection attempt in flight.
    Connecting,
    /// Handshake accepted; data may flow.
    Connected,
}

/// Event surfaced by a client-side transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection status changed.
    StatusChanged(ConnectionStatus),
    /// Host refused the handshake. A `StatusChanged(Disconnected)` may follow.
    Rejected(RejectReason),
    /// One complete application message.
    Data(Vec<u8>),
}

/// Failure to start an operation on a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A connection is already active or in flight.
    #[error("transport is already connected or connecting")]
    AlreadyConnected,
    /// Handshake payload could not be encoded.
    #[error("failed to encode handshake: {0}")]
    Handshake(#[from] crate::codec::EncodeError),
    /// Lower-level I/O or setup failure.
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Client side of the transport boundary.
pub trait Transport {
    /// Begin connecting to `endpoint` with the given handshake payload.
    fn connect(&mut self, endpoint: SocketAddr, handshake: &Handshake)
        -> Result<(), TransportError>;

    /// Next queued event, or `None` immediately if there is none.
    fn read(&mut self) -> Option<TransportEvent>;

    /// Queue `bytes` for delivery. Fire-and-forget.
    fn send(&mut self, bytes: Vec<u8>, class: DeliveryClass);

    /// Close the connection. Calling this more than once is harmless.
    fn disconnect(&mut self, reason: &str);

    /// Current connection status.
    fn status(&self) -> ConnectionStatus;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(
        &mut self,
        endpoint: SocketAddr,
        handshake: &Handshake,
    ) -> Result<(), TransportError> {
        (**self).connect(endpoint, handshake)
    }

    fn read(&mut self) -> Option<TransportEvent> {
        (**self).read()
    }

    fn send(&mut self, bytes: Vec<u8>, class: DeliveryClass) {
        (**self).send(bytes, class)
    }

    fn disconnect(&mut self, reason: &str) {
        (**self).disconnect(reason)
    }

    fn status(&self) -> ConnectionStatus {
        (**self).status()
    }
}

/// Host-assigned connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Event surfaced by a host-side transport.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A client wants in; answer with `accept` or `reject`.
    ConnectRequest {
        /// Connection id.
        peer: PeerId,
        /// Remote address.
        addr: SocketAddr,
        /// Decoded handshake.
        handshake: Handshake,
    },
    /// One complete application message from an accepted peer.
    Data {
        /// Sender.
        peer: PeerId,
        /// Message bytes.
        bytes: Vec<u8>,
    },
    /// Peer went away.
    Disconnected {
        /// Departed peer.
        peer: PeerId,
        /// Reason, if known.
        reason: String,
    },
}

/// Host side of the transport boundary.
pub trait HostTransport {
    /// Next queued event, or `None` immediately.
    fn read(&mut self) -> Option<HostEvent>;

    /// Admit a pending peer.
    fn accept(&mut self, peer: PeerId);

    /// Refuse a pending peer.
    fn reject(&mut self, peer: PeerId, reason: &RejectReason);

    /// Queue `bytes` for one peer. Unknown peers are ignored.
    fn send(&mut self, peer: PeerId, bytes: Vec<u8>, class: DeliveryClass);

    /// Drop a peer. Unknown or already-dropped peers are ignored.
    fn disconnect(&mut self, peer: PeerId, reason: &str);
}
