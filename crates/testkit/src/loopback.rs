//! In-memory transport pair for headless end-to-end tests.
//!
//! One [`LoopbackHost`] can hand out any number of [`LoopbackClient`]s. Every
//! message is delivered in send order on the next `read`; unreliable classes
//! can be thinned out with a deterministic loss pattern.

use deepmine_net::{
    ConnectionStatus, DeliveryClass, Handshake, HostEvent, HostTransport, PeerId, RejectReason,
    Transport, TransportError, TransportEvent,
};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;
use tracing::trace;

/// Loss behaviour for unreliable messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackConfig {
    /// Drop every n-th unreliable message in each direction; `0` keeps all.
    pub unreliable_loss_every: usize,
}

#[derive(Default)]
struct ClientSlot {
    events: VecDeque<TransportEvent>,
    accepted: bool,
}

#[derive(Default)]
struct Hub {
    config: LoopbackConfig,
    host_events: VecDeque<HostEvent>,
    clients: HashMap<PeerId, ClientSlot>,
    next_peer: u64,
    unreliable_sent: usize,
    dropped: usize,
}

impl Hub {
    /// Whether this unreliable message survives the loss pattern.
    fn survives(&mut self, class: DeliveryClass) -> bool {
        if class.is_reliable() || self.config.unreliable_loss_every == 0 {
            return true;
        }
        self.unreliable_sent += 1;
        if self.unreliable_sent % self.config.unreliable_loss_every == 0 {
            self.dropped += 1;
            trace!(?class, "loopback dropping unreliable message");
            return false;
        }
        true
    }
}

/// Host end of the loopback.
#[derive(Clone, Default)]
pub struct LoopbackHost {
    hub: Rc<RefCell<Hub>>,
}

impl LoopbackHost {
    /// Lossless loopback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loopback with the given loss pattern.
    pub fn with_config(config: LoopbackConfig) -> Self {
        let host = Self::default();
        host.hub.borrow_mut().config = config;
        host
    }

    /// A fresh, unconnected client wired to this host.
    pub fn client(&self) -> LoopbackClient {
        LoopbackClient {
            hub: Rc::clone(&self.hub),
            peer: None,
            status: ConnectionStatus::Disconnected,
        }
    }

    /// Peers currently known (pending or accepted).
    pub fn peer_count(&self) -> usize {
        self.hub.borrow().clients.len()
    }

    /// Unreliable messages dropped so far.
    pub fn dropped(&self) -> usize {
        self.hub.borrow().dropped
    }
}

impl HostTransport for LoopbackHost {
    fn read(&mut self) -> Option<HostEvent> {
        self.hub.borrow_mut().host_events.pop_front()
    }

    fn accept(&mut self, peer: PeerId) {
        let mut hub = self.hub.borrow_mut();
        if let Some(slot) = hub.clients.get_mut(&peer) {
            slot.accepted = true;
            slot.events
                .push_back(TransportEvent::StatusChanged(ConnectionStatus::Connected));
        }
    }

    fn reject(&mut self, peer: PeerId, reason: &RejectReason) {
        let mut hub = self.hub.borrow_mut();
        if let Some(slot) = hub.clients.get_mut(&peer) {
            slot.events.push_back(TransportEvent::Rejected(reason.clone()));
            slot.events
                .push_back(TransportEvent::StatusChanged(ConnectionStatus::Disconnected));
            slot.accepted = false;
        }
    }

    fn send(&mut self, peer: PeerId, bytes: Vec<u8>, class: DeliveryClass) {
        let mut hub = self.hub.borrow_mut();
        if !hub.clients.get(&peer).is_some_and(|slot| slot.accepted) {
            return;
        }
        if !hub.survives(class) {
            return;
        }
        if let Some(slot) = hub.clients.get_mut(&peer) {
            slot.events.push_back(TransportEvent::Data(bytes));
        }
    }

    fn disconnect(&mut self, peer: PeerId, _reason: &str) {
        let mut hub = self.hub.borrow_mut();
        if let Some(slot) = hub.clients.get_mut(&peer) {
            if slot.accepted {
                slot.accepted = false;
                slot.events
                    .push_back(TransportEvent::StatusChanged(ConnectionStatus::Disconnected));
            }
        }
    }
}

/// Client end of the loopback.
pub struct LoopbackClient {
    hub: Rc<RefCell<Hub>>,
    peer: Option<PeerId>,
    status: ConnectionStatus,
}

impl LoopbackClient {
    /// Id the host sees for this client, once connecting.
    pub fn peer(&self) -> Option<PeerId> {
        self.peer
    }
}

impl Transport for LoopbackClient {
    fn connect(
        &mut self,
        _endpoint: SocketAddr,
        handshake: &Handshake,
    ) -> Result<(), TransportError> {
        if self.status != ConnectionStatus::Disconnected {
            return Err(TransportError::AlreadyConnected);
        }
        let mut hub = self.hub.borrow_mut();
        hub.next_peer += 1;
        let peer = PeerId(hub.next_peer);
        hub.clients.insert(peer, ClientSlot::default());
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 40_000 + (peer.0 % 20_000) as u16));
        hub.host_events.push_back(HostEvent::ConnectRequest {
            peer,
            addr,
            handshake: handshake.clone(),
        });
        self.peer = Some(peer);
        self.status = ConnectionStatus::Connecting;
        Ok(())
    }

    fn read(&mut self) -> Option<TransportEvent> {
        let peer = self.peer?;
        let event = self
            .hub
            .borrow_mut()
            .clients
            .get_mut(&peer)?
            .events
            .pop_front()?;
        if let TransportEvent::StatusChanged(status) = event {
            self.status = status;
        }
        Some(event)
    }

    fn send(&mut self, bytes: Vec<u8>, class: DeliveryClass) {
        let Some(peer) = self.peer else { return };
        if self.status != ConnectionStatus::Connected {
            return;
        }
        let mut hub = self.hub.borrow_mut();
        if hub.survives(class) {
            hub.host_events.push_back(HostEvent::Data { peer, bytes });
        }
    }

    fn disconnect(&mut self, reason: &str) {
        if let Some(peer) = self.peer.take() {
            let mut hub = self.hub.borrow_mut();
            if hub.clients.remove(&peer).is_some() {
                hub.host_events.push_back(HostEvent::Disconnected {
                    peer,
                    reason: reason.to_string(),
                });
            }
        }
        self.status = ConnectionStatus::Disconnected;
    }

    fn status(&self) -> ConnectionStatus {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepmine_net::ReliableCategory;

    fn endpoint() -> SocketAddr {
        "127.0.0.1:5566".parse().unwrap()
    }

    #[test]
    fn handshake_then_data() {
        let mut host = LoopbackHost::new();
        let mut client = host.client();
        client.connect(endpoint(), &Handshake::new("a")).unwrap();

        let Some(HostEvent::ConnectRequest { peer, handshake, .. }) = host.read() else {
            panic!("expected connect request");
        };
        assert_eq!(handshake.name, "a");
        host.accept(peer);
        assert_eq!(
            client.read(),
            Some(TransportEvent::StatusChanged(ConnectionStatus::Connected))
        );

        client.send(vec![1], DeliveryClass::ReliableOrdered(ReliableCategory::Chat));
        assert_eq!(
            host.read(),
            Some(HostEvent::Data {
                peer,
                bytes: vec![1]
            })
        );
        host.send(peer, vec![2], DeliveryClass::UnreliableLatest);
        assert_eq!(client.read(), Some(TransportEvent::Data(vec![2])));
        assert_eq!(client.read(), None);
    }

    #[test]
    fn reject_surfaces_reason() {
        let mut host = LoopbackHost::new();
        let mut client = host.client();
        client.connect(endpoint(), &Handshake::new("b")).unwrap();
        let Some(HostEvent::ConnectRequest { peer, .. }) = host.read() else {
            panic!("expected connect request");
        };
        host.reject(peer, &RejectReason::Banned);
        assert_eq!(
            client.read(),
            Some(TransportEvent::Rejected(RejectReason::Banned))
        );
        assert_eq!(
            client.read(),
            Some(TransportEvent::StatusChanged(ConnectionStatus::Disconnected))
        );
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn loss_pattern_only_hits_unreliable() {
        let mut host = LoopbackHost::with_config(LoopbackConfig {
            unreliable_loss_every: 2,
        });
        let mut client = host.client();
        client.connect(endpoint(), &Handshake::new("c")).unwrap();
        let Some(HostEvent::ConnectRequest { peer, .. }) = host.read() else {
            panic!("expected connect request");
        };
        host.accept(peer);
        client.read();

        for i in 0..4 {
            host.send(peer, vec![i], DeliveryClass::UnreliableLatest);
            host.send(
                peer,
                vec![10 + i],
                DeliveryClass::ReliableOrdered(ReliableCategory::World),
            );
        }
        let mut received = Vec::new();
        while let Some(TransportEvent::Data(bytes)) = client.read() {
            received.extend(bytes);
        }
        assert_eq!(received, vec![0, 10, 11, 2, 12, 13]);
        assert_eq!(host.dropped(), 2);
    }

    #[test]
    fn client_disconnect_notifies_host_once() {
        let mut host = LoopbackHost::new();
        let mut client = host.client();
        client.connect(endpoint(), &Handshake::new("d")).unwrap();
        host.read();
        client.disconnect("quit");
        client.disconnect("quit");
        assert!(matches!(
            host.read(),
            Some(HostEvent::Disconnected { .. })
        ));
        assert_eq!(host.read(), None);
        assert_eq!(host.peer_count(), 0);
    }
}
