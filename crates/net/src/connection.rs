//! [`Transport`] and [`HostTransport`] over QUIC.
//!
//! Each reliable category owns one long-lived unidirectional stream (a
//! category header byte, then length-prefixed frames), so ordering holds
//! within a category and categories never block each other. Unreliable
//! classes travel as datagrams `[class][u16 sequence][payload]`.
//!
//! Socket work runs on tokio tasks; the simulation loop only ever touches
//! the unbounded queues, drained with `try_recv`.

use crate::channel::{
    DeliveryClass, Direction, LatestStream, LatestWinsStreams, ReliableCategory, SequenceCounter,
    StreamSequences,
};
use crate::codec::{decode_handshake, encode_handshake};
use crate::endpoint::{read_frame, write_frame, ClientEndpoint, ServerEndpoint};
use crate::protocol::{Handshake, RejectReason, PROTOCOL_VERSION};
use crate::transport::{
    ConnectionStatus, HostEvent, HostTransport, PeerId, Transport, TransportError, TransportEvent,
};
use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use quinn::{Connection, ConnectionError, RecvStream, SendStream, VarInt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, trace, warn};

/// Grace period for the host's close frame after the control stream ends.
const REJECTION_GRACE: Duration = Duration::from_secs(2);

/// Close code for an orderly disconnect.
const CLOSE_NORMAL: u32 = 0;

/// Datagram header: class tag then `u16` sequence.
const DATAGRAM_HEADER_LEN: usize = 3;

enum Outbound {
    Send(Vec<u8>, DeliveryClass),
    Close(String),
}

/// Sending half of one connection.
struct Outbox {
    connection: Connection,
    direction: Direction,
    streams: HashMap<ReliableCategory, SendStream>,
    latest: StreamSequences,
    positional: SequenceCounter,
}

impl Outbox {
    fn new(connection: Connection, direction: Direction) -> Self {
        Self {
            connection,
            direction,
            streams: HashMap::new(),
            latest: StreamSequences::default(),
            positional: SequenceCounter::default(),
        }
    }

    async fn send(&mut self, bytes: &[u8], class: DeliveryClass) -> Result<()> {
        match class {
            DeliveryClass::ReliableOrdered(category) => {
                if !self.streams.contains_key(&category) {
                    let mut stream = self
                        .connection
                        .open_uni()
                        .await
                        .context("Failed to open category stream")?;
                    stream
                        .write_all(&[category as u8])
                        .await
                        .context("Failed to write category header")?;
                    self.streams.insert(category, stream);
                }
                let stream = self
                    .streams
                    .get_mut(&category)
                    .context("category stream missing")?;
                write_frame(stream, bytes).await
            }
            DeliveryClass::UnreliableLatest => {
                let stream = LatestStream::of(self.direction, bytes)?;
                let seq = self.latest.next(stream);
                self.send_datagram(class, seq, bytes)
            }
            DeliveryClass::UnreliablePositional => {
                let seq = self.positional.next();
                self.send_datagram(class, seq, bytes)
            }
        }
    }

    fn send_datagram(&mut self, class: DeliveryClass, seq: u16, bytes: &[u8]) -> Result<()> {
        let tag = class
            .datagram_tag()
            .context("reliable class sent as datagram")?;
        let mut datagram = Vec::with_capacity(DATAGRAM_HEADER_LEN + bytes.len());
        datagram.write_u8(tag)?;
        datagram.write_u16::<LittleEndian>(seq)?;
        datagram.extend_from_slice(bytes);
        if let Err(err) = self.connection.send_datagram(datagram.into()) {
            // Unreliable by contract; a refused datagram is just a lost one.
            debug!("dropping datagram: {err}");
        }
        Ok(())
    }
}

/// Spawn tasks that feed every incoming message to `deliver`.
///
/// `incoming` names the direction of the messages this side receives.
/// `deliver` returns `false` once nobody is listening any more.
fn spawn_readers<F>(connection: Connection, incoming: Direction, deliver: F)
where
    F: Fn(Vec<u8>) -> bool + Clone + Send + Sync + 'static,
{
    let streams = connection.clone();
    let on_stream = deliver.clone();
    tokio::spawn(async move {
        loop {
            let mut recv = match streams.accept_uni().await {
                Ok(recv) => recv,
                Err(err) => {
                    trace!("stream acceptor stopping: {err}");
                    break;
                }
            };
            let deliver = on_stream.clone();
            tokio::spawn(async move {
                if let Err(err) = read_category_stream(&mut recv, deliver).await {
                    debug!("category stream ended: {err:#}");
                }
            });
        }
    });

    tokio::spawn(async move {
        let mut latest = LatestWinsStreams::new();
        loop {
            let datagram = match connection.read_datagram().await {
                Ok(datagram) => datagram,
                Err(err) => {
                    trace!("datagram reader stopping: {err}");
                    break;
                }
            };
            let mut header = &datagram[..];
            let (Ok(tag), Ok(seq)) = (header.read_u8(), header.read_u16::<LittleEndian>()) else {
                debug!(len = datagram.len(), "runt datagram");
                continue;
            };
            let Some(class) = DeliveryClass::from_datagram_tag(tag) else {
                debug!(tag, "unknown datagram class");
                continue;
            };
            let payload = &datagram[DATAGRAM_HEADER_LEN..];
            if class == DeliveryClass::UnreliableLatest {
                match LatestStream::of(incoming, payload) {
                    Ok(stream) if latest.accept(stream, seq) => {}
                    Ok(_) => continue,
                    Err(err) => {
                        debug!("undecodable latest-wins datagram: {err}");
                        continue;
                    }
                }
            }
            if !deliver(payload.to_vec()) {
                break;
            }
        }
    });
}

async fn read_category_stream<F>(recv: &mut RecvStream, deliver: F) -> Result<()>
where
    F: Fn(Vec<u8>) -> bool,
{
    let mut header = [0u8; 1];
    recv.read_exact(&mut header)
        .await
        .context("Failed to read category header")?;
    let category = ReliableCategory::from_u8(header[0])
        .with_context(|| format!("unknown category {}", header[0]))?;
    trace!(?category, "category stream opened");
    while let Some(frame) = read_frame(recv).await? {
        if !deliver(frame) {
            break;
        }
    }
    Ok(())
}

/// Map an application close to a rejection, if it carries one.
fn rejection_from_close(code: u64, text: &str) -> Option<RejectReason> {
    match code {
        1 => Some(RejectReason::from_wire(text)),
        2 => Some(RejectReason::Banned),
        3 => Some(RejectReason::Other(text.to_string())),
        _ => None,
    }
}

fn close_rejected(connection: &Connection, reason: &RejectReason) {
    connection.close(
        VarInt::from_u32(reason.close_code()),
        reason.to_wire().as_bytes(),
    );
}

/// Client-side QUIC transport.
#[derive(Default)]
pub struct QuicClientTransport {
    status: ConnectionStatus,
    events: Option<UnboundedReceiver<TransportEvent>>,
    outbound: Option<UnboundedSender<Outbound>>,
}

impl QuicClientTransport {
    /// Idle transport; [`Transport::connect`] must be called from within a
    /// tokio runtime.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for QuicClientTransport {
    fn connect(
        &mut self,
        endpoint: SocketAddr,
        handshake: &Handshake,
    ) -> Result<(), TransportError> {
        if self.status != ConnectionStatus::Disconnected {
            return Err(TransportError::AlreadyConnected);
        }
        let runtime = Handle::try_current().context("QUIC transport needs a tokio runtime")?;
        let handshake = encode_handshake(handshake)?;

        let (events_tx, events_rx) = unbounded_channel();
        let (outbound_tx, outbound_rx) = unbounded_channel();
        runtime.spawn(run_client(endpoint, handshake, events_tx, outbound_rx));

        self.events = Some(events_rx);
        self.outbound = Some(outbound_tx);
        self.status = ConnectionStatus::Connecting;
        Ok(())
    }

    fn read(&mut self) -> Option<TransportEvent> {
        let event = self.events.as_mut()?.try_recv().ok()?;
        if let TransportEvent::StatusChanged(status) = event {
            self.status = status;
        }
        Some(event)
    }

    fn send(&mut self, bytes: Vec<u8>, class: DeliveryClass) {
        if let Some(outbound) = &self.outbound {
            if outbound.send(Outbound::Send(bytes, class)).is_err() {
                trace!("send after connection task ended");
            }
        }
    }

    fn disconnect(&mut self, reason: &str) {
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Outbound::Close(reason.to_string()));
        }
        self.events = None;
        self.status = ConnectionStatus::Disconnected;
    }

    fn status(&self) -> ConnectionStatus {
        self.status
    }
}

async fn run_client(
    endpoint: SocketAddr,
    handshake: Vec<u8>,
    events: UnboundedSender<TransportEvent>,
    mut outbound: UnboundedReceiver<Outbound>,
) {
    if let Err(err) = client_session(endpoint, handshake, &events, &mut outbound).await {
        warn!("QUIC session with {endpoint} ended: {err:#}");
    }
    let _ = events.send(TransportEvent::StatusChanged(ConnectionStatus::Disconnected));
}

async fn client_session(
    endpoint: SocketAddr,
    handshake: Vec<u8>,
    events: &UnboundedSender<TransportEvent>,
    outbound: &mut UnboundedReceiver<Outbound>,
) -> Result<()> {
    let client = ClientEndpoint::new()?;
    let connection = client.connect(endpoint).await?;

    let (mut control_send, mut control_recv) = connection
        .open_bi()
        .await
        .context("Failed to open control stream")?;
    write_frame(&mut control_send, &handshake).await?;

    let accepted = read_frame(&mut control_recv).await.ok().flatten();
    if accepted.is_none() {
        let closed = tokio::time::timeout(REJECTION_GRACE, connection.closed()).await;
        if let Ok(ConnectionError::ApplicationClosed(close)) = closed {
            let text = String::from_utf8_lossy(&close.reason);
            if let Some(reason) = rejection_from_close(close.error_code.into_inner(), &text) {
                info!(%reason, "host rejected handshake");
                let _ = events.send(TransportEvent::Rejected(reason));
                return Ok(());
            }
        }
        bail!("host closed the control stream without answering");
    }

    info!(%endpoint, "handshake accepted");
    let _ = events.send(TransportEvent::StatusChanged(ConnectionStatus::Connected));

    let data_events = events.clone();
    spawn_readers(connection.clone(), Direction::HostToClient, move |bytes| {
        data_events.send(TransportEvent::Data(bytes)).is_ok()
    });

    let mut outbox = Outbox::new(connection.clone(), Direction::ClientToHost);
    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Send(bytes, class)) => {
                    if let Err(err) = outbox.send(&bytes, class).await {
                        debug!("send failed: {err:#}");
                    }
                }
                Some(Outbound::Close(reason)) => {
                    connection.close(VarInt::from_u32(CLOSE_NORMAL), reason.as_bytes());
                    break;
                }
                None => {
                    connection.close(VarInt::from_u32(CLOSE_NORMAL), b"client dropped");
                    break;
                }
            },
            err = connection.closed() => {
                info!("connection closed: {err}");
                break;
            }
        }
    }
    client.wait_idle().await;
    Ok(())
}

enum PeerCommand {
    Accept,
    Reject(RejectReason),
    Send(Vec<u8>, DeliveryClass),
    Close(String),
}

type HostQueueItem = (HostEvent, Option<UnboundedSender<PeerCommand>>);

/// Host-side QUIC transport.
pub struct QuicHostTransport {
    endpoint: ServerEndpoint,
    events: UnboundedReceiver<HostQueueItem>,
    peers: HashMap<PeerId, UnboundedSender<PeerCommand>>,
}

impl QuicHostTransport {
    /// Bind to `addr` and start accepting. Must be called from within a
    /// tokio runtime.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let runtime = Handle::try_current().context("QUIC transport needs a tokio runtime")?;
        let endpoint = ServerEndpoint::bind(addr)?;
        let (events_tx, events_rx) = unbounded_channel();
        runtime.spawn(accept_loop(endpoint.clone(), events_tx));
        Ok(Self {
            endpoint,
            events: events_rx,
            peers: HashMap::new(),
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    fn command(&self, peer: PeerId, command: PeerCommand) {
        match self.peers.get(&peer) {
            Some(commands) => {
                let _ = commands.send(command);
            }
            None => trace!(%peer, "command for unknown peer"),
        }
    }
}

impl Drop for QuicHostTransport {
    fn drop(&mut self) {
        self.endpoint.close();
    }
}

impl HostTransport for QuicHostTransport {
    fn read(&mut self) -> Option<HostEvent> {
        let (event, commands) = self.events.try_recv().ok()?;
        match (&event, commands) {
            (HostEvent::ConnectRequest { peer, .. }, Some(commands)) => {
                self.peers.insert(*peer, commands);
            }
            (HostEvent::Disconnected { peer, .. }, _) => {
                self.peers.remove(peer);
            }
            _ => {}
        }
        Some(event)
    }

    fn accept(&mut self, peer: PeerId) {
        self.command(peer, PeerCommand::Accept);
    }

    fn reject(&mut self, peer: PeerId, reason: &RejectReason) {
        self.command(peer, PeerCommand::Reject(reason.clone()));
        self.peers.remove(&peer);
    }

    fn send(&mut self, peer: PeerId, bytes: Vec<u8>, class: DeliveryClass) {
        self.command(peer, PeerCommand::Send(bytes, class));
    }

    fn disconnect(&mut self, peer: PeerId, reason: &str) {
        self.command(peer, PeerCommand::Close(reason.to_string()));
        self.peers.remove(&peer);
    }
}

async fn accept_loop(endpoint: ServerEndpoint, events: UnboundedSender<HostQueueItem>) {
    let mut next_id = 1u64;
    while let Some(incoming) = endpoint.accept().await {
        let peer = PeerId(next_id);
        next_id += 1;
        let events = events.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_peer(peer, incoming, events).await {
                debug!(%peer, "connection attempt failed: {err:#}");
            }
        });
    }
    debug!("accept loop finished");
}

async fn serve_peer(
    peer: PeerId,
    incoming: quinn::Incoming,
    events: UnboundedSender<HostQueueItem>,
) -> Result<()> {
    let connection = ServerEndpoint::establish(incoming).await?;
    let addr = connection.remote_address();
    let (control_send, mut control_recv) = connection
        .accept_bi()
        .await
        .context("Failed to accept control stream")?;
    let frame = read_frame(&mut control_recv)
        .await?
        .context("control stream finished before the handshake")?;
    let handshake = match decode_handshake(&frame) {
        Ok(handshake) => handshake,
        Err(err) => {
            warn!(%addr, "malformed handshake: {err}");
            close_rejected(
                &connection,
                &RejectReason::Other(format!("malformed handshake: {err}")),
            );
            return Ok(());
        }
    };

    let (commands_tx, commands) = unbounded_channel();
    let request = HostEvent::ConnectRequest {
        peer,
        addr,
        handshake,
    };
    if events.send((request, Some(commands_tx))).is_err() {
        return Ok(());
    }
    let reason = drive_peer(peer, connection, control_send, commands, events.clone()).await;
    let _ = events.send((HostEvent::Disconnected { peer, reason }, None));
    Ok(())
}

/// Run one announced peer until it goes away. Returns the reason.
async fn drive_peer(
    peer: PeerId,
    connection: Connection,
    mut control_send: SendStream,
    mut commands: UnboundedReceiver<PeerCommand>,
    events: UnboundedSender<HostQueueItem>,
) -> String {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(PeerCommand::Accept) => break,
                Some(PeerCommand::Reject(reason)) => {
                    close_rejected(&connection, &reason);
                    return reason.to_string();
                }
                Some(PeerCommand::Close(reason)) => {
                    connection.close(VarInt::from_u32(CLOSE_NORMAL), reason.as_bytes());
                    return reason;
                }
                Some(PeerCommand::Send(..)) => trace!(%peer, "dropping send before accept"),
                None => {
                    connection.close(VarInt::from_u32(CLOSE_NORMAL), b"host shutting down");
                    return "host shutting down".to_string();
                }
            },
            err = connection.closed() => return err.to_string(),
        }
    }

    if let Err(err) = write_frame(&mut control_send, PROTOCOL_VERSION.as_bytes()).await {
        return format!("{err:#}");
    }

    spawn_readers(connection.clone(), Direction::ClientToHost, move |bytes| {
        events.send((HostEvent::Data { peer, bytes }, None)).is_ok()
    });

    let mut outbox = Outbox::new(connection.clone(), Direction::HostToClient);
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(PeerCommand::Send(bytes, class)) => {
                    if let Err(err) = outbox.send(&bytes, class).await {
                        debug!(%peer, "send failed: {err:#}");
                    }
                }
                Some(PeerCommand::Close(reason)) => {
                    connection.close(VarInt::from_u32(CLOSE_NORMAL), reason.as_bytes());
                    return reason;
                }
                Some(PeerCommand::Reject(reason)) => {
                    close_rejected(&connection, &reason);
                    return reason.to_string();
                }
                Some(PeerCommand::Accept) => {}
                None => {
                    connection.close(VarInt::from_u32(CLOSE_NORMAL), b"host shutting down");
                    return "host shutting down".to_string();
                }
            },
            err = connection.closed() => return err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ReliableCategory;
    use std::time::Duration;

    async fn poll<T>(mut next: impl FnMut() -> Option<T>) -> T {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(value) = next() {
                    return value;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for transport event")
    }

    #[test]
    fn close_codes_map_to_reasons() {
        assert_eq!(
            rejection_from_close(1, "VER;v1.6"),
            Some(RejectReason::VersionMismatch {
                server_version: "v1.6".into()
            })
        );
        assert_eq!(rejection_from_close(2, "BAN"), Some(RejectReason::Banned));
        assert_eq!(
            rejection_from_close(3, "server full"),
            Some(RejectReason::Other("server full".into()))
        );
        assert_eq!(rejection_from_close(0, "bye"), None);
    }

    #[tokio::test]
    async fn accepted_session_carries_both_classes() {
        let mut host = QuicHostTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = host.local_addr();

        let mut client = QuicClientTransport::new();
        client
            .connect(addr, &Handshake::new("miner"))
            .unwrap();
        assert_eq!(client.status(), ConnectionStatus::Connecting);
        assert!(matches!(
            client.connect(addr, &Handshake::new("miner")),
            Err(TransportError::AlreadyConnected)
        ));

        let (peer, handshake) = poll(|| match host.read() {
            Some(HostEvent::ConnectRequest {
                peer, handshake, ..
            }) => Some((peer, handshake)),
            _ => None,
        })
        .await;
        assert_eq!(handshake.name, "miner");
        host.accept(peer);

        poll(|| match client.read() {
            Some(TransportEvent::StatusChanged(ConnectionStatus::Connected)) => Some(()),
            _ => None,
        })
        .await;
        assert_eq!(client.status(), ConnectionStatus::Connected);

        client.send(
            b"hello".to_vec(),
            DeliveryClass::ReliableOrdered(ReliableCategory::Chat),
        );
        let bytes = poll(|| match host.read() {
            Some(HostEvent::Data { bytes, .. }) => Some(bytes),
            _ => None,
        })
        .await;
        assert_eq!(bytes, b"hello");

        for i in 0..3u8 {
            host.send(
                peer,
                vec![i],
                DeliveryClass::ReliableOrdered(ReliableCategory::World),
            );
        }
        host.send(peer, vec![9], DeliveryClass::UnreliableLatest);
        let mut world = Vec::new();
        let mut datagram = None;
        poll(|| {
            match client.read() {
                Some(TransportEvent::Data(bytes)) if bytes == [9] => datagram = Some(bytes),
                Some(TransportEvent::Data(bytes)) => world.extend(bytes),
                _ => {}
            }
            (world.len() == 3 && datagram.is_some()).then_some(())
        })
        .await;
        assert_eq!(world, vec![0, 1, 2]);

        client.disconnect("bye");
        client.disconnect("bye");
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        let (gone, _) = poll(|| match host.read() {
            Some(HostEvent::Disconnected { peer, reason }) => Some((peer, reason)),
            _ => None,
        })
        .await;
        assert_eq!(gone, peer);
    }

    #[tokio::test]
    async fn rejection_reaches_client() {
        let mut host = QuicHostTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = host.local_addr();

        let mut client = QuicClientTransport::new();
        client.connect(addr, &Handshake::new("griefer")).unwrap();

        let peer = poll(|| match host.read() {
            Some(HostEvent::ConnectRequest { peer, .. }) => Some(peer),
            _ => None,
        })
        .await;
        host.reject(peer, &RejectReason::Banned);

        let reason = poll(|| match client.read() {
            Some(TransportEvent::Rejected(reason)) => Some(reason),
            _ => None,
        })
        .await;
        assert_eq!(reason, RejectReason::Banned);
        poll(|| match client.read() {
            Some(TransportEvent::StatusChanged(ConnectionStatus::Disconnected)) => Some(()),
            _ => None,
        })
        .await;
    }
}
