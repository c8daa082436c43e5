//! Delivery classes and per-kind channel policy.
//!
//! Every message kind maps to exactly one [`DeliveryClass`]. Reliable kinds
//! are further split into independent [`ReliableCategory`] lanes so a burst
//! in one lane (chat) never delays another (player roster).

use crate::codec::{DecodeError, WireReader};
use crate::protocol::{ClientMessage, MessageKind, PlayerId, ServerMessage};
use deepmine_core::GameTime;
use std::collections::HashMap;
use tracing::trace;

/// Independently ordered reliable lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ReliableCategory {
    /// Bulk columns, block sets and beacons.
    World = 0,
    /// Roster changes: join/leave/team/death/resurrect/ping, game over.
    Players = 1,
    /// Resource totals.
    Resources = 2,
    /// Chat lines.
    Chat = 3,
    /// Client intents (tools, class selection, bank operations).
    Actions = 4,
    /// Cosmetic one-shot triggers that must not be lost.
    Effects = 5,
}

impl ReliableCategory {
    /// Every category.
    pub const ALL: [ReliableCategory; 6] = [
        ReliableCategory::World,
        ReliableCategory::Players,
        ReliableCategory::Resources,
        ReliableCategory::Chat,
        ReliableCategory::Actions,
        ReliableCategory::Effects,
    ];

    /// Look up a category by its header byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }
}

/// Reliability/ordering contract for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryClass {
    /// Best effort; a newer sample supersedes older ones, stale ones are dropped.
    UnreliableLatest,
    /// Best effort, unordered; loss only means a missed effect.
    UnreliablePositional,
    /// Exactly once, in send order within the category.
    ReliableOrdered(ReliableCategory),
}

impl DeliveryClass {
    /// Check if this class uses reliable delivery.
    pub fn is_reliable(&self) -> bool {
        matches!(self, DeliveryClass::ReliableOrdered(_))
    }

    /// Check if this class uses unreliable delivery.
    pub fn is_unreliable(&self) -> bool {
        !self.is_reliable()
    }

    /// Datagram header byte for unreliable classes.
    pub fn datagram_tag(&self) -> Option<u8> {
        match self {
            DeliveryClass::UnreliableLatest => Some(0),
            DeliveryClass::UnreliablePositional => Some(1),
            DeliveryClass::ReliableOrdered(_) => None,
        }
    }

    /// Inverse of [`DeliveryClass::datagram_tag`].
    pub fn from_datagram_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DeliveryClass::UnreliableLatest),
            1 => Some(DeliveryClass::UnreliablePositional),
            _ => None,
        }
    }
}

/// Delivery class for a message kind travelling host to client.
pub fn server_delivery(kind: MessageKind) -> DeliveryClass {
    use DeliveryClass::*;
    use ReliableCategory::*;
    match kind {
        MessageKind::PlayerUpdate | MessageKind::VibrateGamepad => UnreliableLatest,
        MessageKind::TriggerExplosion | MessageKind::PlaySound => UnreliablePositional,
        MessageKind::BlockBulkTransfer | MessageKind::BlockSet | MessageKind::SetBeacon => {
            ReliableOrdered(World)
        }
        MessageKind::PlayerJoined
        | MessageKind::PlayerLeft
        | MessageKind::PlayerSetTeam
        | MessageKind::PlayerDead
        | MessageKind::PlayerAlive
        | MessageKind::PlayerPing
        | MessageKind::GameOver => ReliableOrdered(Players),
        MessageKind::ResourceUpdate => ReliableOrdered(Resources),
        MessageKind::ChatMessage => ReliableOrdered(Chat),
        MessageKind::TriggerConstructionGunAnimation => ReliableOrdered(Effects),
        MessageKind::UseTool
        | MessageKind::SelectClass
        | MessageKind::DepositOre
        | MessageKind::DepositCash
        | MessageKind::WithdrawOre => ReliableOrdered(Actions),
    }
}

/// Delivery class for a message kind travelling client to host.
pub fn client_delivery(kind: MessageKind) -> DeliveryClass {
    use DeliveryClass::*;
    use ReliableCategory::*;
    match kind {
        MessageKind::PlayerUpdate => UnreliableLatest,
        MessageKind::PlaySound => UnreliablePositional,
        MessageKind::PlayerSetTeam
        | MessageKind::PlayerDead
        | MessageKind::PlayerAlive
        | MessageKind::PlayerPing => ReliableOrdered(Players),
        MessageKind::ChatMessage => ReliableOrdered(Chat),
        _ => ReliableOrdered(Actions),
    }
}

/// Select the delivery class for a server message.
pub fn select_server_channel(msg: &ServerMessage) -> DeliveryClass {
    server_delivery(msg.kind())
}

/// Select the delivery class for a client message.
pub fn select_client_channel(msg: &ClientMessage) -> DeliveryClass {
    client_delivery(msg.kind())
}

/// Receive-side filter that drops datagrams older than the newest seen.
///
/// Sequence numbers are `u16` and wrap; a sequence is newer when it lies in
/// the half-window ahead of the last accepted one.
#[derive(Debug, Default, Clone)]
pub struct LatestWinsFilter {
    last: Option<u16>,
    dropped: u64,
}

impl LatestWinsFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `seq` should be delivered. Accepting it advances the window.
    pub fn accept(&mut self, seq: u16) -> bool {
        let newer = match self.last {
            None => true,
            Some(last) => {
                let delta = seq.wrapping_sub(last);
                delta != 0 && delta < 0x8000
            }
        };
        if newer {
            self.last = Some(seq);
        } else {
            self.dropped += 1;
            trace!(seq, last = ?self.last, "dropping stale datagram");
        }
        newer
    }

    /// Number of datagrams rejected so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Forget the window (new connection).
    pub fn reset(&mut self) {
        self.last = None;
        self.dropped = 0;
    }
}

/// Wrapping sequence generator for outbound datagrams.
#[derive(Debug, Default, Clone)]
pub struct SequenceCounter(u16);

impl SequenceCounter {
    /// Return the next sequence number.
    pub fn next(&mut self) -> u16 {
        let seq = self.0;
        self.0 = self.0.wrapping_add(1);
        seq
    }
}

/// Which side encoded a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by the host.
    HostToClient,
    /// Sent by a client.
    ClientToHost,
}

/// One latest-wins stream: a message kind plus the player it describes.
///
/// Samples only supersede earlier samples of the same stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LatestStream {
    /// Message kind tag.
    pub kind: u8,
    /// Subject player for kinds that name one.
    pub player_id: Option<PlayerId>,
}

impl LatestStream {
    /// Stream an encoded message belongs to.
    ///
    /// Host player updates are keyed by the player they describe. A client
    /// only ever reports itself, so its updates form a single stream.
    pub fn of(direction: Direction, bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(bytes);
        let kind = r.u8()?;
        let player_id = match direction {
            Direction::HostToClient if kind == MessageKind::PlayerUpdate as u8 => Some(r.u32()?),
            _ => None,
        };
        Ok(Self { kind, player_id })
    }
}

/// Latest-wins filtering for every stream on one connection.
#[derive(Debug, Default)]
pub struct LatestWinsStreams {
    filters: HashMap<LatestStream, LatestWinsFilter>,
}

impl LatestWinsStreams {
    /// No streams seen yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `seq` on `stream` should be delivered.
    pub fn accept(&mut self, stream: LatestStream, seq: u16) -> bool {
        self.filters.entry(stream).or_default().accept(seq)
    }

    /// Datagrams rejected across all streams.
    pub fn dropped(&self) -> u64 {
        self.filters.values().map(LatestWinsFilter::dropped).sum()
    }

    /// Forget every stream.
    pub fn reset(&mut self) {
        self.filters.clear();
    }
}

/// Outbound sequence numbering per latest-wins stream.
#[derive(Debug, Default)]
pub struct StreamSequences {
    counters: HashMap<LatestStream, SequenceCounter>,
}

impl StreamSequences {
    /// Next sequence number on `stream`.
    pub fn next(&mut self, stream: LatestStream) -> u16 {
        self.counters.entry(stream).or_default().next()
    }
}

/// Fixed-cadence throttle on simulated time.
///
/// Bounds outbound player-update bandwidth independently of the tick rate.
#[derive(Debug, Clone)]
pub struct SendThrottle {
    interval: GameTime,
    elapsed: GameTime,
}

/// Default cadence for player-update messages (seconds).
pub const PLAYER_UPDATE_INTERVAL: GameTime = 0.05;

impl SendThrottle {
    /// Throttle firing every `interval` seconds.
    pub fn new(interval: GameTime) -> Self {
        Self {
            interval,
            elapsed: 0.0,
        }
    }

    /// Advance by `dt`; returns `true` when a send is due.
    ///
    /// Fires once the accumulated time strictly exceeds the interval, then
    /// starts over from zero.
    pub fn tick(&mut self, dt: GameTime) -> bool {
        self.elapsed += dt;
        if self.elapsed > self.interval {
            self.elapsed = 0.0;
            true
        } else {
            false
        }
    }
}

impl Default for SendThrottle {
    fn default() -> Self {
        Self::new(PLAYER_UPDATE_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_policy_covers_every_kind() {
        use DeliveryClass::*;
        use ReliableCategory::*;
        let expected = [
            (MessageKind::BlockBulkTransfer, ReliableOrdered(World)),
            (MessageKind::BlockSet, ReliableOrdered(World)),
            (MessageKind::SetBeacon, ReliableOrdered(World)),
            (MessageKind::PlayerUpdate, UnreliableLatest),
            (MessageKind::VibrateGamepad, UnreliableLatest),
            (MessageKind::TriggerExplosion, UnreliablePositional),
            (MessageKind::PlaySound, UnreliablePositional),
            (MessageKind::PlayerJoined, ReliableOrdered(Players)),
            (MessageKind::PlayerLeft, ReliableOrdered(Players)),
            (MessageKind::PlayerSetTeam, ReliableOrdered(Players)),
            (MessageKind::PlayerDead, ReliableOrdered(Players)),
            (MessageKind::PlayerAlive, ReliableOrdered(Players)),
            (MessageKind::PlayerPing, ReliableOrdered(Players)),
            (MessageKind::GameOver, ReliableOrdered(Players)),
            (MessageKind::ResourceUpdate, ReliableOrdered(Resources)),
            (MessageKind::ChatMessage, ReliableOrdered(Chat)),
            (MessageKind::TriggerConstructionGunAnimation, ReliableOrdered(Effects)),
            (MessageKind::UseTool, ReliableOrdered(Actions)),
            (MessageKind::SelectClass, ReliableOrdered(Actions)),
            (MessageKind::DepositOre, ReliableOrdered(Actions)),
            (MessageKind::DepositCash, ReliableOrdered(Actions)),
            (MessageKind::WithdrawOre, ReliableOrdered(Actions)),
        ];
        assert_eq!(expected.len(), MessageKind::ALL.len());
        for (kind, class) in expected {
            assert_eq!(server_delivery(kind), class, "{kind:?}");
        }
    }

    #[test]
    fn client_policy_matches_contract() {
        use DeliveryClass::*;
        use ReliableCategory::*;
        let expected = [
            (MessageKind::PlayerUpdate, UnreliableLatest),
            (MessageKind::PlaySound, UnreliablePositional),
            (MessageKind::PlayerSetTeam, ReliableOrdered(Players)),
            (MessageKind::PlayerDead, ReliableOrdered(Players)),
            (MessageKind::PlayerAlive, ReliableOrdered(Players)),
            (MessageKind::PlayerPing, ReliableOrdered(Players)),
            (MessageKind::ChatMessage, ReliableOrdered(Chat)),
            (MessageKind::UseTool, ReliableOrdered(Actions)),
            (MessageKind::SelectClass, ReliableOrdered(Actions)),
            (MessageKind::DepositOre, ReliableOrdered(Actions)),
            (MessageKind::DepositCash, ReliableOrdered(Actions)),
            (MessageKind::WithdrawOre, ReliableOrdered(Actions)),
        ];
        for (kind, class) in expected {
            assert_eq!(client_delivery(kind), class, "{kind:?}");
        }
    }

    #[test]
    fn join_and_death_share_a_lane() {
        // A "dead" must never overtake the "joined" it refers to.
        assert_eq!(
            server_delivery(MessageKind::PlayerJoined),
            server_delivery(MessageKind::PlayerDead)
        );
        assert_ne!(
            server_delivery(MessageKind::ChatMessage),
            server_delivery(MessageKind::PlayerSetTeam)
        );
    }

    #[test]
    fn latest_wins_drops_stale_and_duplicates() {
        let mut filter = LatestWinsFilter::new();
        assert!(filter.accept(10));
        assert!(!filter.accept(9));
        assert!(!filter.accept(10));
        assert!(filter.accept(12));
        assert!(!filter.accept(11));
        assert_eq!(filter.dropped(), 3);
    }

    #[test]
    fn latest_wins_handles_wraparound() {
        let mut filter = LatestWinsFilter::new();
        assert!(filter.accept(u16::MAX - 1));
        assert!(filter.accept(u16::MAX));
        assert!(filter.accept(0));
        assert!(filter.accept(1));
        assert!(!filter.accept(u16::MAX));
    }

    fn host_update(player_id: u32) -> LatestStream {
        let mut bytes = vec![MessageKind::PlayerUpdate as u8];
        bytes.extend_from_slice(&player_id.to_le_bytes());
        LatestStream::of(Direction::HostToClient, &bytes).expect("stream")
    }

    #[test]
    fn reordered_updates_from_different_players_both_arrive() {
        let (alice, bob) = (host_update(1), host_update(2));
        assert_ne!(alice, bob);

        let mut sequences = StreamSequences::default();
        let alice_seq = sequences.next(alice);
        let bob_seq = sequences.next(bob);

        // Bob's sample overtakes Alice's on the wire.
        let mut streams = LatestWinsStreams::new();
        assert!(streams.accept(bob, bob_seq));
        assert!(streams.accept(alice, alice_seq));
        assert!(!streams.accept(alice, alice_seq));
        assert_eq!(streams.dropped(), 1);
    }

    #[test]
    fn vibration_does_not_compete_with_updates() {
        let vibrate =
            LatestStream::of(Direction::HostToClient, &[MessageKind::VibrateGamepad as u8])
                .expect("stream");
        let update = host_update(7);

        let mut streams = LatestWinsStreams::new();
        assert!(streams.accept(update, 40));
        assert!(streams.accept(vibrate, 0));
        streams.reset();
        assert!(streams.accept(update, 0));
    }

    #[test]
    fn client_updates_share_one_stream() {
        let a = [MessageKind::PlayerUpdate as u8, 0, 0, 128, 63];
        let b = [MessageKind::PlayerUpdate as u8, 0, 0, 0, 64];
        let stream = LatestStream::of(Direction::ClientToHost, &a).expect("stream");
        assert_eq!(stream.player_id, None);
        assert_eq!(LatestStream::of(Direction::ClientToHost, &b), Ok(stream));
        assert!(
            LatestStream::of(Direction::HostToClient, &[MessageKind::PlayerUpdate as u8]).is_err()
        );
    }

    #[test]
    fn throttle_fires_after_interval() {
        let mut throttle = SendThrottle::default();
        let fired: Vec<bool> = (0..8).map(|_| throttle.tick(0.02)).collect();
        assert_eq!(
            fired,
            vec![false, false, true, false, false, true, false, false]
        );
        let mut exact = SendThrottle::new(0.5);
        assert!(!exact.tick(0.5));
        assert!(exact.tick(0.25));
    }

    #[test]
    fn datagram_tags_roundtrip() {
        for class in [
            DeliveryClass::UnreliableLatest,
            DeliveryClass::UnreliablePositional,
        ] {
            let tag = class.datagram_tag().expect("unreliable has tag");
            assert_eq!(DeliveryClass::from_datagram_tag(tag), Some(class));
        }
        assert_eq!(
            DeliveryClass::ReliableOrdered(ReliableCategory::Chat).datagram_tag(),
            None
        );
    }
}
