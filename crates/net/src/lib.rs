#![warn(missing_docs)]
//! State synchronization between a deepmine host and its clients.
//!
//! The wire codec and channel policy are pure; [`session`], [`world_sync`]
//! and [`motion`] hold the client-side state machines; [`connection`]
//! provides the QUIC transports behind the [`Transport`] and
//! [`HostTransport`] seams.

mod channel;
mod codec;
pub mod connection;
pub mod discovery;
mod endpoint;
pub mod events;
pub mod motion;
mod protocol;
pub mod session;
mod transport;
pub mod world_sync;

pub use channel::{
    client_delivery, select_client_channel, select_server_channel, server_delivery,
    DeliveryClass, Direction, LatestStream, LatestWinsFilter, LatestWinsStreams,
    ReliableCategory, SendThrottle, SequenceCounter, StreamSequences, PLAYER_UPDATE_INTERVAL,
};
pub use codec::{
    decode_client_message, decode_handshake, decode_server_message, encode_client_message,
    encode_handshake, encode_server_message, peek_kind, DecodeError, EncodeError, WireReader,
    WireWriter,
};
pub use connection::{QuicClientTransport, QuicHostTransport};
pub use discovery::{discover, DiscoveryConfig, ServerInfo};
pub use endpoint::{negotiated_alpn, ClientEndpoint, ServerEndpoint, ALPN, SERVER_NAME};
pub use events::{BeaconMap, ChatLog, EventSink, GameEvent};
pub use motion::{interpolate_samples, EntityChanges, RemoteEntity, SampleBuffer};
pub use protocol::{
    truncate_chars, BlockColumn, ClientMessage, Handshake, MessageKind, PlayerId, PlayerState, RejectReason,
    ResourceTotals, ServerMessage, BAND_HEIGHT, COLUMN_CELLS, COLUMN_DEPTH, MAX_BEACON_TEXT_LEN,
    MAX_CHAT_LEN, MAX_NAME_LEN, MAX_REASON_LEN, PROTOCOL_VERSION,
};
pub use session::{Session, SessionEnd, SessionError, SessionState, SessionTransition};
pub use transport::{
    ConnectionStatus, HostEvent, HostTransport, PeerId, Transport, TransportError,
    TransportEvent,
};
pub use world_sync::{BlockStore, WorldSync, WorldSyncError, WorldTransferState};
