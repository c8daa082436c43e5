//! Protocol message definitions for host/client synchronization.
//!
//! Messages are split by direction but share one [`MessageKind`] tag space so
//! a byte stream can be classified before it is fully decoded.

use deepmine_core::{
    BlockType, ChatKind, PlayerClass, PlayerTeam, PlayerTool, Sound, GAME_VERSION,
};
use glam::Vec3;

/// Protocol version string sent in the handshake.
pub const PROTOCOL_VERSION: &str = GAME_VERSION;

/// Height of one bulk-transfer band in blocks.
pub const BAND_HEIGHT: usize = 16;

/// Depth (z extent) of one bulk-transfer column in blocks.
pub const COLUMN_DEPTH: usize = 64;

/// Number of cells carried by one bulk-transfer message.
pub const COLUMN_CELLS: usize = BAND_HEIGHT * COLUMN_DEPTH;

/// Maximum length of a chat message (bytes).
pub const MAX_CHAT_LEN: usize = 256;

/// Maximum length of a player display name (bytes).
pub const MAX_NAME_LEN: usize = 32;

/// Maximum length of beacon label text (bytes).
pub const MAX_BEACON_TEXT_LEN: usize = 32;

/// Maximum length of a disconnect/death reason (bytes).
pub const MAX_REASON_LEN: usize = 256;

/// Cut `text` to at most `max` bytes without splitting a character.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Host-assigned player identifier.
pub type PlayerId = u32;

/// One-byte tag leading every encoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// x, y, then 1024 block bytes.
    BlockBulkTransfer = 0,
    /// x, y, z, block.
    BlockSet = 1,
    /// position, heading, tool, block.
    UseTool = 2,
    /// class.
    SelectClass = 3,
    /// Eight `u32` resource totals.
    ResourceUpdate = 4,
    /// No payload.
    DepositOre = 5,
    /// No payload.
    DepositCash = 6,
    /// No payload.
    WithdrawOre = 7,
    /// position.
    TriggerExplosion = 8,
    /// (id from host), position, heading, tool, using tool, (score from host).
    PlayerUpdate = 9,
    /// id, name, this-is-me, alive.
    PlayerJoined = 10,
    /// id.
    PlayerLeft = 11,
    /// (id from host), team.
    PlayerSetTeam = 12,
    /// id from host, reason from client.
    PlayerDead = 13,
    /// (id from host).
    PlayerAlive = 14,
    /// (id from host).
    PlayerPing = 15,
    /// chat kind, text.
    ChatMessage = 16,
    /// winning team.
    GameOver = 17,
    /// sound, optional position.
    PlaySound = 18,
    /// animation value.
    TriggerConstructionGunAnimation = 19,
    /// position, text, team. Empty text removes.
    SetBeacon = 20,
    /// strength, duration in milliseconds.
    VibrateGamepad = 21,
}

impl MessageKind {
    /// Every kind, in tag order.
    pub const ALL: [MessageKind; 22] = [
        MessageKind::BlockBulkTransfer,
        MessageKind::BlockSet,
        MessageKind::UseTool,
        MessageKind::SelectClass,
        MessageKind::ResourceUpdate,
        MessageKind::DepositOre,
        MessageKind::DepositCash,
        MessageKind::WithdrawOre,
        MessageKind::TriggerExplosion,
        MessageKind::PlayerUpdate,
        MessageKind::PlayerJoined,
        MessageKind::PlayerLeft,
        MessageKind::PlayerSetTeam,
        MessageKind::PlayerDead,
        MessageKind::PlayerAlive,
        MessageKind::PlayerPing,
        MessageKind::ChatMessage,
        MessageKind::GameOver,
        MessageKind::PlaySound,
        MessageKind::TriggerConstructionGunAnimation,
        MessageKind::SetBeacon,
        MessageKind::VibrateGamepad,
    ];

    /// Look up a kind by its tag byte.
    pub fn from_u8(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }
}

/// One bulk-transfer column: a fixed `x`, a 16-high band starting at `y`,
/// and every `z`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockColumn {
    /// Column x coordinate.
    pub x: u8,
    /// Base y of the band (a multiple of [`BAND_HEIGHT`]).
    pub y: u8,
    /// Cells, y-major then z. Empty cells are present positionally.
    pub blocks: Box<[BlockType; COLUMN_CELLS]>,
}

impl BlockColumn {
    /// Column with every cell empty.
    pub fn empty(x: u8, y: u8) -> Self {
        Self {
            x,
            y,
            blocks: Box::new([BlockType::None; COLUMN_CELLS]),
        }
    }

    /// Cell at band-relative `dy` and absolute `z`.
    pub fn get(&self, dy: usize, z: usize) -> BlockType {
        self.blocks[dy * COLUMN_DEPTH + z]
    }

    /// Write the cell at band-relative `dy` and absolute `z`.
    pub fn set(&mut self, dy: usize, z: usize, block: BlockType) {
        self.blocks[dy * COLUMN_DEPTH + z] = block;
    }

    /// Iterate `(dy, z, block)` over every cell in wire order.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, BlockType)> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, &b)| (i / COLUMN_DEPTH, i % COLUMN_DEPTH, b))
    }
}

/// Per-player resource totals pushed by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceTotals {
    /// Ore carried.
    pub ore: u32,
    /// Cash carried.
    pub cash: u32,
    /// Carried weight.
    pub weight: u32,
    /// Ore capacity.
    pub ore_max: u32,
    /// Weight capacity.
    pub weight_max: u32,
    /// Ore banked by the player's team.
    pub team_ore: u32,
    /// Red team cash.
    pub red_cash: u32,
    /// Blue team cash.
    pub blue_cash: u32,
}

/// Motion/tool state a client reports for itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerState {
    /// Eye position.
    pub position: Vec3,
    /// Facing direction.
    pub heading: Vec3,
    /// Held tool.
    pub tool: PlayerTool,
    /// Whether the tool is in use this cadence.
    pub using_tool: bool,
}

/// Messages sent from host to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Bulk world column.
    BlockBulkTransfer(BlockColumn),

    /// Single-cell world delta. `BlockType::None` clears the cell.
    BlockSet {
        /// X coordinate.
        x: u8,
        /// Y coordinate.
        y: u8,
        /// Z coordinate.
        z: u8,
        /// New contents.
        block: BlockType,
    },

    /// Resource totals for the receiving player and the teams.
    ResourceUpdate(ResourceTotals),

    /// An explosive detonated at `position`.
    TriggerExplosion {
        /// Block position of the charge.
        position: Vec3,
    },

    /// Another player's motion state.
    PlayerUpdate {
        /// Player being updated.
        player_id: PlayerId,
        /// Motion/tool state.
        state: PlayerState,
        /// Score in hundreds.
        score_hundreds: u16,
    },

    /// A player joined (or is announced to a new joiner).
    PlayerJoined {
        /// New player's id.
        player_id: PlayerId,
        /// Display name.
        name: String,
        /// Set when the announcement describes the receiving client.
        this_is_me: bool,
        /// Whether the player is currently alive.
        alive: bool,
    },

    /// A player left.
    PlayerLeft {
        /// Departing player.
        player_id: PlayerId,
    },

    /// A player changed team.
    PlayerSetTeam {
        /// Player changing team.
        player_id: PlayerId,
        /// New team.
        team: PlayerTeam,
    },

    /// A player died.
    PlayerDead {
        /// Dead player.
        player_id: PlayerId,
    },

    /// A player respawned.
    PlayerAlive {
        /// Respawned player.
        player_id: PlayerId,
    },

    /// A player pinged their team.
    PlayerPing {
        /// Pinging player.
        player_id: PlayerId,
    },

    /// Chat line.
    ChatMessage {
        /// Audience.
        kind: ChatKind,
        /// Line text.
        text: String,
    },

    /// Round ended.
    GameOver {
        /// Winning team.
        winner: PlayerTeam,
    },

    /// Sound cue, optionally positional.
    PlaySound {
        /// Cue.
        sound: Sound,
        /// World position for positional cues.
        position: Option<Vec3>,
    },

    /// Construction gun recoil animation value.
    TriggerConstructionGunAnimation {
        /// Animation value; values at or below -0.1 also click the radar.
        value: f32,
    },

    /// Beacon placement; empty `text` removes the beacon at `position`.
    SetBeacon {
        /// Beacon block position.
        position: Vec3,
        /// Label text.
        text: String,
        /// Owning team.
        team: PlayerTeam,
    },

    /// Gamepad rumble cue.
    VibrateGamepad {
        /// Motor strength (0.0 to 1.0).
        strength: f32,
        /// Duration in milliseconds.
        duration_ms: u32,
    },
}

impl ServerMessage {
    /// Tag byte for this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            ServerMessage::BlockBulkTransfer(_) => MessageKind::BlockBulkTransfer,
            ServerMessage::BlockSet { .. } => MessageKind::BlockSet,
            ServerMessage::ResourceUpdate(_) => MessageKind::ResourceUpdate,
            ServerMessage::TriggerExplosion { .. } => MessageKind::TriggerExplosion,
            ServerMessage::PlayerUpdate { .. } => MessageKind::PlayerUpdate,
            ServerMessage::PlayerJoined { .. } => MessageKind::PlayerJoined,
            ServerMessage::PlayerLeft { .. } => MessageKind::PlayerLeft,
            ServerMessage::PlayerSetTeam { .. } => MessageKind::PlayerSetTeam,
            ServerMessage::PlayerDead { .. } => MessageKind::PlayerDead,
            ServerMessage::PlayerAlive { .. } => MessageKind::PlayerAlive,
            ServerMessage::PlayerPing { .. } => MessageKind::PlayerPing,
            ServerMessage::ChatMessage { .. } => MessageKind::ChatMessage,
            ServerMessage::GameOver { .. } => MessageKind::GameOver,
            ServerMessage::PlaySound { .. } => MessageKind::PlaySound,
            ServerMessage::TriggerConstructionGunAnimation { .. } => {
                MessageKind::TriggerConstructionGunAnimation
            }
            ServerMessage::SetBeacon { .. } => MessageKind::SetBeacon,
            ServerMessage::VibrateGamepad { .. } => MessageKind::VibrateGamepad,
        }
    }

    /// Verify message limits and validity.
    pub fn verify(&self) -> Result<(), &'static str> {
        match self {
            ServerMessage::BlockBulkTransfer(column) => {
                if column.y as usize % BAND_HEIGHT != 0 {
                    return Err("Bulk column not aligned to band");
                }
            }
            ServerMessage::PlayerJoined { name, .. } => {
                if name.len() > MAX_NAME_LEN {
                    return Err("Player name too long");
                }
            }
            ServerMessage::ChatMessage { text, .. } => {
                if text.len() > MAX_CHAT_LEN {
                    return Err("Chat message too long");
                }
            }
            ServerMessage::SetBeacon { text, .. } => {
                if text.len() > MAX_BEACON_TEXT_LEN {
                    return Err("Beacon text too long");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Messages sent from client to host.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Use the held tool.
    UseTool {
        /// Eye position.
        position: Vec3,
        /// Facing direction.
        heading: Vec3,
        /// Tool used.
        tool: PlayerTool,
        /// Block type for the construction gun.
        block: BlockType,
    },

    /// Choose a class.
    SelectClass {
        /// Requested class.
        class: PlayerClass,
    },

    /// Deposit carried ore at a bank.
    DepositOre,

    /// Deposit carried cash at a bank.
    DepositCash,

    /// Withdraw ore from a bank.
    WithdrawOre,

    /// Periodic motion report.
    PlayerUpdate(PlayerState),

    /// Choose a team.
    PlayerSetTeam {
        /// Requested team.
        team: PlayerTeam,
    },

    /// Report own death.
    PlayerDead {
        /// Death description shown to others.
        reason: String,
    },

    /// Report own respawn.
    PlayerAlive,

    /// Ping teammates.
    PlayerPing,

    /// Chat line.
    ChatMessage {
        /// Audience.
        kind: ChatKind,
        /// Line text.
        text: String,
    },

    /// Positional sound to relay to others.
    PlaySound {
        /// Cue.
        sound: Sound,
        /// World position.
        position: Vec3,
    },
}

impl ClientMessage {
    /// Tag byte for this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            ClientMessage::UseTool { .. } => MessageKind::UseTool,
            ClientMessage::SelectClass { .. } => MessageKind::SelectClass,
            ClientMessage::DepositOre => MessageKind::DepositOre,
            ClientMessage::DepositCash => MessageKind::DepositCash,
            ClientMessage::WithdrawOre => MessageKind::WithdrawOre,
            ClientMessage::PlayerUpdate(_) => MessageKind::PlayerUpdate,
            ClientMessage::PlayerSetTeam { .. } => MessageKind::PlayerSetTeam,
            ClientMessage::PlayerDead { .. } => MessageKind::PlayerDead,
            ClientMessage::PlayerAlive => MessageKind::PlayerAlive,
            ClientMessage::PlayerPing => MessageKind::PlayerPing,
            ClientMessage::ChatMessage { .. } => MessageKind::ChatMessage,
            ClientMessage::PlaySound { .. } => MessageKind::PlaySound,
        }
    }

    /// Verify message limits and validity.
    ///
    /// The host calls this on every received message before acting on it.
    pub fn verify(&self) -> Result<(), &'static str> {
        match self {
            ClientMessage::ChatMessage { text, .. } => {
                if text.len() > MAX_CHAT_LEN {
                    return Err("Chat message too long");
                }
            }
            ClientMessage::PlayerDead { reason } => {
                if reason.len() > MAX_REASON_LEN {
                    return Err("Death reason too long");
                }
            }
            ClientMessage::PlayerUpdate(state) => {
                if !state.position.is_finite() || !state.heading.is_finite() {
                    return Err("Non-finite player state");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Connect payload: who is joining and which build they run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Display name.
    pub name: String,
    /// Protocol version string.
    pub version: String,
}

impl Handshake {
    /// Handshake for the local build.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Why a host refused a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Client and host run different protocol versions.
    VersionMismatch {
        /// Version the host expects.
        server_version: String,
    },
    /// Client address is banned.
    Banned,
    /// Any other host-provided reason.
    Other(String),
}

impl RejectReason {
    /// Wire text: `VER;<version>`, `BAN`, or free text.
    pub fn to_wire(&self) -> String {
        match self {
            RejectReason::VersionMismatch { server_version } => format!("VER;{server_version}"),
            RejectReason::Banned => "BAN".to_string(),
            RejectReason::Other(text) => text.clone(),
        }
    }

    /// Parse wire text.
    ///
    /// Text that is not `BAN` and has no `;`-separated code is treated as a
    /// version mismatch, matching how older hosts reported it.
    pub fn from_wire(text: &str) -> Self {
        let mut parts = text.splitn(2, ';');
        let code = parts.next().unwrap_or_default();
        match (code, parts.next()) {
            ("VER", Some(version)) => RejectReason::VersionMismatch {
                server_version: version.to_string(),
            },
            ("BAN", _) => RejectReason::Banned,
            (_, None) => RejectReason::VersionMismatch {
                server_version: String::new(),
            },
            (_, Some(_)) => RejectReason::Other(text.to_string()),
        }
    }

    /// QUIC application close code used to carry this reason.
    pub fn close_code(&self) -> u32 {
        match self {
            RejectReason::VersionMismatch { .. } => 1,
            RejectReason::Banned => 2,
            RejectReason::Other(_) => 3,
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::VersionMismatch { server_version } => write!(
                f,
                "version mismatch (server {server_version}, client {PROTOCOL_VERSION})"
            ),
            RejectReason::Banned => write!(f, "banned from this server"),
            RejectReason::Other(text) => write!(f, "{text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("dig", MAX_NAME_LEN), "dig");
        assert_eq!(truncate_chars("abcdef", 4), "abcd");
        // 'é' is two bytes; cutting inside it backs off to the boundary.
        assert_eq!(truncate_chars("caféteria", 4), "caf");
        assert_eq!(truncate_chars("ü", 1), "");
        assert_eq!(truncate_chars(&"x".repeat(300), MAX_CHAT_LEN).len(), MAX_CHAT_LEN);
    }

    #[test]
    fn kind_tags_match_table_order() {
        for (i, kind) in MessageKind::ALL.iter().enumerate() {
            assert_eq!(*kind as u8 as usize, i);
            assert_eq!(MessageKind::from_u8(i as u8), Some(*kind));
        }
        assert_eq!(MessageKind::from_u8(22), None);
    }

    #[test]
    fn reject_reason_wire_text() {
        let ver = RejectReason::VersionMismatch {
            server_version: "v1.6".into(),
        };
        assert_eq!(ver.to_wire(), "VER;v1.6");
        assert_eq!(RejectReason::from_wire("VER;v1.6"), ver);
        assert_eq!(RejectReason::from_wire("BAN"), RejectReason::Banned);
        assert_eq!(
            RejectReason::from_wire("FULL;server is full"),
            RejectReason::Other("FULL;server is full".into())
        );
    }

    #[test]
    fn reason_without_code_reads_as_version_mismatch() {
        assert!(matches!(
            RejectReason::from_wire("garbage"),
            RejectReason::VersionMismatch { .. }
        ));
    }

    #[test]
    fn column_cells_are_y_major() {
        let mut column = BlockColumn::empty(0, 16);
        column.set(2, 5, BlockType::Gold);
        assert_eq!(column.blocks[2 * COLUMN_DEPTH + 5], BlockType::Gold);
        let found: Vec<_> = column.cells().filter(|(_, _, b)| !b.is_empty()).collect();
        assert_eq!(found, vec![(2, 5, BlockType::Gold)]);
    }

    #[test]
    fn verify_rejects_oversized_chat() {
        let msg = ClientMessage::ChatMessage {
            kind: ChatKind::SayAll,
            text: "x".repeat(MAX_CHAT_LEN + 1),
        };
        assert!(msg.verify().is_err());
    }
}
