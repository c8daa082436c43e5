//! Byte-level message encoding and decoding.
//!
//! Wire layout: `[kind: u8][payload]`. Numbers are little-endian fixed width,
//! vectors are three `f32`s, strings are a `u16` byte length followed by
//! UTF-8, booleans are a single `0`/`1` byte. Message boundaries come from the
//! transport, so a decoded message must consume its input exactly.

use crate::protocol::{
    BlockColumn, ClientMessage, Handshake, MessageKind, PlayerState, ResourceTotals,
    ServerMessage, COLUMN_CELLS,
};
use deepmine_core::{BlockType, ChatKind, PlayerClass, PlayerTeam, PlayerTool, Sound};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

/// Failure to decode a received message. Never fatal to the read loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Input ended before the payload was complete.
    #[error("message truncated: needed {needed} bytes at offset {offset}, had {available}")]
    Truncated {
        /// Read offset where the shortfall was detected.
        offset: usize,
        /// Bytes the field required.
        needed: usize,
        /// Bytes left in the input.
        available: usize,
    },

    /// Leading tag byte is not a known message kind.
    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    /// Known kind that is never sent in this direction.
    #[error("message kind {0:?} is not valid in this direction")]
    UnexpectedKind(MessageKind),

    /// Enum field holds an out-of-range discriminant.
    #[error("invalid {field} value {value}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Offending byte.
        value: u8,
    },

    /// String field is not UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// Bytes remained after the payload.
    #[error("{0} trailing bytes after message payload")]
    TrailingBytes(usize),

    /// The reader failed for a reason other than running out of input.
    #[error("read failed: {0}")]
    Io(io::ErrorKind),
}

/// Failure to encode an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// String longer than the `u16` length prefix allows.
    #[error("string of {0} bytes exceeds wire limit")]
    StringTooLong(usize),

    /// The underlying buffer refused a write.
    #[error("write failed: {0}")]
    Io(io::ErrorKind),
}

impl From<io::Error> for EncodeError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.kind())
    }
}

/// Append-only little-endian writer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Writer with a pre-sized buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Finish and return the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Write one byte.
    pub fn u8(&mut self, v: u8) -> Result<(), EncodeError> {
        self.buf.write_u8(v)?;
        Ok(())
    }

    /// Write a boolean byte.
    pub fn bool(&mut self, v: bool) -> Result<(), EncodeError> {
        self.u8(u8::from(v))
    }

    /// Write a `u16`.
    pub fn u16(&mut self, v: u16) -> Result<(), EncodeError> {
        self.buf.write_u16::<LittleEndian>(v)?;
        Ok(())
    }

    /// Write a `u32`.
    pub fn u32(&mut self, v: u32) -> Result<(), EncodeError> {
        self.buf.write_u32::<LittleEndian>(v)?;
        Ok(())
    }

    /// Write an `f32`.
    pub fn f32(&mut self, v: f32) -> Result<(), EncodeError> {
        self.buf.write_f32::<LittleEndian>(v)?;
        Ok(())
    }

    /// Write a vector as three `f32`s.
    pub fn vec3(&mut self, v: Vec3) -> Result<(), EncodeError> {
        self.f32(v.x)?;
        self.f32(v.y)?;
        self.f32(v.z)
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn string(&mut self, s: &str) -> Result<(), EncodeError> {
        let len = u16::try_from(s.len()).map_err(|_| EncodeError::StringTooLong(s.len()))?;
        self.u16(len)?;
        self.bytes(s.as_bytes())
    }

    /// Append raw bytes.
    pub fn bytes(&mut self, b: &[u8]) -> Result<(), EncodeError> {
        self.buf.write_all(b)?;
        Ok(())
    }
}

/// Bounds-checked little-endian reader over one message.
#[derive(Debug)]
pub struct WireReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> WireReader<'a> {
    /// Reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len();
        len.saturating_sub(self.cursor.position() as usize)
    }

    /// Run one fixed-width read, reporting a short input as `Truncated`.
    fn read<T>(
        &mut self,
        needed: usize,
        op: impl FnOnce(&mut Cursor<&'a [u8]>) -> io::Result<T>,
    ) -> Result<T, DecodeError> {
        let offset = self.cursor.position() as usize;
        let available = self.remaining();
        op(&mut self.cursor).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => DecodeError::Truncated {
                offset,
                needed,
                available,
            },
            kind => DecodeError::Io(kind),
        })
    }

    /// Read one byte.
    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        self.read(1, |c| c.read_u8())
    }

    /// Read a boolean byte; any non-zero value is `true`.
    pub fn bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.u8()? != 0)
    }

    /// Read a `u16`.
    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        self.read(2, |c| c.read_u16::<LittleEndian>())
    }

    /// Read a `u32`.
    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        self.read(4, |c| c.read_u32::<LittleEndian>())
    }

    /// Read an `f32`.
    pub fn f32(&mut self) -> Result<f32, DecodeError> {
        self.read(4, |c| c.read_f32::<LittleEndian>())
    }

    /// Read three `f32`s.
    pub fn vec3(&mut self) -> Result<Vec3, DecodeError> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u16()? as usize;
        let mut bytes = vec![0u8; len];
        self.read(len, |c| c.read_exact(&mut bytes))?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Read a byte and map it through `from_u8`.
    pub fn enum_u8<T>(
        &mut self,
        field: &'static str,
        from_u8: impl FnOnce(u8) -> Option<T>,
    ) -> Result<T, DecodeError> {
        let value = self.u8()?;
        from_u8(value).ok_or(DecodeError::InvalidValue { field, value })
    }

    /// Fail if any bytes remain.
    pub fn finish(self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

/// Read the kind tag without decoding the payload.
pub fn peek_kind(data: &[u8]) -> Result<MessageKind, DecodeError> {
    let tag = WireReader::new(data).u8()?;
    MessageKind::from_u8(tag).ok_or(DecodeError::UnknownKind(tag))
}

fn write_state(w: &mut WireWriter, state: &PlayerState) -> Result<(), EncodeError> {
    w.vec3(state.position)?;
    w.vec3(state.heading)?;
    w.u8(state.tool.as_u8())?;
    w.bool(state.using_tool)
}

fn read_state(r: &mut WireReader<'_>) -> Result<PlayerState, DecodeError> {
    Ok(PlayerState {
        position: r.vec3()?,
        heading: r.vec3()?,
        tool: r.enum_u8("tool", PlayerTool::from_u8)?,
        using_tool: r.bool()?,
    })
}

/// Encode a host-to-client message.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, EncodeError> {
    let capacity = match msg {
        ServerMessage::BlockBulkTransfer(_) => 3 + COLUMN_CELLS,
        _ => 32,
    };
    let mut w = WireWriter::with_capacity(capacity);
    w.u8(msg.kind() as u8)?;

    match msg {
        ServerMessage::BlockBulkTransfer(column) => {
            w.u8(column.x)?;
            w.u8(column.y)?;
            for block in column.blocks.iter() {
                w.u8(block.as_u8())?;
            }
        }
        ServerMessage::BlockSet { x, y, z, block } => {
            w.bytes(&[*x, *y, *z, block.as_u8()])?;
        }
        ServerMessage::ResourceUpdate(totals) => {
            for v in [
                totals.ore,
                totals.cash,
                totals.weight,
                totals.ore_max,
                totals.weight_max,
                totals.team_ore,
                totals.red_cash,
                totals.blue_cash,
            ] {
                w.u32(v)?;
            }
        }
        ServerMessage::TriggerExplosion { position } => w.vec3(*position)?,
        ServerMessage::PlayerUpdate {
            player_id,
            state,
            score_hundreds,
        } => {
            w.u32(*player_id)?;
            write_state(&mut w, state)?;
            w.u16(*score_hundreds)?;
        }
        ServerMessage::PlayerJoined {
            player_id,
            name,
            this_is_me,
            alive,
        } => {
            w.u32(*player_id)?;
            w.string(name)?;
            w.bool(*this_is_me)?;
            w.bool(*alive)?;
        }
        ServerMessage::PlayerLeft { player_id }
        | ServerMessage::PlayerDead { player_id }
        | ServerMessage::PlayerAlive { player_id }
        | ServerMessage::PlayerPing { player_id } => w.u32(*player_id)?,
        ServerMessage::PlayerSetTeam { player_id, team } => {
            w.u32(*player_id)?;
            w.u8(team.as_u8())?;
        }
        ServerMessage::ChatMessage { kind, text } => {
            w.u8(kind.as_u8())?;
            w.string(text)?;
        }
        ServerMessage::GameOver { winner } => w.u8(winner.as_u8())?,
        ServerMessage::PlaySound { sound, position } => {
            w.u8(sound.as_u8())?;
            w.bool(position.is_some())?;
            if let Some(position) = position {
                w.vec3(*position)?;
            }
        }
        ServerMessage::TriggerConstructionGunAnimation { value } => w.f32(*value)?,
        ServerMessage::SetBeacon {
            position,
            text,
            team,
        } => {
            w.vec3(*position)?;
            w.string(text)?;
            w.u8(team.as_u8())?;
        }
        ServerMessage::VibrateGamepad {
            strength,
            duration_ms,
        } => {
            w.f32(*strength)?;
            w.u32(*duration_ms)?;
        }
    }

    Ok(w.into_bytes())
}

/// Decode a host-to-client message.
pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, DecodeError> {
    let kind = peek_kind(data)?;
    let mut r = WireReader::new(&data[1..]);

    let msg = match kind {
        MessageKind::BlockBulkTransfer => {
            let mut column = BlockColumn::empty(r.u8()?, r.u8()?);
            for slot in column.blocks.iter_mut() {
                *slot = r.enum_u8("block", BlockType::from_u8)?;
            }
            ServerMessage::BlockBulkTransfer(column)
        }
        MessageKind::BlockSet => ServerMessage::BlockSet {
            x: r.u8()?,
            y: r.u8()?,
            z: r.u8()?,
            block: r.enum_u8("block", BlockType::from_u8)?,
        },
        MessageKind::ResourceUpdate => ServerMessage::ResourceUpdate(ResourceTotals {
            ore: r.u32()?,
            cash: r.u32()?,
            weight: r.u32()?,
            ore_max: r.u32()?,
            weight_max: r.u32()?,
            team_ore: r.u32()?,
            red_cash: r.u32()?,
            blue_cash: r.u32()?,
        }),
        MessageKind::TriggerExplosion => ServerMessage::TriggerExplosion {
            position: r.vec3()?,
        },
        MessageKind::PlayerUpdate => ServerMessage::PlayerUpdate {
            player_id: r.u32()?,
            state: read_state(&mut r)?,
            score_hundreds: r.u16()?,
        },
        MessageKind::PlayerJoined => ServerMessage::PlayerJoined {
            player_id: r.u32()?,
            name: r.string()?,
            this_is_me: r.bool()?,
            alive: r.bool()?,
        },
        MessageKind::PlayerLeft => ServerMessage::PlayerLeft {
            player_id: r.u32()?,
        },
        MessageKind::PlayerSetTeam => ServerMessage::PlayerSetTeam {
            player_id: r.u32()?,
            team: r.enum_u8("team", PlayerTeam::from_u8)?,
        },
        MessageKind::PlayerDead => ServerMessage::PlayerDead {
            player_id: r.u32()?,
        },
        MessageKind::PlayerAlive => ServerMessage::PlayerAlive {
            player_id: r.u32()?,
        },
        MessageKind::PlayerPing => ServerMessage::PlayerPing {
            player_id: r.u32()?,
        },
        MessageKind::ChatMessage => ServerMessage::ChatMessage {
            kind: r.enum_u8("chat kind", ChatKind::from_u8)?,
            text: r.string()?,
        },
        MessageKind::GameOver => ServerMessage::GameOver {
            winner: r.enum_u8("team", PlayerTeam::from_u8)?,
        },
        MessageKind::PlaySound => {
            let sound = r.enum_u8("sound", Sound::from_u8)?;
            let position = if r.bool()? { Some(r.vec3()?) } else { None };
            ServerMessage::PlaySound { sound, position }
        }
        MessageKind::TriggerConstructionGunAnimation => {
            ServerMessage::TriggerConstructionGunAnimation { value: r.f32()? }
        }
        MessageKind::SetBeacon => ServerMessage::SetBeacon {
            position: r.vec3()?,
            text: r.string()?,
            team: r.enum_u8("team", PlayerTeam::from_u8)?,
        },
        MessageKind::VibrateGamepad => ServerMessage::VibrateGamepad {
            strength: r.f32()?,
            duration_ms: r.u32()?,
        },
        other @ (MessageKind::UseTool
        | MessageKind::SelectClass
        | MessageKind::DepositOre
        | MessageKind::DepositCash
        | MessageKind::WithdrawOre) => return Err(DecodeError::UnexpectedKind(other)),
    };

    r.finish()?;
    Ok(msg)
}

/// Encode a client-to-host message.
pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>, EncodeError> {
    let mut w = WireWriter::with_capacity(32);
    w.u8(msg.kind() as u8)?;

    match msg {
        ClientMessage::UseTool {
            position,
            heading,
            tool,
            block,
        } => {
            w.vec3(*position)?;
            w.vec3(*heading)?;
            w.u8(tool.as_u8())?;
            w.u8(block.as_u8())?;
        }
        ClientMessage::SelectClass { class } => w.u8(class.as_u8())?,
        ClientMessage::DepositOre
        | ClientMessage::DepositCash
        | ClientMessage::WithdrawOre
        | ClientMessage::PlayerAlive
        | ClientMessage::PlayerPing => {}
        ClientMessage::PlayerUpdate(state) => write_state(&mut w, state)?,
        ClientMessage::PlayerSetTeam { team } => w.u8(team.as_u8())?,
        ClientMessage::PlayerDead { reason } => w.string(reason)?,
        ClientMessage::ChatMessage { kind, text } => {
            w.u8(kind.as_u8())?;
            w.string(text)?;
        }
        ClientMessage::PlaySound { sound, position } => {
            w.u8(sound.as_u8())?;
            w.vec3(*position)?;
        }
    }

    Ok(w.into_bytes())
}

/// Decode a client-to-host message.
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, DecodeError> {
    let kind = peek_kind(data)?;
    let mut r = WireReader::new(&data[1..]);

    let msg = match kind {
        MessageKind::UseTool => ClientMessage::UseTool {
            position: r.vec3()?,
            heading: r.vec3()?,
            tool: r.enum_u8("tool", PlayerTool::from_u8)?,
            block: r.enum_u8("block", BlockType::from_u8)?,
        },
        MessageKind::SelectClass => ClientMessage::SelectClass {
            class: r.enum_u8("class", PlayerClass::from_u8)?,
        },
        MessageKind::DepositOre => ClientMessage::DepositOre,
        MessageKind::DepositCash => ClientMessage::DepositCash,
        MessageKind::WithdrawOre => ClientMessage::WithdrawOre,
        MessageKind::PlayerUpdate => ClientMessage::PlayerUpdate(read_state(&mut r)?),
        MessageKind::PlayerSetTeam => ClientMessage::PlayerSetTeam {
            team: r.enum_u8("team", PlayerTeam::from_u8)?,
        },
        MessageKind::PlayerDead => ClientMessage::PlayerDead {
            reason: r.string()?,
        },
        MessageKind::PlayerAlive => ClientMessage::PlayerAlive,
        MessageKind::PlayerPing => ClientMessage::PlayerPing,
        MessageKind::ChatMessage => ClientMessage::ChatMessage {
            kind: r.enum_u8("chat kind", ChatKind::from_u8)?,
            text: r.string()?,
        },
        MessageKind::PlaySound => ClientMessage::PlaySound {
            sound: r.enum_u8("sound", Sound::from_u8)?,
            position: r.vec3()?,
        },
        other => return Err(DecodeError::UnexpectedKind(other)),
    };

    r.finish()?;
    Ok(msg)
}

/// Encode the connect payload: name then version string.
pub fn encode_handshake(handshake: &Handshake) -> Result<Vec<u8>, EncodeError> {
    let mut w = WireWriter::with_capacity(4 + handshake.name.len() + handshake.version.len());
    w.string(&handshake.name)?;
    w.string(&handshake.version)?;
    Ok(w.into_bytes())
}

/// Decode the connect payload.
pub fn decode_handshake(data: &[u8]) -> Result<Handshake, DecodeError> {
    let mut r = WireReader::new(data);
    let handshake = Handshake {
        name: r.string()?,
        version: r.string()?,
    };
    r.finish()?;
    Ok(handshake)
}
