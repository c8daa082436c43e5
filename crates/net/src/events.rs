//! One-shot notifications for UI, audio and HUD collaborators.

use crate::motion::EntityChanges;
use crate::protocol::{PlayerId, RejectReason, ResourceTotals};
use deepmine_core::{BlockPos, ChatKind, GameTime, PlayerTeam, Sound};
use glam::Vec3;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

/// Discrete event raised by the synchronization layer.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// Every bulk column arrived.
    WorldReady,
    /// Host refused the handshake.
    Rejected(RejectReason),
    /// Session ended.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// Explosion at a world position.
    Explosion {
        /// Charge position.
        position: Vec3,
    },
    /// Beacon placed or relabelled.
    BeaconPlaced {
        /// Beacon cell.
        pos: BlockPos,
        /// Label.
        text: String,
        /// Owning team.
        team: PlayerTeam,
    },
    /// Beacon removed.
    BeaconRemoved {
        /// Former beacon cell.
        pos: BlockPos,
    },
    /// Resource totals changed.
    Resources(ResourceTotals),
    /// Chat line to display.
    Chat {
        /// Audience.
        kind: ChatKind,
        /// Line text.
        text: String,
    },
    /// Sound cue.
    Sound {
        /// Cue.
        sound: Sound,
        /// World position for positional cues.
        position: Option<Vec3>,
    },
    /// Construction gun animation trigger.
    ConstructionGunAnimation {
        /// Animation value.
        value: f32,
    },
    /// Gamepad rumble.
    VibrateGamepad {
        /// Motor strength.
        strength: f32,
        /// Duration in milliseconds.
        duration_ms: u32,
    },
    /// Round over.
    GameOver {
        /// Winning team.
        winner: PlayerTeam,
    },
    /// Someone joined.
    PlayerJoined {
        /// Player id.
        player_id: PlayerId,
        /// Display name.
        name: String,
    },
    /// Someone left.
    PlayerLeft {
        /// Player id.
        player_id: PlayerId,
        /// Display name.
        name: String,
    },
    /// A player died.
    PlayerDied {
        /// Player id.
        player_id: PlayerId,
        /// Where it happened.
        position: Vec3,
        /// The player's team.
        team: PlayerTeam,
        /// The local player.
        is_self: bool,
    },
    /// A teammate pinged.
    Ping {
        /// Pinging player.
        player_id: PlayerId,
    },
    /// Presentation fields of a remote player changed.
    EntityChanged {
        /// Player id.
        player_id: PlayerId,
        /// What changed.
        changes: EntityChanges,
    },
}

/// Receiver of [`GameEvent`]s.
pub trait EventSink {
    /// Deliver one event.
    fn emit(&mut self, event: GameEvent);
}

impl EventSink for Vec<GameEvent> {
    fn emit(&mut self, event: GameEvent) {
        self.push(event);
    }
}

impl EventSink for UnboundedSender<GameEvent> {
    fn emit(&mut self, event: GameEvent) {
        if self.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: GameEvent) {
        (**self).emit(event);
    }
}

/// Beacon label and owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    /// Label.
    pub text: String,
    /// Owning team.
    pub team: PlayerTeam,
}

/// Beacons keyed by cell, one per position.
#[derive(Debug, Clone, Default)]
pub struct BeaconMap {
    beacons: HashMap<BlockPos, Beacon>,
}

impl BeaconMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a set-beacon message. Empty text removes; anything else
    /// inserts or wholesale replaces. Returns the event to raise, if any.
    pub fn apply(&mut self, position: Vec3, text: &str, team: PlayerTeam) -> Option<GameEvent> {
        let pos = BlockPos::containing(position);
        if text.is_empty() {
            return self.beacons.remove(&pos).map(|_| {
                debug!(%pos, "beacon removed");
                GameEvent::BeaconRemoved { pos }
            });
        }
        self.beacons.insert(
            pos,
            Beacon {
                text: text.to_string(),
                team,
            },
        );
        Some(GameEvent::BeaconPlaced {
            pos,
            text: text.to_string(),
            team,
        })
    }

    /// Beacon at `pos`.
    pub fn get(&self, pos: BlockPos) -> Option<&Beacon> {
        self.beacons.get(&pos)
    }

    /// Number of beacons.
    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    /// Whether there are no beacons.
    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    /// Iterate all beacons.
    pub fn iter(&self) -> impl Iterator<Item = (&BlockPos, &Beacon)> {
        self.beacons.iter()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.beacons.clear();
    }
}

/// Lines retained in the chat log.
pub const CHAT_LOG_CAPACITY: usize = 64;

/// Seconds a chat line stays on screen.
pub const CHAT_LINE_LIFETIME: GameTime = 10.0;

/// One chat line.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    /// Audience.
    pub kind: ChatKind,
    /// Text.
    pub text: String,
    /// Display time left.
    pub remaining: GameTime,
}

/// Bounded chat history, newest first.
#[derive(Debug, Clone)]
pub struct ChatLog {
    lines: VecDeque<ChatLine>,
    capacity: usize,
}

impl ChatLog {
    /// Log holding at most `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a line at the front, dropping the oldest if full.
    pub fn push(&mut self, kind: ChatKind, text: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_back();
        }
        self.lines.push_front(ChatLine {
            kind,
            text: text.into(),
            remaining: CHAT_LINE_LIFETIME,
        });
    }

    /// Age every line by `dt`.
    pub fn tick(&mut self, dt: GameTime) {
        for line in &mut self.lines {
            line.remaining = (line.remaining - dt).max(0.0);
        }
    }

    /// All retained lines, newest first.
    pub fn lines(&self) -> impl Iterator<Item = &ChatLine> {
        self.lines.iter()
    }

    /// Lines still on screen, newest first.
    pub fn visible(&self) -> impl Iterator<Item = &ChatLine> {
        self.lines.iter().filter(|line| line.remaining > 0.0)
    }

    /// Number of retained lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Drop every line.
    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new(CHAT_LOG_CAPACITY)
    }
}
