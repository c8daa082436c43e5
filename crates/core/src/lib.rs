#![warn(missing_docs)]
//! Core game vocabulary shared across the workspace.

pub mod block;
pub mod grid;
pub mod player;
pub mod sound;
mod wire_enum;

// Re-export commonly used types
pub use block::{BlockPos, BlockType};
pub use grid::{BlockGrid, DEFAULT_MAP_SIZE};
pub use player::{ChatKind, PlayerClass, PlayerTeam, PlayerTool};
pub use sound::Sound;

/// Game version string exchanged during the connection handshake.
pub const GAME_VERSION: &str = "v1.6";

/// Simulated time in seconds, as seen by the local loop.
pub type GameTime = f64;
