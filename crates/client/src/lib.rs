#![warn(missing_docs)]
//! Client façade: screen flow plus the multiplayer driver.

pub mod multiplayer;
pub mod phase;

pub use multiplayer::{ClientError, LocalPlayer, MultiplayerClient};
pub use phase::{ClientPhase, PhaseInput};
