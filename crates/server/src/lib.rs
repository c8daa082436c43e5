#![warn(missing_docs)]
//! Authoritative deepmine host: player admission, world streaming, relay
//! and LAN discovery answers.

pub mod lan;
pub mod multiplayer;

pub use lan::LanResponder;
pub use multiplayer::{ConnectedPlayer, Host, HostSettings, PlayerAction};
