#![warn(missing_docs)]
//! Headless testing surfaces: an in-memory transport pair and a recording
//! event sink.

mod loopback;
mod recording;

pub use loopback::{LoopbackClient, LoopbackConfig, LoopbackHost};
pub use recording::{event_kind, EventRecord, RecordingSink};
