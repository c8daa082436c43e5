//! Sound cue identifiers carried by play-sound messages.

use crate::wire_enum::wire_enum;

wire_enum! {
    /// One-shot sound cue. The audio collaborator maps these to assets.
    pub enum Sound {
        /// Pickaxe hitting dirt.
        DigDirt = 0,
        /// Pickaxe hitting metal.
        DigMetal = 1,
        /// Landing after a fall.
        GroundHit = 2,
        /// Ore or cash deposited.
        CashDeposit = 3,
        /// High UI click.
        ClickHigh = 4,
        /// Low UI click, also used for chat.
        ClickLow = 5,
        /// A player died.
        Death = 6,
        /// Explosive detonated.
        Explosion = 7,
        /// Teammate ping.
        Ping = 8,
        /// Radar, weak signal.
        RadarLow = 9,
        /// Radar, strong signal.
        RadarHigh = 10,
        /// Radar toggled.
        RadarSwitch = 11,
    }
}
