//! Remote entity motion reconstruction.
//!
//! Position updates arrive unreliably at roughly the send cadence. Each remote
//! player keeps a short history of `(position, local receive time)` samples
//! and is drawn by interpolating between the two newest ones. Nothing is ever
//! extrapolated: a stalled stream holds at the newest sample.

use crate::protocol::{PlayerId, PlayerState};
use bitflags::bitflags;
use deepmine_core::{GameTime, PlayerTeam, PlayerTool};
use glam::Vec3;
use std::collections::VecDeque;
use tracing::trace;

/// Samples kept per remote entity.
pub const SAMPLE_CAPACITY: usize = 10;

/// Seconds a ping pulse stays visible.
pub const PING_PULSE_SECONDS: GameTime = 1.0;

/// Interpolate over `samples` (oldest first) at local time `now`.
///
/// The time scale is the mean spacing `(newest.t - oldest.t) / (len - 1)`;
/// the result lies on the segment from the second-newest to the newest
/// sample. A single sample, or a zero time scale, yields the newest position.
pub fn interpolate_samples(samples: &[(Vec3, GameTime)], now: GameTime) -> Option<Vec3> {
    let (newest_pos, newest_t) = *samples.last()?;
    if samples.len() < 2 {
        return Some(newest_pos);
    }
    let (_, oldest_t) = samples[0];
    let (second_pos, second_t) = samples[samples.len() - 2];
    let time_scale = (newest_t - oldest_t) / (samples.len() - 1) as GameTime;
    if time_scale <= 0.0 {
        return Some(newest_pos);
    }
    let fraction = ((now - second_t) / time_scale).clamp(0.0, 1.0) as f32;
    Some(second_pos + (newest_pos - second_pos) * fraction)
}

/// Bounded, insertion-ordered history of position samples.
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    samples: VecDeque<(Vec3, GameTime)>,
}

impl SampleBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(SAMPLE_CAPACITY),
        }
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether all slots are used.
    pub fn is_full(&self) -> bool {
        self.samples.len() == SAMPLE_CAPACITY
    }

    /// Most recent sample.
    pub fn newest(&self) -> Option<(Vec3, GameTime)> {
        self.samples.back().copied()
    }

    /// Oldest retained sample.
    pub fn oldest(&self) -> Option<(Vec3, GameTime)> {
        self.samples.front().copied()
    }

    /// Append a sample, evicting the oldest when full.
    ///
    /// Samples older than the newest held one are refused so times stay
    /// non-decreasing. Returns whether the sample was kept.
    pub fn push(&mut self, position: Vec3, time: GameTime) -> bool {
        if let Some((_, newest_t)) = self.newest() {
            if time < newest_t {
                trace!(time, newest_t, "refusing out-of-order sample");
                return false;
            }
        }
        if self.is_full() {
            self.samples.pop_front();
        }
        self.samples.push_back((position, time));
        true
    }

    /// Reconstructed position at `now`.
    ///
    /// Until the buffer fills, this is simply the newest sample.
    pub fn reconstruct(&mut self, now: GameTime) -> Option<Vec3> {
        if !self.is_full() {
            return self.newest().map(|(p, _)| p);
        }
        interpolate_samples(self.samples.make_contiguous(), now)
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

bitflags! {
    /// Presentation-relevant fields touched by a remote entity update.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct EntityChanges: u8 {
        /// Team changed; re-skin.
        const TEAM = 0b0000_0001;
        /// Held tool changed.
        const TOOL = 0b0000_0010;
        /// Tool-in-use flag flipped.
        const USING_TOOL = 0b0000_0100;
        /// Idle/moving animation flipped.
        const IDLE = 0b0000_1000;
    }
}

/// Another player as seen by this client.
#[derive(Debug, Clone)]
pub struct RemoteEntity {
    /// Host-assigned id.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Team membership.
    pub team: PlayerTeam,
    /// Held tool.
    pub tool: PlayerTool,
    /// Whether the tool is in use.
    pub using_tool: bool,
    /// Alive flag.
    pub alive: bool,
    /// Score.
    pub score: u32,
    /// Facing direction.
    pub heading: Vec3,
    /// Standing still.
    pub idle: bool,
    /// Remaining ping pulse time.
    pub ping_remaining: GameTime,
    /// Reconstructed position as of the last step.
    pub position: Vec3,
    samples: SampleBuffer,
}

impl RemoteEntity {
    /// Newly announced player.
    pub fn new(id: PlayerId, name: impl Into<String>, alive: bool) -> Self {
        Self {
            id,
            name: name.into(),
            team: PlayerTeam::None,
            tool: PlayerTool::Pickaxe,
            using_tool: false,
            alive,
            score: 0,
            heading: Vec3::NEG_Z,
            idle: true,
            ping_remaining: 0.0,
            position: Vec3::ZERO,
            samples: SampleBuffer::new(),
        }
    }

    /// Sample history.
    pub fn samples(&self) -> &SampleBuffer {
        &self.samples
    }

    /// Change team.
    pub fn set_team(&mut self, team: PlayerTeam) -> EntityChanges {
        if self.team == team {
            return EntityChanges::empty();
        }
        self.team = team;
        EntityChanges::TEAM
    }

    /// Change held tool and its in-use flag.
    pub fn set_tool(&mut self, tool: PlayerTool, using_tool: bool) -> EntityChanges {
        let mut changes = EntityChanges::empty();
        if self.tool != tool {
            self.tool = tool;
            changes |= EntityChanges::TOOL;
        }
        if self.using_tool != using_tool {
            self.using_tool = using_tool;
            changes |= EntityChanges::USING_TOOL;
        }
        changes
    }

    /// Apply one motion update received at local time `now`.
    pub fn apply_update(
        &mut self,
        state: &PlayerState,
        score_hundreds: u16,
        now: GameTime,
    ) -> EntityChanges {
        let mut changes = self.set_tool(state.tool, state.using_tool);
        let idle = self
            .samples
            .newest()
            .is_some_and(|(previous, _)| previous == state.position);
        if idle != self.idle {
            self.idle = idle;
            changes |= EntityChanges::IDLE;
        }
        self.samples.push(state.position, now);
        self.heading = state.heading;
        self.score = u32::from(score_hundreds) * 100;
        changes
    }

    /// Start a ping pulse.
    pub fn ping(&mut self) {
        self.ping_remaining = PING_PULSE_SECONDS;
    }

    /// Whether a ping pulse is showing.
    pub fn is_pinging(&self) -> bool {
        self.ping_remaining > 0.0
    }

    /// Advance one local tick: reconstruct the position and decay the ping.
    pub fn step(&mut self, now: GameTime, dt: GameTime) -> Vec3 {
        if let Some(position) = self.samples.reconstruct(now) {
            self.position = position;
        }
        self.ping_remaining = (self.ping_remaining - dt).max(0.0);
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_at(position: Vec3) -> PlayerState {
        PlayerState {
            position,
            heading: Vec3::X,
            tool: PlayerTool::Pickaxe,
            using_tool: false,
        }
    }

    #[test]
    fn buffer_evicts_oldest() {
        let mut buffer = SampleBuffer::new();
        for i in 0..11 {
            assert!(buffer.push(Vec3::splat(i as f32), i as f64));
        }
        assert_eq!(buffer.len(), SAMPLE_CAPACITY);
        assert_eq!(buffer.oldest(), Some((Vec3::splat(1.0), 1.0)));
        assert_eq!(buffer.newest(), Some((Vec3::splat(10.0), 10.0)));
    }

    #[test]
    fn buffer_refuses_older_samples() {
        let mut buffer = SampleBuffer::new();
        assert!(buffer.push(Vec3::ZERO, 2.0));
        assert!(!buffer.push(Vec3::ONE, 1.0));
        assert!(buffer.push(Vec3::ONE, 2.0));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn two_sample_interpolation() {
        let samples = [(Vec3::ZERO, 0.0), (Vec3::new(10.0, 0.0, 0.0), 1.0)];
        assert_eq!(
            interpolate_samples(&samples, 0.5),
            Some(Vec3::new(5.0, 0.0, 0.0))
        );
        assert_eq!(
            interpolate_samples(&samples, 1.0),
            Some(Vec3::new(10.0, 0.0, 0.0))
        );
        assert_eq!(
            interpolate_samples(&samples, 7.0),
            Some(Vec3::new(10.0, 0.0, 0.0))
        );
        // Never before the second-newest sample either.
        assert_eq!(interpolate_samples(&samples, -1.0), Some(Vec3::ZERO));
    }

    #[test]
    fn zero_time_scale_returns_newest() {
        let samples = [(Vec3::ZERO, 3.0), (Vec3::ONE, 3.0)];
        assert_eq!(interpolate_samples(&samples, 3.0), Some(Vec3::ONE));
        assert_eq!(interpolate_samples(&[], 0.0), None);
    }

    #[test]
    fn partial_buffer_jumps_to_newest() {
        let mut buffer = SampleBuffer::new();
        buffer.push(Vec3::ZERO, 0.0);
        buffer.push(Vec3::new(4.0, 0.0, 0.0), 0.1);
        assert_eq!(buffer.reconstruct(0.1), Some(Vec3::new(4.0, 0.0, 0.0)));
    }

    #[test]
    fn full_buffer_interpolates_between_newest_two() {
        let mut buffer = SampleBuffer::new();
        for i in 0..10 {
            buffer.push(Vec3::new(i as f32, 0.0, 0.0), i as f64 * 0.1);
        }
        // timeScale = 0.9 / 9 = 0.1; halfway between samples 8 and 9.
        let pos = buffer.reconstruct(0.85).unwrap();
        assert!((pos.x - 8.5).abs() < 1e-4, "got {pos}");
        // Stalled stream holds at the newest sample.
        assert_eq!(buffer.reconstruct(5.0), Some(Vec3::new(9.0, 0.0, 0.0)));
    }

    #[test]
    fn wrapped_buffer_interpolates_in_arrival_order() {
        let mut buffer = SampleBuffer::new();
        for i in 0..25 {
            buffer.push(Vec3::new(i as f32, 0.0, 0.0), i as f64 * 0.1);
            buffer.reconstruct(i as f64 * 0.1);
        }
        assert_eq!(buffer.oldest(), Some((Vec3::new(15.0, 0.0, 0.0), 15.0 * 0.1)));
        let pos = buffer.reconstruct(2.35).unwrap();
        assert!((pos.x - 23.5).abs() < 1e-3, "got {pos}");
    }

    #[test]
    fn setters_report_changes() {
        let mut entity = RemoteEntity::new(3, "digger", true);
        assert_eq!(entity.set_team(PlayerTeam::Red), EntityChanges::TEAM);
        assert_eq!(entity.set_team(PlayerTeam::Red), EntityChanges::empty());
        assert_eq!(
            entity.set_tool(PlayerTool::Detonator, true),
            EntityChanges::TOOL | EntityChanges::USING_TOOL
        );
        assert_eq!(
            entity.set_tool(PlayerTool::Detonator, true),
            EntityChanges::empty()
        );
    }

    #[test]
    fn updates_track_idle_and_score() {
        let mut entity = RemoteEntity::new(1, "a", true);
        let first = entity.apply_update(&state_at(Vec3::ONE), 3, 0.0);
        assert!(first.contains(EntityChanges::IDLE));
        assert!(!entity.idle);
        assert_eq!(entity.score, 300);

        let second = entity.apply_update(&state_at(Vec3::ONE), 3, 0.05);
        assert!(second.contains(EntityChanges::IDLE));
        assert!(entity.idle);
        assert_eq!(entity.step(0.05, 0.05), Vec3::ONE);
    }

    #[test]
    fn ping_pulse_decays() {
        let mut entity = RemoteEntity::new(1, "a", true);
        entity.ping();
        assert!(entity.is_pinging());
        entity.step(0.0, 0.6);
        assert!(entity.is_pinging());
        entity.step(0.0, 0.6);
        assert!(!entity.is_pinging());
    }
}
