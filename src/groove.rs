// Groove - swing timing and accent velocity applied to outgoing events
//
// Stateless: the perturbation depends only on the settings and the event's
// own tick and step spacing.

use crate::worker::{OutputEvent, Payload};
use serde::{Deserialize, Serialize};

pub const MAX_GROOVE_LENGTH: u32 = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrooveSettings {
    /// Timing shift of odd steps in percent of half a step (-100..=100)
    pub tick: i32,
    /// Velocity accent in percent (-100..=100)
    pub velocity: i32,
    /// Steps in one groove cycle, 0 disables groove
    pub length: u32,
}

impl GrooveSettings {
    pub fn new(tick: i32, velocity: i32, length: u32) -> Self {
        Self {
            tick: tick.clamp(-100, 100),
            velocity: velocity.clamp(-100, 100),
            length: length.min(MAX_GROOVE_LENGTH),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.length > 0 && (self.tick != 0 || self.velocity != 0)
    }

    /// Perturb an event. Events that do not accept groove pass unchanged.
    pub fn apply(&self, mut event: OutputEvent) -> OutputEvent {
        if !event.grooves || !self.is_enabled() || event.step == 0 {
            return event;
        }

        let position = (event.tick / event.step) % self.length as u64;
        let odd = position % 2 == 1;

        if odd {
            let shift = event.step as i64 * self.tick as i64 / 200;
            event.tick = (event.tick as i64 + shift).max(0) as u64;
        }

        if let Payload::Note { velocity, .. } = &mut event.payload {
            let factor = if odd {
                1.0 - self.velocity as f64 / 200.0
            } else {
                1.0 + self.velocity as f64 / 200.0
            };
            *velocity = (*velocity as f64 * factor).round().clamp(1.0, 127.0) as u8;
        }

        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::OutputBinding;
    use crate::worker::WorkerId;

    fn note_event(tick: u64, velocity: u8) -> OutputEvent {
        OutputEvent {
            worker: WorkerId::default(),
            tick,
            payload: Payload::Note {
                note: 60,
                velocity,
                length: 24,
            },
            muted: false,
            binding: OutputBinding::default(),
            step: 48,
            grooves: true,
        }
    }

    fn velocity_of(event: &OutputEvent) -> u8 {
        match event.payload {
            Payload::Note { velocity, .. } => velocity,
            _ => panic!("Expected note payload"),
        }
    }

    #[test]
    fn test_disabled_by_zero_length() {
        let groove = GrooveSettings::new(50, 50, 0);
        let event = note_event(48, 100);
        assert_eq!(groove.apply(event), event);
    }

    #[test]
    fn test_odd_steps_are_shifted() {
        let groove = GrooveSettings::new(100, 0, 2);
        assert_eq!(groove.apply(note_event(0, 100)).tick, 0);
        // Full swing moves odd steps by half a step
        assert_eq!(groove.apply(note_event(48, 100)).tick, 72);
        assert_eq!(groove.apply(note_event(96, 100)).tick, 96);

        let groove = GrooveSettings::new(-50, 0, 2);
        assert_eq!(groove.apply(note_event(48, 100)).tick, 36);
    }

    #[test]
    fn test_velocity_accent() {
        let groove = GrooveSettings::new(0, 50, 2);
        assert_eq!(velocity_of(&groove.apply(note_event(0, 100))), 125);
        assert_eq!(velocity_of(&groove.apply(note_event(48, 100))), 75);
    }

    #[test]
    fn test_velocity_is_clamped() {
        let groove = GrooveSettings::new(0, 100, 2);
        assert_eq!(velocity_of(&groove.apply(note_event(0, 120))), 127);

        let groove = GrooveSettings::new(0, 100, 2);
        assert_eq!(velocity_of(&groove.apply(note_event(48, 100))), 1);
    }

    #[test]
    fn test_non_groove_workers_untouched() {
        let groove = GrooveSettings::new(100, 100, 2);
        let mut event = note_event(48, 100);
        event.grooves = false;
        assert_eq!(groove.apply(event), event);
    }

    #[test]
    fn test_settings_are_clamped() {
        let groove = GrooveSettings::new(500, -500, 1_000);
        assert_eq!(groove.tick, 100);
        assert_eq!(groove.velocity, -100);
        assert_eq!(groove.length, MAX_GROOVE_LENGTH);
    }
}
