// Input filter - decides whether an incoming message belongs to a worker

use super::event::MidiMessage;
use serde::{Deserialize, Serialize};

/// Channel, note range and velocity range a worker listens to
///
/// Controllers are matched on channel only; real-time messages never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFilter {
    pub channel: u8,
    pub note_low: u8,
    pub note_high: u8,
    pub velocity_low: u8,
    pub velocity_high: u8,
}

impl InputFilter {
    pub fn new(channel: u8) -> Self {
        Self {
            channel: channel.min(15),
            ..Self::default()
        }
    }

    /// Restrict the accepted note range (bounds are clamped to 0-127 and sorted)
    pub fn with_notes(mut self, low: u8, high: u8) -> Self {
        let (low, high) = sorted(low.min(127), high.min(127));
        self.note_low = low;
        self.note_high = high;
        self
    }

    /// Restrict the accepted velocity range (bounds are clamped to 0-127 and sorted)
    pub fn with_velocities(mut self, low: u8, high: u8) -> Self {
        let (low, high) = sorted(low.min(127), high.min(127));
        self.velocity_low = low;
        self.velocity_high = high;
        self
    }

    pub fn matches(&self, message: &MidiMessage) -> bool {
        match *message {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => {
                channel == self.channel
                    && (self.note_low..=self.note_high).contains(&note)
                    && (self.velocity_low..=self.velocity_high).contains(&velocity)
            }
            // Releases are not velocity filtered, otherwise notes could hang
            MidiMessage::NoteOff { channel, note, .. } => {
                channel == self.channel && (self.note_low..=self.note_high).contains(&note)
            }
            MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => channel == self.channel,
            _ => false,
        }
    }
}

impl Default for InputFilter {
    fn default() -> Self {
        Self {
            channel: 0,
            note_low: 0,
            note_high: 127,
            velocity_low: 0,
            velocity_high: 127,
        }
    }
}

fn sorted(a: u8, b: u8) -> (u8, u8) {
    if a <= b { (a, b) } else { (b, a) }
}
