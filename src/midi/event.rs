// MIDI message types - parsing incoming bytes and encoding outgoing ones

use serde::{Deserialize, Serialize};

/// A channel or real-time MIDI message understood by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    /// 14-bit value centred on 8192
    PitchBend { channel: u8, value: u16 },
    /// MIDI clock pulse, 24 per quarter note
    Clock,
    Start,
    Continue,
    Stop,
}

impl MidiMessage {
    /// Parse a raw MIDI message
    ///
    /// Running status and SysEx are not supported; unknown or truncated
    /// messages yield `None`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        let channel = status & 0x0F;

        match status {
            0xF8 => return Some(MidiMessage::Clock),
            0xFA => return Some(MidiMessage::Start),
            0xFB => return Some(MidiMessage::Continue),
            0xFC => return Some(MidiMessage::Stop),
            _ => {}
        }

        match status & 0xF0 {
            0x90 => {
                let (note, velocity) = data_pair(bytes)?;
                // Velocity 0 = Note Off
                if velocity == 0 {
                    Some(MidiMessage::NoteOff {
                        channel,
                        note,
                        velocity: 0,
                    })
                } else {
                    Some(MidiMessage::NoteOn {
                        channel,
                        note,
                        velocity,
                    })
                }
            }
            0x80 => {
                let (note, velocity) = data_pair(bytes)?;
                Some(MidiMessage::NoteOff {
                    channel,
                    note,
                    velocity,
                })
            }
            0xB0 => {
                let (controller, value) = data_pair(bytes)?;
                Some(MidiMessage::ControlChange {
                    channel,
                    controller,
                    value,
                })
            }
            0xC0 => {
                let program = data_byte(bytes.get(1).copied()?)?;
                Some(MidiMessage::ProgramChange { channel, program })
            }
            0xE0 => {
                let (lsb, msb) = data_pair(bytes)?;
                Some(MidiMessage::PitchBend {
                    channel,
                    value: ((msb as u16) << 7) | lsb as u16,
                })
            }
            _ => None,
        }
    }

    /// Encode into wire bytes, returning the buffer and the used length
    pub fn encode(&self) -> ([u8; 3], usize) {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => ([0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F], 3),
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => ([0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F], 3),
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => ([0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F], 3),
            MidiMessage::ProgramChange { channel, program } => {
                ([0xC0 | (channel & 0x0F), program & 0x7F, 0], 2)
            }
            MidiMessage::PitchBend { channel, value } => (
                [
                    0xE0 | (channel & 0x0F),
                    (value & 0x7F) as u8,
                    ((value >> 7) & 0x7F) as u8,
                ],
                3,
            ),
            MidiMessage::Clock => ([0xF8, 0, 0], 1),
            MidiMessage::Start => ([0xFA, 0, 0], 1),
            MidiMessage::Continue => ([0xFB, 0, 0], 1),
            MidiMessage::Stop => ([0xFC, 0, 0], 1),
        }
    }

    /// Channel of a channel-voice message (0-15), `None` for real-time messages
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// True for clock, start, continue and stop
    pub fn is_realtime(&self) -> bool {
        matches!(
            self,
            MidiMessage::Clock | MidiMessage::Start | MidiMessage::Continue | MidiMessage::Stop
        )
    }
}

fn data_byte(byte: u8) -> Option<u8> {
    (byte < 0x80).then_some(byte)
}

fn data_pair(bytes: &[u8]) -> Option<(u8, u8)> {
    if bytes.len() < 3 {
        return None;
    }
    Some((data_byte(bytes[1])?, data_byte(bytes[2])?))
}
