// Arpeggiator worker - cycles through the held notes at a fixed step

use super::{
    InputResponse, KeyboardAction, Payload, Sample, Waveform, Worker, WorkerCommand, WorkerCore,
    WorkerKind, snap_resolution,
};
use crate::midi::{MidiMessage, OutputBinding};
use crate::timing::{TICKS_PER_QUARTER, Tick};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub const MAX_OCTAVES: u8 = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArpPattern {
    #[default]
    Up,
    Down,
    UpDown,
    AsPlayed,
    Random,
}

pub struct Arpeggiator {
    core: WorkerCore,
    pattern: ArpPattern,
    octaves: u8,
    note_length: Tick,
    transpose: i32,
    latch: bool,

    /// Keys physically down, in play order
    pressed: Vec<u8>,
    /// Notes being arpeggiated with their velocity, in play order
    notes: Vec<(u8, u8)>,
    sequence: Vec<(u8, u8)>,
    index: usize,
    rng: StdRng,
}

impl Arpeggiator {
    pub fn new(binding: OutputBinding) -> Self {
        Self {
            core: WorkerCore::new(binding, 4, 1),
            pattern: ArpPattern::Up,
            octaves: 1,
            note_length: TICKS_PER_QUARTER / 8,
            transpose: 0,
            latch: false,
            pressed: Vec::new(),
            notes: Vec::new(),
            sequence: Vec::new(),
            index: 0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn held_notes(&self) -> Vec<u8> {
        self.notes.iter().map(|&(note, _)| note).collect()
    }

    /// The notes one full arpeggio cycle plays
    pub fn sequence(&self) -> Vec<u8> {
        self.sequence.iter().map(|&(note, _)| note).collect()
    }

    fn rebuild(&mut self) {
        let octaves = |notes: &[(u8, u8)]| -> Vec<(u8, u8)> {
            (0..self.octaves)
                .flat_map(|octave| {
                    notes.iter().filter_map(move |&(note, velocity)| {
                        let shifted = note as u16 + 12 * octave as u16;
                        (shifted <= 127).then_some((shifted as u8, velocity))
                    })
                })
                .collect()
        };

        let mut sorted = self.notes.clone();
        sorted.sort_by_key(|&(note, _)| note);

        self.sequence = match self.pattern {
            ArpPattern::Up | ArpPattern::Random => octaves(&sorted),
            ArpPattern::Down => {
                let mut notes = octaves(&sorted);
                notes.reverse();
                notes
            }
            ArpPattern::UpDown => {
                let up = octaves(&sorted);
                let inner = up.len().saturating_sub(2);
                let down = up.iter().rev().skip(1).take(inner).copied().collect::<Vec<_>>();
                up.into_iter().chain(down).collect()
            }
            ArpPattern::AsPlayed => octaves(&self.notes),
        };

        if self.sequence.is_empty() {
            self.index = 0;
        }
    }

    fn press(&mut self, note: u8, velocity: u8) -> InputResponse {
        let held_before = self.pressed.len();
        if self.latch && held_before == 0 {
            self.notes.clear();
        }
        if !self.pressed.contains(&note) {
            self.pressed.push(note);
        }
        if !self.notes.iter().any(|&(n, _)| n == note) {
            self.notes.push((note, velocity));
        }
        self.rebuild();

        match self.core.on_note(held_before) {
            KeyboardAction::Retrigger => {
                self.index = 0;
                InputResponse::Restart
            }
            KeyboardAction::Rewind => {
                self.index = 0;
                InputResponse::Consumed
            }
            KeyboardAction::None => InputResponse::Consumed,
        }
    }

    fn release(&mut self, note: u8) -> InputResponse {
        self.pressed.retain(|&n| n != note);
        if !self.latch {
            self.notes.retain(|&(n, _)| n != note);
            self.rebuild();
        }
        InputResponse::Consumed
    }
}

impl Worker for Arpeggiator {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Arp
    }

    fn binding(&self) -> OutputBinding {
        self.core.binding
    }

    fn pull(&mut self, tick: Tick) -> Waveform {
        let step = self.core.step();
        if self.sequence.is_empty() {
            return Waveform::empty(step);
        }

        let (note, velocity) = match self.pattern {
            ArpPattern::Random => self.sequence[self.rng.gen_range(0..self.sequence.len())],
            _ => self.sequence[self.index % self.sequence.len()],
        };
        self.index = (self.index + 1) % self.sequence.len();

        Waveform::single(
            Sample {
                tick,
                payload: Payload::Note {
                    note: (note as i32 + self.transpose).clamp(0, 127) as u8,
                    velocity,
                    length: self.note_length,
                },
                muted: false,
            },
            step,
        )
    }

    fn handle_input(&mut self, message: &MidiMessage, _tick: Tick) -> InputResponse {
        if !self.core.filter.matches(message) {
            return InputResponse::Ignored;
        }
        match *message {
            MidiMessage::NoteOn { note, velocity, .. } => self.press(note, velocity),
            MidiMessage::NoteOff { note, .. } => self.release(note),
            _ => InputResponse::Ignored,
        }
    }

    fn apply(&mut self, command: WorkerCommand) {
        if self.core.apply(&command) {
            return;
        }
        match command {
            WorkerCommand::SetResolution(resolution) => {
                self.core.resolution = snap_resolution(resolution)
            }
            WorkerCommand::SetNoteLength(length) => {
                self.note_length = length.clamp(1, TICKS_PER_QUARTER * 4)
            }
            WorkerCommand::SetTranspose(transpose) => self.transpose = transpose.clamp(-24, 24),
            WorkerCommand::SetArpPattern(pattern) => {
                self.pattern = pattern;
                self.rebuild();
            }
            WorkerCommand::SetOctaves(octaves) => {
                self.octaves = octaves.clamp(1, MAX_OCTAVES);
                self.rebuild();
            }
            WorkerCommand::SetLatch(latch) => {
                self.latch = latch;
                if !latch {
                    let pressed = self.pressed.clone();
                    self.notes.retain(|(n, _)| pressed.contains(n));
                    self.rebuild();
                }
            }
            _ => {}
        }
    }

    fn is_muted(&self) -> bool {
        self.core.muted
    }

    fn accepts_groove(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.index = 0;
    }

    fn step_ticks(&self) -> Tick {
        self.core.step()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::TriggerMode;

    fn arp() -> Arpeggiator {
        Arpeggiator::new(OutputBinding::new(0, 0))
    }

    fn on(note: u8) -> MidiMessage {
        MidiMessage::NoteOn {
            channel: 0,
            note,
            velocity: 100,
        }
    }

    fn off(note: u8) -> MidiMessage {
        MidiMessage::NoteOff {
            channel: 0,
            note,
            velocity: 0,
        }
    }

    fn hold(arp: &mut Arpeggiator, notes: &[u8]) {
        for &note in notes {
            arp.handle_input(&on(note), 0);
        }
    }

    #[test]
    fn test_empty_arp_still_advances() {
        let mut arp = arp();
        let wave = arp.pull(0);
        assert!(wave.samples.is_empty());
        assert_eq!(wave.length, 48);
    }

    #[test]
    fn test_up_pattern() {
        let mut arp = arp();
        hold(&mut arp, &[64, 60, 67]);
        assert_eq!(arp.sequence(), vec![60, 64, 67]);

        let played: Vec<u8> = (0..4)
            .map(|i| match arp.pull(i * 48).samples[0].payload {
                Payload::Note { note, .. } => note,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(played, vec![60, 64, 67, 60]);
    }

    #[test]
    fn test_patterns() {
        let mut arp = arp();
        hold(&mut arp, &[64, 60, 67]);

        arp.apply(WorkerCommand::SetArpPattern(ArpPattern::Down));
        assert_eq!(arp.sequence(), vec![67, 64, 60]);

        arp.apply(WorkerCommand::SetArpPattern(ArpPattern::UpDown));
        assert_eq!(arp.sequence(), vec![60, 64, 67, 64]);

        arp.apply(WorkerCommand::SetArpPattern(ArpPattern::AsPlayed));
        assert_eq!(arp.sequence(), vec![64, 60, 67]);
    }

    #[test]
    fn test_octaves() {
        let mut arp = arp();
        hold(&mut arp, &[60, 64]);
        arp.apply(WorkerCommand::SetOctaves(2));
        assert_eq!(arp.sequence(), vec![60, 64, 72, 76]);

        arp.apply(WorkerCommand::SetOctaves(99));
        assert_eq!(arp.sequence().len(), 8);
    }

    #[test]
    fn test_release_removes_note() {
        let mut arp = arp();
        hold(&mut arp, &[60, 64]);
        arp.handle_input(&off(60), 10);
        assert_eq!(arp.held_notes(), vec![64]);
        arp.handle_input(&off(64), 20);
        assert!(arp.pull(48).samples.is_empty());
    }

    #[test]
    fn test_latch() {
        let mut arp = arp();
        arp.apply(WorkerCommand::SetLatch(true));
        hold(&mut arp, &[60, 64]);
        arp.handle_input(&off(60), 10);
        arp.handle_input(&off(64), 10);
        assert_eq!(arp.held_notes(), vec![60, 64]);

        // A new chord after releasing everything replaces the latched one
        hold(&mut arp, &[62]);
        assert_eq!(arp.held_notes(), vec![62]);

        arp.handle_input(&off(62), 30);
        arp.apply(WorkerCommand::SetLatch(false));
        assert!(arp.held_notes().is_empty());
    }

    #[test]
    fn test_trigger_and_legato() {
        let mut arp = arp();
        arp.apply(WorkerCommand::SetTriggerMode(TriggerMode::Trigger));
        assert_eq!(arp.handle_input(&on(60), 0), InputResponse::Restart);
        assert_eq!(arp.handle_input(&on(64), 5), InputResponse::Consumed);

        arp.apply(WorkerCommand::SetLegato(true));
        assert_eq!(arp.handle_input(&on(67), 9), InputResponse::Restart);
    }

    #[test]
    fn test_accepts_groove() {
        assert!(arp().accepts_groove());
    }
}
