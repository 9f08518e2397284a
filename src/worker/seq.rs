// Step sequencer worker - plays a looped note pattern, one note per step

use super::{
    InputResponse, KeyboardAction, Payload, Sample, Waveform, Worker, WorkerCommand, WorkerCore,
    WorkerKind, snap_resolution,
};
use crate::midi::{MidiMessage, OutputBinding};
use crate::timing::{TICKS_PER_QUARTER, Tick};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Base note for note-in transposition
const TRANSPOSE_BASE: i32 = 60;
const MAX_TRANSPOSE: i32 = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopMode {
    #[default]
    Forward,
    Backward,
    BounceForward,
    BounceBackward,
    OnceForward,
    OnceBackward,
    Random,
}

impl LoopMode {
    pub const ALL: [LoopMode; 7] = [
        LoopMode::Forward,
        LoopMode::Backward,
        LoopMode::BounceForward,
        LoopMode::BounceBackward,
        LoopMode::OnceForward,
        LoopMode::OnceBackward,
        LoopMode::Random,
    ];

    fn starts_backward(self) -> bool {
        matches!(
            self,
            LoopMode::Backward | LoopMode::BounceBackward | LoopMode::OnceBackward
        )
    }
}

pub struct StepSequencer {
    core: WorkerCore,
    notes: Vec<u8>,
    mute_mask: Vec<bool>,
    velocity: u8,
    note_length: Tick,
    transpose: i32,
    loop_mode: LoopMode,
    /// Played steps before looping, negative bounces at the marker
    loop_marker: i32,

    position: usize,
    forward: bool,
    finished: bool,
    played_in_cycle: usize,

    recording: bool,
    record_step: usize,
    note_in: bool,
    velocity_in: bool,
    stop_on_release: bool,
    held: usize,
    released: bool,

    defer_changes: bool,
    pending: Vec<WorkerCommand>,
    rng: StdRng,
}

impl StepSequencer {
    pub fn new(binding: OutputBinding) -> Self {
        let core = WorkerCore::new(binding, 4, 1);
        let steps = core.pattern_steps();
        Self {
            core,
            notes: vec![TRANSPOSE_BASE as u8; steps],
            mute_mask: vec![false; steps],
            velocity: 100,
            note_length: TICKS_PER_QUARTER / 8,
            transpose: 0,
            loop_mode: LoopMode::Forward,
            loop_marker: 0,
            position: 0,
            forward: true,
            finished: false,
            played_in_cycle: 0,
            recording: false,
            record_step: 0,
            note_in: false,
            velocity_in: false,
            stop_on_release: false,
            held: 0,
            released: false,
            defer_changes: false,
            pending: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Build a sequencer with the given pattern notes
    pub fn with_notes(binding: OutputBinding, notes: &[u8]) -> Self {
        let mut seq = Self::new(binding);
        for (index, &note) in notes.iter().enumerate().take(seq.notes.len()) {
            seq.notes[index] = note.min(127);
        }
        seq
    }

    pub fn notes(&self) -> &[u8] {
        &self.notes
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn transpose(&self) -> i32 {
        self.transpose
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn pending_changes(&self) -> usize {
        self.pending.len()
    }

    pub fn loop_marker(&self) -> i32 {
        self.loop_marker
    }

    /// Steps played per cycle, bounded by the loop marker
    fn play_len(&self) -> usize {
        let marker = self.loop_marker.unsigned_abs() as usize;
        if marker > 0 && marker < self.notes.len() {
            marker
        } else {
            self.notes.len()
        }
    }

    fn bounces(&self) -> bool {
        match self.loop_mode {
            LoopMode::BounceForward | LoopMode::BounceBackward => true,
            LoopMode::Forward | LoopMode::Backward => self.loop_marker < 0,
            _ => false,
        }
    }

    fn advance(&mut self) {
        let len = self.play_len();
        if len <= 1 {
            if matches!(self.loop_mode, LoopMode::OnceForward | LoopMode::OnceBackward) {
                self.finished = true;
            }
            return;
        }
        let last = len - 1;

        if self.bounces() {
            self.position = if self.forward {
                if self.position >= last {
                    self.forward = false;
                    last - 1
                } else {
                    self.position + 1
                }
            } else if self.position == 0 {
                self.forward = true;
                1
            } else {
                (self.position - 1).min(last)
            };
            return;
        }

        self.position = match self.loop_mode {
            LoopMode::Forward => (self.position + 1) % len,
            LoopMode::Backward => {
                if self.position == 0 || self.position > last {
                    last
                } else {
                    self.position - 1
                }
            }
            LoopMode::OnceForward => {
                if self.position >= last {
                    self.finished = true;
                    self.position
                } else {
                    self.position + 1
                }
            }
            LoopMode::OnceBackward => {
                if self.position == 0 {
                    self.finished = true;
                    0
                } else {
                    (self.position - 1).min(last)
                }
            }
            LoopMode::Random => self.rng.gen_range(0..len),
            LoopMode::BounceForward | LoopMode::BounceBackward => self.position,
        };
    }

    fn end_of_cycle(&mut self) {
        self.played_in_cycle = 0;
        let pending = std::mem::take(&mut self.pending);
        for command in pending {
            self.apply_now(command);
        }
    }

    fn is_deferrable(command: &WorkerCommand) -> bool {
        matches!(
            command,
            WorkerCommand::SetStep { .. }
                | WorkerCommand::ToggleMuteStep(_)
                | WorkerCommand::SetSize(_)
                | WorkerCommand::SetResolution(_)
                | WorkerCommand::SetLoopMode(_)
                | WorkerCommand::SetLoopMarker(_)
        )
    }

    fn apply_now(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::SetTranspose(transpose) => {
                self.transpose = transpose.clamp(-MAX_TRANSPOSE, MAX_TRANSPOSE)
            }
            WorkerCommand::SetVelocity(velocity) => self.velocity = velocity.clamp(1, 127),
            WorkerCommand::SetNoteLength(length) => {
                self.note_length = length.clamp(1, TICKS_PER_QUARTER * 4)
            }
            WorkerCommand::SetResolution(resolution) => {
                self.core.resolution = snap_resolution(resolution);
                self.resize();
            }
            WorkerCommand::SetSize(size) => {
                self.core.size = size.clamp(1, super::MAX_SIZE);
                self.resize();
            }
            WorkerCommand::SetLoopMode(mode) => {
                self.loop_mode = mode;
                self.reset();
            }
            WorkerCommand::SetLoopMarker(marker) => {
                let limit = self.notes.len() as i32 - 1;
                self.loop_marker = marker.clamp(-limit, limit);
                if self.position >= self.play_len() {
                    self.position = 0;
                    self.forward = true;
                }
            }
            WorkerCommand::SetStep { index, note } => {
                if let Some(step) = self.notes.get_mut(index) {
                    *step = note.min(127);
                }
            }
            WorkerCommand::ToggleMuteStep(index) => {
                if let Some(muted) = self.mute_mask.get_mut(index) {
                    *muted = !*muted;
                }
            }
            WorkerCommand::SetRecord(on) => {
                self.recording = on;
                self.record_step = 0;
            }
            WorkerCommand::ToggleRecord => {
                self.recording = !self.recording;
                self.record_step = 0;
            }
            WorkerCommand::SetNoteIn(on) => self.note_in = on,
            WorkerCommand::SetVelocityIn(on) => self.velocity_in = on,
            WorkerCommand::SetStopOnRelease(on) => {
                self.stop_on_release = on;
                self.released = false;
            }
            WorkerCommand::SetDeferChanges(on) => {
                self.defer_changes = on;
                if !on {
                    self.end_of_cycle();
                }
            }
            _ => {}
        }
    }

    fn resize(&mut self) {
        let steps = self.core.pattern_steps();
        let old = self.notes.clone();
        self.notes = (0..steps).map(|i| old[i % old.len().max(1)]).collect();
        let mask = self.mute_mask.clone();
        self.mute_mask = (0..steps)
            .map(|i| mask.get(i % mask.len().max(1)).copied().unwrap_or(false))
            .collect();
        if self.position >= steps {
            self.position = 0;
        }
        self.record_step %= steps;
    }

    fn reacts_to_notes(&self) -> bool {
        self.note_in
            || self.velocity_in
            || self.stop_on_release
            || self.core.trigger != super::TriggerMode::Free
    }
}

impl Worker for StepSequencer {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Seq
    }

    fn binding(&self) -> OutputBinding {
        self.core.binding
    }

    fn pull(&mut self, tick: Tick) -> Waveform {
        let step = self.core.step();
        if self.finished || self.released {
            return Waveform::empty(step);
        }

        let note = (self.notes[self.position] as i32 + self.transpose).clamp(0, 127) as u8;
        let sample = Sample {
            tick,
            payload: Payload::Note {
                note,
                velocity: self.velocity,
                length: self.note_length,
            },
            muted: self.mute_mask[self.position],
        };

        self.advance();
        self.played_in_cycle += 1;
        if self.played_in_cycle >= self.play_len() {
            self.end_of_cycle();
        }
        Waveform::single(sample, step)
    }

    fn handle_input(&mut self, message: &MidiMessage, _tick: Tick) -> InputResponse {
        if !self.core.filter.matches(message) {
            return InputResponse::Ignored;
        }

        match *message {
            MidiMessage::NoteOn { note, velocity, .. } => {
                if self.recording {
                    self.notes[self.record_step] = note;
                    self.record_step = (self.record_step + 1) % self.notes.len();
                    return InputResponse::Consumed;
                }
                if !self.reacts_to_notes() {
                    return InputResponse::Ignored;
                }

                let held_before = self.held;
                self.held += 1;
                self.released = false;
                if self.note_in {
                    self.transpose =
                        (note as i32 - TRANSPOSE_BASE).clamp(-MAX_TRANSPOSE, MAX_TRANSPOSE);
                }
                if self.velocity_in {
                    self.velocity = velocity.max(1);
                }

                match self.core.on_note(held_before) {
                    KeyboardAction::Retrigger => {
                        self.reset();
                        InputResponse::Restart
                    }
                    KeyboardAction::Rewind => {
                        self.reset();
                        InputResponse::Consumed
                    }
                    KeyboardAction::None => InputResponse::Consumed,
                }
            }
            MidiMessage::NoteOff { .. } => {
                if self.recording || !self.reacts_to_notes() {
                    return InputResponse::Ignored;
                }
                self.held = self.held.saturating_sub(1);
                if self.stop_on_release && self.held == 0 {
                    self.released = true;
                }
                InputResponse::Consumed
            }
            _ => InputResponse::Ignored,
        }
    }

    fn apply(&mut self, command: WorkerCommand) {
        if self.core.apply(&command) {
            return;
        }
        if self.defer_changes && Self::is_deferrable(&command) {
            self.pending.push(command);
            return;
        }
        self.apply_now(command);
    }

    fn is_muted(&self) -> bool {
        self.core.muted
    }

    fn reset(&mut self) {
        let backward = self.loop_mode.starts_backward();
        self.position = if backward { self.play_len() - 1 } else { 0 };
        self.forward = !backward;
        self.finished = false;
        self.played_in_cycle = 0;
    }

    fn step_ticks(&self) -> Tick {
        self.core.step()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::TriggerMode;

    fn seq() -> StepSequencer {
        StepSequencer::with_notes(OutputBinding::new(0, 1), &[60, 62, 64, 65])
    }

    fn note_of(wave: &Waveform) -> Option<u8> {
        wave.samples.first().map(|s| match s.payload {
            Payload::Note { note, .. } => note,
            _ => panic!("Expected note payload"),
        })
    }

    fn play(seq: &mut StepSequencer, count: usize) -> Vec<Option<u8>> {
        (0..count)
            .map(|i| note_of(&seq.pull(i as Tick * 48)))
            .collect()
    }

    fn note_on(note: u8) -> MidiMessage {
        MidiMessage::NoteOn {
            channel: 1,
            note,
            velocity: 80,
        }
    }

    fn note_off(note: u8) -> MidiMessage {
        MidiMessage::NoteOff {
            channel: 1,
            note,
            velocity: 0,
        }
    }

    #[test]
    fn test_forward_loop() {
        let mut seq = seq();
        let notes = play(&mut seq, 6);
        assert_eq!(
            notes,
            vec![Some(60), Some(62), Some(64), Some(65), Some(60), Some(62)]
        );
    }

    #[test]
    fn test_backward_loop() {
        let mut seq = seq();
        seq.apply(WorkerCommand::SetLoopMode(LoopMode::Backward));
        let notes = play(&mut seq, 5);
        assert_eq!(
            notes,
            vec![Some(65), Some(64), Some(62), Some(60), Some(65)]
        );
    }

    #[test]
    fn test_bounce_loop() {
        let mut seq = seq();
        seq.apply(WorkerCommand::SetLoopMode(LoopMode::BounceForward));
        let notes: Vec<u8> = play(&mut seq, 8).into_iter().flatten().collect();
        assert_eq!(notes, vec![60, 62, 64, 65, 64, 62, 60, 62]);
    }

    #[test]
    fn test_once_forward_stops_but_still_advances() {
        let mut seq = seq();
        seq.apply(WorkerCommand::SetLoopMode(LoopMode::OnceForward));
        let notes = play(&mut seq, 6);
        assert_eq!(
            notes,
            vec![Some(60), Some(62), Some(64), Some(65), None, None]
        );
        assert_eq!(seq.pull(1_000).length, 48);
    }

    #[test]
    fn test_random_stays_in_pattern() {
        let mut seq = seq();
        seq.apply(WorkerCommand::SetLoopMode(LoopMode::Random));
        for note in play(&mut seq, 50).into_iter().flatten() {
            assert!([60, 62, 64, 65].contains(&note));
        }
    }

    #[test]
    fn test_transpose_and_clamping() {
        let mut seq = seq();
        seq.apply(WorkerCommand::SetTranspose(100));
        assert_eq!(seq.transpose(), MAX_TRANSPOSE);
        assert_eq!(note_of(&seq.pull(0)), Some(84));

        seq.apply(WorkerCommand::SetVelocity(0));
        assert_eq!(seq.velocity(), 1);
    }

    #[test]
    fn test_step_recording() {
        let mut seq = seq();
        seq.apply(WorkerCommand::SetRecord(true));
        assert_eq!(seq.handle_input(&note_on(48), 0), InputResponse::Consumed);
        assert_eq!(seq.handle_input(&note_on(50), 10), InputResponse::Consumed);
        assert_eq!(seq.notes(), &[48, 50, 64, 65]);
    }

    #[test]
    fn test_note_in_transposes() {
        let mut seq = seq();
        assert_eq!(seq.handle_input(&note_on(67), 0), InputResponse::Ignored);

        seq.apply(WorkerCommand::SetNoteIn(true));
        seq.apply(WorkerCommand::SetVelocityIn(true));
        assert_eq!(seq.handle_input(&note_on(67), 0), InputResponse::Consumed);
        assert_eq!(seq.transpose(), 7);
        assert_eq!(seq.velocity(), 80);
    }

    #[test]
    fn test_stop_on_release() {
        let mut seq = seq();
        seq.apply(WorkerCommand::SetStopOnRelease(true));
        seq.handle_input(&note_on(60), 0);
        assert!(note_of(&seq.pull(0)).is_some());

        seq.handle_input(&note_off(60), 10);
        let wave = seq.pull(48);
        assert!(wave.samples.is_empty());
        assert_eq!(wave.length, 48);

        seq.handle_input(&note_on(60), 60);
        assert!(note_of(&seq.pull(96)).is_some());
    }

    #[test]
    fn test_trigger_restarts() {
        let mut seq = seq();
        seq.apply(WorkerCommand::SetTriggerMode(TriggerMode::Trigger));
        play(&mut seq, 2);
        assert_eq!(seq.handle_input(&note_on(60), 100), InputResponse::Restart);
        assert_eq!(seq.position(), 0);
    }

    #[test]
    fn test_deferred_changes_apply_at_pattern_end() {
        let mut seq = seq();
        seq.apply(WorkerCommand::SetDeferChanges(true));
        seq.pull(0);
        seq.apply(WorkerCommand::SetStep { index: 0, note: 72 });
        assert_eq!(seq.pending_changes(), 1);
        assert_eq!(seq.notes()[0], 60);

        play(&mut seq, 3);
        assert_eq!(seq.pending_changes(), 0);
        assert_eq!(seq.notes()[0], 72);
    }

    #[test]
    fn test_loop_marker_bounds_played_steps() {
        let mut seq = seq();
        seq.apply(WorkerCommand::SetLoopMarker(2));
        let notes: Vec<u8> = play(&mut seq, 5).into_iter().flatten().collect();
        assert_eq!(notes, vec![60, 62, 60, 62, 60]);

        seq.apply(WorkerCommand::SetLoopMarker(99));
        assert_eq!(seq.loop_marker(), 3);
    }

    #[test]
    fn test_negative_loop_marker_bounces() {
        let mut seq = seq();
        seq.apply(WorkerCommand::SetLoopMarker(-3));
        let notes: Vec<u8> = play(&mut seq, 6).into_iter().flatten().collect();
        assert_eq!(notes, vec![60, 62, 64, 62, 60, 62]);
    }

    #[test]
    fn test_record_toggle() {
        let mut seq = seq();
        seq.apply(WorkerCommand::ToggleRecord);
        assert_eq!(seq.handle_input(&note_on(48), 0), InputResponse::Consumed);
        seq.apply(WorkerCommand::ToggleRecord);
        assert_eq!(seq.handle_input(&note_on(50), 0), InputResponse::Ignored);
        assert_eq!(seq.notes(), &[48, 62, 64, 65]);
    }

    #[test]
    fn test_resize_repeats_pattern() {
        let mut seq = seq();
        seq.apply(WorkerCommand::SetSize(2));
        assert_eq!(seq.notes(), &[60, 62, 64, 65, 60, 62, 64, 65]);
    }
}
