// LFO worker - emits a controller value every step, following a waveform
//
// The waveform covers `size` quarter notes with `resolution` points per
// quarter note. Frequency is the number of cycles per four quarter notes.

use super::{
    InputResponse, KeyboardAction, Payload, Sample, Waveform, Worker, WorkerCommand, WorkerCore,
    WorkerKind, snap_resolution,
};
use crate::midi::{MidiMessage, OutputBinding};
use crate::timing::Tick;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

pub const MIN_FREQUENCY: u32 = 1;
pub const MAX_FREQUENCY: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LfoWaveform {
    Sine,
    SawUp,
    Triangle,
    SawDown,
    Square,
    /// User drawn or recorded points
    Custom,
}

pub struct Lfo {
    core: WorkerCore,
    waveform: LfoWaveform,
    frequency: u32,
    amplitude: u8,
    offset: u8,
    controller: u8,
    recording: bool,

    custom: Vec<u8>,
    mute_mask: Vec<bool>,
    values: Vec<u8>,
    position: usize,
    held: usize,
}

impl Lfo {
    pub fn new(binding: OutputBinding, controller: u8) -> Self {
        let core = WorkerCore::new(binding, 4, 1);
        let steps = core.pattern_steps();
        let mut lfo = Self {
            core,
            waveform: LfoWaveform::Sine,
            frequency: 4,
            amplitude: 64,
            offset: 0,
            controller: controller.min(127),
            recording: false,
            custom: vec![63; steps],
            mute_mask: vec![false; steps],
            values: Vec::new(),
            position: 0,
            held: 0,
        };
        lfo.rebuild();
        lfo
    }

    pub fn waveform(&self) -> LfoWaveform {
        self.waveform
    }

    pub fn controller(&self) -> u8 {
        self.controller
    }

    /// Current waveform values, one per step
    pub fn values(&self) -> &[u8] {
        &self.values
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn rebuild(&mut self) {
        let res = self.core.resolution as i64;
        let freq = self.frequency as i64;
        let amp = self.amplitude as i64;
        let offs = self.offset as i64;
        let steps = self.core.pattern_steps();

        let mut lfoval: i64 = 0;
        let mut values = Vec::with_capacity(steps);
        for l1 in 0..steps {
            let value = match self.waveform {
                LfoWaveform::Sine => {
                    let phase = l1 as f64 * TAU / res as f64 * freq as f64 / 4.0;
                    ((-phase.cos() + 1.0) * amp as f64 / 2.0) as i64 + offs
                }
                LfoWaveform::SawUp => lfoval * amp / res / 4 + offs,
                LfoWaveform::Triangle => {
                    let distance = (lfoval - res * 2).abs();
                    (res * 2 - distance) * amp / res / 2 + offs
                }
                LfoWaveform::SawDown => (res * 4 - lfoval) * amp / res / 4 + offs,
                LfoWaveform::Square => {
                    let high = (l1 as i64 * freq / 2 / res) % 2 == 0;
                    if high { amp + offs } else { offs }
                }
                LfoWaveform::Custom => self.custom.get(l1).copied().unwrap_or(63) as i64,
            };
            values.push(value.clamp(0, 127) as u8);
            lfoval = (lfoval + freq) % (res * 4);
        }
        self.values = values;
    }

    /// Resize the custom wave and mute mask to the current pattern, repeating
    /// existing points cyclically
    fn resize(&mut self) {
        let steps = self.core.pattern_steps();
        self.custom = cycle_to(&self.custom, steps, 63);
        self.mute_mask = cycle_to(&self.mute_mask, steps, false);
        if self.position >= steps {
            self.position = 0;
        }
        self.rebuild();
    }

    fn record(&mut self, value: u8) {
        if self.waveform != LfoWaveform::Custom {
            self.custom = self.values.clone();
            self.waveform = LfoWaveform::Custom;
        }
        if let Some(point) = self.custom.get_mut(self.position) {
            *point = value;
        }
        self.rebuild();
    }
}

impl Worker for Lfo {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Lfo
    }

    fn binding(&self) -> OutputBinding {
        self.core.binding
    }

    fn pull(&mut self, tick: Tick) -> Waveform {
        let step = self.core.step();
        let Some(&value) = self.values.get(self.position) else {
            return Waveform::empty(step);
        };
        let muted = self.mute_mask.get(self.position).copied().unwrap_or(false);
        self.position = (self.position + 1) % self.values.len();

        Waveform::single(
            Sample {
                tick,
                payload: Payload::Controller {
                    controller: self.controller,
                    value,
                },
                muted,
            },
            step,
        )
    }

    fn handle_input(&mut self, message: &MidiMessage, _tick: Tick) -> InputResponse {
        if !self.core.filter.matches(message) {
            return InputResponse::Ignored;
        }

        match *message {
            MidiMessage::ControlChange {
                controller, value, ..
            } if self.recording && controller == self.controller => {
                self.record(value);
                InputResponse::Consumed
            }
            MidiMessage::NoteOn { .. } => {
                let held_before = self.held;
                self.held += 1;
                match self.core.on_note(held_before) {
                    KeyboardAction::Retrigger => {
                        self.position = 0;
                        InputResponse::Restart
                    }
                    KeyboardAction::Rewind => {
                        self.position = 0;
                        InputResponse::Consumed
                    }
                    KeyboardAction::None => InputResponse::Ignored,
                }
            }
            MidiMessage::NoteOff { .. } => {
                self.held = self.held.saturating_sub(1);
                InputResponse::Ignored
            }
            _ => InputResponse::Ignored,
        }
    }

    fn apply(&mut self, command: WorkerCommand) {
        if self.core.apply(&command) {
            return;
        }
        match command {
            WorkerCommand::SetResolution(resolution) => {
                self.core.resolution = snap_resolution(resolution);
                self.resize();
            }
            WorkerCommand::SetSize(size) => {
                self.core.size = size.clamp(1, super::MAX_SIZE);
                self.resize();
            }
            WorkerCommand::SetAmplitude(amplitude) => {
                self.amplitude = amplitude.min(127);
                self.rebuild();
            }
            WorkerCommand::SetOffset(offset) => {
                self.offset = offset.min(127);
                self.rebuild();
            }
            WorkerCommand::SetFrequency(frequency) => {
                self.frequency = frequency.clamp(MIN_FREQUENCY, MAX_FREQUENCY);
                self.rebuild();
            }
            WorkerCommand::SetWaveform(waveform) => {
                self.waveform = waveform;
                self.rebuild();
            }
            WorkerCommand::SetCustomPoint { index, value } => {
                if let Some(point) = self.custom.get_mut(index) {
                    *point = value.min(127);
                    self.rebuild();
                }
            }
            WorkerCommand::SetController(controller) => self.controller = controller.min(127),
            WorkerCommand::ToggleMuteStep(index) => {
                if let Some(muted) = self.mute_mask.get_mut(index) {
                    *muted = !*muted;
                }
            }
            WorkerCommand::SetRecord(on) => self.recording = on,
            WorkerCommand::ToggleRecord => self.recording = !self.recording,
            _ => {}
        }
    }

    fn is_muted(&self) -> bool {
        self.core.muted
    }

    fn reset(&mut self) {
        self.position = 0;
    }

    fn step_ticks(&self) -> Tick {
        self.core.step()
    }
}

fn cycle_to<T: Copy>(source: &[T], len: usize, fill: T) -> Vec<T> {
    if source.is_empty() {
        return vec![fill; len];
    }
    (0..len).map(|i| source[i % source.len()]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::TriggerMode;

    fn lfo() -> Lfo {
        Lfo::new(OutputBinding::new(0, 0), 74)
    }

    fn value_of(wave: &Waveform) -> u8 {
        match wave.samples[0].payload {
            Payload::Controller { value, .. } => value,
            _ => panic!("Expected controller payload"),
        }
    }

    #[test]
    fn test_default_pattern() {
        let lfo = lfo();
        assert_eq!(lfo.values().len(), 4);
        assert_eq!(lfo.step_ticks(), 48);
    }

    #[test]
    fn test_pull_advances_one_step() {
        let mut lfo = lfo();
        let wave = lfo.pull(96);
        assert_eq!(wave.length, 48);
        assert_eq!(wave.samples.len(), 1);
        assert_eq!(wave.samples[0].tick, 96);
        assert_eq!(lfo.position(), 1);
    }

    #[test]
    fn test_saw_up_values() {
        let mut lfo = lfo();
        lfo.apply(WorkerCommand::SetWaveform(LfoWaveform::SawUp));
        lfo.apply(WorkerCommand::SetAmplitude(127));
        lfo.apply(WorkerCommand::SetFrequency(1));
        lfo.apply(WorkerCommand::SetSize(4));
        // res 4, freq 1: lfoval steps 0..16, value = lfoval * 127 / 16
        let values = lfo.values();
        assert_eq!(values.len(), 16);
        assert_eq!(values[0], 0);
        assert_eq!(values[8], 63);
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_square_values() {
        let mut lfo = lfo();
        lfo.apply(WorkerCommand::SetWaveform(LfoWaveform::Square));
        lfo.apply(WorkerCommand::SetAmplitude(100));
        lfo.apply(WorkerCommand::SetOffset(10));
        lfo.apply(WorkerCommand::SetFrequency(2));
        lfo.apply(WorkerCommand::SetSize(2));
        let values = lfo.values();
        assert_eq!(&values[..4], &[110, 110, 110, 110]);
        assert_eq!(&values[4..], &[10, 10, 10, 10]);
    }

    #[test]
    fn test_values_are_clipped() {
        let mut lfo = lfo();
        lfo.apply(WorkerCommand::SetAmplitude(127));
        lfo.apply(WorkerCommand::SetOffset(127));
        assert!(lfo.values().iter().all(|&v| v <= 127));
    }

    #[test]
    fn test_frequency_is_clamped() {
        let mut lfo = lfo();
        lfo.apply(WorkerCommand::SetFrequency(0));
        assert_eq!(lfo.frequency, MIN_FREQUENCY);
        lfo.apply(WorkerCommand::SetFrequency(1_000));
        assert_eq!(lfo.frequency, MAX_FREQUENCY);
    }

    #[test]
    fn test_resize_repeats_custom_wave() {
        let mut lfo = lfo();
        lfo.apply(WorkerCommand::SetWaveform(LfoWaveform::Custom));
        lfo.apply(WorkerCommand::SetCustomPoint { index: 1, value: 100 });
        lfo.apply(WorkerCommand::SetSize(2));
        assert_eq!(lfo.values()[1], 100);
        assert_eq!(lfo.values()[5], 100);
    }

    #[test]
    fn test_mute_step() {
        let mut lfo = lfo();
        lfo.apply(WorkerCommand::ToggleMuteStep(0));
        assert!(lfo.pull(0).samples[0].muted);
        assert!(!lfo.pull(48).samples[0].muted);
    }

    #[test]
    fn test_record_controller_into_custom_wave() {
        let mut lfo = lfo();
        lfo.apply(WorkerCommand::SetRecord(true));
        lfo.pull(0);

        let cc = MidiMessage::ControlChange {
            channel: 0,
            controller: 74,
            value: 99,
        };
        assert_eq!(lfo.handle_input(&cc, 48), InputResponse::Consumed);
        assert_eq!(lfo.waveform(), LfoWaveform::Custom);
        assert_eq!(lfo.values()[1], 99);
        assert_eq!(value_of(&lfo.pull(48)), 99);
    }

    #[test]
    fn test_keyboard_trigger() {
        let mut lfo = lfo();
        let note = MidiMessage::NoteOn {
            channel: 0,
            note: 60,
            velocity: 90,
        };
        assert_eq!(lfo.handle_input(&note, 0), InputResponse::Ignored);

        lfo.apply(WorkerCommand::SetTriggerMode(TriggerMode::Trigger));
        lfo.pull(0);
        let release = MidiMessage::NoteOff {
            channel: 0,
            note: 60,
            velocity: 0,
        };
        lfo.handle_input(&release, 10);
        assert_eq!(lfo.handle_input(&note, 20), InputResponse::Restart);
        assert_eq!(lfo.position(), 0);
    }
}
