// Workers - pull-based MIDI generators driven by the scheduler
//
// A worker produces a short `Waveform` each time it is pulled at its due tick.
// The registry owns every worker and keeps track of when it is due next.

pub mod arp;
pub mod control;
pub mod lfo;
pub mod registry;
pub mod seq;

pub use arp::{ArpPattern, Arpeggiator};
pub use control::{ControlTarget, ControllerBinding};
pub use lfo::{Lfo, LfoWaveform};
pub use registry::{IDLE_ADVANCE, OutputEvent, WorkerId, WorkerRegistry};
pub use seq::{LoopMode, StepSequencer};

use crate::midi::{InputFilter, MidiMessage, OutputBinding};
use crate::timing::{TICKS_PER_QUARTER, Tick};
use serde::{Deserialize, Serialize};

/// Largest pattern size, in quarter notes
pub const MAX_SIZE: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerKind {
    Lfo,
    Seq,
    Arp,
}

/// What a sample emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// Note on at the sample tick, note off `length` ticks later
    Note { note: u8, velocity: u8, length: Tick },
    Controller { controller: u8, value: u8 },
}

/// One point of a waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub tick: Tick,
    pub payload: Payload,
    pub muted: bool,
}

/// Result of a single pull
///
/// `length` is the number of ticks the pull covers, the worker is due again
/// at `tick + length`. A zero length means the worker had nothing to say.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Waveform {
    pub samples: Vec<Sample>,
    pub length: Tick,
}

impl Waveform {
    pub fn empty(length: Tick) -> Self {
        Self {
            samples: Vec::new(),
            length,
        }
    }

    pub fn single(sample: Sample, length: Tick) -> Self {
        Self {
            samples: vec![sample],
            length,
        }
    }
}

/// How a worker reacted to a live input message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputResponse {
    /// Not for this worker
    Ignored,
    /// Handled, timing unchanged
    Consumed,
    /// Handled, and the worker wants to restart its timing now
    Restart,
}

/// Keyboard triggering behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerMode {
    /// Runs with the queue, notes do not affect position
    #[default]
    Free,
    /// A new note resets the pattern position, timing is kept
    Restart,
    /// A new note resets the position and restarts timing at the note
    Trigger,
}

/// Asynchronous per-worker setters
///
/// Every worker clamps values to its own ranges. Commands a worker has no use
/// for are ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    SetMuted(bool),
    ToggleMute,
    SetTranspose(i32),
    SetVelocity(u8),
    /// Events per quarter note, snapped to a divisor of 192
    SetResolution(u32),
    /// Pattern size in quarter notes
    SetSize(u32),
    /// Note length in ticks
    SetNoteLength(Tick),
    SetOutput(OutputBinding),
    SetInputFilter(InputFilter),
    SetTriggerMode(TriggerMode),
    SetLegato(bool),
    SetRecord(bool),
    ToggleRecord,
    SetAmplitude(u8),
    SetOffset(u8),
    SetFrequency(u32),
    SetWaveform(LfoWaveform),
    SetCustomPoint { index: usize, value: u8 },
    SetController(u8),
    SetLoopMode(LoopMode),
    /// Steps played before looping, negative bounces, 0 plays the whole pattern
    SetLoopMarker(i32),
    SetStep { index: usize, note: u8 },
    ToggleMuteStep(usize),
    SetNoteIn(bool),
    SetVelocityIn(bool),
    SetStopOnRelease(bool),
    SetDeferChanges(bool),
    SetArpPattern(ArpPattern),
    SetOctaves(u8),
    SetLatch(bool),
    /// Handled by the registry, never reaches the worker
    BindController(ControllerBinding),
    UnbindController { controller: u8, channel: u8 },
}

/// A pull-based MIDI generator
pub trait Worker: Send {
    fn kind(&self) -> WorkerKind;

    fn binding(&self) -> OutputBinding;

    /// Produce the events starting at `tick`, the tick the worker is due at
    fn pull(&mut self, tick: Tick) -> Waveform;

    /// React to a live input message received at `tick`
    fn handle_input(&mut self, message: &MidiMessage, tick: Tick) -> InputResponse;

    fn apply(&mut self, command: WorkerCommand);

    fn is_muted(&self) -> bool;

    /// Whether groove timing/velocity perturbation applies to this worker
    fn accepts_groove(&self) -> bool {
        false
    }

    /// Rewind to the start of the pattern
    fn reset(&mut self);

    /// Tick spacing between consecutive events
    fn step_ticks(&self) -> Tick;
}

/// Settings every worker shares: mute, routing, resolution, size and
/// keyboard triggering
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WorkerCore {
    pub muted: bool,
    pub binding: OutputBinding,
    pub filter: InputFilter,
    pub trigger: TriggerMode,
    pub legato: bool,
    pub resolution: u32,
    pub size: u32,
}

impl WorkerCore {
    pub fn new(binding: OutputBinding, resolution: u32, size: u32) -> Self {
        Self {
            muted: false,
            binding,
            filter: InputFilter::new(binding.channel),
            trigger: TriggerMode::Free,
            legato: false,
            resolution: snap_resolution(resolution),
            size: size.clamp(1, MAX_SIZE),
        }
    }

    pub fn step(&self) -> Tick {
        TICKS_PER_QUARTER / self.resolution as Tick
    }

    /// Number of steps in one pattern cycle
    pub fn pattern_steps(&self) -> usize {
        (self.size * self.resolution) as usize
    }

    /// Apply a shared command. Returns true if the command was consumed.
    pub fn apply(&mut self, command: &WorkerCommand) -> bool {
        match *command {
            WorkerCommand::SetMuted(muted) => self.muted = muted,
            WorkerCommand::ToggleMute => self.muted = !self.muted,
            WorkerCommand::SetOutput(binding) => {
                self.binding = OutputBinding::new(binding.port, binding.channel)
            }
            WorkerCommand::SetInputFilter(filter) => self.filter = filter,
            WorkerCommand::SetTriggerMode(mode) => self.trigger = mode,
            WorkerCommand::SetLegato(legato) => self.legato = legato,
            _ => return false,
        }
        true
    }

    /// Keyboard reaction to a new note, given how many notes were already held
    ///
    /// Without legato only a note played after all keys were released
    /// retriggers.
    pub fn on_note(&self, held_before: usize) -> KeyboardAction {
        if held_before > 0 && !self.legato {
            return KeyboardAction::None;
        }
        match self.trigger {
            TriggerMode::Free => KeyboardAction::None,
            TriggerMode::Restart => KeyboardAction::Rewind,
            TriggerMode::Trigger => KeyboardAction::Retrigger,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyboardAction {
    None,
    Rewind,
    Retrigger,
}

/// Snap a resolution to the largest divisor of 192 not above it
pub fn snap_resolution(resolution: u32) -> u32 {
    let max = resolution.clamp(1, TICKS_PER_QUARTER as u32);
    (1..=max)
        .rev()
        .find(|d| TICKS_PER_QUARTER as u32 % d == 0)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_resolution() {
        assert_eq!(snap_resolution(0), 1);
        assert_eq!(snap_resolution(4), 4);
        assert_eq!(snap_resolution(5), 4);
        assert_eq!(snap_resolution(7), 6);
        assert_eq!(snap_resolution(100), 96);
        assert_eq!(snap_resolution(1000), 192);
    }

    #[test]
    fn test_core_step_and_pattern() {
        let core = WorkerCore::new(OutputBinding::default(), 4, 2);
        assert_eq!(core.step(), 48);
        assert_eq!(core.pattern_steps(), 8);

        let core = WorkerCore::new(OutputBinding::default(), 4, 99);
        assert_eq!(core.size, MAX_SIZE);
    }

    #[test]
    fn test_keyboard_actions() {
        let mut core = WorkerCore::new(OutputBinding::default(), 4, 1);
        assert_eq!(core.on_note(0), KeyboardAction::None);

        core.apply(&WorkerCommand::SetTriggerMode(TriggerMode::Trigger));
        assert_eq!(core.on_note(0), KeyboardAction::Retrigger);
        assert_eq!(core.on_note(2), KeyboardAction::None);

        core.apply(&WorkerCommand::SetLegato(true));
        assert_eq!(core.on_note(2), KeyboardAction::Retrigger);

        core.apply(&WorkerCommand::SetTriggerMode(TriggerMode::Restart));
        assert_eq!(core.on_note(0), KeyboardAction::Rewind);
    }

    #[test]
    fn test_core_ignores_worker_specific_commands() {
        let mut core = WorkerCore::new(OutputBinding::default(), 4, 1);
        assert!(core.apply(&WorkerCommand::ToggleMute));
        assert!(core.muted);
        assert!(!core.apply(&WorkerCommand::SetVelocity(10)));
    }
}
