// MIDI control - incoming controllers mapped onto worker settings

use super::{LoopMode, WorkerCommand};
use crate::midi::OutputBinding;
use crate::timing::{TICKS_PER_QUARTER, Tick};
use serde::{Deserialize, Serialize};

/// Resolutions selectable by controller, in events per quarter note
pub const CONTROL_RESOLUTIONS: [u32; 5] = [1, 2, 4, 8, 16];

/// Pattern sizes selectable by controller, in quarter notes
pub const CONTROL_SIZES: [u32; 8] = [1, 2, 3, 4, 8, 16, 24, 32];

/// Transpose value sent for a controller result of zero
const TRANSPOSE_FLOOR: i32 = 24;

/// Worker setting driven by a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlTarget {
    /// Toggles when `min == max`, otherwise `max` unmutes and `min` mutes
    Mute,
    Velocity,
    /// Note length in 1/64 of a quarter note
    NoteLength,
    /// Same toggle/switch rule as `Mute`
    Record,
    /// Index into `CONTROL_RESOLUTIONS`
    Resolution,
    /// Index into `CONTROL_SIZES`
    Size,
    /// Index into `LoopMode::ALL`
    LoopMode,
    /// Result minus 24 semitones
    Transpose,
    OutputChannel,
}

/// One controller assignment of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerBinding {
    pub controller: u8,
    pub channel: u8,
    pub target: ControlTarget,
    pub min: u8,
    pub max: u8,
}

impl ControllerBinding {
    pub fn new(controller: u8, channel: u8, target: ControlTarget, min: u8, max: u8) -> Self {
        Self {
            controller: controller.min(127),
            channel: channel.min(15),
            target,
            min: min.min(127),
            max: max.min(127),
        }
    }

    pub fn matches(&self, channel: u8, controller: u8) -> bool {
        self.channel == channel && self.controller == controller
    }

    /// Controller value scaled into `min..=max`
    pub fn scale(&self, value: u8) -> i32 {
        let (min, max) = (self.min as f64, self.max as f64);
        (min + value as f64 * (max - min) / 127.0) as i32
    }

    /// The command a controller value translates to, if any
    ///
    /// `binding` is the worker's current output, used to retarget the
    /// channel without moving the port.
    pub fn command_for(&self, value: u8, binding: OutputBinding) -> Option<WorkerCommand> {
        match self.target {
            ControlTarget::Mute => self.switch(
                value,
                WorkerCommand::ToggleMute,
                WorkerCommand::SetMuted(false),
                WorkerCommand::SetMuted(true),
            ),
            ControlTarget::Record => self.switch(
                value,
                WorkerCommand::ToggleRecord,
                WorkerCommand::SetRecord(true),
                WorkerCommand::SetRecord(false),
            ),
            ControlTarget::Velocity => {
                Some(WorkerCommand::SetVelocity(self.scale(value).clamp(0, 127) as u8))
            }
            ControlTarget::NoteLength => {
                let length = self.scale(value).max(1) as Tick * TICKS_PER_QUARTER / 64;
                Some(WorkerCommand::SetNoteLength(length.max(1)))
            }
            ControlTarget::Resolution => pick(&CONTROL_RESOLUTIONS, self.scale(value))
                .map(WorkerCommand::SetResolution),
            ControlTarget::Size => {
                pick(&CONTROL_SIZES, self.scale(value)).map(WorkerCommand::SetSize)
            }
            ControlTarget::LoopMode => {
                pick(&LoopMode::ALL, self.scale(value)).map(WorkerCommand::SetLoopMode)
            }
            ControlTarget::Transpose => Some(WorkerCommand::SetTranspose(
                self.scale(value) - TRANSPOSE_FLOOR,
            )),
            ControlTarget::OutputChannel => {
                let channel = self.scale(value);
                (0..16).contains(&channel).then(|| {
                    WorkerCommand::SetOutput(OutputBinding::new(binding.port, channel as u8))
                })
            }
        }
    }

    fn switch(
        &self,
        value: u8,
        toggle: WorkerCommand,
        on: WorkerCommand,
        off: WorkerCommand,
    ) -> Option<WorkerCommand> {
        if self.min == self.max {
            return (value == self.max).then_some(toggle);
        }
        if value == self.max {
            Some(on)
        } else if value == self.min {
            Some(off)
        } else {
            None
        }
    }
}

fn pick<T: Copy>(choices: &[T], index: i32) -> Option<T> {
    usize::try_from(index)
        .ok()
        .and_then(|index| choices.get(index).copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(target: ControlTarget, min: u8, max: u8) -> ControllerBinding {
        ControllerBinding::new(20, 0, target, min, max)
    }

    #[test]
    fn test_scaling() {
        let velocity = binding(ControlTarget::Velocity, 10, 110);
        assert_eq!(velocity.scale(0), 10);
        assert_eq!(velocity.scale(127), 110);
        assert_eq!(velocity.scale(64), 60);

        // Inverted ranges scale downwards
        let inverted = binding(ControlTarget::Velocity, 100, 0);
        assert_eq!(inverted.scale(127), 0);
    }

    #[test]
    fn test_mute_toggle_and_switch() {
        let out = OutputBinding::default();
        let toggle = binding(ControlTarget::Mute, 127, 127);
        assert_eq!(toggle.command_for(127, out), Some(WorkerCommand::ToggleMute));
        assert_eq!(toggle.command_for(64, out), None);

        let switch = binding(ControlTarget::Mute, 0, 127);
        assert_eq!(switch.command_for(127, out), Some(WorkerCommand::SetMuted(false)));
        assert_eq!(switch.command_for(0, out), Some(WorkerCommand::SetMuted(true)));
        assert_eq!(switch.command_for(30, out), None);
    }

    #[test]
    fn test_indexed_targets() {
        let out = OutputBinding::default();
        let resolution = binding(ControlTarget::Resolution, 0, 4);
        assert_eq!(
            resolution.command_for(127, out),
            Some(WorkerCommand::SetResolution(16))
        );

        let size = binding(ControlTarget::Size, 0, 127);
        assert_eq!(size.command_for(127, out), None);

        let mode = binding(ControlTarget::LoopMode, 1, 1);
        assert_eq!(
            mode.command_for(0, out),
            Some(WorkerCommand::SetLoopMode(LoopMode::Backward))
        );
    }

    #[test]
    fn test_transpose_and_channel() {
        let out = OutputBinding::new(2, 0);
        let transpose = binding(ControlTarget::Transpose, 0, 48);
        assert_eq!(
            transpose.command_for(0, out),
            Some(WorkerCommand::SetTranspose(-24))
        );
        assert_eq!(
            transpose.command_for(127, out),
            Some(WorkerCommand::SetTranspose(24))
        );

        let channel = binding(ControlTarget::OutputChannel, 0, 15);
        assert_eq!(
            channel.command_for(127, out),
            Some(WorkerCommand::SetOutput(OutputBinding::new(2, 15)))
        );
    }

    #[test]
    fn test_note_length_in_ticks() {
        let length = binding(ControlTarget::NoteLength, 16, 16);
        assert_eq!(
            length.command_for(0, OutputBinding::default()),
            Some(WorkerCommand::SetNoteLength(48))
        );
    }
}
