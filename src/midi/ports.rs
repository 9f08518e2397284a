// Output port bindings and system MIDI port discovery

use midir::{MidiInput as MidirInput, MidiOutput as MidirOutput};
use serde::{Deserialize, Serialize};

/// Upper bound on logical output ports
pub const MAX_PORTS: usize = 16;

/// Where a worker's output goes: logical port index and MIDI channel (0-15)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputBinding {
    pub port: usize,
    pub channel: u8,
}

impl OutputBinding {
    pub fn new(port: usize, channel: u8) -> Self {
        Self {
            port: port.min(MAX_PORTS - 1),
            channel: channel.min(15),
        }
    }
}

impl Default for OutputBinding {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// Number of logical output ports registered with the queue
///
/// The count only ever grows, ports are never unregistered while running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortBindings {
    count: usize,
}

impl PortBindings {
    pub fn count(&self) -> usize {
        self.count
    }

    /// Raise the count to `requested`, returning how many ports must be added
    pub fn grow_to(&mut self, requested: usize) -> usize {
        let requested = requested.min(MAX_PORTS);
        if requested <= self.count {
            return 0;
        }
        let added = requested - self.count;
        self.count = requested;
        added
    }

    pub fn contains(&self, binding: &OutputBinding) -> bool {
        binding.port < self.count
    }
}

#[derive(Clone, Debug)]
pub struct MidiPortInfo {
    pub index: usize,
    pub name: String,
}

/// Lists the system MIDI input ports
pub fn list_input_ports(client_name: &str) -> Vec<MidiPortInfo> {
    let Ok(midi_in) = MidirInput::new(client_name) else {
        return Vec::new();
    };
    midi_in
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(index, port)| {
            midi_in
                .port_name(port)
                .ok()
                .map(|name| MidiPortInfo { index, name })
        })
        .collect()
}

/// Lists the system MIDI output ports
pub fn list_output_ports(client_name: &str) -> Vec<MidiPortInfo> {
    let Ok(midi_out) = MidirOutput::new(client_name) else {
        return Vec::new();
    };
    midi_out
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(index, port)| {
            midi_out
                .port_name(port)
                .ok()
                .map(|name| MidiPortInfo { index, name })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_count_only_grows() {
        let mut ports = PortBindings::default();
        assert_eq!(ports.grow_to(2), 2);
        assert_eq!(ports.grow_to(1), 0);
        assert_eq!(ports.count(), 2);
        assert_eq!(ports.grow_to(4), 2);
        assert_eq!(ports.count(), 4);
    }

    #[test]
    fn test_port_count_is_capped() {
        let mut ports = PortBindings::default();
        ports.grow_to(100);
        assert_eq!(ports.count(), MAX_PORTS);
    }

    #[test]
    fn test_binding_clamps() {
        let binding = OutputBinding::new(99, 20);
        assert_eq!(binding.port, MAX_PORTS - 1);
        assert_eq!(binding.channel, 15);

        let mut ports = PortBindings::default();
        ports.grow_to(1);
        assert!(ports.contains(&OutputBinding::new(0, 3)));
        assert!(!ports.contains(&OutputBinding::new(1, 3)));
    }
}
