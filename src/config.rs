// Scheduler configuration - loaded from RON (or JSON) and clamped on load

use crate::error::{SchedulerError, SchedulerResult};
use crate::groove::GrooveSettings;
use crate::midi::ports::MAX_PORTS;
use crate::timing::{TICKS_PER_QUARTER, Tempo, Tick};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIN_CAPACITY: usize = 16;
const MAX_CAPACITY: usize = 65_536;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Client name used for the MIDI ports
    pub client_name: String,
    pub port_count: usize,
    /// Internal tempo in BPM
    pub tempo: f64,
    pub midi_clock_sync: bool,
    pub transport_sync: bool,
    pub groove: GrooveSettings,
    /// Forward input no worker consumed
    pub forward_unmatched: bool,
    pub forward_port: usize,
    /// Report incoming controllers to observers
    pub midi_controllable: bool,
    /// Start the queue on the first incoming note
    pub run_queue_on_input: bool,
    /// Minimum ticks a worker is pulled ahead per dispatch
    pub min_packet_ticks: Tick,
    /// Longest blocking wait of the event loop
    pub poll_interval_ms: u64,
    /// Delay between a keyboard trigger and the first triggered event
    pub trigger_delay_ticks: Tick,
    /// Ticks workers are dispatched ahead of their due tick
    pub schedule_ahead_ticks: Tick,
    pub command_capacity: usize,
    pub notification_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            client_name: "midiarp".to_string(),
            port_count: 1,
            tempo: 120.0,
            midi_clock_sync: false,
            transport_sync: false,
            groove: GrooveSettings::default(),
            forward_unmatched: false,
            forward_port: 0,
            midi_controllable: true,
            run_queue_on_input: false,
            min_packet_ticks: 0,
            poll_interval_ms: 10,
            trigger_delay_ticks: 2,
            schedule_ahead_ticks: 2,
            command_capacity: 256,
            notification_capacity: 1_024,
        }
    }
}

impl SchedulerConfig {
    /// Clamp every value into its valid range
    pub fn validate(mut self) -> Self {
        if self.client_name.trim().is_empty() {
            self.client_name = Self::default().client_name;
        }
        self.port_count = self.port_count.clamp(1, MAX_PORTS);
        self.tempo = Tempo::new(self.tempo).bpm();
        self.groove = GrooveSettings::new(
            self.groove.tick,
            self.groove.velocity,
            self.groove.length,
        );
        self.forward_port = self.forward_port.min(self.port_count - 1);
        self.min_packet_ticks = self.min_packet_ticks.min(TICKS_PER_QUARTER * 4);
        self.poll_interval_ms = self.poll_interval_ms.clamp(1, 1_000);
        self.trigger_delay_ticks = self.trigger_delay_ticks.min(TICKS_PER_QUARTER);
        self.schedule_ahead_ticks = self.schedule_ahead_ticks.min(TICKS_PER_QUARTER);
        self.command_capacity = self.command_capacity.clamp(MIN_CAPACITY, MAX_CAPACITY);
        self.notification_capacity = self
            .notification_capacity
            .clamp(MIN_CAPACITY, MAX_CAPACITY);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Load a configuration file. `.json` files are read as JSON, anything
    /// else as RON.
    pub fn load(path: &Path) -> SchedulerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: SchedulerConfig = if is_json(path) {
            serde_json::from_str(&text)?
        } else {
            ron::from_str(&text)?
        };
        Ok(config.validate())
    }

    pub fn save(&self, path: &Path) -> SchedulerResult<()> {
        let text = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// `<config dir>/midiarp_scheduler/config.ron`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("midiarp_scheduler").join("config.ron"))
    }

    /// Load from `path`, or from the default location; a missing file yields
    /// the defaults
    pub fn load_or_default(path: Option<&Path>) -> SchedulerResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        match Self::load(&path) {
            Err(SchedulerError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            other => other,
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SchedulerConfig::default();
        assert_eq!(config.clone().validate(), config);
    }

    #[test]
    fn test_validate_clamps() {
        let config = SchedulerConfig {
            client_name: "  ".to_string(),
            port_count: 0,
            tempo: 5_000.0,
            forward_port: 9,
            poll_interval_ms: 0,
            command_capacity: 1,
            schedule_ahead_ticks: 1_000,
            groove: GrooveSettings {
                tick: 300,
                velocity: 0,
                length: 4,
            },
            ..SchedulerConfig::default()
        }
        .validate();

        assert_eq!(config.client_name, "midiarp");
        assert_eq!(config.port_count, 1);
        assert_eq!(config.tempo, Tempo::MAX_BPM);
        assert_eq!(config.forward_port, 0);
        assert_eq!(config.poll_interval_ms, 1);
        assert_eq!(config.command_capacity, MIN_CAPACITY);
        assert_eq!(config.groove.tick, 100);
        assert_eq!(config.schedule_ahead_ticks, TICKS_PER_QUARTER);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let config: SchedulerConfig = ron::from_str("(tempo: 96.0, port_count: 2)").unwrap();
        assert_eq!(config.tempo, 96.0);
        assert_eq!(config.port_count, 2);
        assert_eq!(config.poll_interval_ms, 10);
    }
}
