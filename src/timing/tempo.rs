// Tempo - BPM value and the tracker that decides which source governs it
// Sources: user-set internal tempo, incoming MIDI clock, transport sync

use super::{RealTime, TICKS_PER_CLOCK_PULSE, TICKS_PER_QUARTER};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Tempo in BPM (Beats Per Minute)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    bpm: f64,
}

impl Tempo {
    pub const MIN_BPM: f64 = 10.0;
    pub const MAX_BPM: f64 = 400.0;

    /// Creates a new tempo, clamped to [MIN_BPM, MAX_BPM]
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm: Self::clamp(bpm),
        }
    }

    /// Get BPM value
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Set BPM value (clamped)
    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = Self::clamp(bpm);
    }

    /// Duration of one beat in seconds
    pub fn beat_duration_seconds(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Real-time length of one tick in nanoseconds
    pub fn nanos_per_tick(&self) -> f64 {
        60_000_000_000.0 / (self.bpm * TICKS_PER_QUARTER as f64)
    }

    fn clamp(bpm: f64) -> f64 {
        if bpm.is_nan() {
            return 120.0;
        }
        bpm.clamp(Self::MIN_BPM, Self::MAX_BPM)
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::new(120.0)
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} BPM", self.bpm)
    }
}

/// Where the current tempo comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TempoSource {
    Internal,
    MidiClock,
    Transport,
}

/// Number of clock intervals averaged for the MIDI clock tempo estimate
const CLOCK_WINDOW: usize = 24;

/// Tracks the authoritative tempo and the resulting ns-per-tick ratio
///
/// Only one source is authoritative at a time. Transport sync wins over MIDI
/// clock, which wins over the internal tempo.
#[derive(Debug, Clone)]
pub struct TempoTracker {
    internal: Tempo,
    current: Tempo,
    use_midi_clock: bool,
    use_transport: bool,

    last_pulse: Option<RealTime>,
    pulse_intervals: VecDeque<u64>,
}

impl TempoTracker {
    pub fn new(internal: Tempo) -> Self {
        Self {
            internal,
            current: internal,
            use_midi_clock: false,
            use_transport: false,
            last_pulse: None,
            pulse_intervals: VecDeque::with_capacity(CLOCK_WINDOW),
        }
    }

    /// Currently governing source
    pub fn source(&self) -> TempoSource {
        if self.use_transport {
            TempoSource::Transport
        } else if self.use_midi_clock {
            TempoSource::MidiClock
        } else {
            TempoSource::Internal
        }
    }

    pub fn tempo(&self) -> Tempo {
        self.current
    }

    pub fn bpm(&self) -> f64 {
        self.current.bpm()
    }

    pub fn internal_tempo(&self) -> Tempo {
        self.internal
    }

    /// Nanoseconds per tick for the current tempo
    pub fn ratio(&self) -> f64 {
        self.current.nanos_per_tick()
    }

    pub fn uses_midi_clock(&self) -> bool {
        self.use_midi_clock
    }

    pub fn uses_transport(&self) -> bool {
        self.use_transport
    }

    /// Set the user tempo. Returns true if it became the current tempo.
    pub fn set_internal_bpm(&mut self, bpm: f64) -> bool {
        self.internal.set_bpm(bpm);
        if self.source() == TempoSource::Internal {
            self.current = self.internal;
            return true;
        }
        false
    }

    /// Enable or disable MIDI clock as tempo source
    ///
    /// The current tempo is kept until pulses provide an estimate, and falls
    /// back to the internal tempo when the clock is released.
    pub fn set_use_midi_clock(&mut self, on: bool) {
        self.use_midi_clock = on;
        self.reset_clock();
        self.refresh_internal();
    }

    /// Enable or disable transport sync as tempo source
    pub fn set_use_transport(&mut self, on: bool) {
        self.use_transport = on;
        self.refresh_internal();
    }

    /// Forget the MIDI clock history (clock start/stop, source switch)
    pub fn reset_clock(&mut self) {
        self.last_pulse = None;
        self.pulse_intervals.clear();
    }

    /// Feed one incoming MIDI clock pulse
    ///
    /// Returns the new bpm once at least one interval is known and the MIDI
    /// clock is the governing source.
    pub fn clock_pulse(&mut self, at: RealTime) -> Option<f64> {
        let previous = self.last_pulse.replace(at);
        let interval = at.as_nanos().checked_sub(previous?.as_nanos())?;
        if interval == 0 {
            return None;
        }

        if self.pulse_intervals.len() == CLOCK_WINDOW {
            self.pulse_intervals.pop_front();
        }
        self.pulse_intervals.push_back(interval);

        if self.source() != TempoSource::MidiClock {
            return None;
        }

        let average =
            self.pulse_intervals.iter().sum::<u64>() as f64 / self.pulse_intervals.len() as f64;
        let nanos_per_tick = average / TICKS_PER_CLOCK_PULSE as f64;
        let bpm = 60_000_000_000.0 / (nanos_per_tick * TICKS_PER_QUARTER as f64);
        self.current = Tempo::new(bpm);
        Some(self.current.bpm())
    }

    /// Feed the tempo reported by the transport service
    pub fn transport_tempo(&mut self, bpm: f64) -> Option<f64> {
        if self.source() != TempoSource::Transport || bpm <= 0.0 {
            return None;
        }
        self.current = Tempo::new(bpm);
        Some(self.current.bpm())
    }

    fn refresh_internal(&mut self) {
        if self.source() == TempoSource::Internal {
            self.current = self.internal;
        }
    }
}

impl Default for TempoTracker {
    fn default() -> Self {
        Self::new(Tempo::default())
    }
}
