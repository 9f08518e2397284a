// Timing - Tick domain, real-time domain and the conversion between them

pub mod clock;
pub mod tempo;

pub use clock::ClockConverter;
pub use tempo::{Tempo, TempoSource, TempoTracker};

use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// Internal time unit. The single source of truth for "when" inside the scheduler.
pub type Tick = u64;

/// Pulses per quarter note of the internal tick domain
pub const TICKS_PER_QUARTER: Tick = 192;

/// Incoming MIDI clock runs at 24 pulses per quarter note
pub const TICKS_PER_CLOCK_PULSE: Tick = TICKS_PER_QUARTER / 24;

/// Queue-relative real time in nanoseconds
///
/// Values come from the sequencing queue (see `SequencerQueue::now`) and are
/// only ever turned into ticks through a `ClockConverter`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RealTime(u64);

impl RealTime {
    pub const ZERO: RealTime = RealTime(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros * 1_000)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(duration.as_nanos().min(u64::MAX as u128) as u64)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_nanos(self.0)
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Difference to an earlier timestamp, zero if `earlier` is actually later
    pub fn saturating_sub(self, earlier: RealTime) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for RealTime {
    type Output = RealTime;

    fn add(self, rhs: Duration) -> RealTime {
        RealTime::from_nanos(self.0.saturating_add(RealTime::from_duration(rhs).0))
    }
}

impl Sub<Duration> for RealTime {
    type Output = RealTime;

    fn sub(self, rhs: Duration) -> RealTime {
        RealTime::from_nanos(self.0.saturating_sub(RealTime::from_duration(rhs).0))
    }
}

impl fmt::Display for RealTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}s", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}
