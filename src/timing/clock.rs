// Clock converter - Bidirectional mapping between queue real time and ticks
//
// Every conversion is relative to an anchor, a paired (tick, real time) sample
// taken whenever the tempo source resynchronizes. Tick results are truncated
// to the tick boundary and the error never accumulates: the next resync
// replaces the anchor.

use super::{RealTime, Tick};

/// Maps queue real time to ticks and back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockConverter {
    /// Nanoseconds per tick, always strictly positive
    ratio: f64,
    anchor_tick: Tick,
    anchor_real: RealTime,
}

impl ClockConverter {
    /// Create a converter anchored at tick 0 / time 0
    ///
    /// A non-positive or non-finite ratio falls back to 1 ns per tick.
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio: if is_valid_ratio(ratio) { ratio } else { 1.0 },
            anchor_tick: 0,
            anchor_real: RealTime::ZERO,
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn anchor(&self) -> (Tick, RealTime) {
        (self.anchor_tick, self.anchor_real)
    }

    /// Replace the synchronization anchor
    pub fn resync(&mut self, tick: Tick, real: RealTime) {
        self.anchor_tick = tick;
        self.anchor_real = real;
    }

    /// Change the ratio without a discontinuity at `now`
    ///
    /// The anchor moves to the last tick boundary at or before `now` under the
    /// old ratio, so ticks already reached keep their real time and only the
    /// future is stretched. Invalid ratios are ignored.
    pub fn rebase(&mut self, ratio: f64, now: RealTime) {
        if !is_valid_ratio(ratio) {
            return;
        }
        let tick = self.ticks_since_epoch(now);
        let real = self.real_time_of(tick);
        self.resync(tick, real);
        self.ratio = ratio;
    }

    /// Tick reached at the given real time, truncated to the tick boundary
    ///
    /// Real times are whole nanoseconds rounded from `real_time_of`, so half a
    /// nanosecond is added back before dividing.
    pub fn ticks_since_epoch(&self, real: RealTime) -> Tick {
        if real >= self.anchor_real {
            let delta = (real.as_nanos() - self.anchor_real.as_nanos()) as f64;
            self.anchor_tick
                .saturating_add(((delta + 0.5) / self.ratio).floor() as Tick)
        } else {
            let delta = (self.anchor_real.as_nanos() - real.as_nanos()) as f64;
            self.anchor_tick
                .saturating_sub(((delta - 0.5) / self.ratio).ceil().max(0.0) as Tick)
        }
    }

    /// Real time at which the given tick falls, to the nearest nanosecond
    pub fn real_time_of(&self, tick: Tick) -> RealTime {
        if tick >= self.anchor_tick {
            let delta = ((tick - self.anchor_tick) as f64 * self.ratio).round() as u64;
            RealTime::from_nanos(self.anchor_real.as_nanos().saturating_add(delta))
        } else {
            let delta = ((self.anchor_tick - tick) as f64 * self.ratio).round() as u64;
            RealTime::from_nanos(self.anchor_real.as_nanos().saturating_sub(delta))
        }
    }

    /// Real time `delta_ticks` after the tick reached at `now`
    pub fn real_time_from_now(&self, delta_ticks: Tick, now: RealTime) -> RealTime {
        let tick = self.ticks_since_epoch(now);
        self.real_time_of(tick.saturating_add(delta_ticks)).max(now)
    }

    /// Real time length of a single tick
    pub fn tick_duration_nanos(&self) -> u64 {
        self.ratio.ceil() as u64
    }
}

impl Default for ClockConverter {
    fn default() -> Self {
        Self::new(super::tempo::Tempo::default().nanos_per_tick())
    }
}

fn is_valid_ratio(ratio: f64) -> bool {
    ratio.is_finite() && ratio > 0.0
}
