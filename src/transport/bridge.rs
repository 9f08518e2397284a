// Transport bridge - turns transport samples into tick offsets
//
// The bridge never emits output. It reports where the transport is in ticks,
// whether it started or stopped rolling, and whether it jumped.

use super::{TransportPosition, TransportSource};
use crate::timing::{TICKS_PER_QUARTER, Tick};

/// Tick position of a transport sample
///
/// `frame * 192 * bpm / (60 * frame_rate)`, truncated.
pub fn sample_offset(position: &TransportPosition) -> Tick {
    if position.frame_rate == 0 || position.bpm.is_nan() || position.bpm <= 0.0 {
        return 0;
    }
    let ticks = position.frame as f64 * TICKS_PER_QUARTER as f64 * position.bpm
        / (60.0 * position.frame_rate as f64);
    ticks as Tick
}

/// Result of one transport poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportPoll {
    pub offset: Tick,
    pub bpm: f64,
    pub rolling: bool,
    /// Rolling state differs from the previous poll
    pub rolling_changed: bool,
    /// The position jumped by more than a quarter note from the expected tick
    pub relocated: bool,
}

pub struct TransportBridge {
    source: Box<dyn TransportSource>,
    rolling: bool,
}

impl TransportBridge {
    pub fn new(source: Box<dyn TransportSource>) -> Self {
        Self {
            source,
            rolling: false,
        }
    }

    pub fn is_rolling(&self) -> bool {
        self.rolling
    }

    /// Sample the transport
    ///
    /// `expected` is the tick the scheduler believes it is at, used to detect
    /// relocation.
    pub fn poll(&mut self, expected: Option<Tick>) -> Option<TransportPoll> {
        let position = self.source.query()?;
        let offset = sample_offset(&position);

        let rolling_changed = position.rolling != self.rolling;
        self.rolling = position.rolling;

        let relocated = !rolling_changed
            && expected.is_some_and(|tick| offset.abs_diff(tick) > TICKS_PER_QUARTER);

        Some(TransportPoll {
            offset,
            bpm: position.bpm,
            rolling: position.rolling,
            rolling_changed,
            relocated,
        })
    }

    /// True once when the transport service announced its shutdown
    pub fn on_shutdown(&mut self) -> bool {
        let shutdown = self.source.take_shutdown();
        if shutdown {
            self.rolling = false;
        }
        shutdown
    }
}
