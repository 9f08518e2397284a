// Transport state owned by the event loop

use crate::timing::Tick;

/// Running flag, accumulated tick offset and the armed flag gating output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportState {
    running: bool,
    offset_tick: Tick,
    armed: bool,
}

impl TransportState {
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn offset_tick(&self) -> Tick {
        self.offset_tick
    }

    /// Output is only emitted while armed
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Queue started at `offset`
    pub fn start(&mut self, offset: Tick) {
        self.running = true;
        self.armed = true;
        self.offset_tick = offset;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.armed = false;
    }

    /// Stop accepting new output while queued output flushes
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn set_offset(&mut self, offset: Tick) {
        self.offset_tick = offset;
    }
}
