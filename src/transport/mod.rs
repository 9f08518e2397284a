// Transport - external transport synchronization
// The scheduler polls a `TransportSource` for position, tempo and rolling
// state; the bridge turns those samples into tick offsets.

pub mod bridge;
pub mod manual;
pub mod state;

pub use bridge::{TransportBridge, TransportPoll, sample_offset};
pub use manual::ManualTransport;
pub use state::TransportState;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Snapshot of the external transport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportPosition {
    pub rolling: bool,
    /// Position in audio frames
    pub frame: u64,
    /// Frames per second
    pub frame_rate: u32,
    pub bpm: f64,
}

/// A transport synchronization service
pub trait TransportSource: Send {
    /// Current transport state, `None` while the service is unavailable
    fn query(&mut self) -> Option<TransportPosition>;

    /// True once after the service announced it is going away
    fn take_shutdown(&mut self) -> bool;
}

/// One-shot flag raised by a transport service on shutdown
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Consume the signal
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_is_one_shot() {
        let signal = ShutdownSignal::new();
        let remote = signal.clone();
        assert!(!signal.take());

        remote.notify();
        assert!(signal.is_raised());
        assert!(signal.take());
        assert!(!signal.take());
    }
}
