// Manual transport - in-process transport state pushed by the host
// Thread-safe via atomics, every clone shares the same state

use super::{ShutdownSignal, TransportPosition, TransportSource};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

#[derive(Debug)]
struct Shared {
    available: AtomicBool,
    rolling: AtomicBool,
    frame: AtomicU64,
    frame_rate: AtomicU32,
    bpm_bits: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct ManualTransport {
    shared: Arc<Shared>,
    shutdown: ShutdownSignal,
}

impl ManualTransport {
    pub fn new(frame_rate: u32, bpm: f64) -> Self {
        Self {
            shared: Arc::new(Shared {
                available: AtomicBool::new(true),
                rolling: AtomicBool::new(false),
                frame: AtomicU64::new(0),
                frame_rate: AtomicU32::new(frame_rate.max(1)),
                bpm_bits: AtomicU64::new(bpm.to_bits()),
            }),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn set_rolling(&self, rolling: bool) {
        self.shared.rolling.store(rolling, Ordering::Relaxed);
    }

    pub fn locate(&self, frame: u64) {
        self.shared.frame.store(frame, Ordering::Relaxed);
    }

    /// Move the position forward, as a running transport would
    pub fn advance(&self, frames: u64) -> u64 {
        self.shared.frame.fetch_add(frames, Ordering::Relaxed) + frames
    }

    pub fn set_bpm(&self, bpm: f64) {
        self.shared.bpm_bits.store(bpm.to_bits(), Ordering::Relaxed);
    }

    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::Relaxed);
    }

    /// Announce that the transport service is going away
    pub fn shut_down(&self) {
        self.set_available(false);
        self.shutdown.notify();
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }
}

impl Default for ManualTransport {
    fn default() -> Self {
        Self::new(48_000, 120.0)
    }
}

impl TransportSource for ManualTransport {
    fn query(&mut self) -> Option<TransportPosition> {
        if !self.shared.available.load(Ordering::Relaxed) {
            return None;
        }
        Some(TransportPosition {
            rolling: self.shared.rolling.load(Ordering::Relaxed),
            frame: self.shared.frame.load(Ordering::Relaxed),
            frame_rate: self.shared.frame_rate.load(Ordering::Relaxed),
            bpm: f64::from_bits(self.shared.bpm_bits.load(Ordering::Relaxed)),
        })
    }

    fn take_shutdown(&mut self) -> bool {
        self.shutdown.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let host = ManualTransport::new(44_100, 90.0);
        let mut source = host.clone();

        host.set_rolling(true);
        host.locate(1_000);
        assert_eq!(host.advance(500), 1_500);

        let position = source.query().unwrap();
        assert!(position.rolling);
        assert_eq!(position.frame, 1_500);
        assert_eq!(position.frame_rate, 44_100);
        assert_eq!(position.bpm, 90.0);
    }

    #[test]
    fn test_shutdown() {
        let host = ManualTransport::default();
        let mut source = host.clone();

        host.shut_down();
        assert!(source.query().is_none());
        assert!(source.take_shutdown());
        assert!(!source.take_shutdown());
    }
}
