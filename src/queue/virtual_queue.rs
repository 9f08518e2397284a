// Virtual queue - deterministic queue running on simulated time
//
// Time only moves inside `wait`: it jumps to the next pending item, or to the
// end of the timeout when nothing is due. A cloneable handle lets tests
// inject input and inspect what was sent.

use super::{Echo, Pending, QueueEvent, SequencerQueue, TimedQueue};
use crate::error::{SchedulerError, SchedulerResult};
use crate::midi::MidiMessage;
use crate::midi::ports::MAX_PORTS;
use crate::timing::RealTime;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A message delivered on an output port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub port: usize,
    pub message: MidiMessage,
    pub at: RealTime,
}

struct VirtualState {
    now: RealTime,
    running: bool,
    ports: usize,
    pending: TimedQueue<Pending>,
    sent: Vec<SentMessage>,
    fail_sends: bool,
    fail_registration: bool,
}

pub struct VirtualQueue {
    state: Arc<Mutex<VirtualState>>,
}

/// Test-side access to a `VirtualQueue` owned by the scheduler
#[derive(Clone)]
pub struct VirtualQueueHandle {
    state: Arc<Mutex<VirtualState>>,
}

fn lock(state: &Mutex<VirtualState>) -> MutexGuard<'_, VirtualState> {
    // A panic while holding the lock only happens in a failing test
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl VirtualQueue {
    pub fn new() -> (Self, VirtualQueueHandle) {
        let state = Arc::new(Mutex::new(VirtualState {
            now: RealTime::ZERO,
            running: false,
            ports: 0,
            pending: TimedQueue::new(),
            sent: Vec::new(),
            fail_sends: false,
            fail_registration: false,
        }));
        (
            Self {
                state: state.clone(),
            },
            VirtualQueueHandle { state },
        )
    }
}

impl SequencerQueue for VirtualQueue {
    fn now(&self) -> RealTime {
        lock(&self.state).now
    }

    fn start(&mut self) -> SchedulerResult<()> {
        lock(&self.state).running = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = lock(&self.state);
        state.running = false;
        state.pending.drop_output();
    }

    fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    fn register_ports(&mut self, count: usize) -> SchedulerResult<usize> {
        let mut state = lock(&self.state);
        if state.fail_registration {
            return Err(SchedulerError::PortRegistration(
                "virtual port registration disabled".to_string(),
            ));
        }
        state.ports = state.ports.max(count.min(MAX_PORTS));
        Ok(state.ports)
    }

    fn port_count(&self) -> usize {
        lock(&self.state).ports
    }

    fn schedule(
        &mut self,
        port: usize,
        message: MidiMessage,
        at: RealTime,
    ) -> SchedulerResult<()> {
        let mut state = lock(&self.state);
        if port >= state.ports {
            return Err(SchedulerError::UnknownPort(port));
        }
        if state.fail_sends {
            return Err(SchedulerError::SendFailed(format!(
                "virtual port {} refused {:?}",
                port, message
            )));
        }
        state.pending.push(at, Pending::Output { port, message });
        Ok(())
    }

    fn send_direct(&mut self, port: usize, message: MidiMessage) -> SchedulerResult<()> {
        let mut state = lock(&self.state);
        if port >= state.ports {
            return Err(SchedulerError::UnknownPort(port));
        }
        if state.fail_sends {
            return Err(SchedulerError::SendFailed(format!(
                "virtual port {} refused {:?}",
                port, message
            )));
        }
        let at = state.now;
        state.sent.push(SentMessage { port, message, at });
        Ok(())
    }

    fn schedule_echo(&mut self, echo: Echo, at: RealTime) {
        lock(&self.state).pending.push(at, Pending::Echo(echo));
    }

    fn wait(&mut self, timeout: Duration) -> Option<QueueEvent> {
        let mut state = lock(&self.state);
        let deadline = state.now + timeout;

        while let Some((at, item)) = state.pending.pop_due(deadline) {
            state.now = state.now.max(at);
            match item {
                Pending::Output { port, message } => {
                    let now = state.now;
                    state.sent.push(SentMessage {
                        port,
                        message,
                        at: now,
                    });
                }
                Pending::Echo(echo) => return Some(QueueEvent::Echo(echo)),
                Pending::Input(message) => {
                    return Some(QueueEvent::Input {
                        message,
                        at: state.now,
                    });
                }
            }
        }

        state.now = deadline;
        None
    }

    fn is_drained(&self) -> bool {
        !lock(&self.state).pending.has_output()
    }
}

impl VirtualQueueHandle {
    pub fn now(&self) -> RealTime {
        lock(&self.state).now
    }

    /// Queue an incoming message, received at queue time `at`
    pub fn inject_input(&self, message: MidiMessage, at: RealTime) {
        lock(&self.state).pending.push(at, Pending::Input(message));
    }

    /// Queue an arbitrary echo, e.g. a duplicate of one already delivered
    pub fn inject_echo(&self, echo: Echo, at: RealTime) {
        lock(&self.state).pending.push(at, Pending::Echo(echo));
    }

    /// Everything delivered so far
    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.state).sent.clone()
    }

    pub fn take_sent(&self) -> Vec<SentMessage> {
        std::mem::take(&mut lock(&self.state).sent)
    }

    /// Number of items (output, echoes, input) not yet delivered
    pub fn pending(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn set_fail_sends(&self, fail: bool) {
        lock(&self.state).fail_sends = fail;
    }

    pub fn set_fail_registration(&self, fail: bool) {
        lock(&self.state).fail_registration = fail;
    }
}
