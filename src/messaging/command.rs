// Commands - control side to event loop

use crate::timing::Tick;
use crate::transport::TransportSource;
use crate::worker::{Worker, WorkerCommand, WorkerId};

/// Asynchronous setters applied at the start of the next loop iteration
pub enum Command {
    SetTempo(f64),
    /// Start or stop the queue
    SetRunning(bool),
    RegisterPorts(usize),
    SetMidiClockSync(bool),
    SetTransportSync(bool),
    AttachTransport(Box<dyn TransportSource>),
    SetGrooveTick(i32),
    SetGrooveVelocity(i32),
    SetGrooveLength(u32),
    SetForwardUnmatched(bool),
    SetForwardPort(usize),
    SetMidiControllable(bool),
    SetRunQueueOnInput(bool),
    SetMinPacket(Tick),
    AddWorker(Box<dyn Worker>),
    RemoveWorker(WorkerId),
    Worker(WorkerId, WorkerCommand),
    Quit,
}

impl Command {
    /// Whether applying the command changes user-visible state
    pub fn modifies(&self) -> bool {
        !matches!(
            self,
            Command::SetRunning(_) | Command::AttachTransport(_) | Command::Quit
        )
    }
}
