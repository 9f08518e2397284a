// Scheduler handle - control side of the event loop thread
//
// Every setter is asynchronous: it queues a command that the loop applies at
// the start of its next iteration.

use super::Scheduler;
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::messaging::{
    Command, CommandProducer, Notification, NotificationConsumer, create_command_channel,
    create_notification_channel,
};
use crate::queue::SequencerQueue;
use crate::timing::Tick;
use crate::transport::TransportSource;
use crate::worker::{Worker, WorkerCommand, WorkerId};
use ringbuf::traits::{Consumer, Producer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

pub struct SchedulerHandle {
    commands: CommandProducer,
    notifications: NotificationConsumer,
    modified: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Build the scheduler on the calling thread, then move it onto its own
/// thread. Port registration failures are returned here.
pub fn spawn_scheduler<Q>(queue: Q, config: SchedulerConfig) -> SchedulerResult<SchedulerHandle>
where
    Q: SequencerQueue + 'static,
{
    let config = config.validate();
    let (command_tx, command_rx) = create_command_channel(config.command_capacity);
    let (notification_tx, notification_rx) =
        create_notification_channel(config.notification_capacity);

    let scheduler = Scheduler::new(queue, config, command_rx, notification_tx)?;
    let modified = scheduler.modified_flag();

    let thread = thread::Builder::new()
        .name("midiarp-scheduler".to_string())
        .spawn(move || scheduler.run())
        .map_err(|e| SchedulerError::Thread(e.to_string()))?;

    Ok(SchedulerHandle {
        commands: command_tx,
        notifications: notification_rx,
        modified,
        thread: Some(thread),
    })
}

impl SchedulerHandle {
    pub fn send(&mut self, command: Command) -> SchedulerResult<()> {
        self.commands
            .try_push(command)
            .map_err(|_| SchedulerError::CommandQueueFull)
    }

    pub fn set_tempo(&mut self, bpm: f64) -> SchedulerResult<()> {
        self.send(Command::SetTempo(bpm))
    }

    pub fn set_running(&mut self, running: bool) -> SchedulerResult<()> {
        self.send(Command::SetRunning(running))
    }

    pub fn register_ports(&mut self, count: usize) -> SchedulerResult<()> {
        self.send(Command::RegisterPorts(count))
    }

    pub fn set_midi_clock_sync(&mut self, on: bool) -> SchedulerResult<()> {
        self.send(Command::SetMidiClockSync(on))
    }

    pub fn set_transport_sync(&mut self, on: bool) -> SchedulerResult<()> {
        self.send(Command::SetTransportSync(on))
    }

    pub fn attach_transport(&mut self, source: Box<dyn TransportSource>) -> SchedulerResult<()> {
        self.send(Command::AttachTransport(source))
    }

    pub fn set_groove_tick(&mut self, tick: i32) -> SchedulerResult<()> {
        self.send(Command::SetGrooveTick(tick))
    }

    pub fn set_groove_velocity(&mut self, velocity: i32) -> SchedulerResult<()> {
        self.send(Command::SetGrooveVelocity(velocity))
    }

    pub fn set_groove_length(&mut self, length: u32) -> SchedulerResult<()> {
        self.send(Command::SetGrooveLength(length))
    }

    pub fn set_forward_unmatched(&mut self, on: bool) -> SchedulerResult<()> {
        self.send(Command::SetForwardUnmatched(on))
    }

    pub fn set_forward_port(&mut self, port: usize) -> SchedulerResult<()> {
        self.send(Command::SetForwardPort(port))
    }

    pub fn set_midi_controllable(&mut self, on: bool) -> SchedulerResult<()> {
        self.send(Command::SetMidiControllable(on))
    }

    pub fn set_run_queue_on_input(&mut self, on: bool) -> SchedulerResult<()> {
        self.send(Command::SetRunQueueOnInput(on))
    }

    pub fn set_min_packet(&mut self, ticks: Tick) -> SchedulerResult<()> {
        self.send(Command::SetMinPacket(ticks))
    }

    pub fn add_worker(&mut self, worker: Box<dyn Worker>) -> SchedulerResult<()> {
        self.send(Command::AddWorker(worker))
    }

    pub fn remove_worker(&mut self, id: WorkerId) -> SchedulerResult<()> {
        self.send(Command::RemoveWorker(id))
    }

    pub fn worker(&mut self, id: WorkerId, command: WorkerCommand) -> SchedulerResult<()> {
        self.send(Command::Worker(id, command))
    }

    /// Drain every notification emitted since the last call
    pub fn poll_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Some(notification) = self.notifications.try_pop() {
            out.push(notification);
        }
        out
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Relaxed)
    }

    pub fn set_modified(&self, modified: bool) {
        self.modified.store(modified, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Ask the loop to quit and wait for the thread
    pub fn shutdown(mut self) -> SchedulerResult<()> {
        self.quit_and_join()
    }

    fn quit_and_join(&mut self) -> SchedulerResult<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        // The loop drains commands before every wait, so a full queue only
        // delays the quit by one iteration
        while self.commands.try_push(Command::Quit).is_err() {
            if thread.is_finished() {
                break;
            }
            thread::yield_now();
        }
        thread
            .join()
            .map_err(|_| SchedulerError::Thread("scheduler thread panicked".to_string()))
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.quit_and_join() {
            log::error!("{}", e);
        }
    }
}
