//! Transport synchronization: start/stop following, relocation, tempo
//! following and the drain on transport shutdown

use midiarp_scheduler::messaging::{NotificationConsumer, create_command_channel, create_notification_channel};
use midiarp_scheduler::{
    LoopState, ManualTransport, MidiMessage, Notification, OutputBinding, RealTime, Scheduler,
    SchedulerConfig, StepSequencer, TempoSource, VirtualQueue, VirtualQueueHandle, WorkerId,
};
use ringbuf::traits::Consumer;

const FRAME_RATE: u32 = 48_000;

struct Rig {
    scheduler: Scheduler<VirtualQueue>,
    queue: VirtualQueueHandle,
    transport: ManualTransport,
    notifications: NotificationConsumer,
    seq: WorkerId,
}

impl Rig {
    fn new() -> Self {
        let (queue, handle) = VirtualQueue::new();
        let (_commands, command_rx) = create_command_channel(16);
        let (notification_tx, notifications) = create_notification_channel(1_024);
        let config = SchedulerConfig {
            transport_sync: true,
            ..SchedulerConfig::default()
        };
        let mut scheduler = Scheduler::new(queue, config, command_rx, notification_tx).unwrap();

        let transport = ManualTransport::new(FRAME_RATE, 120.0);
        scheduler.attach_transport(Box::new(transport.clone()));
        let seq = scheduler.add_worker(Box::new(StepSequencer::with_notes(
            OutputBinding::new(0, 0),
            &[60, 62, 64, 65],
        )));

        Self {
            scheduler,
            queue: handle,
            transport,
            notifications,
            seq,
        }
    }

    /// Step the loop, moving the transport along with queue time while it rolls
    fn step(&mut self) {
        let before = self.queue.now();
        self.scheduler.step();
        let elapsed = self.queue.now().as_nanos() - before.as_nanos();
        if self.scheduler.transport().is_running() {
            self.transport
                .advance(elapsed * FRAME_RATE as u64 / 1_000_000_000);
        }
    }

    fn run_until(&mut self, at: RealTime) {
        let mut guard = 0;
        while self.queue.now() < at {
            self.step();
            guard += 1;
            assert!(guard < 100_000);
        }
    }

    fn notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Some(n) = self.notifications.try_pop() {
            out.push(n);
        }
        out
    }
}

#[test]
fn test_queue_follows_transport_rolling() {
    let mut rig = Rig::new();
    assert_eq!(rig.scheduler.tempo_source(), TempoSource::Transport);

    rig.step();
    assert_eq!(rig.scheduler.state(), LoopState::Idle);

    rig.transport.set_rolling(true);
    rig.step();
    assert_eq!(rig.scheduler.state(), LoopState::Armed);
    assert!(rig.queue.is_running());

    rig.run_until(RealTime::from_millis(200));
    assert!(!rig.queue.sent().is_empty());

    rig.transport.set_rolling(false);
    rig.step();
    assert_eq!(rig.scheduler.state(), LoopState::Idle);
    assert!(rig.notifications().contains(&Notification::QueueRunning(false)));
}

#[test]
fn test_relocation_restarts_workers_at_new_position() {
    let mut rig = Rig::new();
    rig.transport.set_rolling(true);
    rig.run_until(RealTime::from_millis(100));

    // Ten seconds at 120 BPM
    rig.transport.locate(10 * FRAME_RATE as u64);
    rig.step();

    assert_eq!(rig.scheduler.registry().last_tick(rig.seq), Some(3_840));
    assert_eq!(rig.scheduler.state(), LoopState::Armed);
}

#[test]
fn test_tempo_follows_transport() {
    let mut rig = Rig::new();
    rig.transport.set_rolling(true);
    rig.run_until(RealTime::from_millis(50));

    rig.transport.set_bpm(150.0);
    rig.step();
    assert_eq!(rig.scheduler.bpm(), 150.0);
    assert!(rig.notifications().contains(&Notification::TempoChanged(150.0)));

    // The internal tempo does not override an active transport
    rig.scheduler.set_tempo(90.0);
    assert_eq!(rig.scheduler.bpm(), 150.0);
}

#[test]
fn test_shutdown_drains_then_goes_idle() {
    let mut rig = Rig::new();
    rig.transport.set_rolling(true);

    // A step is 125 ms; at 130 ms the note off of the second step is queued
    rig.run_until(RealTime::from_millis(130));
    let shutdown_at = rig.queue.now();
    rig.queue.take_sent();

    rig.transport.shut_down();
    rig.step();
    assert_eq!(rig.scheduler.state(), LoopState::Draining);
    assert_eq!(rig.scheduler.pending_echo(), None);

    rig.run_until(RealTime::from_millis(600));
    assert_eq!(rig.scheduler.state(), LoopState::Idle);
    assert_eq!(rig.scheduler.tempo_source(), TempoSource::Internal);

    // Queued output was flushed, nothing new was produced
    let sent = rig.queue.take_sent();
    assert!(!sent.is_empty());
    assert!(sent.iter().all(|s| s.at >= shutdown_at));
    assert!(
        sent.iter()
            .all(|s| matches!(s.message, MidiMessage::NoteOff { .. }))
    );
    assert!(
        rig.notifications()
            .contains(&Notification::TransportShutdown(false))
    );
}
