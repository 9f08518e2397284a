// Scheduler - the self re-arming event loop
//
// The loop owns the queue, the clock and every worker. It wakes up on echoes
// it scheduled for itself and on live input, dispatches due workers, emits
// their output through the queue and arms exactly one echo for the next due
// tick.

pub mod handle;

pub use handle::{SchedulerHandle, spawn_scheduler};

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::groove::GrooveSettings;
use crate::messaging::{
    Command, CommandConsumer, Notification, NotificationCategory, NotificationProducer,
};
use crate::midi::{MidiMessage, PortBindings};
use crate::queue::{Echo, EchoReason, QueueEvent, SequencerQueue};
use crate::timing::{ClockConverter, RealTime, TICKS_PER_CLOCK_PULSE, TICKS_PER_QUARTER, Tempo, TempoSource, TempoTracker, Tick};
use crate::transport::{TransportBridge, TransportSource, TransportState};
use crate::worker::{InputResponse, OutputEvent, Worker, WorkerCommand, WorkerId, WorkerRegistry};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Tempo changes smaller than this are not reported
const TEMPO_REPORT_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Queue stopped, no output
    Idle,
    /// Queue running with one echo pending
    Armed,
    /// Transport went away, queued output flushes before going idle
    Draining,
}

pub struct Scheduler<Q: SequencerQueue> {
    queue: Q,
    config: SchedulerConfig,
    clock: ClockConverter,
    tempo: TempoTracker,
    registry: WorkerRegistry,
    groove: GrooveSettings,
    ports: PortBindings,
    transport: TransportState,
    bridge: Option<TransportBridge>,

    state: LoopState,
    pending_echo: Option<Echo>,
    generation: u64,
    /// Tick position counted from incoming MIDI clock pulses
    clock_tick: Option<Tick>,
    reported_bpm: f64,

    commands: CommandConsumer,
    notifications: NotificationProducer,
    modified: Arc<AtomicBool>,
    quit: bool,
}

impl<Q: SequencerQueue> Scheduler<Q> {
    pub fn new(
        mut queue: Q,
        config: SchedulerConfig,
        commands: CommandConsumer,
        notifications: NotificationProducer,
    ) -> SchedulerResult<Self> {
        let config = config.validate();

        let mut ports = PortBindings::default();
        let registered = queue.register_ports(config.port_count)?;
        ports.grow_to(registered);

        let mut tempo = TempoTracker::new(Tempo::new(config.tempo));
        tempo.set_use_midi_clock(config.midi_clock_sync);
        tempo.set_use_transport(config.transport_sync);
        let clock = ClockConverter::new(tempo.ratio());

        log::info!(
            "Scheduler ready: {} port(s), {} ({:?})",
            ports.count(),
            tempo.tempo(),
            tempo.source()
        );

        Ok(Self {
            registry: WorkerRegistry::new(config.min_packet_ticks),
            groove: config.groove,
            reported_bpm: tempo.bpm(),
            queue,
            clock,
            tempo,
            ports,
            transport: TransportState::default(),
            bridge: None,
            state: LoopState::Idle,
            pending_echo: None,
            generation: 0,
            clock_tick: None,
            config,
            commands,
            notifications,
            modified: Arc::new(AtomicBool::new(false)),
            quit: false,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn pending_echo(&self) -> Option<Echo> {
        self.pending_echo
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn clock(&self) -> &ClockConverter {
        &self.clock
    }

    pub fn tempo_source(&self) -> TempoSource {
        self.tempo.source()
    }

    pub fn bpm(&self) -> f64 {
        self.tempo.bpm()
    }

    pub fn transport(&self) -> &TransportState {
        &self.transport
    }

    pub fn port_count(&self) -> usize {
        self.ports.count()
    }

    /// Tick at the queue's current time
    pub fn current_tick(&self) -> Tick {
        self.clock.ticks_since_epoch(self.queue.now())
    }

    /// Shared flag raised whenever a setting changes
    pub fn modified_flag(&self) -> Arc<AtomicBool> {
        self.modified.clone()
    }

    pub fn is_quitting(&self) -> bool {
        self.quit
    }

    // ---- Workers ----

    /// Register a worker; while running it becomes due at the current tick
    pub fn add_worker(&mut self, worker: Box<dyn Worker>) -> WorkerId {
        let kind = worker.kind();
        let id = match self.state {
            LoopState::Idle => self.registry.register(worker),
            _ => {
                let tick = self.current_tick();
                self.registry.register_at(worker, tick)
            }
        };
        log::debug!("Registered {:?} worker {:?}", kind, id);
        self.notify(Notification::WorkerRegistered { id, kind });
        self.rearm_if_earlier();
        id
    }

    pub fn remove_worker(&mut self, id: WorkerId) -> bool {
        if self.registry.unregister(id).is_none() {
            return false;
        }
        self.notify(Notification::WorkerRemoved(id));
        true
    }

    pub fn apply_worker_command(&mut self, id: WorkerId, command: WorkerCommand) -> bool {
        let applied = self.registry.apply(id, command);
        if !applied {
            log::warn!("Command for unknown worker {:?}", id);
        }
        applied
    }

    // ---- Queue lifecycle ----

    /// Idle -> Armed: rewind workers, anchor the clock at the queue time and
    /// arm the first echo
    pub fn start_queue(&mut self) -> SchedulerResult<()> {
        self.start_at(0)
    }

    fn start_at(&mut self, offset: Tick) -> SchedulerResult<()> {
        if self.state != LoopState::Idle {
            return Ok(());
        }
        self.queue.start()?;
        let now = self.queue.now();
        self.clock.resync(offset, now);
        self.registry.reset_all(offset);
        self.transport.start(offset);
        self.state = LoopState::Armed;
        log::info!("Queue started at tick {} ({})", offset, now);
        self.notify(Notification::QueueRunning(true));
        self.arm_next(None);
        Ok(())
    }

    /// Armed -> Idle: undelivered output is dropped, late echoes are ignored
    pub fn stop_queue(&mut self) {
        if self.state == LoopState::Idle {
            return;
        }
        self.queue.stop();
        self.transport.stop();
        self.invalidate_echo();
        self.state = LoopState::Idle;
        log::info!("Queue stopped");
        self.notify(Notification::QueueRunning(false));
    }

    // ---- Echo handling ----

    fn invalidate_echo(&mut self) {
        self.pending_echo = None;
        self.generation += 1;
    }

    /// Arm one echo for the earliest due worker, or a heartbeat one quarter
    /// note ahead when nothing is due. Any previous echo becomes stale.
    fn arm_next(&mut self, reason: Option<EchoReason>) {
        if self.state != LoopState::Armed {
            return;
        }

        let (tick, reason) = match self.registry.earliest_due() {
            Some(tick) => (tick, reason.unwrap_or_else(|| self.due_reason(tick))),
            None => (
                self.current_tick() + TICKS_PER_QUARTER,
                EchoReason::Heartbeat,
            ),
        };

        self.generation += 1;
        let echo = Echo {
            tick,
            reason,
            generation: self.generation,
        };
        self.pending_echo = Some(echo);
        let at = self.clock.real_time_of(tick.saturating_sub(self.lookahead()));
        log::trace!("Echo armed for tick {} at {} ({:?})", tick, at, reason);
        self.queue.schedule_echo(echo, at);
    }

    /// Ticks an echo fires ahead of its due tick, so output is queued before
    /// it plays. Negative groove pulls odd steps up to half a step earlier.
    fn lookahead(&self) -> Tick {
        let groove_ahead = if self.groove.is_enabled() && self.groove.tick < 0 {
            self.registry
                .ids()
                .iter()
                .filter_map(|&id| self.registry.worker(id))
                .filter(|worker| worker.accepts_groove())
                .map(|worker| worker.step_ticks() * self.groove.tick.unsigned_abs() as Tick / 200)
                .max()
                .unwrap_or(0)
        } else {
            0
        };
        self.config.schedule_ahead_ticks + groove_ahead
    }

    fn due_reason(&self, tick: Tick) -> EchoReason {
        let grooved = self.groove.is_enabled()
            && self
                .registry
                .due_at(tick)
                .iter()
                .any(|&id| self.registry.worker(id).is_some_and(|w| w.accepts_groove()));
        if grooved {
            EchoReason::GrooveDue
        } else {
            EchoReason::WorkerDue
        }
    }

    /// Re-arm when a worker became due before the pending echo
    fn rearm_if_earlier(&mut self) {
        if self.state != LoopState::Armed {
            return;
        }
        let earliest = self.registry.earliest_due();
        let superseded = match (self.pending_echo, earliest) {
            (Some(pending), Some(tick)) => tick < pending.tick,
            (None, _) => true,
            _ => false,
        };
        if superseded {
            self.arm_next(None);
        }
    }

    /// Handle a wake-up. Echoes that do not match the pending request are
    /// discarded without side effects.
    pub fn on_echo(&mut self, echo: Echo) {
        if self.state != LoopState::Armed || self.pending_echo != Some(echo) {
            log::trace!("Discarding stale echo {:?}", echo);
            return;
        }
        self.pending_echo = None;
        self.dispatch(echo.tick);
        self.arm_next(None);
    }

    /// Pull every worker due at `tick` in registration order and emit
    fn dispatch(&mut self, tick: Tick) {
        for id in self.registry.due_at(tick) {
            let events = self.registry.pull(id);
            for event in events {
                let event = self.groove.apply(event);
                if event.muted || !self.transport.is_armed() {
                    continue;
                }
                self.emit(&event);
            }
        }
    }

    fn emit(&mut self, event: &OutputEvent) {
        for (tick, message) in event.messages() {
            let at = self.clock.real_time_of(tick);
            if let Err(e) = self.queue.schedule(event.binding.port, message, at) {
                self.report(&e);
            }
        }
    }

    // ---- Input ----

    /// Handle a live input message received at queue time `at`
    pub fn on_input(&mut self, message: MidiMessage, at: RealTime) {
        if message.is_realtime() {
            self.on_realtime(message, at);
            return;
        }

        if self.config.run_queue_on_input
            && self.state == LoopState::Idle
            && matches!(message, MidiMessage::NoteOn { .. })
        {
            if let Err(e) = self.start_queue() {
                self.report(&e);
            }
        }

        let mut controlled = false;
        match message {
            MidiMessage::NoteOn { note, velocity, .. } => {
                self.notify(Notification::NoteReceived { note, velocity })
            }
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } if self.config.midi_controllable => {
                self.notify(Notification::ControllerReceived {
                    controller,
                    channel,
                    value,
                });
                controlled = self.on_controller(channel, controller, value);
            }
            _ => {}
        }

        let tick = self.clock.ticks_since_epoch(at);
        let responses = self.registry.route_input(&message, tick);

        if responses.is_empty() && !controlled && self.config.forward_unmatched {
            match self.queue.send_direct(self.config.forward_port, message) {
                Ok(()) => self.notify(Notification::RawEventForwarded(message)),
                Err(e) => self.report(&e),
            }
        }

        let restarts: Vec<WorkerId> = responses
            .into_iter()
            .filter(|&(_, response)| response == InputResponse::Restart)
            .map(|(id, _)| id)
            .collect();
        if restarts.is_empty() {
            return;
        }

        let start = tick + self.config.trigger_delay_ticks;
        for id in restarts {
            self.registry.restart(id, start);
        }
        log::debug!("Keyboard trigger at tick {}", start);
        if self.state == LoopState::Armed {
            let reason = (self.registry.earliest_due() == Some(start))
                .then_some(EchoReason::KeyboardTriggerDue);
            self.arm_next(reason);
        }
    }

    /// Apply controller bindings. Returns true if any worker was driven.
    fn on_controller(&mut self, channel: u8, controller: u8, value: u8) -> bool {
        let controlled = self.registry.route_controller(channel, controller, value);
        if controlled.is_empty() {
            return false;
        }
        log::debug!("CC {} drove {} worker(s)", controller, controlled.len());
        self.modified.store(true, Ordering::Relaxed);
        true
    }

    fn on_realtime(&mut self, message: MidiMessage, at: RealTime) {
        if self.tempo.source() != TempoSource::MidiClock {
            return;
        }

        match message {
            MidiMessage::Clock => self.on_clock_pulse(at),
            MidiMessage::Start => {
                self.stop_queue();
                self.tempo.reset_clock();
                self.clock_tick = Some(0);
                if let Err(e) = self.start_at(0) {
                    self.report(&e);
                }
            }
            MidiMessage::Continue => {
                let tick = self.clock_tick.unwrap_or(0);
                if let Err(e) = self.start_at(tick) {
                    self.report(&e);
                }
            }
            MidiMessage::Stop => self.stop_queue(),
            _ => {}
        }
    }

    /// One MIDI clock pulse: advance eight ticks and resync the anchor
    fn on_clock_pulse(&mut self, at: RealTime) {
        let tick = match self.clock_tick {
            Some(tick) => tick + TICKS_PER_CLOCK_PULSE,
            None => self.clock.ticks_since_epoch(at),
        };
        self.clock_tick = Some(tick);

        if let Some(bpm) = self.tempo.clock_pulse(at) {
            self.report_tempo(bpm);
        }

        if self.state == LoopState::Armed {
            self.clock.resync(tick, at);
            self.clock.rebase(self.tempo.ratio(), at);
        }
    }

    // ---- Tempo ----

    pub fn set_tempo(&mut self, bpm: f64) {
        if self.tempo.set_internal_bpm(bpm) {
            let now = self.queue.now();
            self.clock.rebase(self.tempo.ratio(), now);
            self.report_tempo(self.tempo.bpm());
        }
    }

    /// Switching sources rebases the clock at the moment of the switch
    pub fn set_midi_clock_sync(&mut self, on: bool) {
        self.tempo.set_use_midi_clock(on);
        self.clock_tick = None;
        self.rebase_now();
    }

    pub fn set_transport_sync(&mut self, on: bool) {
        self.tempo.set_use_transport(on);
        if on && self.bridge.is_none() {
            log::warn!("Transport sync enabled without a transport source");
        }
        self.rebase_now();
    }

    pub fn attach_transport(&mut self, source: Box<dyn TransportSource>) {
        self.bridge = Some(TransportBridge::new(source));
        log::info!("Transport source attached");
    }

    fn rebase_now(&mut self) {
        let now = self.queue.now();
        self.clock.rebase(self.tempo.ratio(), now);
        self.report_tempo(self.tempo.bpm());
    }

    fn report_tempo(&mut self, bpm: f64) {
        if (bpm - self.reported_bpm).abs() >= TEMPO_REPORT_THRESHOLD {
            self.reported_bpm = bpm;
            log::debug!("Tempo {:.2} BPM ({:?})", bpm, self.tempo.source());
            self.notify(Notification::TempoChanged(bpm));
        }
    }

    // ---- Transport ----

    /// Sample the transport: resync the anchor, follow start/stop and
    /// relocation, and begin draining on shutdown
    pub fn poll_transport(&mut self) {
        if !self.tempo.uses_transport() {
            return;
        }
        let Some(bridge) = self.bridge.as_mut() else {
            return;
        };

        if bridge.on_shutdown() {
            self.begin_drain();
            return;
        }

        let now = self.queue.now();
        let expected = (self.state == LoopState::Armed).then(|| self.clock.ticks_since_epoch(now));
        let Some(poll) = bridge.poll(expected) else {
            return;
        };

        if let Some(bpm) = self.tempo.transport_tempo(poll.bpm) {
            self.report_tempo(bpm);
        }
        self.clock.resync(poll.offset, now);
        self.clock.rebase(self.tempo.ratio(), now);
        self.transport.set_offset(poll.offset);

        if poll.rolling_changed {
            if poll.rolling {
                if let Err(e) = self.start_at(poll.offset) {
                    self.report(&e);
                }
            } else {
                self.stop_queue();
            }
        } else if poll.relocated && self.state == LoopState::Armed {
            log::debug!("Transport relocated to tick {}", poll.offset);
            self.registry.reset_all(poll.offset);
            self.arm_next(None);
        }
    }

    /// Transport shutdown: stop arming echoes and let queued output flush
    pub fn begin_drain(&mut self) {
        log::info!("Transport shut down, draining");
        if self.state == LoopState::Armed {
            self.state = LoopState::Draining;
            self.transport.disarm();
            self.invalidate_echo();
        } else {
            self.state = LoopState::Draining;
        }
        self.check_drain();
    }

    /// Draining -> Idle once the queue holds no more output
    pub fn check_drain(&mut self) {
        if self.state != LoopState::Draining || !self.queue.is_drained() {
            return;
        }
        self.queue.stop();
        self.transport.stop();
        self.state = LoopState::Idle;
        self.bridge = None;
        self.tempo.set_use_transport(false);
        self.rebase_now();
        log::info!("Drained, transport sync disabled");
        self.notify(Notification::TransportShutdown(false));
    }

    // ---- Commands ----

    pub fn handle_command(&mut self, command: Command) {
        if command.modifies() {
            self.modified.store(true, Ordering::Relaxed);
        }

        match command {
            Command::SetTempo(bpm) => self.set_tempo(bpm),
            Command::SetRunning(true) => {
                if let Err(e) = self.start_queue() {
                    self.report(&e);
                }
            }
            Command::SetRunning(false) => self.stop_queue(),
            Command::RegisterPorts(count) => {
                if let Err(e) = self.register_ports(count) {
                    self.report(&e);
                }
            }
            Command::SetMidiClockSync(on) => self.set_midi_clock_sync(on),
            Command::SetTransportSync(on) => self.set_transport_sync(on),
            Command::AttachTransport(source) => self.attach_transport(source),
            Command::SetGrooveTick(tick) => {
                self.groove = GrooveSettings::new(tick, self.groove.velocity, self.groove.length)
            }
            Command::SetGrooveVelocity(velocity) => {
                self.groove = GrooveSettings::new(self.groove.tick, velocity, self.groove.length)
            }
            Command::SetGrooveLength(length) => {
                self.groove = GrooveSettings::new(self.groove.tick, self.groove.velocity, length)
            }
            Command::SetForwardUnmatched(on) => self.config.forward_unmatched = on,
            Command::SetForwardPort(port) => {
                if port < self.ports.count() {
                    self.config.forward_port = port;
                } else {
                    self.report(&SchedulerError::UnknownPort(port));
                }
            }
            Command::SetMidiControllable(on) => self.config.midi_controllable = on,
            Command::SetRunQueueOnInput(on) => self.config.run_queue_on_input = on,
            Command::SetMinPacket(ticks) => {
                self.registry.set_min_packet(ticks.min(TICKS_PER_QUARTER * 4))
            }
            Command::AddWorker(worker) => {
                self.add_worker(worker);
            }
            Command::RemoveWorker(id) => {
                self.remove_worker(id);
            }
            Command::Worker(id, command) => {
                self.apply_worker_command(id, command);
            }
            Command::Quit => self.quit = true,
        }
    }

    /// Grow the output ports to `count`; the count never shrinks
    pub fn register_ports(&mut self, count: usize) -> SchedulerResult<usize> {
        let total = self.queue.register_ports(count)?;
        self.ports.grow_to(total);
        Ok(self.ports.count())
    }

    fn drain_commands(&mut self) {
        while let Some(command) = ringbuf::traits::Consumer::try_pop(&mut self.commands) {
            self.handle_command(command);
            if self.quit {
                break;
            }
        }
    }

    // ---- Loop ----

    /// One loop iteration: apply commands, sample the transport, wait for at
    /// most one poll interval and handle what arrived. Returns false once a
    /// quit was requested.
    pub fn step(&mut self) -> bool {
        self.drain_commands();
        if self.quit {
            return false;
        }

        self.poll_transport();
        self.check_drain();

        match self.queue.wait(self.config.poll_interval()) {
            Some(QueueEvent::Echo(echo)) => self.on_echo(echo),
            Some(QueueEvent::Input { message, at }) => self.on_input(message, at),
            None => {}
        }

        self.check_drain();
        true
    }

    /// Run until a quit command arrives
    pub fn run(mut self) {
        log::info!("Scheduler loop running");
        while self.step() {}
        self.stop_queue();
        log::info!("Scheduler loop finished");
    }

    // ---- Signals ----

    fn notify(&mut self, notification: Notification) {
        if ringbuf::traits::Producer::try_push(&mut self.notifications, notification).is_err() {
            log::debug!("Notification channel full, dropping notification");
        }
    }

    /// I/O failures are logged and reported, the loop keeps running
    fn report(&mut self, error: &SchedulerError) {
        log::warn!("{}", error);
        let category = match error {
            SchedulerError::UnknownPort(_)
            | SchedulerError::SendFailed(_)
            | SchedulerError::PortRegistration(_)
            | SchedulerError::MidiInit(_) => NotificationCategory::Midi,
            _ => NotificationCategory::Generic,
        };
        self.notify(Notification::error(category, error.to_string()));
    }
}
