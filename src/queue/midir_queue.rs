// Midir queue - real-time queue over system MIDI ports
//
// Output ports are virtual ports on Unix (one per logical port) and system
// ports elsewhere. Timed output and echoes wait in a `TimedQueue` and are
// delivered from `wait`, input arrives from the midir callback thread
// through a crossbeam channel.

use super::{Echo, Pending, QueueEvent, SequencerQueue, TimedQueue};
use crate::error::{SchedulerError, SchedulerResult};
use crate::midi::MidiMessage;
use crate::midi::ports::MAX_PORTS;
use crate::timing::RealTime;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use midir::{MidiInput as MidirInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::time::{Duration, Instant};

pub struct MidirQueue {
    client_name: String,
    epoch: Instant,
    running: bool,
    outputs: Vec<MidiOutputConnection>,
    input: Option<MidiInputConnection<()>>,
    input_tx: Sender<(MidiMessage, RealTime)>,
    input_rx: Receiver<(MidiMessage, RealTime)>,
    pending: TimedQueue<Pending>,
}

impl MidirQueue {
    /// Open a queue with an input port named after `client_name`
    ///
    /// On Unix the input is a virtual port other applications connect to.
    /// Elsewhere the first system input, if any, is connected.
    pub fn new(client_name: &str) -> SchedulerResult<Self> {
        let (input_tx, input_rx) = unbounded();
        let mut queue = Self {
            client_name: client_name.to_string(),
            epoch: Instant::now(),
            running: false,
            outputs: Vec::new(),
            input: None,
            input_tx,
            input_rx,
            pending: TimedQueue::new(),
        };
        queue.open_default_input()?;
        Ok(queue)
    }

    /// Replace the input connection with the system port named `port_name`
    pub fn connect_input(&mut self, port_name: &str) -> SchedulerResult<()> {
        let midi_in = self.midi_input()?;
        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).is_ok_and(|name| name == port_name))
            .ok_or_else(|| {
                SchedulerError::PortRegistration(format!("MIDI input '{}' not found", port_name))
            })?;

        let callback = self.input_callback();
        let connection = midi_in
            .connect(&port, &format!("{} in", self.client_name), callback, ())
            .map_err(|e| SchedulerError::PortRegistration(e.to_string()))?;
        self.input = Some(connection);
        log::info!("MIDI input connected: {}", port_name);
        Ok(())
    }

    fn midi_input(&self) -> SchedulerResult<MidirInput> {
        MidirInput::new(&self.client_name).map_err(|e| SchedulerError::MidiInit(e.to_string()))
    }

    fn input_callback(&self) -> impl FnMut(u64, &[u8], &mut ()) + Send + 'static {
        let tx = self.input_tx.clone();
        let epoch = self.epoch;
        move |_timestamp, bytes, _| {
            if let Some(message) = MidiMessage::from_bytes(bytes) {
                let at = RealTime::from_duration(epoch.elapsed());
                let _ = tx.send((message, at));
            }
        }
    }

    #[cfg(unix)]
    fn open_default_input(&mut self) -> SchedulerResult<()> {
        use midir::os::unix::VirtualInput;

        let midi_in = self.midi_input()?;
        let callback = self.input_callback();
        let connection = midi_in
            .create_virtual(&format!("{} in", self.client_name), callback, ())
            .map_err(|e| SchedulerError::PortRegistration(e.to_string()))?;
        self.input = Some(connection);
        Ok(())
    }

    #[cfg(not(unix))]
    fn open_default_input(&mut self) -> SchedulerResult<()> {
        let midi_in = self.midi_input()?;
        let Some(port) = midi_in.ports().into_iter().next() else {
            log::warn!("No MIDI input available");
            return Ok(());
        };
        let callback = self.input_callback();
        let connection = midi_in
            .connect(&port, &format!("{} in", self.client_name), callback, ())
            .map_err(|e| SchedulerError::PortRegistration(e.to_string()))?;
        self.input = Some(connection);
        Ok(())
    }

    #[cfg(unix)]
    fn open_output(&self, index: usize) -> SchedulerResult<MidiOutputConnection> {
        use midir::os::unix::VirtualOutput;

        let midi_out =
            MidiOutput::new(&self.client_name).map_err(|e| SchedulerError::MidiInit(e.to_string()))?;
        midi_out
            .create_virtual(&format!("{} out {}", self.client_name, index + 1))
            .map_err(|e| SchedulerError::PortRegistration(e.to_string()))
    }

    #[cfg(not(unix))]
    fn open_output(&self, index: usize) -> SchedulerResult<MidiOutputConnection> {
        let midi_out =
            MidiOutput::new(&self.client_name).map_err(|e| SchedulerError::MidiInit(e.to_string()))?;
        let port = midi_out.ports().into_iter().nth(index).ok_or_else(|| {
            SchedulerError::PortRegistration(format!("no system MIDI output #{}", index))
        })?;
        midi_out
            .connect(&port, &format!("{} out {}", self.client_name, index + 1))
            .map_err(|e| SchedulerError::PortRegistration(e.to_string()))
    }

    fn write(&mut self, port: usize, message: MidiMessage) -> SchedulerResult<()> {
        let connection = self
            .outputs
            .get_mut(port)
            .ok_or(SchedulerError::UnknownPort(port))?;
        let (bytes, len) = message.encode();
        connection
            .send(&bytes[..len])
            .map_err(|e| SchedulerError::SendFailed(e.to_string()))
    }

    /// Send due output, returning the first due echo
    fn deliver_due(&mut self) -> Option<Echo> {
        let now = self.now();
        while let Some((_, item)) = self.pending.pop_due(now) {
            match item {
                Pending::Output { port, message } => {
                    if let Err(e) = self.write(port, message) {
                        log::warn!("Dropped {:?} on port {}: {}", message, port, e);
                    }
                }
                Pending::Echo(echo) => return Some(echo),
                Pending::Input(_) => {}
            }
        }
        None
    }
}

impl SequencerQueue for MidirQueue {
    fn now(&self) -> RealTime {
        RealTime::from_duration(self.epoch.elapsed())
    }

    fn start(&mut self) -> SchedulerResult<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
        self.pending.drop_output();
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn register_ports(&mut self, count: usize) -> SchedulerResult<usize> {
        let count = count.min(MAX_PORTS);
        while self.outputs.len() < count {
            let connection = self.open_output(self.outputs.len())?;
            self.outputs.push(connection);
            log::info!("Registered output port {}", self.outputs.len());
        }
        Ok(self.outputs.len())
    }

    fn port_count(&self) -> usize {
        self.outputs.len()
    }

    fn schedule(
        &mut self,
        port: usize,
        message: MidiMessage,
        at: RealTime,
    ) -> SchedulerResult<()> {
        if port >= self.outputs.len() {
            return Err(SchedulerError::UnknownPort(port));
        }
        self.pending.push(at, Pending::Output { port, message });
        Ok(())
    }

    fn send_direct(&mut self, port: usize, message: MidiMessage) -> SchedulerResult<()> {
        self.write(port, message)
    }

    fn schedule_echo(&mut self, echo: Echo, at: RealTime) {
        self.pending.push(at, Pending::Echo(echo));
    }

    fn wait(&mut self, timeout: Duration) -> Option<QueueEvent> {
        let deadline = self.now() + timeout;

        loop {
            if let Some(echo) = self.deliver_due() {
                return Some(QueueEvent::Echo(echo));
            }

            let now = self.now();
            if now >= deadline {
                return None;
            }
            let wake = self
                .pending
                .next_time()
                .map_or(deadline, |next| next.min(deadline));

            match self.input_rx.recv_timeout(wake.saturating_sub(now)) {
                Ok((message, at)) => return Some(QueueEvent::Input { message, at }),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(wake.saturating_sub(now));
                }
            }
        }
    }

    fn is_drained(&self) -> bool {
        !self.pending.has_output()
    }
}
