// Worker registry - arena of workers with their dispatch bookkeeping
//
// Registration order is kept separately from the arena so due workers are
// always dispatched in the order they were added.

use super::{ControllerBinding, InputResponse, Payload, Worker, WorkerCommand};
use crate::midi::{MidiMessage, OutputBinding};
use crate::timing::{TICKS_PER_QUARTER, Tick};
use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// Stable handle to a registered worker
    pub struct WorkerId;
}

/// Minimum advance of a worker whose pull covered no time
pub const IDLE_ADVANCE: Tick = TICKS_PER_QUARTER / 16;

/// An event produced by a pull, ready for groove and emission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputEvent {
    pub worker: WorkerId,
    pub tick: Tick,
    pub payload: Payload,
    pub muted: bool,
    pub binding: OutputBinding,
    /// Step spacing of the producing worker
    pub step: Tick,
    /// Groove may perturb this event
    pub grooves: bool,
}

impl OutputEvent {
    /// The MIDI messages this event expands to, with their ticks
    pub fn messages(&self) -> Vec<(Tick, MidiMessage)> {
        let channel = self.binding.channel;
        match self.payload {
            Payload::Note {
                note,
                velocity,
                length,
            } => vec![
                (
                    self.tick,
                    MidiMessage::NoteOn {
                        channel,
                        note,
                        velocity,
                    },
                ),
                (
                    self.tick + length,
                    MidiMessage::NoteOff {
                        channel,
                        note,
                        velocity: 0,
                    },
                ),
            ],
            Payload::Controller { controller, value } => vec![(
                self.tick,
                MidiMessage::ControlChange {
                    channel,
                    controller,
                    value,
                },
            )],
        }
    }
}

struct WorkerSlot {
    worker: Box<dyn Worker>,
    last_tick: Option<Tick>,
    next_due: Tick,
    min_packet: Tick,
    controllers: Vec<ControllerBinding>,
}

pub struct WorkerRegistry {
    slots: SlotMap<WorkerId, WorkerSlot>,
    order: Vec<WorkerId>,
    min_packet: Tick,
}

impl WorkerRegistry {
    pub fn new(min_packet: Tick) -> Self {
        Self {
            slots: SlotMap::with_key(),
            order: Vec::new(),
            min_packet,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Worker ids in registration order
    pub fn ids(&self) -> &[WorkerId] {
        &self.order
    }

    pub fn register(&mut self, worker: Box<dyn Worker>) -> WorkerId {
        self.register_at(worker, 0)
    }

    /// Register a worker that becomes due at `tick`
    pub fn register_at(&mut self, worker: Box<dyn Worker>, tick: Tick) -> WorkerId {
        let id = self.slots.insert(WorkerSlot {
            worker,
            last_tick: None,
            next_due: tick,
            min_packet: self.min_packet,
            controllers: Vec::new(),
        });
        self.order.push(id);
        id
    }

    pub fn unregister(&mut self, id: WorkerId) -> Option<Box<dyn Worker>> {
        let slot = self.slots.remove(id)?;
        self.order.retain(|&other| other != id);
        Some(slot.worker)
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn worker(&self, id: WorkerId) -> Option<&dyn Worker> {
        self.slots.get(id).map(|slot| slot.worker.as_ref())
    }

    pub fn next_due_tick(&self, id: WorkerId) -> Option<Tick> {
        self.slots.get(id).map(|slot| slot.next_due)
    }

    pub fn last_tick(&self, id: WorkerId) -> Option<Tick> {
        self.slots.get(id).and_then(|slot| slot.last_tick)
    }

    /// Earliest next-due tick over all workers
    pub fn earliest_due(&self) -> Option<Tick> {
        self.slots.values().map(|slot| slot.next_due).min()
    }

    /// Workers due at or before `tick`, in registration order
    pub fn due_at(&self, tick: Tick) -> Vec<WorkerId> {
        self.order
            .iter()
            .copied()
            .filter(|&id| self.slots.get(id).is_some_and(|slot| slot.next_due <= tick))
            .collect()
    }

    /// Pull a worker once for its current due cycle
    ///
    /// Consecutive pulls are coalesced until the slot's minimum packet is
    /// covered. The next-due tick always moves forward, by `IDLE_ADVANCE` for
    /// a pull that covered no time.
    pub fn pull(&mut self, id: WorkerId) -> Vec<OutputEvent> {
        let Some(slot) = self.slots.get_mut(id) else {
            return Vec::new();
        };

        let start = slot.next_due;
        let binding = slot.worker.binding();
        let step = slot.worker.step_ticks();
        let grooves = slot.worker.accepts_groove();
        let worker_muted = slot.worker.is_muted();

        let mut cursor = start;
        let mut events = Vec::new();
        loop {
            let wave = slot.worker.pull(cursor);
            events.extend(wave.samples.into_iter().map(|sample| OutputEvent {
                worker: id,
                tick: sample.tick,
                payload: sample.payload,
                muted: sample.muted || worker_muted,
                binding,
                step,
                grooves,
            }));
            cursor += if wave.length == 0 {
                IDLE_ADVANCE
            } else {
                wave.length
            };
            if cursor - start >= slot.min_packet {
                break;
            }
        }

        slot.last_tick = Some(start);
        slot.next_due = cursor;
        events
    }

    /// Rewind a worker and make it due at `tick`
    pub fn restart(&mut self, id: WorkerId, tick: Tick) -> bool {
        let Some(slot) = self.slots.get_mut(id) else {
            return false;
        };
        slot.worker.reset();
        slot.next_due = tick;
        slot.last_tick = None;
        true
    }

    /// Rewind every worker and make them all due at `tick`
    pub fn reset_all(&mut self, tick: Tick) {
        for slot in self.slots.values_mut() {
            slot.worker.reset();
            slot.next_due = tick;
            slot.last_tick = None;
        }
    }

    /// Minimum dispatch granularity for every current and future worker
    pub fn set_min_packet(&mut self, ticks: Tick) {
        self.min_packet = ticks;
        for slot in self.slots.values_mut() {
            slot.min_packet = ticks;
        }
    }

    /// Apply a command; controller bindings are kept by the registry
    pub fn apply(&mut self, id: WorkerId, command: WorkerCommand) -> bool {
        let Some(slot) = self.slots.get_mut(id) else {
            return false;
        };
        match command {
            WorkerCommand::BindController(binding) => {
                slot.controllers.retain(|other| {
                    !(other.matches(binding.channel, binding.controller)
                        && other.target == binding.target)
                });
                slot.controllers.push(binding);
            }
            WorkerCommand::UnbindController {
                controller,
                channel,
            } => slot
                .controllers
                .retain(|other| !other.matches(channel, controller)),
            command => slot.worker.apply(command),
        }
        true
    }

    pub fn controllers(&self, id: WorkerId) -> &[ControllerBinding] {
        self.slots
            .get(id)
            .map(|slot| slot.controllers.as_slice())
            .unwrap_or(&[])
    }

    /// Drive every worker bound to this controller. Returns the workers that
    /// received a command, in registration order.
    pub fn route_controller(&mut self, channel: u8, controller: u8, value: u8) -> Vec<WorkerId> {
        let mut controlled = Vec::new();
        for &id in &self.order {
            let Some(slot) = self.slots.get_mut(id) else {
                continue;
            };
            let mut applied = false;
            for binding in slot.controllers.iter().filter(|b| b.matches(channel, controller)) {
                if let Some(command) = binding.command_for(value, slot.worker.binding()) {
                    log::trace!("CC {} -> {:?} on {:?}", controller, command, id);
                    slot.worker.apply(command);
                    applied = true;
                }
            }
            if applied {
                controlled.push(id);
            }
        }
        controlled
    }

    /// Offer an input message to every worker in registration order
    pub fn route_input(
        &mut self,
        message: &MidiMessage,
        tick: Tick,
    ) -> Vec<(WorkerId, InputResponse)> {
        let mut responses = Vec::new();
        for &id in &self.order {
            if let Some(slot) = self.slots.get_mut(id) {
                let response = slot.worker.handle_input(message, tick);
                if response != InputResponse::Ignored {
                    responses.push((id, response));
                }
            }
        }
        responses
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}
