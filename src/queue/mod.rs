// Sequencing queue - timestamped output, echo wake-ups and live input
//
// The scheduler only talks to a `SequencerQueue`. `VirtualQueue` runs on a
// simulated clock for tests, `MidirQueue` drives real MIDI ports.

pub mod midir_queue;
pub mod virtual_queue;

pub use midir_queue::MidirQueue;
pub use virtual_queue::{SentMessage, VirtualQueue, VirtualQueueHandle};

use crate::error::SchedulerResult;
use crate::midi::MidiMessage;
use crate::timing::{RealTime, Tick};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

/// Why the scheduler asked to be woken up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoReason {
    WorkerDue,
    GrooveDue,
    KeyboardTriggerDue,
    /// Nothing is due, wake up once per quarter note anyway
    Heartbeat,
}

/// A wake-up the scheduler sends to itself through the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Echo {
    pub tick: Tick,
    pub reason: EchoReason,
    pub generation: u64,
}

/// What `SequencerQueue::wait` hands back to the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    Echo(Echo),
    Input { message: MidiMessage, at: RealTime },
}

pub trait SequencerQueue: Send {
    /// Current queue time
    fn now(&self) -> RealTime;

    fn start(&mut self) -> SchedulerResult<()>;

    /// Stop the queue, dropping output that has not been delivered yet.
    /// Pending echoes are kept and still delivered.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Make sure at least `count` output ports exist, returns the port count
    fn register_ports(&mut self, count: usize) -> SchedulerResult<usize>;

    fn port_count(&self) -> usize;

    /// Deliver `message` on `port` at queue time `at`
    fn schedule(&mut self, port: usize, message: MidiMessage, at: RealTime)
    -> SchedulerResult<()>;

    /// Deliver `message` on `port` immediately
    fn send_direct(&mut self, port: usize, message: MidiMessage) -> SchedulerResult<()>;

    fn schedule_echo(&mut self, echo: Echo, at: RealTime);

    /// Block for at most `timeout` until an echo or input event is due
    fn wait(&mut self, timeout: Duration) -> Option<QueueEvent>;

    /// No undelivered output remains
    fn is_drained(&self) -> bool;
}

/// Item waiting in a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pending {
    Output { port: usize, message: MidiMessage },
    Echo(Echo),
    Input(MidiMessage),
}

#[derive(Debug)]
struct Entry<T> {
    at: RealTime,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // Reversed: BinaryHeap is a max-heap, the earliest entry must be on top
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue keyed by real time, FIFO among equal times
#[derive(Debug)]
pub(crate) struct TimedQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> TimedQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, at: RealTime, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { at, seq, item });
    }

    pub fn next_time(&self) -> Option<RealTime> {
        self.heap.peek().map(|entry| entry.at)
    }

    /// Remove the earliest item if it is due at or before `now`
    pub fn pop_due(&mut self, now: RealTime) -> Option<(RealTime, T)> {
        if self.next_time()? > now {
            return None;
        }
        self.heap.pop().map(|entry| (entry.at, entry.item))
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.heap.retain(|entry| keep(&entry.item));
    }

    pub fn any(&self, mut predicate: impl FnMut(&T) -> bool) -> bool {
        self.heap.iter().any(|entry| predicate(&entry.item))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

impl TimedQueue<Pending> {
    pub fn has_output(&self) -> bool {
        self.any(|item| matches!(item, Pending::Output { .. }))
    }

    pub fn drop_output(&mut self) {
        self.retain(|item| !matches!(item, Pending::Output { .. }));
    }
}
