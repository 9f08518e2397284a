// midiarp_scheduler - Library exports for the binary, tests and benchmarks

pub mod config;
pub mod error;
pub mod groove;
pub mod messaging;
pub mod midi;
pub mod queue;
pub mod scheduler;
pub mod timing;
pub mod transport;
pub mod worker;

// Re-export commonly used types for convenience
pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use groove::GrooveSettings;
pub use messaging::{Command, Notification, create_command_channel, create_notification_channel};
pub use midi::{InputFilter, MidiMessage, OutputBinding};
pub use queue::{Echo, EchoReason, MidirQueue, SequencerQueue, VirtualQueue, VirtualQueueHandle};
pub use scheduler::{LoopState, Scheduler, SchedulerHandle, spawn_scheduler};
pub use timing::{
    ClockConverter, RealTime, TICKS_PER_QUARTER, Tempo, TempoSource, TempoTracker, Tick,
};
pub use transport::{ManualTransport, TransportSource};
pub use worker::{
    ArpPattern, Arpeggiator, ControlTarget, ControllerBinding, Lfo, LfoWaveform, LoopMode,
    StepSequencer, Worker, WorkerCommand, WorkerId, WorkerKind,
};
