use thiserror::Error;

/// Scheduler-related errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("MIDI initialization failed: {0}")]
    MidiInit(String),

    #[error("Port registration failed: {0}")]
    PortRegistration(String),

    #[error("Unknown output port {0}")]
    UnknownPort(usize),

    #[error("Failed to send MIDI message: {0}")]
    SendFailed(String),

    #[error("Command queue is full")]
    CommandQueueFull,

    #[error("Scheduler thread failed: {0}")]
    Thread(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RON error: {0}")]
    Ron(#[from] ron::Error),

    #[error("RON parse error: {0}")]
    RonParse(#[from] ron::error::SpannedError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
