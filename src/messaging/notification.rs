// Notifications - event loop to observers

use crate::midi::MidiMessage;
use crate::worker::{WorkerId, WorkerKind};
use std::time::{SystemTime, UNIX_EPOCH};

/// Severity of a status notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    Midi,
    Transport,
    Tempo,
    Worker,
    Generic,
}

/// Free-form status message with timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    pub level: NotificationLevel,
    pub category: NotificationCategory,
    pub message: String,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

impl StatusMessage {
    pub fn new(level: NotificationLevel, category: NotificationCategory, message: String) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            level,
            category,
            message,
            timestamp,
        }
    }
}

/// Signals emitted by the event loop
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// An unmatched input message was forwarded
    RawEventForwarded(MidiMessage),
    ControllerReceived {
        controller: u8,
        channel: u8,
        value: u8,
    },
    NoteReceived {
        note: u8,
        velocity: u8,
    },
    /// Transport sync state after a transport shutdown
    TransportShutdown(bool),
    WorkerRegistered {
        id: WorkerId,
        kind: WorkerKind,
    },
    WorkerRemoved(WorkerId),
    TempoChanged(f64),
    QueueRunning(bool),
    Status(StatusMessage),
}

impl Notification {
    pub fn info(category: NotificationCategory, message: String) -> Self {
        Notification::Status(StatusMessage::new(NotificationLevel::Info, category, message))
    }

    pub fn warning(category: NotificationCategory, message: String) -> Self {
        Notification::Status(StatusMessage::new(
            NotificationLevel::Warning,
            category,
            message,
        ))
    }

    pub fn error(category: NotificationCategory, message: String) -> Self {
        Notification::Status(StatusMessage::new(NotificationLevel::Error, category, message))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Notification::Status(status) if status.level == NotificationLevel::Error)
    }
}
