//! Timestamped, user-visible status lines.
//!
//! Every operation of the session controller and the voice input reports
//! progress and failures as short human-readable lines. They are mirrored
//! to `tracing` and broadcast to any number of subscribers (a console, a
//! UI, a test).

use chrono::{DateTime, Local};
use std::fmt;
use tokio::sync::broadcast;

/// Default capacity for the status broadcast channel.
const DEFAULT_STATUS_BROADCAST_CAPACITY: usize = 256;

/// A single status line.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub at: DateTime<Local>,
    pub message: String,
    /// Whether the line reports a failure.
    pub is_error: bool,
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// Cloneable sender side of the status stream.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    tx: broadcast::Sender<StatusUpdate>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_STATUS_BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Publishes a progress line.
    pub fn report(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(status = %message);
        self.publish(message, false);
    }

    /// Publishes a failure line.
    pub fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(status = %message);
        self.publish(message, true);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }

    fn publish(&self, message: String, is_error: bool) {
        // No subscribers is fine.
        let _ = self.tx.send(StatusUpdate {
            at: Local::now(),
            message,
            is_error,
        });
    }
}
