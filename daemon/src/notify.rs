//! Lifecycle notifications and the long-poll channel that carries them.
//!
//! Any number of producers publish; exactly one logical consumer (the `notify`
//! RPC) drains. When the channel is full, publishers wait instead of dropping.

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::tracker::ModifiedFileInfo;

/// Default number of undelivered notifications held before publishers wait.
pub const DEFAULT_CAPACITY: usize = 4096;

/// A single lifecycle event delivered to the subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    AgentStarted,
    TurnStarted {
        command: String,
    },
    TurnCompleted {
        modified_info: Vec<ModifiedFileInfo>,
        message: String,
    },
    ConfirmAsked {
        question: String,
        options: Vec<String>,
        default: Option<String>,
        group: Option<String>,
    },
    ConfirmAnswered {
        accepted: bool,
    },
    AgentExited,
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::AgentStarted => "agent_started",
            Notification::TurnStarted { .. } => "turn_started",
            Notification::TurnCompleted { .. } => "turn_completed",
            Notification::ConfirmAsked { .. } => "confirm_asked",
            Notification::ConfirmAnswered { .. } => "confirm_answered",
            Notification::AgentExited => "agent_exited",
        }
    }
}

/// Bounded FIFO of notifications.
pub struct NotificationChannel {
    tx: mpsc::Sender<Notification>,
    rx: Mutex<mpsc::Receiver<Notification>>,
}

impl NotificationChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Append a notification, waiting for room if the queue is full.
    pub async fn publish(&self, notification: Notification) {
        debug!("[notify] publish {}", notification.kind());
        if self.tx.capacity() == 0 {
            warn!("[notify] queue full, waiting for subscriber");
        }
        // The receiver lives in `self`, so the channel cannot be closed here.
        if let Err(e) = self.tx.send(notification).await {
            warn!("[notify] dropped {}: channel closed", e.0.kind());
        }
    }

    /// Wait for and remove the next notification.
    ///
    /// Cancel safe: dropping the future before it resolves loses nothing.
    pub async fn next(&self) -> Option<Notification> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Number of notifications waiting for the subscriber.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

impl Default for NotificationChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
