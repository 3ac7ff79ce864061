//! Registration state notifications for the host application.

use tokio::sync::broadcast;
use tracing::trace;

/// Published by the orchestrator when registration status changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotification {
    RegistrationStateChanged {
        registered: bool,
        phone_number: Option<String>,
    },
}

/// Destination for [`SessionNotification`]s.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, notification: SessionNotification);
}

/// Fan-out over a tokio broadcast channel. Slow subscribers lose the oldest entries.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<SessionNotification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl NotificationSink for BroadcastNotifier {
    fn publish(&self, notification: SessionNotification) {
        // No subscribers is not an error.
        if self.sender.send(notification).is_err() {
            trace!("Notification dropped, no subscribers");
        }
    }
}
