use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use super::{Notification, Notifier};

/// In-process pub/sub hub. Cloneable; all clones share one channel.
#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<Notification>,
}

impl NotificationHub {
    /// Create a hub with default capacity (256 events buffered per subscriber).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Deliver an already-built notification. No-op if nobody is listening.
    pub fn send(&self, notification: Notification) {
        let delivered = self.sender.send(notification).unwrap_or(0);
        debug!(delivered, "Notification fanned out");
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for NotificationHub {
    async fn publish(&self, event: &str, payload: serde_json::Value) {
        self.send(Notification {
            event: event.to_string(),
            data: payload,
        });
    }
}
