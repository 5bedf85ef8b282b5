//! Notification Channel
//!
//! Fire-and-forget fan-out of pipeline events to connected browsers. Nothing is
//! persisted and nothing is acknowledged; a client that is not connected when an
//! event fires simply never sees it.
//!
//! Two transports:
//! - [`NotificationHub`]: in-process `tokio::sync::broadcast`, feeds the `/ws` route.
//! - [`RedisNotifier`]: `PUBLISH` on the shared broker so a worker running in another
//!   process reaches the web process, where [`relay`] copies events into the hub.

pub mod hub;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use hub::NotificationHub;
pub use remote::{relay, RedisNotifier, EVENTS_CHANNEL};

/// One event as it travels over the wire and to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Broadcast `payload` under `event` to everyone currently listening.
    async fn publish(&self, event: &str, payload: serde_json::Value);
}
