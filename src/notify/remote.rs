use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Notification, NotificationHub, Notifier};
use crate::types::{AppError, AppResult};

/// Pub/sub channel shared by every process of one deployment.
pub const EVENTS_CHANNEL: &str = "jobalizer:events";

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Publishes notifications on the broker's pub/sub channel.
#[derive(Clone)]
pub struct RedisNotifier {
    conn: ConnectionManager,
}

impl RedisNotifier {
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::Config(format!("Invalid NOTIFY_URL: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Queue(format!("Notification transport unreachable: {}", e)))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn publish(&self, event: &str, payload: serde_json::Value) {
        let message = match encode(event, payload) {
            Ok(message) => message,
            Err(e) => {
                error!(event, error = %e, "Failed to encode notification");
                return;
            }
        };

        let mut conn = self.conn.clone();
        let published: redis::RedisResult<i64> = redis::cmd("PUBLISH")
            .arg(EVENTS_CHANNEL)
            .arg(message)
            .query_async(&mut conn)
            .await;

        match published {
            Ok(receivers) => debug!(event, receivers, "Notification published"),
            Err(e) => warn!(event, error = %e, "Failed to publish notification"),
        }
    }
}

fn encode(event: &str, payload: serde_json::Value) -> serde_json::Result<String> {
    serde_json::to_string(&Notification {
        event: event.to_string(),
        data: payload,
    })
}

fn decode(message: &str) -> serde_json::Result<Notification> {
    serde_json::from_str(message)
}

/// Forward every notification published on [`EVENTS_CHANNEL`] into `hub`.
///
/// Runs until the process exits, resubscribing after connection loss. Events
/// published while disconnected are lost.
pub fn relay(url: &str, hub: NotificationHub) -> AppResult<JoinHandle<()>> {
    let client = redis::Client::open(url)
        .map_err(|e| AppError::Config(format!("Invalid NOTIFY_URL: {}", e)))?;

    Ok(tokio::spawn(async move {
        loop {
            match client.get_async_pubsub().await {
                Ok(mut pubsub) => {
                    if let Err(e) = pubsub.subscribe(EVENTS_CHANNEL).await {
                        warn!(error = %e, "Failed to subscribe to notification channel");
                    } else {
                        info!(channel = EVENTS_CHANNEL, "Relaying notifications");
                        let mut messages = pubsub.on_message();
                        while let Some(msg) = messages.next().await {
                            let payload: String = match msg.get_payload() {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!(error = %e, "Dropping non-text notification");
                                    continue;
                                }
                            };
                            match decode(&payload) {
                                Ok(notification) => hub.send(notification),
                                Err(e) => warn!(error = %e, "Dropping malformed notification"),
                            }
                        }
                        warn!("Notification subscription closed");
                    }
                }
                Err(e) => warn!(error = %e, "Notification transport unreachable"),
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let message = encode("job_processed", json!({"id": 3, "fields": {"Location": "NYC"}})).unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(
            value,
            json!({"event": "job_processed", "data": {"id": 3, "fields": {"Location": "NYC"}}})
        );

        let notification = decode(&message).unwrap();
        assert_eq!(notification.event, "job_processed");
        assert_eq!(notification.data["id"], 3);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"data": {}}"#).is_err());
    }

    #[test]
    fn test_relay_rejects_invalid_url() {
        let err = relay("not a url", NotificationHub::new()).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
