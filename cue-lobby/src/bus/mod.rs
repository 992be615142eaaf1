//! Notification bus: fire-and-forget publish plus long-lived subscriptions.
//!
//! ```text
//!  publish(channel, event)                    subscribe(channel, kind, on_message)
//!        │                                              │
//!        ▼ JSON text                                    ▼
//!  Transport::publish ──► relay/<channel> ──► Transport::connect ──► Subscription task
//!  publish/<ns>/<channel>                     subscribe/<kind>/<channel>
//! ```
//!
//! Delivery is at-most-once. Nothing is replayed after a reconnect, so
//! receivers must treat frames as hints and re-read the store.

pub mod subscription;
pub mod transport;

pub use subscription::{ConnectionState, Lifecycle, Subscription, Visibility};
pub use transport::{FrameStream, MemoryTransport, Transport, WsTransport};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BusConfig;
use crate::error::BusError;

/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct NotificationBus {
    transport: Arc<dyn Transport>,
    namespace: String,
    reconnect_delay: Duration,
}

impl NotificationBus {
    pub fn new(transport: Arc<dyn Transport>, namespace: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            transport,
            namespace: namespace.into(),
            reconnect_delay,
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &BusConfig) -> Self {
        Self::new(transport, config.namespace.clone(), config.reconnect_delay())
    }

    /// A bus talking to the relay at `config.url`.
    pub fn websocket(config: &BusConfig) -> Self {
        Self::from_config(Arc::new(WsTransport::new(config.url.clone())), config)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Serialize `event` and send it to `channel`. Errors are for the caller
    /// to log; nothing is retried.
    pub async fn publish<T>(&self, channel: &str, event: &T) -> Result<(), BusError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let payload = serde_json::to_string(event)?;
        self.transport.publish(&self.namespace, channel, payload).await
    }

    /// Spawn a subscriber task that hands every inbound text frame to
    /// `on_message`. With a `lifecycle`, the connection is suspended while
    /// the host is hidden.
    pub fn subscribe<F>(
        &self,
        channel: &str,
        kind: &str,
        on_message: F,
        lifecycle: Option<&Lifecycle>,
    ) -> Subscription
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        Subscription::spawn(
            self.transport.clone(),
            kind,
            channel,
            self.reconnect_delay,
            Arc::new(on_message),
            lifecycle.map(Lifecycle::observe),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BusMessage, LobbyAction, LobbyEvent};
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_publish_reaches_subscriber_verbatim() {
        let bus = NotificationBus::new(Arc::new(MemoryTransport::default()), "cue", Duration::from_secs(1));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sub = bus.subscribe("lobby", "ws", move |frame| { let _ = tx.send(frame); }, None);

        // Greeting first.
        let hello = rx.recv().await.unwrap();
        assert!(hello.contains("\"connected\""));
        assert_eq!(sub.state(), ConnectionState::Connected);

        let event = BusMessage::from(LobbyEvent::new(LobbyAction::Create, "t1", 5));
        bus.publish("lobby", &event).await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, event.encode().unwrap());
        assert_eq!(BusMessage::decode(&frame).unwrap(), event);
    }

    #[tokio::test]
    async fn test_publish_failure_is_returned() {
        let transport = Arc::new(MemoryTransport::default());
        transport.set_online(false);
        let bus = NotificationBus::new(transport, "cue", Duration::from_secs(1));
        let result = bus.publish("lobby", &serde_json::json!({"action": "create"})).await;
        assert!(matches!(result, Err(BusError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = NotificationBus::new(Arc::new(MemoryTransport::default()), "cue", Duration::from_secs(1));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = bus.subscribe("presence", "ws", move |frame| sink.lock().push(frame), None);
        let mut states = sub.state_changes();
        states.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

        bus.publish("lobby", &serde_json::json!({"action": "delete"})).await.unwrap();
        bus.publish("presence", &serde_json::json!({"n": 1})).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(seen.lock()[1], r#"{"n":1}"#);
    }

    #[test]
    fn test_from_config_takes_namespace() {
        let config = BusConfig {
            namespace: "league".into(),
            reconnect_delay_secs: 5,
            ..BusConfig::default()
        };
        let bus = NotificationBus::from_config(Arc::new(MemoryTransport::default()), &config);
        assert_eq!(bus.namespace(), "league");
        assert_eq!(bus.reconnect_delay, Duration::from_secs(5));
    }
}
