//! Transports carrying bus frames.
//!
//! - [`WsTransport`]: WebSocket client for the relay. Every publish opens a
//!   short-lived `publish/<ns>/<channel>` connection; every subscription holds
//!   a `subscribe/<kind>/<channel>` connection open.
//! - [`MemoryTransport`]: in-process channels with the same greeting and
//!   close behaviour, plus knobs for simulating outages.

use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::clock::now_millis;
use crate::error::BusError;
use crate::protocol::{BusMessage, LobbyEvent};

/// Inbound text frames of one connection. Ends when the connection closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, BusError>> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one frame to `channel`.
    async fn publish(&self, namespace: &str, channel: &str, payload: String) -> Result<(), BusError>;

    /// Open a subscriber connection.
    async fn connect(&self, kind: &str, channel: &str) -> Result<FrameStream, BusError>;
}

/// The `connected` greeting a subscriber sees first on every connection.
pub(crate) fn greeting_frame() -> Result<String, BusError> {
    Ok(BusMessage::from(LobbyEvent::connected(now_millis())).encode()?)
}

// ─── WebSocket ────────────────────────────────────────────────────────

pub struct WsTransport {
    base_url: String,
}

impl WsTransport {
    /// `base_url` is the relay root, e.g. `ws://127.0.0.1:9191`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn publish(&self, namespace: &str, channel: &str, payload: String) -> Result<(), BusError> {
        let url = format!("{}/publish/{namespace}/{channel}", self.base_url);
        let (mut ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| BusError::Connect {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        ws.send(Message::text(payload))
            .await
            .map_err(|e| BusError::Send(e.to_string()))?;

        if let Err(e) = ws.close(None).await {
            log::debug!("Publish connection to {url} closed uncleanly: {e}");
        }
        Ok(())
    }

    async fn connect(&self, kind: &str, channel: &str) -> Result<FrameStream, BusError> {
        let url = format!("{}/subscribe/{kind}/{channel}", self.base_url);
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| BusError::Connect {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        log::debug!("Subscribed via {url}");

        let frames = ws
            .take_while(|msg| {
                let open = !matches!(msg, Ok(Message::Close(_)));
                async move { open }
            })
            .filter_map(|msg| async move { inbound(msg) });

        Ok(Box::pin(frames))
    }
}

/// Text frames pass through, control frames are dropped.
fn inbound(msg: Result<Message, WsError>) -> Option<Result<String, BusError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(_) => None,
        Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Some(Err(BusError::Closed)),
        Err(e) => Some(Err(BusError::Send(e.to_string()))),
    }
}

// ─── In-memory ────────────────────────────────────────────────────────

/// Process-local transport. Channels are shared by name, namespaces and
/// kinds are ignored just as the relay ignores them.
pub struct MemoryTransport {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
    online: AtomicBool,
    /// Bumped to sever every open subscriber connection.
    epoch: watch::Sender<u64>,
    connects: AtomicUsize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MemoryTransport {
    pub fn new(capacity: usize) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
            online: AtomicBool::new(true),
            epoch,
            connects: AtomicUsize::new(0),
        }
    }

    /// While offline, `connect` and `publish` fail.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Close every open subscriber connection as if the relay went away.
    pub fn drop_connections(&self) {
        self.epoch.send_modify(|epoch| *epoch += 1);
    }

    /// Number of successful `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    fn ensure_online(&self, channel: &str) -> Result<(), BusError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Connect {
                url: format!("memory://{channel}"),
                reason: "transport offline".into(),
            })
        }
    }
}

struct Feed {
    greeting: Option<String>,
    frames: broadcast::Receiver<String>,
    resets: watch::Receiver<u64>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, _namespace: &str, channel: &str, payload: String) -> Result<(), BusError> {
        self.ensure_online(channel)?;
        // No subscribers is not an error: delivery is at-most-once.
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    async fn connect(&self, _kind: &str, channel: &str) -> Result<FrameStream, BusError> {
        self.ensure_online(channel)?;

        let resets = self.epoch.subscribe();
        let feed = Feed {
            greeting: Some(greeting_frame()?),
            frames: self.sender(channel).subscribe(),
            resets,
        };
        self.connects.fetch_add(1, Ordering::SeqCst);

        let frames = stream::unfold(feed, |mut feed| async move {
            if let Some(hello) = feed.greeting.take() {
                return Some((Ok(hello), feed));
            }
            loop {
                let frame = tokio::select! {
                    _ = feed.resets.changed() => return None,
                    frame = feed.frames.recv() => frame,
                };
                match frame {
                    Ok(text) => return Some((Ok(text), feed)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Memory subscriber lagged, skipped {n} frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_greeting_then_frames() {
        let transport = MemoryTransport::default();
        let mut frames = transport.connect("ws", "lobby").await.unwrap();

        let hello = frames.next().await.unwrap().unwrap();
        let event = BusMessage::decode(&hello).unwrap();
        assert!(!event.as_lobby().unwrap().invalidates());

        transport.publish("cue", "lobby", "frame-1".into()).await.unwrap();
        transport.publish("cue", "other", "elsewhere".into()).await.unwrap();
        transport.publish("cue", "lobby", "frame-2".into()).await.unwrap();

        assert_eq!(frames.next().await.unwrap().unwrap(), "frame-1");
        assert_eq!(frames.next().await.unwrap().unwrap(), "frame-2");
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_drop_connections_ends_streams() {
        let transport = MemoryTransport::default();
        let mut frames = transport.connect("ws", "lobby").await.unwrap();
        frames.next().await.unwrap().unwrap();

        transport.drop_connections();
        assert!(frames.next().await.is_none());

        // New connections after the reset stay open.
        let mut again = transport.connect("ws", "lobby").await.unwrap();
        again.next().await.unwrap().unwrap();
        transport.publish("cue", "lobby", "still here".into()).await.unwrap();
        assert_eq!(again.next().await.unwrap().unwrap(), "still here");
    }

    #[tokio::test]
    async fn test_memory_offline() {
        let transport = MemoryTransport::default();
        transport.set_online(false);
        assert!(matches!(
            transport.connect("ws", "lobby").await,
            Err(BusError::Connect { .. })
        ));
        assert!(transport.publish("cue", "lobby", "x".into()).await.is_err());
        assert_eq!(transport.connect_count(), 0);
    }

    #[test]
    fn test_inbound_frames() {
        assert_eq!(inbound(Ok(Message::text("hi"))).unwrap().unwrap(), "hi");
        assert!(inbound(Ok(Message::Ping(Default::default()))).is_none());
        assert!(matches!(
            inbound(Err(WsError::ConnectionClosed)),
            Some(Err(BusError::Closed))
        ));
        assert!(matches!(
            inbound(Err(WsError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset"
            )))),
            Some(Err(BusError::Send(_)))
        ));
    }

    #[test]
    fn test_ws_base_url_trimmed() {
        assert_eq!(WsTransport::new("ws://relay:9191/").base_url(), "ws://relay:9191");
    }
}
