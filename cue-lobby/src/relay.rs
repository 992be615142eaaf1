//! WebSocket pub/sub relay.
//!
//! ```text
//! publisher ── /publish/<ns>/<channel> ──┐
//!                                         ▼
//!                                   ChannelHub[channel] ── broadcast ──┬──► subscriber A
//!                                                                      ├──► subscriber B
//!                                                                      └──► subscriber C
//!                                   (each subscriber: /subscribe/<kind>/<channel>)
//! ```
//!
//! Frames are relayed verbatim. Routing is by channel name only; the
//! namespace and kind path segments are accepted but not interpreted.
//! Every subscriber first receives a `connected` lobby frame.
//!
//! Subscribers that fall more than `channel_capacity` frames behind skip
//! the frames they missed.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::bus::transport::greeting_frame;

type RelayResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Relay configuration, the `[relay]` section of the lobby config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per subscriber before it starts skipping
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9191".to_string(),
            channel_capacity: 256,
        }
    }
}

impl RelayConfig {
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            channel_capacity: 64,
        }
    }
}

/// Relay statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub frames_published: u64,
    pub frames_delivered: u64,
    pub active_channels: usize,
}

#[derive(Default)]
struct AtomicRelayStats {
    total_connections: AtomicU64,
    frames_published: AtomicU64,
    frames_delivered: AtomicU64,
}

/// Per-channel broadcast groups.
pub struct ChannelHub {
    channels: RwLock<HashMap<String, broadcast::Sender<Arc<String>>>>,
    capacity: usize,
    stats: AtomicRelayStats,
}

impl ChannelHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
            stats: AtomicRelayStats::default(),
        }
    }

    /// Get or create the broadcast group for `channel`.
    pub async fn get_or_create(&self, channel: &str) -> broadcast::Sender<Arc<String>> {
        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(channel) {
                return sender.clone();
            }
        }

        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<Arc<String>> {
        self.get_or_create(channel).await.subscribe()
    }

    /// Fan a frame out to every current subscriber of `channel`.
    ///
    /// Returns how many subscribers it was queued for. Channels nobody
    /// listens on are not created.
    pub async fn publish(&self, channel: &str, frame: String) -> usize {
        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
        let channels = self.channels.read().await;
        match channels.get(channel) {
            Some(sender) => sender.send(Arc::new(frame)).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop a channel whose last subscriber went away.
    pub async fn remove_if_idle(&self, channel: &str) -> bool {
        let mut channels = self.channels.write().await;
        match channels.get(channel) {
            Some(sender) if sender.receiver_count() == 0 => {
                channels.remove(channel);
                log::debug!("Channel '{channel}' removed (idle)");
                true
            }
            _ => false,
        }
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map_or(0, |sender| sender.receiver_count())
    }

    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            frames_published: self.stats.frames_published.load(Ordering::Relaxed),
            frames_delivered: self.stats.frames_delivered.load(Ordering::Relaxed),
            active_channels: self.channel_count().await,
        }
    }
}

/// What a connection asked for in its upgrade path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Subscribe { kind: String, channel: String },
    Publish { namespace: String, channel: String },
}

impl Route {
    pub fn parse(path: &str) -> Option<Route> {
        let path = path.split('?').next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            ["subscribe", kind, channel] => Some(Route::Subscribe {
                kind: kind.to_string(),
                channel: channel.to_string(),
            }),
            ["publish", namespace, channel] => Some(Route::Publish {
                namespace: namespace.to_string(),
                channel: channel.to_string(),
            }),
            _ => None,
        }
    }
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    hub: Arc<ChannelHub>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let hub = Arc::new(ChannelHub::new(config.channel_capacity));
        Self { config, hub }
    }

    pub fn hub(&self) -> &Arc<ChannelHub> {
        &self.hub
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept loop on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, hub).await {
                    log::warn!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(stream: TcpStream, addr: SocketAddr, hub: Arc<ChannelHub>) -> RelayResult {
        let mut path = String::new();
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            path = req.uri().path().to_string();
            Ok::<Response, ErrorResponse>(resp)
        })
        .await?;

        hub.stats.total_connections.fetch_add(1, Ordering::Relaxed);

        match Route::parse(&path) {
            Some(Route::Subscribe { kind, channel }) => {
                log::info!("Subscriber {addr} attached to '{channel}' ({kind})");
                let frames = hub.subscribe(&channel).await;
                let result = Self::forward(ws, frames, &hub).await;
                hub.remove_if_idle(&channel).await;
                log::info!("Subscriber {addr} left '{channel}'");
                result
            }
            Some(Route::Publish { namespace, channel }) => {
                Self::relay_published(ws, &namespace, &channel, &hub).await
            }
            None => {
                log::warn!("Rejecting {addr}: unknown path '{path}'");
                ws.close(None).await?;
                Ok(())
            }
        }
    }

    /// Push channel frames to one subscriber until either side goes away.
    async fn forward(
        ws: WebSocketStream<TcpStream>,
        mut frames: broadcast::Receiver<Arc<String>>,
        hub: &ChannelHub,
    ) -> RelayResult {
        let (mut sink, mut source) = ws.split();
        sink.send(Message::text(greeting_frame()?)).await?;

        loop {
            tokio::select! {
                msg = source.next() => match msg {
                    Some(Ok(Message::Ping(data))) => sink.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        log::debug!("Subscriber read error: {e}");
                        break;
                    }
                    // Subscribers have nothing to say.
                    Some(Ok(_)) => {}
                },
                frame = frames.recv() => match frame {
                    Ok(text) => {
                        sink.send(Message::text(text.as_str().to_owned())).await?;
                        hub.stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Subscriber lagged, skipped {n} frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        Ok(())
    }

    async fn relay_published(
        mut ws: WebSocketStream<TcpStream>,
        namespace: &str,
        channel: &str,
        hub: &ChannelHub,
    ) -> RelayResult {
        while let Some(msg) = ws.next().await {
            match msg? {
                Message::Text(text) => {
                    let delivered = hub.publish(channel, text.as_str().to_owned()).await;
                    log::debug!("Frame on {namespace}/{channel} queued for {delivered} subscribers");
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }
}
