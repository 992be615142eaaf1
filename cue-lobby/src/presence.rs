//! Gossip presence: who is in the lobby right now.
//!
//! ## Architecture
//!
//! ```text
//! PresenceAnnouncer (local)                      every client
//!   jitter ─► join ─► heartbeat … ─► leave           │
//!       │                                            │
//!       ▼   (bus, presence channel)                  ▼
//!   ──────────────────────────────────────► LivePresence subscription
//!                                                    │
//!                                                    ▼
//!                                        PresenceTracker::apply(msg, now)
//!                                                    │
//!                                                    ▼
//!                                        online(now): prune ▸ sort ▸ cap
//! ```
//!
//! There is no server-side registry. Each client rebuilds the online list
//! from the gossip it has seen, so lists on two clients may briefly
//! disagree. Entries that stop heartbeating age out after the TTL.

use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bus::{ConnectionState, Lifecycle, NotificationBus, Subscription};
use crate::clock::Clock;
use crate::config::{LobbyConfig, PresenceConfig};
use crate::protocol::{BusMessage, PresenceKind, PresenceMessage};

// ───────────────────────────────────────────────────────────────────
// Reducer
// ───────────────────────────────────────────────────────────────────

/// Last known state of one online user. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    pub last_seen: u64,
}

/// Result of an online query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OnlineUsers {
    /// Most recently seen first, at most `max_listed` entries.
    pub users: Vec<PresenceEntry>,
    /// Live entries before the listing cap was applied.
    pub count: usize,
}

/// Pure presence state: feed it messages and ask it who is online.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    entries: HashMap<String, PresenceEntry>,
    ttl_ms: u64,
    max_listed: usize,
}

impl PresenceTracker {
    pub fn new(ttl: Duration, max_listed: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl_ms: ttl.as_millis() as u64,
            max_listed,
        }
    }

    pub fn from_config(config: &PresenceConfig) -> Self {
        Self::new(config.ttl(), config.max_listed)
    }

    /// Fold one gossip message into the state. Our own messages count too.
    pub fn apply(&mut self, msg: &PresenceMessage, now: u64) {
        match msg.kind {
            PresenceKind::Join | PresenceKind::Heartbeat => {
                let entry = PresenceEntry {
                    user_id: msg.user_id.clone(),
                    user_name: msg.user_name.clone(),
                    locale: msg.locale.clone(),
                    origin_url: msg.origin_url.clone(),
                    last_seen: msg.timestamp.unwrap_or(now),
                };
                self.entries.insert(msg.user_id.clone(), entry);
            }
            PresenceKind::Leave => {
                self.entries.remove(&msg.user_id);
            }
        }
    }

    /// Decode a raw bus frame and apply it if it is presence gossip.
    /// Returns whether the state was touched.
    pub fn apply_frame(&mut self, frame: &str, now: u64) -> bool {
        match BusMessage::decode(frame) {
            Ok(BusMessage::Presence(msg)) => {
                self.apply(&msg, now);
                true
            }
            Ok(BusMessage::Lobby(_)) => false,
            Err(e) => {
                log::debug!("Ignoring undecodable presence frame: {e}");
                false
            }
        }
    }

    /// Drop entries older than the TTL. Returns the removed user ids.
    pub fn prune(&mut self, now: u64) -> Vec<String> {
        let ttl = self.ttl_ms;
        let stale: Vec<String> = self
            .entries
            .values()
            .filter(|e| now.saturating_sub(e.last_seen) > ttl)
            .map(|e| e.user_id.clone())
            .collect();
        for id in &stale {
            self.entries.remove(id);
        }
        stale
    }

    pub fn online(&mut self, now: u64) -> OnlineUsers {
        self.prune(now);
        let mut users: Vec<PresenceEntry> = self.entries.values().cloned().collect();
        let count = users.len();
        users.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.user_id.cmp(&b.user_id)));
        users.truncate(self.max_listed);
        OnlineUsers { users, count }
    }

    pub fn get(&self, user_id: &str) -> Option<&PresenceEntry> {
        self.entries.get(user_id)
    }

    /// Entries currently held, including ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ───────────────────────────────────────────────────────────────────
// Local announcer
// ───────────────────────────────────────────────────────────────────

/// Who this client announces itself as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceIdentity {
    pub user_id: String,
    pub user_name: String,
    pub locale: Option<String>,
    pub origin_url: Option<String>,
}

impl PresenceIdentity {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            locale: None,
            origin_url: None,
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_origin(mut self, origin_url: impl Into<String>) -> Self {
        self.origin_url = Some(origin_url.into());
        self
    }

    pub fn message(&self, kind: PresenceKind, now: u64) -> PresenceMessage {
        PresenceMessage {
            kind,
            user_id: self.user_id.clone(),
            user_name: self.user_name.clone(),
            locale: self.locale.clone(),
            origin_url: self.origin_url.clone(),
            timestamp: Some(now),
        }
    }
}

/// Background task emitting this client's presence gossip.
///
/// Dropping the announcer stops it too, but only [`stop`](Self::stop)
/// waits for the `leave` to go out.
pub struct PresenceAnnouncer {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

struct Emitter {
    bus: NotificationBus,
    channel: String,
    identity: PresenceIdentity,
    clock: Arc<dyn Clock>,
}

impl Emitter {
    async fn emit(&self, kind: PresenceKind) {
        let msg = BusMessage::from(self.identity.message(kind, self.clock.now_millis()));
        if let Err(e) = self.bus.publish(&self.channel, &msg).await {
            log::warn!("Presence {kind:?} for {} not sent: {e}", self.identity.user_id);
        }
    }
}

impl PresenceAnnouncer {
    /// Publish `join` after a random delay of up to `config.join_jitter`,
    /// then `heartbeat` every `config.heartbeat` until stopped.
    pub fn start(
        bus: NotificationBus,
        channel: impl Into<String>,
        identity: PresenceIdentity,
        config: &PresenceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let max_jitter = config.join_jitter().as_millis() as u64;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter));
        let heartbeat = config.heartbeat();
        let emitter = Emitter {
            bus,
            channel: channel.into(),
            identity,
            clock,
        };
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let joined = tokio::select! {
                _ = &mut stop_rx => false,
                _ = tokio::time::sleep(jitter) => true,
            };

            if joined {
                emitter.emit(PresenceKind::Join).await;
                let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
                loop {
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        _ = ticker.tick() => emitter.emit(PresenceKind::Heartbeat).await,
                    }
                }
            }

            emitter.emit(PresenceKind::Leave).await;
            log::debug!("Presence announcer for {} stopped", emitter.identity.user_id);
        });

        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Publish `leave` and wait for the task to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Presence announcer task failed: {e}");
            }
        }
    }
}

impl Drop for PresenceAnnouncer {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Live feed
// ───────────────────────────────────────────────────────────────────

/// A tracker kept current by a bus subscription, plus (optionally) this
/// client's own announcer.
pub struct LivePresence {
    tracker: Arc<parking_lot::Mutex<PresenceTracker>>,
    clock: Arc<dyn Clock>,
    subscription: Subscription,
    announcer: Option<PresenceAnnouncer>,
}

impl LivePresence {
    pub fn start(
        bus: &NotificationBus,
        config: &LobbyConfig,
        identity: Option<PresenceIdentity>,
        lifecycle: Option<&Lifecycle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tracker = Arc::new(parking_lot::Mutex::new(PresenceTracker::from_config(&config.presence)));
        let channel = config.bus.presence_channel.clone();

        let feed = tracker.clone();
        let feed_clock = clock.clone();
        let subscription = bus.subscribe(
            &channel,
            &config.bus.kind,
            move |frame| {
                feed.lock().apply_frame(&frame, feed_clock.now_millis());
            },
            lifecycle,
        );

        let announcer = identity.map(|identity| {
            PresenceAnnouncer::start(bus.clone(), channel.clone(), identity, &config.presence, clock.clone())
        });

        Self {
            tracker,
            clock,
            subscription,
            announcer,
        }
    }

    pub fn users(&self) -> OnlineUsers {
        self.tracker.lock().online(self.clock.now_millis())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.subscription.state()
    }

    /// Announce `leave` (if announcing) and close the subscription.
    pub async fn stop(self) {
        let LivePresence {
            subscription,
            announcer,
            ..
        } = self;
        if let Some(announcer) = announcer {
            announcer.stop().await;
        }
        subscription.stop();
    }
}
