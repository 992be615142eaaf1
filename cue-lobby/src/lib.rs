//! # cue-lobby: Lobby coordination for real-time cue sports
//!
//! Tables, presence and match history shared between clients through a
//! key-value store, kept fresh by push notifications.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  hset/hget…   ┌──────────────┐
//! │ TableCoordinator │ ────────────► │  dyn Store   │ ◄──── MatchHistory
//! └────────┬─────────┘               └──────────────┘         (zadd/zrange…)
//!          │ LobbyEvent
//!          ▼
//! ┌──────────────────┐  WebSocket    ┌──────────────┐
//! │ NotificationBus  │ ────────────► │ RelayServer  │
//! │ (publish)        │               │ (ChannelHub) │
//! └──────────────────┘               └──────┬───────┘
//!                                           │ fan-out per channel
//!                       ┌───────────────────┼───────────────────┐
//!                       ▼                   ▼                   ▼
//!                 RefreshSignal       LivePresence        any subscriber
//!                 (re-read tables)    (gossip reducer)
//! ```
//!
//! ## Modules
//!
//! - [`store`]: Store trait with in-memory and RocksDB backends
//! - [`bus`]: Publish/subscribe with reconnect and visibility handling
//! - [`relay`]: WebSocket pub/sub relay server
//! - [`tables`]: Table lifecycle and expiry
//! - [`presence`]: Gossip presence reducer and announcer
//! - [`history`]: Bounded match history with replay blobs
//! - [`signal`]: Lobby events as refresh notifications

pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod model;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod signal;
pub mod store;
pub mod tables;

// Re-exports for convenience
pub use bus::{
    ConnectionState, Lifecycle, MemoryTransport, NotificationBus, Subscription, Transport,
    Visibility, WsTransport,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BusConfig, HistoryConfig, LobbyConfig, PresenceConfig, TableConfig};
pub use error::{BusError, ConfigError, LobbyError, StoreError};
pub use history::MatchHistory;
pub use model::{MatchResult, Player, RuleType, Table};
pub use presence::{
    LivePresence, OnlineUsers, PresenceAnnouncer, PresenceEntry, PresenceIdentity, PresenceTracker,
};
pub use protocol::{BusMessage, LobbyAction, LobbyEvent, PresenceKind, PresenceMessage};
pub use relay::{ChannelHub, RelayConfig, RelayServer, RelayStats};
pub use signal::RefreshSignal;
pub use store::{MemoryStore, RangeOptions, RocksStore, ScoredMember, Store, StoreConfig};
pub use tables::TableCoordinator;
