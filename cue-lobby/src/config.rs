//! Lobby configuration.
//!
//! Loaded from TOML; every section and key is optional:
//! ```toml
//! [tables]
//! base_timeout_secs = 60
//!
//! [presence]
//! ttl_secs = 90
//! heartbeat_secs = 60
//!
//! [bus]
//! url = "ws://127.0.0.1:9191"
//! namespace = "cue"
//!
//! [relay]
//! bind_addr = "0.0.0.0:9191"
//! ```
//! `CUE_LOBBY_*` environment variables override file values, see
//! [`LobbyConfig::apply_overrides`].

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::relay::RelayConfig;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Idle timeout for solo tables. Occupied tables get ten times this.
    pub base_timeout_secs: u64,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            base_timeout_secs: 60,
        }
    }
}

impl TableConfig {
    pub fn base_timeout(&self) -> Duration {
        Duration::from_secs(self.base_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Entries not refreshed within this window drop out of the online list.
    pub ttl_secs: u64,
    pub heartbeat_secs: u64,
    /// Upper bound of the random delay before the first `join`.
    pub join_jitter_ms: u64,
    /// Maximum number of users returned by an online query.
    pub max_listed: usize,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 90,
            heartbeat_secs: 60,
            join_jitter_ms: 2_000,
            max_listed: 50,
        }
    }
}

impl PresenceConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn join_jitter(&self) -> Duration {
        Duration::from_millis(self.join_jitter_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Number of match results kept before the oldest are evicted.
    pub limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { limit: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Base URL of the pub/sub relay.
    pub url: String,
    /// Namespace segment of publish paths.
    pub namespace: String,
    /// Connection kind segment of subscribe paths.
    pub kind: String,
    pub lobby_channel: String,
    pub presence_channel: String,
    pub reconnect_delay_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9191".to_string(),
            namespace: "cue".to_string(),
            kind: "ws".to_string(),
            lobby_channel: "lobby".to_string(),
            presence_channel: "lobby".to_string(),
            reconnect_delay_secs: 30,
        }
    }
}

impl BusConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    pub tables: TableConfig,
    pub presence: PresenceConfig,
    pub history: HistoryConfig,
    pub bus: BusConfig,
    pub relay: RelayConfig,
}

impl LobbyConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Short timers for tests.
    pub fn for_testing() -> Self {
        Self {
            tables: TableConfig {
                base_timeout_secs: 60,
            },
            presence: PresenceConfig {
                ttl_secs: 90,
                heartbeat_secs: 1,
                join_jitter_ms: 0,
                max_listed: 50,
            },
            history: HistoryConfig::default(),
            bus: BusConfig {
                reconnect_delay_secs: 1,
                ..BusConfig::default()
            },
            relay: RelayConfig::for_testing(),
        }
    }

    /// Apply `CUE_LOBBY_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Unparseable numbers are
    /// ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("CUE_LOBBY_BUS_URL") {
            self.bus.url = url;
        }
        if let Some(ns) = lookup("CUE_LOBBY_NAMESPACE") {
            self.bus.namespace = ns;
        }
        if let Some(channel) = lookup("CUE_LOBBY_CHANNEL") {
            self.bus.lobby_channel = channel;
        }
        if let Some(channel) = lookup("CUE_LOBBY_PRESENCE_CHANNEL") {
            self.bus.presence_channel = channel;
        }
        if let Some(bind) = lookup("CUE_LOBBY_RELAY_BIND") {
            self.relay.bind_addr = bind;
        }
        override_number(&lookup, "CUE_LOBBY_TABLE_TIMEOUT_SECS", &mut self.tables.base_timeout_secs);
        override_number(&lookup, "CUE_LOBBY_PRESENCE_TTL_SECS", &mut self.presence.ttl_secs);
        override_number(&lookup, "CUE_LOBBY_HISTORY_LIMIT", &mut self.history.limit);
        override_number(
            &lookup,
            "CUE_LOBBY_RECONNECT_DELAY_SECS",
            &mut self.bus.reconnect_delay_secs,
        );
    }
}

fn override_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => log::warn!("Ignoring {key}={raw}: not a number"),
        }
    }
}
