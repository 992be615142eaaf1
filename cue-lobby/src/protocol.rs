//! Wire envelope for frames carried on the notification bus.
//!
//! Frames are UTF-8 JSON text:
//! ```text
//! {"messageType":"lobby","action":"join","tableId":"…","userId":"…","timestamp":…}
//! {"messageType":"presence","type":"heartbeat","userId":"…","userName":"…","timestamp":…}
//! ```
//!
//! Legacy frames without `messageType` are lobby events.

use serde::{Deserialize, Serialize};

use crate::model::RuleType;

/// Discriminator key on every frame.
pub const MESSAGE_TYPE: &str = "messageType";

/// What happened to a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LobbyAction {
    Create,
    Join,
    Spectate,
    Complete,
    Delete,
    /// A join referenced a table that no longer exists.
    #[serde(rename = "expired table")]
    ExpiredTable,
    /// Synthetic greeting sent by the relay when a subscriber attaches.
    Connected,
}

/// Lightweight "something changed" notice. Receivers re-read the store
/// rather than trusting these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyEvent {
    pub action: LobbyAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_type: Option<RuleType>,
    #[serde(default)]
    pub timestamp: u64,
}

impl LobbyEvent {
    pub fn new(action: LobbyAction, table_id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            action,
            table_id: Some(table_id.into()),
            user_id: None,
            rule_type: None,
            timestamp,
        }
    }

    pub fn connected(timestamp: u64) -> Self {
        Self {
            action: LobbyAction::Connected,
            table_id: None,
            user_id: None,
            rule_type: None,
            timestamp,
        }
    }

    pub fn by(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_rule(mut self, rule_type: RuleType) -> Self {
        self.rule_type = Some(rule_type);
        self
    }

    /// Whether receivers should re-fetch table state.
    pub fn invalidates(&self) -> bool {
        self.action != LobbyAction::Connected
    }
}

/// Presence gossip kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceKind {
    Join,
    Heartbeat,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMessage {
    #[serde(rename = "type")]
    pub kind: PresenceKind,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    /// Sender's clock. Receivers fall back to their own clock when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// Any frame on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "lowercase")]
pub enum BusMessage {
    Lobby(LobbyEvent),
    Presence(PresenceMessage),
}

impl BusMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a text frame, treating frames without a discriminator as lobby
    /// events.
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        let mut value: serde_json::Value = serde_json::from_str(frame)?;
        if let Some(object) = value.as_object_mut() {
            object
                .entry(MESSAGE_TYPE)
                .or_insert_with(|| serde_json::Value::String("lobby".into()));
        }
        serde_json::from_value(value)
    }

    pub fn as_lobby(&self) -> Option<&LobbyEvent> {
        match self {
            BusMessage::Lobby(event) => Some(event),
            BusMessage::Presence(_) => None,
        }
    }

    pub fn as_presence(&self) -> Option<&PresenceMessage> {
        match self {
            BusMessage::Presence(msg) => Some(msg),
            BusMessage::Lobby(_) => None,
        }
    }
}

impl From<LobbyEvent> for BusMessage {
    fn from(event: LobbyEvent) -> Self {
        BusMessage::Lobby(event)
    }
}

impl From<PresenceMessage> for BusMessage {
    fn from(msg: PresenceMessage) -> Self {
        BusMessage::Presence(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lobby_event_wire_shape() {
        let event = LobbyEvent::new(LobbyAction::Join, "t1", 7).by("bob");
        let frame = BusMessage::from(event).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["messageType"], "lobby");
        assert_eq!(value["action"], "join");
        assert_eq!(value["tableId"], "t1");
        assert_eq!(value["userId"], "bob");
        assert!(value.get("ruleType").is_none());
    }

    #[test]
    fn test_expired_table_action_name() {
        let frame = BusMessage::from(LobbyEvent::new(LobbyAction::ExpiredTable, "t9", 1))
            .encode()
            .unwrap();
        assert!(frame.contains("\"action\":\"expired table\""));
    }

    #[test]
    fn test_presence_wire_shape() {
        let msg = PresenceMessage {
            kind: PresenceKind::Heartbeat,
            user_id: "u1".into(),
            user_name: "Alice".into(),
            locale: Some("en-GB".into()),
            origin_url: None,
            timestamp: Some(99),
        };
        let frame = BusMessage::from(msg.clone()).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["messageType"], "presence");
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["userName"], "Alice");
        assert!(value.get("originUrl").is_none());

        assert_eq!(BusMessage::decode(&frame).unwrap(), BusMessage::Presence(msg));
    }

    #[test]
    fn test_legacy_frame_defaults_to_lobby() {
        let decoded = BusMessage::decode(r#"{"action":"create","tableId":"t2"}"#).unwrap();
        let event = decoded.as_lobby().expect("lobby event");
        assert_eq!(event.action, LobbyAction::Create);
        assert_eq!(event.table_id.as_deref(), Some("t2"));
        assert_eq!(event.timestamp, 0);
    }

    #[test]
    fn test_connected_does_not_invalidate() {
        assert!(!LobbyEvent::connected(1).invalidates());
        assert!(LobbyEvent::new(LobbyAction::Delete, "t", 1).invalidates());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(BusMessage::decode("not json").is_err());
        assert!(BusMessage::decode(r#"{"messageType":"chat","text":"hi"}"#).is_err());
    }
}
